use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use media_dl::config::AppConfig;
use media_dl::domain::{JobEvent, JobOptions};
use media_dl::{JobQueueManager, ProcessSupervisor, info, logging};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// How long running jobs get to wind down after an interrupt.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract audio from one or more URLs, printing job events as JSON lines
    Get {
        /// Source URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Target audio format
        #[arg(short, long, default_value = "mp3")]
        format: String,

        /// Audio quality (0-10 or a bitrate such as 192K)
        #[arg(short, long, default_value = "192")]
        quality: String,

        /// Expand playlist URLs
        #[arg(long)]
        playlist: bool,

        /// Override the maximum number of concurrent jobs
        #[arg(long)]
        concurrency: Option<usize>,

        /// Override the output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Print metadata for a URL as JSON
    Info {
        /// Source URL
        url: String,
    },
    /// Print extraction tool status as JSON
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let _log_guard = logging::init_logging(&config.logging)?;
    let background = CancellationToken::new();
    if let Some(log_dir) = &config.logging.log_dir {
        logging::start_retention_cleanup(log_dir.clone(), background.clone());
    }

    let result = match args.command {
        Command::Get {
            urls,
            format,
            quality,
            playlist,
            concurrency,
            output_dir,
        } => {
            if let Some(n) = concurrency {
                config.queue.max_concurrent = n;
            }
            if let Some(dir) = output_dir {
                config.tool.output_dir = dir;
            }
            config.validate()?;

            let options = JobOptions::default()
                .with_format(format)
                .with_quality(quality)
                .with_playlist(playlist);
            run_jobs(config, urls, options).await
        }
        Command::Info { url } => {
            let supervisor = ProcessSupervisor::new(config.tool.clone());
            let media = info::probe_media(supervisor.resolver(), &url, config.tool.probe_timeout())
                .await
                .with_context(|| format!("Failed to fetch media info for {}", url))?;
            println!("{}", serde_json::to_string_pretty(&media)?);
            Ok(())
        }
        Command::Status => {
            let supervisor = ProcessSupervisor::new(config.tool.clone());
            let manager = JobQueueManager::new(config.queue.clone(), Arc::new(supervisor));
            println!("{}", serde_json::to_string_pretty(&manager.status().await)?);
            Ok(())
        }
    };

    background.cancel();
    result
}

async fn run_jobs(config: AppConfig, urls: Vec<String>, options: JobOptions) -> anyhow::Result<()> {
    let supervisor = Arc::new(ProcessSupervisor::new(config.tool.clone()));
    let manager = JobQueueManager::new(config.queue.clone(), supervisor);
    let mut events = manager.subscribe();

    let mut pending = HashSet::new();
    let mut rejected = 0usize;
    for url in &urls {
        match manager.submit(url, options.clone()) {
            Ok(submission) => {
                pending.insert(submission.job_id);
            }
            Err(e) => {
                error!(url = %url, error = %e, "Submission rejected");
                rejected += 1;
            }
        }
    }

    let mut failed = 0usize;
    let mut interrupted = false;
    while !pending.is_empty() {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Event stream closed before all jobs finished");
                    break;
                };
                println!("{}", event.to_json()?);
                if event.is_terminal()
                    && pending.remove(&event.job_id())
                    && matches!(event, JobEvent::Failed { .. })
                {
                    failed += 1;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupt received, cancelling all jobs");
                interrupted = true;
                manager.shutdown();
            }
        }
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, manager.wait_idle())
        .await
        .is_err()
    {
        warn!("Timed out waiting for tool processes to exit");
    }

    if rejected + failed > 0 {
        anyhow::bail!("{} rejected, {} failed", rejected, failed);
    }
    Ok(())
}
