//! Spawning and watching the extraction tool.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::args::build_args;
use super::failure::{ProcessExit, StderrTail};
use super::output_reader::OutputRecordReader;
use super::progress::{parse_destination, parse_progress};
use super::{
    ExitReport, LaunchRequest, ProcessHandle, ProcessLauncher, SpawnError, SupervisorEvent,
    ToolResolver, ToolStatus,
};
use crate::config::ToolConfig;

/// [`ProcessLauncher`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    config: ToolConfig,
    resolver: Arc<ToolResolver>,
}

impl ProcessSupervisor {
    pub fn new(config: ToolConfig) -> Self {
        let resolver = Arc::new(ToolResolver::new(
            config.candidates.clone(),
            config.probe_timeout(),
        ));
        Self { config, resolver }
    }

    /// Use an existing resolver, sharing its cached status.
    pub fn with_resolver(config: ToolConfig, resolver: Arc<ToolResolver>) -> Self {
        Self { config, resolver }
    }

    pub fn resolver(&self) -> &Arc<ToolResolver> {
        &self.resolver
    }
}

#[async_trait]
impl ProcessLauncher for ProcessSupervisor {
    async fn launch(&self, request: LaunchRequest) -> Result<ProcessHandle, SpawnError> {
        let strategy = match self.resolver.resolve().await {
            ToolStatus::Available { strategy, .. } => strategy.clone(),
            ToolStatus::Unavailable { tried } => {
                return Err(SpawnError::ToolUnavailable {
                    tried: tried.clone(),
                });
            }
        };

        let args = build_args(&request.url, &request.options, &self.config);
        info!(
            job_id = %request.job_id,
            strategy = %strategy,
            url = %request.url,
            "Starting extraction"
        );
        debug!(job_id = %request.job_id, args = ?args, "Tool arguments");

        let mut child = process_utils::tokio_command(&strategy.program)
            .args(&strategy.args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpawnError::from_io(&strategy.program, e))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            return Err(SpawnError::MissingPipe {
                program: strategy.program,
            });
        };

        let handle = ProcessHandle::new(request.job_id);
        tokio::spawn(supervise(
            child,
            stdout,
            stderr,
            handle.clone(),
            request.events,
            self.config.stderr_tail_bytes,
        ));

        Ok(handle)
    }

    async fn tool_status(&self) -> ToolStatus {
        self.resolver.resolve().await.clone()
    }
}

/// Drive one child process to completion.
///
/// Reads both streams until they close, forwarding progress as it appears,
/// then reaps the child and sends the single exit report. Cancellation kills
/// the child at any point, including after its output has closed.
async fn supervise(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    handle: ProcessHandle,
    events: mpsc::Sender<SupervisorEvent>,
    stderr_tail_bytes: usize,
) {
    let job_id = handle.job_id();
    let cancellation_token = handle.cancellation_token().clone();
    let mut stdout = OutputRecordReader::new(stdout);
    let mut stderr = OutputRecordReader::new(stderr);
    let mut tail = StderrTail::new(stderr_tail_bytes);
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut kill_sent = false;

    while stdout_open || stderr_open {
        tokio::select! {
            _ = cancellation_token.cancelled(), if !kill_sent => {
                kill_sent = true;
                debug!(%job_id, "Terminating tool process");
                if let Err(e) = child.start_kill() {
                    warn!(%job_id, error = %e, "Failed to signal tool process");
                }
            }
            record = stdout.next_record(), if stdout_open => match record {
                Ok(Some(line)) => {
                    trace!(%job_id, line = %line, "tool stdout");
                    if let Some(percent) = parse_progress(&line) {
                        let _ = events.send(SupervisorEvent::Progress(percent)).await;
                    } else if let Some(path) = parse_destination(&line) {
                        let _ = events.send(SupervisorEvent::OutputFile(path.to_string())).await;
                    }
                }
                Ok(None) => stdout_open = false,
                Err(e) => {
                    warn!(%job_id, error = %e, "Error reading tool stdout");
                    stdout_open = false;
                }
            },
            record = stderr.next_record(), if stderr_open => match record {
                Ok(Some(line)) => {
                    debug!(%job_id, line = %line, "tool stderr");
                    tail.push_line(&line);
                }
                Ok(None) => stderr_open = false,
                Err(e) => {
                    warn!(%job_id, error = %e, "Error reading tool stderr");
                    stderr_open = false;
                }
            },
        }
    }

    // The tool may close its pipes and keep running; termination still has to reach it.
    let waited = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = cancellation_token.cancelled(), if !kill_sent => {
                kill_sent = true;
                debug!(%job_id, "Terminating tool process after its output closed");
                if let Err(e) = child.start_kill() {
                    warn!(%job_id, error = %e, "Failed to signal tool process");
                }
            }
        }
    };

    let exit = match waited {
        Ok(status) => match status.code() {
            Some(code) => {
                if code != 0 {
                    debug!(%job_id, code, "Tool exited with non-zero code");
                }
                ProcessExit::Code(code)
            }
            None => ProcessExit::Signal,
        },
        Err(e) => {
            warn!(%job_id, error = %e, "Error waiting for tool process");
            ProcessExit::WaitFailed(e.to_string())
        }
    };

    let report = ExitReport {
        exit,
        terminate_requested: handle.is_terminate_requested(),
        stderr_tail: tail.into_string(),
    };
    if events.send(SupervisorEvent::Exited(report)).await.is_err() {
        debug!(%job_id, "Exit report dropped, nobody is listening");
    }
}
