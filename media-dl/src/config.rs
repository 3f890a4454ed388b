//! Application configuration.
//!
//! All sections deserialize with defaults, so an empty TOML file (or no file
//! at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::supervisor::InvocationStrategy;
use crate::{Error, Result};

/// Scheduling limits for the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum jobs running at once.
    pub max_concurrent: usize,
    /// Maximum jobs waiting for admission. Submissions beyond this are rejected.
    pub max_queued: usize,
    /// Number of terminal jobs kept in the history ring.
    pub history_capacity: usize,
    /// Number of history entries included in a queue snapshot.
    pub history_snapshot_len: usize,
    /// Minimum time between two process launches, in milliseconds.
    pub min_launch_interval_ms: u64,
    /// Buffer size of each subscriber's event channel.
    pub subscriber_buffer: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queued: 100,
            history_capacity: 50,
            history_snapshot_len: 20,
            min_launch_interval_ms: 1000,
            subscriber_buffer: 256,
        }
    }
}

impl QueueConfig {
    pub fn min_launch_interval(&self) -> Duration {
        Duration::from_millis(self.min_launch_interval_ms)
    }
}

/// How the external extraction tool is located and invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Invocation strategies tried in order until one answers `--version`.
    pub candidates: Vec<InvocationStrategy>,
    /// Directory the tool writes finished files into.
    pub output_dir: PathBuf,
    /// Upper bound on the title part of output filenames, in bytes.
    pub max_filename_bytes: usize,
    /// Maximum number of playlist entries expanded per job.
    pub playlist_item_cap: usize,
    /// Retries passed through to the tool.
    pub retries: u32,
    /// Socket timeout passed through to the tool, in seconds.
    pub socket_timeout_secs: u64,
    /// Timeout for short-lived tool runs (version and metadata probes), in seconds.
    pub probe_timeout_secs: u64,
    /// Bytes of error output retained per job for failure classification.
    pub stderr_tail_bytes: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            candidates: InvocationStrategy::defaults(),
            output_dir: PathBuf::from("downloads"),
            max_filename_bytes: 200,
            playlist_item_cap: 50,
            retries: 3,
            socket_timeout_secs: 30,
            probe_timeout_secs: 30,
            stderr_tail_bytes: 16 * 1024,
        }
    }
}

impl ToolConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set.
    pub filter: Option<String>,
    /// Directory for daily-rotated log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub tool: ToolConfig,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Parse configuration from TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        debug!(path = %path.display(), "Loading configuration");
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.max_concurrent == 0 {
            return Err(Error::config("queue.max_concurrent must be at least 1"));
        }
        if self.queue.max_queued == 0 {
            return Err(Error::config("queue.max_queued must be at least 1"));
        }
        if self.queue.history_capacity == 0 {
            return Err(Error::config("queue.history_capacity must be at least 1"));
        }
        if self.queue.subscriber_buffer == 0 {
            return Err(Error::config("queue.subscriber_buffer must be at least 1"));
        }
        if self.tool.candidates.is_empty() {
            return Err(Error::config("tool.candidates must not be empty"));
        }
        if let Some(bad) = self
            .tool
            .candidates
            .iter()
            .find(|c| c.program.trim().is_empty())
        {
            return Err(Error::config(format!(
                "tool candidate has an empty program: {:?}",
                bad
            )));
        }
        if self.tool.playlist_item_cap == 0 {
            return Err(Error::config("tool.playlist_item_cap must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_limits() {
        let config = AppConfig::default();
        assert_eq!(config.queue.max_concurrent, 3);
        assert_eq!(config.queue.history_snapshot_len, 20);
        assert_eq!(config.queue.min_launch_interval(), Duration::from_secs(1));
        assert_eq!(config.tool.candidates.len(), 3);
        assert_eq!(config.tool.candidates[0].program, "yt-dlp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [queue]
            max_concurrent = 1
            max_queued = 2

            [tool]
            output_dir = "/tmp/out"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_concurrent, 1);
        assert_eq!(config.queue.max_queued, 2);
        assert_eq!(config.queue.history_capacity, 50);
        assert_eq!(config.tool.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.tool.retries, 3);
    }

    #[test]
    fn test_custom_candidates() {
        let config = AppConfig::from_toml_str(
            r#"
            [[tool.candidates]]
            program = "/opt/yt-dlp/bin/yt-dlp"

            [[tool.candidates]]
            program = "python3"
            args = ["-m", "yt_dlp"]
            "#,
        )
        .unwrap();

        assert_eq!(config.tool.candidates.len(), 2);
        assert_eq!(config.tool.candidates[1].args, vec!["-m", "yt_dlp"]);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = AppConfig::from_toml_str("[queue]\nmax_concurrent = 0\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = AppConfig::from_toml_str("[queue\nmax_concurrent = 1").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media-dl.toml");
        std::fs::write(&path, "[queue]\nmax_queued = 7\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.queue.max_queued, 7);

        let missing = AppConfig::load(Some(&dir.path().join("nope.toml")));
        assert!(missing.is_err());
        assert_eq!(AppConfig::load(None).unwrap(), AppConfig::default());
    }
}
