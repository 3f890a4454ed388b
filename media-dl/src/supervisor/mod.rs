//! Supervision of external tool processes.
//!
//! The queue manager talks to this layer only through [`ProcessLauncher`]:
//! it hands over a [`LaunchRequest`], keeps the returned [`ProcessHandle`]
//! for cancellation, and listens for [`SupervisorEvent`]s on the channel it
//! supplied. Exactly one [`SupervisorEvent::Exited`] is sent per launched
//! process, after every progress event for that process.

pub mod args;
pub mod failure;
pub mod invocation;
pub mod output_reader;
pub mod process;
pub mod progress;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{JobId, JobOptions};

pub use failure::{FailureKind, ProcessExit, StderrTail};
pub use invocation::{InvocationStrategy, ToolResolver, ToolStatus};
pub use output_reader::OutputRecordReader;
pub use process::ProcessSupervisor;

/// Everything a launcher needs to start one job's process.
#[derive(Debug)]
pub struct LaunchRequest {
    pub job_id: JobId,
    pub url: String,
    pub options: JobOptions,
    /// Where progress and the exit report are delivered.
    pub events: mpsc::Sender<SupervisorEvent>,
}

/// Reports from a running process to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// Parsed percentage complete, already clamped to `[0, 100]`.
    Progress(f64),
    /// The tool announced an output file.
    OutputFile(String),
    /// The process is gone. Sent exactly once, last.
    Exited(ExitReport),
}

/// Final report for one process.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitReport {
    pub exit: ProcessExit,
    /// Whether [`ProcessHandle::terminate`] was called before the exit.
    pub terminate_requested: bool,
    /// Most recent error output, used for failure classification.
    pub stderr_tail: String,
}

/// Terminal outcome of a job's process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl ExitReport {
    /// Decide the job outcome.
    ///
    /// A requested termination always yields `Cancelled`, whatever the exit
    /// status says.
    pub fn outcome(&self) -> JobOutcome {
        if self.terminate_requested {
            return JobOutcome::Cancelled;
        }
        if self.exit.success() {
            return JobOutcome::Completed;
        }
        JobOutcome::Failed(FailureKind::classify(&self.exit, &self.stderr_tail).to_string())
    }
}

/// Handle to one running process.
///
/// Cloning is cheap; all clones control the same process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    job_id: JobId,
    cancellation_token: CancellationToken,
    terminate_requested: Arc<AtomicBool>,
}

impl ProcessHandle {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            cancellation_token: CancellationToken::new(),
            terminate_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Request termination. Does not wait for the process to exit.
    ///
    /// The intent is recorded before the signal goes out, so the exit report
    /// of a terminated process is always marked as requested.
    pub fn terminate(&self) {
        self.terminate_requested.store(true, Ordering::SeqCst);
        self.cancellation_token.cancel();
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.terminate_requested.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }
}

/// Failure to get a process running at all.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Extraction tool is not installed (tried: {})", .tried.join(", "))]
    ToolUnavailable { tried: Vec<String> },

    #[error("Extraction tool '{program}' was not found")]
    NotFound { program: String },

    #[error("Permission denied launching '{program}'")]
    PermissionDenied { program: String },

    #[error("Failed to launch '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to capture output of '{program}'")]
    MissingPipe { program: String },
}

impl SpawnError {
    pub fn from_io(program: impl Into<String>, source: io::Error) -> Self {
        let program = program.into();
        match source.kind() {
            io::ErrorKind::NotFound => SpawnError::NotFound { program },
            io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied { program },
            _ => SpawnError::Io { program, source },
        }
    }
}

/// Starts tool processes for jobs.
#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    /// Spawn the process for `request` and start supervising it.
    ///
    /// On success the launcher owns the process and must eventually send
    /// exactly one [`SupervisorEvent::Exited`] on `request.events`.
    async fn launch(&self, request: LaunchRequest) -> Result<ProcessHandle, SpawnError>;

    /// Availability of the underlying tool.
    async fn tool_status(&self) -> ToolStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(exit: ProcessExit, terminate_requested: bool, stderr: &str) -> ExitReport {
        ExitReport {
            exit,
            terminate_requested,
            stderr_tail: stderr.to_string(),
        }
    }

    #[test]
    fn test_outcome_from_exit() {
        assert_eq!(
            report(ProcessExit::Code(0), false, "").outcome(),
            JobOutcome::Completed
        );
        assert_eq!(
            report(ProcessExit::Code(1), false, "").outcome(),
            JobOutcome::Failed("tool exited with code 1".to_string())
        );
    }

    #[test]
    fn test_requested_termination_wins_over_exit_status() {
        for exit in [ProcessExit::Code(0), ProcessExit::Code(143), ProcessExit::Signal] {
            assert_eq!(
                report(exit, true, "HTTP Error 429").outcome(),
                JobOutcome::Cancelled
            );
        }
    }

    #[test]
    fn test_terminate_sets_intent_before_cancelling() {
        let handle = ProcessHandle::new(JobId::new());
        let observer = handle.clone();
        assert!(!observer.is_terminate_requested());

        handle.terminate();
        assert!(observer.is_terminate_requested());
        assert!(observer.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_spawn_error_classification() {
        let err = SpawnError::from_io("yt-dlp", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, SpawnError::NotFound { .. }));
        assert_eq!(err.to_string(), "Extraction tool 'yt-dlp' was not found");

        let err = SpawnError::ToolUnavailable {
            tried: vec!["yt-dlp".into(), "python3 -m yt_dlp".into()],
        };
        assert_eq!(
            err.to_string(),
            "Extraction tool is not installed (tried: yt-dlp, python3 -m yt_dlp)"
        );
    }
}
