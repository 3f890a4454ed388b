//! Job lifecycle events delivered to subscribers.

use serde::{Deserialize, Serialize};

use super::job::{Job, JobId};

/// Phase reported alongside a progress value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Downloading,
    Completed,
}

/// A job lifecycle event.
///
/// Serializes to the subscriber wire frame `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum JobEvent {
    /// Accepted into the pending set. `position` is 1-based.
    Queued { job: Job, position: usize },
    Started { job_id: JobId },
    Progress {
        job_id: JobId,
        progress: f64,
        status: ProgressStatus,
    },
    Completed { job_id: JobId },
    Failed { job_id: JobId, error: String },
    Cancelled { job_id: JobId },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Queued { job, .. } => job.id,
            JobEvent::Started { job_id }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id } => *job_id,
        }
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Queued { .. } => "queued",
            JobEvent::Started { .. } => "started",
            JobEvent::Progress { .. } => "progress",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether this is the single terminal event of a job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed { .. } | JobEvent::Failed { .. } | JobEvent::Cancelled { .. }
        )
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
