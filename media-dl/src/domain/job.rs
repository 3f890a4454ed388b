//! The job entity and its lifecycle.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Audio containers the extraction tool can convert to.
pub const SUPPORTED_FORMATS: &[&str] = &[
    "mp3", "m4a", "aac", "opus", "vorbis", "flac", "wav", "alac", "best",
];

/// VBR level `0`..=`10` or a bitrate such as `192` / `64K`.
static QUALITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:10|[0-9]|[1-9][0-9]{2,3}[kK]?|[1-9][0-9]{1,3}[kK])$").unwrap());

/// Opaque job identifier. Generated at submission and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = Error;

    /// An id that does not parse cannot name any job, so it is reported as
    /// not found rather than as a validation failure.
    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::not_found("Job", s))
    }
}

/// Requested output of a job. Immutable after submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Audio quality passed to the tool.
    pub quality: String,
    /// Target audio format.
    pub format: String,
    /// Expand the source as a playlist.
    pub is_playlist: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            quality: "192".to_string(),
            format: "mp3".to_string(),
            is_playlist: false,
        }
    }
}

impl JobOptions {
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_playlist(mut self, is_playlist: bool) -> Self {
        self.is_playlist = is_playlist;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_FORMATS.contains(&self.format.as_str()) {
            return Err(Error::validation(format!(
                "unsupported format '{}', expected one of {}",
                self.format,
                SUPPORTED_FORMATS.join(", ")
            )));
        }
        if !QUALITY_RE.is_match(&self.quality) {
            return Err(Error::validation(format!(
                "invalid quality '{}', expected 0-10 or a bitrate like 192K",
                self.quality
            )));
        }
        Ok(())
    }
}

/// Validate a source URL: non-empty, absolute, http or https.
pub fn validate_url(raw: &str) -> Result<url::Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("URL is required"));
    }

    let parsed = url::Url::parse(trimmed)
        .map_err(|e| Error::validation(format!("malformed URL '{}': {}", trimmed, e)))?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        "http" | "https" => Err(Error::validation(format!("URL '{}' has no host", trimmed))),
        other => Err(Error::validation(format!(
            "unsupported URL scheme '{}', expected http or https",
            other
        ))),
    }
}

/// Lifecycle state of a job. Moves strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested extraction and its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub options: JobOptions,
    pub state: JobState,
    pub added_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub progress: f64,
    /// Files the tool reported writing, in announcement order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<String>,
}

impl Job {
    pub fn new(url: impl Into<String>, options: JobOptions) -> Self {
        Self {
            id: JobId::new(),
            url: url.into(),
            options,
            state: JobState::Queued,
            added_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            error: None,
            progress: 0.0,
            output_files: Vec::new(),
        }
    }

    fn transition(&mut self, allowed_from: &[JobState], to: JobState) -> Result<()> {
        if !allowed_from.contains(&self.state) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// `Queued -> Running`.
    pub fn start(&mut self) -> Result<()> {
        self.transition(&[JobState::Queued], JobState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record a progress report and return the externally visible value.
    ///
    /// The value is clamped to `[0, 100]` and never drops below what was
    /// already reported.
    pub fn record_progress(&mut self, percent: f64) -> f64 {
        if percent.is_finite() {
            self.progress = self.progress.max(percent.clamp(0.0, 100.0));
        }
        self.progress
    }

    /// `Running -> Completed`.
    pub fn complete(&mut self) -> Result<()> {
        self.transition(&[JobState::Running], JobState::Completed)?;
        self.progress = 100.0;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `Running -> Failed`.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(&[JobState::Running], JobState::Failed)?;
        self.error = Some(error.into());
        self.failed_at = Some(Utc::now());
        Ok(())
    }

    /// `Queued | Running -> Cancelled`.
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(&[JobState::Queued, JobState::Running], JobState::Cancelled)?;
        self.cancelled_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(validate_url("  http://example.com/a  ").is_ok());

        for bad in ["", "   ", "not a url", "ftp://example.com/x", "file:///etc/passwd"] {
            let err = validate_url(bad).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_options_validation() {
        assert!(JobOptions::default().validate().is_ok());
        assert!(JobOptions::default().with_quality("0").validate().is_ok());
        assert!(JobOptions::default().with_quality("320K").validate().is_ok());
        assert!(JobOptions::default().with_format("flac").validate().is_ok());

        assert!(JobOptions::default().with_format("exe").validate().is_err());
        assert!(JobOptions::default().with_quality("11").validate().is_err());
        assert!(JobOptions::default().with_quality("loud").validate().is_err());
        assert!(JobOptions::default().with_quality("").validate().is_err());
    }

    #[test]
    fn test_lifecycle_moves_forward_only() {
        let mut job = Job::new("https://example.com/v", JobOptions::default());
        assert_eq!(job.state, JobState::Queued);
        assert!(job.complete().is_err());

        job.start().unwrap();
        assert!(job.started_at.is_some());
        assert!(job.start().is_err());

        job.complete().unwrap();
        assert_eq!(job.progress, 100.0);
        assert!(job.completed_at.is_some());

        assert!(job.fail("late").is_err());
        assert!(job.cancel().is_err());
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn test_queued_job_can_be_cancelled() {
        let mut job = Job::new("https://example.com/v", JobOptions::default());
        job.cancel().unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.cancelled_at.is_some());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let mut job = Job::new("https://example.com/v", JobOptions::default());
        assert_eq!(job.record_progress(10.0), 10.0);
        assert_eq!(job.record_progress(55.5), 55.5);
        assert_eq!(job.record_progress(30.0), 55.5);
        assert_eq!(job.record_progress(f64::NAN), 55.5);
        assert_eq!(job.record_progress(250.0), 100.0);
        assert_eq!(job.record_progress(-5.0), 100.0);
    }

    #[test]
    fn test_job_id_parse() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);

        let err = "download_123".parse::<JobId>().unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_failed_job_serialization() {
        let mut job = Job::new("https://example.com/v", JobOptions::default());
        job.start().unwrap();
        job.fail("tool exited with code 1").unwrap();

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"], "tool exited with code 1");
        assert!(json.get("completed_at").is_none());
        assert_eq!(json["options"]["format"], "mp3");
    }
}
