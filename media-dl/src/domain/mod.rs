//! Domain types: jobs and the events describing their lifecycle.

pub mod event;
pub mod job;

pub use event::{JobEvent, ProgressStatus};
pub use job::{Job, JobId, JobOptions, JobState, SUPPORTED_FORMATS, validate_url};
