//! Job scheduling: admission, pacing and the record of finished jobs.

pub mod governor;
pub mod history;
pub mod manager;

pub use governor::{Clearance, RateGovernor};
pub use history::HistoryLog;
pub use manager::{JobQueueManager, QueueSnapshot, ServiceStatus, Submission};
