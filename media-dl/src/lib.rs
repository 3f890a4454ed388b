//! Bounded media extraction queue.
//!
//! Jobs are submitted to a [`JobQueueManager`], which admits them in FIFO
//! order under a concurrency ceiling and a minimum launch interval, runs the
//! external extraction tool for each through a [`ProcessLauncher`], and
//! publishes lifecycle events to any number of subscribers.

pub mod broadcast;
pub mod config;
pub mod domain;
pub mod error;
pub mod info;
pub mod logging;
pub mod queue;
pub mod supervisor;

pub use broadcast::{Broadcaster, Subscription};
pub use config::AppConfig;
pub use domain::{Job, JobEvent, JobId, JobOptions, JobState};
pub use error::{Error, Result};
pub use queue::{JobQueueManager, QueueSnapshot, ServiceStatus, Submission};
pub use supervisor::{ProcessLauncher, ProcessSupervisor, ToolResolver, ToolStatus};
