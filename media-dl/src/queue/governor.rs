//! Launch cadence control.
//!
//! Independent of the concurrency ceiling: even with free slots, two process
//! launches are never granted closer together than the configured interval.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Outcome of asking the governor for a launch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clearance {
    /// Launch now. The grant has already been recorded.
    Proceed,
    /// Ask again after this long.
    Wait(Duration),
}

/// Enforces a minimum interval between successive launches process-wide.
#[derive(Debug)]
pub struct RateGovernor {
    min_interval: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl RateGovernor {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_grant: Mutex::new(None),
        }
    }

    /// Decide whether a launch may happen now.
    ///
    /// The check and the timestamp update happen under one lock, so two
    /// callers can never both be told to proceed within one interval.
    pub fn acquire(&self) -> Clearance {
        let now = Instant::now();
        let mut last = self.last_grant.lock();

        if let Some(prev) = *last {
            let elapsed = now.saturating_duration_since(prev);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                trace!(?wait, "Launch deferred by rate governor");
                return Clearance::Wait(wait);
            }
        }

        *last = Some(now);
        Clearance::Proceed
    }
}
