//! Bounded record of finished jobs.

use std::collections::VecDeque;

use crate::domain::{Job, JobId};

/// Ring of the most recent terminal jobs, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: VecDeque<Job>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a terminal job, evicting the oldest entry when full.
    pub fn record(&mut self, job: Job) {
        debug_assert!(job.is_terminal(), "only terminal jobs belong in history");
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(job);
    }

    /// The last `n` entries in chronological order.
    pub fn recent(&self, n: usize) -> Vec<Job> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.entries.iter().rev().find(|job| job.id == *id)
    }
}
