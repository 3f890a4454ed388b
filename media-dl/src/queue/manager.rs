//! The job scheduler.
//!
//! [`JobQueueManager`] owns the pending queue, the active set and the history
//! ring behind a single mutex. Every state transition, and the event that
//! announces it, happens while holding that lock, so events for one job are
//! published in the order the transitions happened. The lock is never held
//! across an await point; process launches and output handling run in
//! per-job tasks that report back through the same entry points.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::governor::{Clearance, RateGovernor};
use super::history::HistoryLog;
use crate::broadcast::{Broadcaster, Subscription};
use crate::config::QueueConfig;
use crate::domain::{Job, JobEvent, JobId, JobOptions, ProgressStatus, validate_url};
use crate::supervisor::{
    JobOutcome, LaunchRequest, ProcessHandle, ProcessLauncher, SupervisorEvent, ToolStatus,
};
use crate::{Error, Result};

/// Buffer between a job's supervisor and its reporting task.
const SUPERVISOR_CHANNEL_CAPACITY: usize = 64;

/// Result of a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: JobId,
    /// 1-based position in the pending queue at submission time.
    pub position: usize,
}

/// Read-only view of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    /// Waiting jobs in admission order.
    pub pending: Vec<Job>,
    /// Running jobs ordered by start time.
    pub active_ids: Vec<JobId>,
    pub active: Vec<Job>,
    /// Most recent terminal jobs, oldest first.
    pub recent_history: Vec<Job>,
}

/// Service health summary.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub tool_available: bool,
    pub tool_version: Option<String>,
    pub tool: ToolStatus,
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub max_queued: usize,
    /// Live event subscribers.
    pub subscribers: usize,
}

/// A job that has left the pending queue and not yet reached a terminal state.
struct ActiveJob {
    job: Job,
    /// `None` until the launcher returns.
    handle: Option<ProcessHandle>,
    /// Set once by `cancel`/`shutdown`. The `cancelled` event has already
    /// been published when this is true.
    cancel_requested: bool,
}

struct QueueState {
    pending: VecDeque<Job>,
    active: HashMap<JobId, ActiveJob>,
    history: HistoryLog,
    /// Every id ever handed out, so finished jobs stay known after leaving history.
    issued: HashSet<JobId>,
    retry: Option<JoinHandle<()>>,
    accepting: bool,
}

struct Inner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    governor: RateGovernor,
    broadcaster: Broadcaster,
    launcher: Arc<dyn ProcessLauncher>,
    shutdown_token: CancellationToken,
    /// Pending plus active job count, for `wait_idle`.
    outstanding: watch::Sender<usize>,
}

/// Bounded FIFO job queue with a concurrency ceiling and launch pacing.
///
/// Cheap to clone; clones share the same queue. Methods that can start work
/// must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct JobQueueManager {
    inner: Arc<Inner>,
}

impl JobQueueManager {
    pub fn new(config: QueueConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let (outstanding, _) = watch::channel(0);
        let inner = Inner {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                active: HashMap::new(),
                history: HistoryLog::new(config.history_capacity),
                issued: HashSet::new(),
                retry: None,
                accepting: true,
            }),
            governor: RateGovernor::new(config.min_launch_interval()),
            broadcaster: Broadcaster::new(config.subscriber_buffer),
            launcher,
            shutdown_token: CancellationToken::new(),
            outstanding,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Validate and enqueue a job, then try to admit work.
    pub fn submit(&self, url: &str, options: JobOptions) -> Result<Submission> {
        let url = validate_url(url)?;
        options.validate()?;

        let submission = {
            let mut state = self.inner.state.lock();
            if !state.accepting {
                return Err(Error::Other("Queue is shutting down".to_string()));
            }
            if state.pending.len() >= self.inner.config.max_queued {
                return Err(Error::QueueFull {
                    capacity: self.inner.config.max_queued,
                });
            }

            let job = Job::new(url.as_str(), options);
            let job_id = job.id;
            state.issued.insert(job_id);
            state.pending.push_back(job.clone());
            let position = state.pending.len();

            self.inner
                .broadcaster
                .publish(JobEvent::Queued { job, position });
            self.inner.publish_outstanding(&state);
            Submission { job_id, position }
        };

        info!(
            job_id = %submission.job_id,
            url = %url,
            position = submission.position,
            "Job queued"
        );
        self.inner.admit();
        Ok(submission)
    }

    /// Cancel a job.
    ///
    /// Queued jobs are removed directly. Running jobs have their process
    /// terminated; they stay in the active set until the process exits and
    /// are then recorded as `Cancelled`. Cancelling a finished job is a no-op,
    /// even once it has aged out of history.
    pub fn cancel(&self, job_id: &JobId) -> Result<()> {
        let mut state = self.inner.state.lock();

        if let Some(index) = state.pending.iter().position(|job| job.id == *job_id) {
            if let Some(mut job) = state.pending.remove(index) {
                settle(&mut job, Job::cancel);
                self.inner
                    .broadcaster
                    .publish(JobEvent::Cancelled { job_id: *job_id });
                state.history.record(job);
                self.inner.publish_outstanding(&state);
                info!(%job_id, "Queued job cancelled");
            }
            return Ok(());
        }

        if let Some(entry) = state.active.get_mut(job_id) {
            if entry.cancel_requested {
                debug!(%job_id, "Cancellation already requested");
                return Ok(());
            }
            entry.cancel_requested = true;
            if let Some(handle) = &entry.handle {
                handle.terminate();
            }
            self.inner
                .broadcaster
                .publish(JobEvent::Cancelled { job_id: *job_id });
            info!(%job_id, "Running job cancelled, terminating process");
            return Ok(());
        }

        if state.issued.contains(job_id) {
            debug!(%job_id, "Cancel of finished job ignored");
            return Ok(());
        }

        Err(Error::not_found("Job", job_id.to_string()))
    }

    /// Cancel every queued job. Refused while any job is running.
    ///
    /// Returns the number of jobs removed.
    pub fn clear_queue(&self) -> Result<usize> {
        let mut state = self.inner.state.lock();
        if !state.active.is_empty() {
            return Err(Error::ActiveJobsExist {
                active: state.active.len(),
            });
        }

        let cleared = self.inner.cancel_pending(&mut state);
        self.inner.publish_outstanding(&state);
        info!(count = cleared, "Queue cleared");
        Ok(cleared)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.state.lock();

        let mut active: Vec<Job> = state.active.values().map(|e| e.job.clone()).collect();
        active.sort_by_key(|job| job.started_at);

        QueueSnapshot {
            pending: state.pending.iter().cloned().collect(),
            active_ids: active.iter().map(|job| job.id).collect(),
            active,
            recent_history: state
                .history
                .recent(self.inner.config.history_snapshot_len),
        }
    }

    /// Look up a job wherever it currently lives.
    pub fn job(&self, job_id: &JobId) -> Option<Job> {
        let state = self.inner.state.lock();
        state
            .pending
            .iter()
            .find(|job| job.id == *job_id)
            .or_else(|| state.active.get(job_id).map(|entry| &entry.job))
            .or_else(|| state.history.get(job_id))
            .cloned()
    }

    pub async fn status(&self) -> ServiceStatus {
        let tool = self.inner.launcher.tool_status().await;
        let (active, queued) = {
            let state = self.inner.state.lock();
            (state.active.len(), state.pending.len())
        };

        ServiceStatus {
            tool_available: tool.is_available(),
            tool_version: tool.version().map(str::to_string),
            tool,
            active,
            queued,
            max_concurrent: self.inner.config.max_concurrent,
            max_queued: self.inner.config.max_queued,
            subscribers: self.inner.broadcaster.subscriber_count(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.broadcaster.subscribe()
    }

    /// Wait until no job is queued or running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        let _ = rx.wait_for(|outstanding| *outstanding == 0).await;
    }

    /// Stop admitting work and cancel everything.
    ///
    /// Queued jobs are cancelled immediately; running processes are asked to
    /// terminate and finish as `Cancelled` once they exit. Use
    /// [`wait_idle`](Self::wait_idle) to wait for that.
    pub fn shutdown(&self) {
        self.inner.shutdown_token.cancel();

        let mut state = self.inner.state.lock();
        state.accepting = false;
        if let Some(retry) = state.retry.take() {
            retry.abort();
        }

        let cleared = self.inner.cancel_pending(&mut state);

        let mut terminated = 0;
        for (job_id, entry) in state.active.iter_mut() {
            if entry.cancel_requested {
                continue;
            }
            entry.cancel_requested = true;
            if let Some(handle) = &entry.handle {
                handle.terminate();
            }
            self.inner
                .broadcaster
                .publish(JobEvent::Cancelled { job_id: *job_id });
            terminated += 1;
        }

        self.inner.publish_outstanding(&state);
        info!(cleared, terminated, "Job queue shutting down");
    }
}

impl Inner {
    fn publish_outstanding(&self, state: &QueueState) {
        self.outstanding
            .send_replace(state.pending.len() + state.active.len());
    }

    fn cancel_pending(&self, state: &mut QueueState) -> usize {
        let cleared: Vec<Job> = state.pending.drain(..).collect();
        let count = cleared.len();
        for mut job in cleared {
            settle(&mut job, Job::cancel);
            self.broadcaster
                .publish(JobEvent::Cancelled { job_id: job.id });
            state.history.record(job);
        }
        count
    }

    /// Promote queued jobs while capacity and the rate governor allow.
    ///
    /// Each job leaves the pending queue under the lock before anything is
    /// awaited, so concurrent calls cannot admit the same job twice.
    fn admit(self: &Arc<Self>) {
        let mut launches = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.accepting {
                return;
            }

            while state.active.len() < self.config.max_concurrent && !state.pending.is_empty() {
                if let Clearance::Wait(wait) = self.governor.acquire() {
                    self.schedule_retry(&mut state, wait);
                    break;
                }

                let Some(mut job) = state.pending.pop_front() else {
                    break;
                };
                let job_id = job.id;
                settle(&mut job, Job::start);
                self.broadcaster.publish(JobEvent::Started { job_id });
                launches.push(job.clone());
                state.active.insert(
                    job_id,
                    ActiveJob {
                        job,
                        handle: None,
                        cancel_requested: false,
                    },
                );
            }
        }

        for job in launches {
            info!(job_id = %job.id, "Job started");
            tokio::spawn(self.clone().run_job(job));
        }
    }

    /// Arrange for `admit` to run again after `wait`. At most one retry is
    /// pending at a time; shutdown cancels it.
    fn schedule_retry(self: &Arc<Self>, state: &mut QueueState, wait: Duration) {
        if state.retry.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        debug!(?wait, "Admission deferred by rate governor");
        let weak: Weak<Self> = Arc::downgrade(self);
        let token = self.shutdown_token.clone();
        state.retry = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Admission retry cancelled");
                }
                _ = tokio::time::sleep(wait) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.state.lock().retry = None;
                        inner.admit();
                    }
                }
            }
        }));
    }

    /// Launch one job's process and relay its reports until it exits.
    async fn run_job(self: Arc<Self>, job: Job) {
        let job_id = job.id;
        let (events_tx, mut events_rx) = mpsc::channel(SUPERVISOR_CHANNEL_CAPACITY);
        let request = LaunchRequest {
            job_id,
            url: job.url,
            options: job.options,
            events: events_tx,
        };

        match self.launcher.launch(request).await {
            Ok(handle) => self.attach_handle(job_id, handle),
            Err(e) => {
                warn!(%job_id, error = %e, "Failed to launch extraction tool");
                self.finish(job_id, JobOutcome::Failed(e.to_string()));
                return;
            }
        }

        while let Some(event) = events_rx.recv().await {
            match event {
                SupervisorEvent::Progress(percent) => self.apply_progress(job_id, percent),
                SupervisorEvent::OutputFile(path) => self.record_output_file(job_id, path),
                SupervisorEvent::Exited(report) => {
                    self.finish(job_id, report.outcome());
                    return;
                }
            }
        }

        error!(%job_id, "Supervisor stopped without an exit report");
        self.finish(
            job_id,
            JobOutcome::Failed("process supervision ended unexpectedly".to_string()),
        );
    }

    fn attach_handle(&self, job_id: JobId, handle: ProcessHandle) {
        let mut state = self.state.lock();
        match state.active.get_mut(&job_id) {
            Some(entry) => {
                if entry.cancel_requested {
                    handle.terminate();
                }
                entry.handle = Some(handle);
            }
            None => handle.terminate(),
        }
    }

    fn apply_progress(&self, job_id: JobId, percent: f64) {
        let mut state = self.state.lock();
        let Some(entry) = state.active.get_mut(&job_id) else {
            return;
        };
        if entry.cancel_requested {
            return;
        }

        let progress = entry.job.record_progress(percent);
        self.broadcaster.publish(JobEvent::Progress {
            job_id,
            progress,
            status: ProgressStatus::Downloading,
        });
    }

    fn record_output_file(&self, job_id: JobId, path: String) {
        let mut state = self.state.lock();
        if let Some(entry) = state.active.get_mut(&job_id) {
            debug!(%job_id, path = %path, "Tool output file");
            if !entry.job.output_files.contains(&path) {
                entry.job.output_files.push(path);
            }
        }
    }

    /// Apply a job's single terminal transition and free its slot.
    fn finish(self: &Arc<Self>, job_id: JobId, outcome: JobOutcome) {
        {
            let mut state = self.state.lock();
            let Some(ActiveJob {
                mut job,
                cancel_requested,
                ..
            }) = state.active.remove(&job_id)
            else {
                return;
            };

            let outcome = if cancel_requested {
                JobOutcome::Cancelled
            } else {
                outcome
            };

            match outcome {
                JobOutcome::Completed => {
                    settle(&mut job, Job::complete);
                    self.broadcaster.publish(JobEvent::Progress {
                        job_id,
                        progress: 100.0,
                        status: ProgressStatus::Completed,
                    });
                    self.broadcaster.publish(JobEvent::Completed { job_id });
                    info!(%job_id, "Job completed");
                }
                JobOutcome::Failed(error) => {
                    settle(&mut job, |job| job.fail(error.clone()));
                    self.broadcaster.publish(JobEvent::Failed { job_id, error: error.clone() });
                    warn!(%job_id, error = %error, "Job failed");
                }
                JobOutcome::Cancelled => {
                    settle(&mut job, Job::cancel);
                    if !cancel_requested {
                        self.broadcaster.publish(JobEvent::Cancelled { job_id });
                    }
                    info!(%job_id, "Job cancelled");
                }
            }

            state.history.record(job);
            self.publish_outstanding(&state);
        }

        self.admit();
    }
}

/// Apply a transition the scheduler expects to be valid, logging if it is not.
fn settle(job: &mut Job, transition: impl FnOnce(&mut Job) -> Result<()>) {
    if let Err(e) = transition(job) {
        error!(job_id = %job.id, state = %job.state, error = %e, "Unexpected job transition");
    }
}
