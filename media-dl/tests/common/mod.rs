#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use media_dl::config::QueueConfig;
use media_dl::domain::{JobEvent, JobId};
use media_dl::supervisor::{
    ExitReport, InvocationStrategy, LaunchRequest, ProcessExit, ProcessHandle, ProcessLauncher,
    SpawnError, SupervisorEvent, ToolStatus,
};
use media_dl::{JobQueueManager, Subscription};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Launcher whose "processes" are driven by the test.
pub struct ScriptedLauncher {
    launched_tx: mpsc::UnboundedSender<(JobId, Instant)>,
    running: Mutex<HashMap<JobId, (ProcessHandle, mpsc::Sender<SupervisorEvent>)>>,
    fail_spawn: AtomicBool,
}

pub struct Launches {
    rx: mpsc::UnboundedReceiver<(JobId, Instant)>,
}

impl Launches {
    /// Next launched job, failing the test if none arrives in time.
    pub async fn next(&mut self) -> (JobId, Instant) {
        tokio::time::timeout(Duration::from_secs(30), self.rx.recv())
            .await
            .expect("timed out waiting for a launch")
            .expect("launcher dropped")
    }

    pub fn try_next(&mut self) -> Option<(JobId, Instant)> {
        self.rx.try_recv().ok()
    }
}

impl ScriptedLauncher {
    pub fn new() -> (Arc<Self>, Launches) {
        let (launched_tx, rx) = mpsc::unbounded_channel();
        let launcher = Arc::new(Self {
            launched_tx,
            running: Mutex::new(HashMap::new()),
            fail_spawn: AtomicBool::new(false),
        });
        (launcher, Launches { rx })
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub fn handle(&self, job_id: JobId) -> Option<ProcessHandle> {
        self.running.lock().get(&job_id).map(|(h, _)| h.clone())
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    pub async fn progress(&self, job_id: JobId, percent: f64) {
        let tx = self
            .running
            .lock()
            .get(&job_id)
            .map(|(_, tx)| tx.clone())
            .expect("job is not running");
        tx.send(SupervisorEvent::Progress(percent)).await.unwrap();
    }

    /// Make the process exit with `code`, as a real supervisor would report it.
    pub async fn exit(&self, job_id: JobId, code: i32, stderr: &str) {
        let (handle, tx) = self
            .running
            .lock()
            .remove(&job_id)
            .expect("job is not running");
        tx.send(SupervisorEvent::Exited(ExitReport {
            exit: ProcessExit::Code(code),
            terminate_requested: handle.is_terminate_requested(),
            stderr_tail: stderr.to_string(),
        }))
        .await
        .unwrap();
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<ProcessHandle, SpawnError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(SpawnError::NotFound {
                program: "yt-dlp".to_string(),
            });
        }

        let handle = ProcessHandle::new(request.job_id);
        self.running
            .lock()
            .insert(request.job_id, (handle.clone(), request.events));
        let _ = self.launched_tx.send((request.job_id, Instant::now()));
        Ok(handle)
    }

    async fn tool_status(&self) -> ToolStatus {
        ToolStatus::Available {
            strategy: InvocationStrategy::new("yt-dlp"),
            version: "test".to_string(),
        }
    }
}

pub fn config(max_concurrent: usize, max_queued: usize) -> QueueConfig {
    QueueConfig {
        max_concurrent,
        max_queued,
        min_launch_interval_ms: 0,
        ..QueueConfig::default()
    }
}

pub fn scripted(config: QueueConfig) -> (JobQueueManager, Arc<ScriptedLauncher>, Launches) {
    let (launcher, launches) = ScriptedLauncher::new();
    let manager = JobQueueManager::new(config, launcher.clone());
    (manager, launcher, launches)
}

/// Receive events until the terminal event of `job_id`, returning everything seen.
pub async fn until_terminal(sub: &mut Subscription, job_id: JobId) -> Vec<JobEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), sub.recv())
            .await
            .expect("timed out waiting for events")
            .expect("subscription closed");
        let done = event.is_terminal() && event.job_id() == job_id;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Events currently buffered for the subscriber.
pub fn drain(sub: &mut Subscription) -> Vec<JobEvent> {
    std::iter::from_fn(|| sub.try_recv()).collect()
}

pub fn events_for(events: &[JobEvent], job_id: JobId) -> Vec<&JobEvent> {
    events.iter().filter(|e| e.job_id() == job_id).collect()
}
