//! Fan-out of job events to live subscribers.
//!
//! Every subscriber gets its own bounded channel. Publishing never waits: a
//! subscriber whose channel is full or closed is dropped from membership and
//! the remaining subscribers are unaffected. There is no backlog, so a
//! subscriber only sees events published after it subscribed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::domain::JobEvent;

/// Identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<JobEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once the subscriber has been dropped.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        self.rx.try_recv().ok()
    }
}

/// Publish/subscribe hub for [`JobEvent`]s.
#[derive(Debug)]
pub struct Broadcaster {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<JobEvent>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Broadcaster {
    /// Create a broadcaster whose subscribers buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.write().insert(id, tx);
        debug!(subscriber = id.0, "Subscriber added");
        Subscription { id, rx }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!(subscriber = id.0, "Subscriber removed");
        }
        removed
    }

    /// Deliver `event` to every current subscriber.
    ///
    /// Membership is snapshotted at call time. Returns the number of
    /// subscribers the event was delivered to.
    pub fn publish(&self, event: JobEvent) -> usize {
        let targets: Vec<(SubscriberId, mpsc::Sender<JobEvent>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(subscriber = id.0, "Subscriber lagging, dropping it");
                    failed.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => failed.push(id),
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in failed {
                subscribers.remove(&id);
            }
        }

        trace!(event = event.kind(), job_id = %event.job_id(), delivered, "Event published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
