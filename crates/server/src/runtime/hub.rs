//! In-memory event fan-out.
//!
//! The hub only ever sees events that the writer already persisted and
//! stamped. Delivery is per-subscriber bounded: a subscriber that falls
//! behind its queue bound is dropped (its channel closes, the SSE stream
//! ends, and the client reconnects with `Last-Event-ID` to catch up via
//! replay). Publishing never blocks on a slow subscriber.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use loft_domain::event::EventEnvelope;

/// What a subscriber receives.
#[derive(Debug, Clone)]
pub enum HubMessage {
    Event(Arc<EventEnvelope>),
    /// Periodic keep-alive; never persisted, carries no id.
    Heartbeat,
}

struct Subscriber {
    id: u64,
    session_filter: Option<String>,
    tx: mpsc::Sender<HubMessage>,
}

impl Subscriber {
    fn wants(&self, env: &EventEnvelope) -> bool {
        match &self.session_filter {
            Some(filter) => env.session_id == *filter,
            None => true,
        }
    }
}

pub struct EventHub {
    subscribers: Mutex<Vec<Subscriber>>,
    queue_bound: usize,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new(queue_bound: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            queue_bound: queue_bound.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a live subscriber. Registration happens *before* any replay
    /// read so no event can fall between replay and live (the overlap is
    /// deduplicated by the consumer via the last replayed id).
    pub fn register(&self, session_filter: Option<String>) -> mpsc::Receiver<HubMessage> {
        let (tx, rx) = mpsc::channel(self.queue_bound);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber {
            id,
            session_filter,
            tx,
        });
        tracing::debug!(subscriber = id, "hub subscriber registered");
        rx
    }

    /// Deliver one stamped event to every matching subscriber.
    ///
    /// Subscribers whose queue is full (or whose receiver is gone) are
    /// dropped; the lock is only held to snapshot and to prune.
    pub fn publish(&self, env: Arc<EventEnvelope>) {
        let targets: Vec<(u64, mpsc::Sender<HubMessage>)> = {
            let subs = self.subscribers.lock();
            subs.iter()
                .filter(|s| s.wants(&env))
                .map(|s| (s.id, s.tx.clone()))
                .collect()
        };

        let mut stale: Vec<u64> = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(HubMessage::Event(env.clone())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = id, "subscriber queue overflow, dropping");
                    stale.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => stale.push(id),
            }
        }
        if !stale.is_empty() {
            self.subscribers.lock().retain(|s| !stale.contains(&s.id));
        }
    }

    /// Number of live subscribers (monitoring/tests).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn heartbeat_tick(&self) {
        let mut stale: Vec<u64> = Vec::new();
        {
            let subs = self.subscribers.lock();
            for s in subs.iter() {
                match s.tx.try_send(HubMessage::Heartbeat) {
                    // A full queue just skips the heartbeat; the pending
                    // events already keep the connection alive.
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => stale.push(s.id),
                }
            }
        }
        if !stale.is_empty() {
            self.subscribers.lock().retain(|s| !stale.contains(&s.id));
        }
    }

    /// Spawn the periodic heartbeat task.
    pub fn spawn_heartbeats(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                hub.heartbeat_tick();
            }
        })
    }
}
