//! In-process message broker with priority queues, TTL delay tiers and
//! dead-letter re-injection.
//!
//! Reproduces the broker semantics the queue components rely on: a queue
//! declared with a max-priority orders deliveries by the message priority
//! attribute, capped at that level (highest first, FIFO within a priority);
//! on any other queue the attribute is carried but ignored. `publish_delayed` models a delay queue
//! whose TTL expiry re-injects the message into a target queue with an
//! updated death record, which is how the retry tiers back off without a
//! custom timer service. Removal on `pop` is the ack; redelivery after a
//! process crash is out of scope.

use crate::model::{DeathEntry, QueueMessage};
use chrono::Utc;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("queue '{0}' is not declared")]
    UnknownQueue(String),
    #[error("broker is shut down")]
    Closed,
}

/// A message plus its broker-level attributes.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: QueueMessage,
    /// Priority hint, 1-10. Effective only on queues declared with
    /// priority support.
    pub priority: u8,
    pub persistent: bool,
    /// Ordered redelivery history across retry tiers.
    pub deaths: Vec<DeathEntry>,
    pub headers: HashMap<String, String>,
}

impl Delivery {
    pub fn new(message: QueueMessage, priority: u8) -> Self {
        Self {
            message,
            priority,
            persistent: true,
            deaths: Vec::new(),
            headers: HashMap::new(),
        }
    }
}

struct Entry {
    priority: u8,
    seq: u64,
    delivery: Delivery,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: highest priority first, oldest first within a priority.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    /// Priority cap, AMQP x-max-priority style; `None` means the queue
    /// ignores the priority attribute entirely.
    max_priority: Option<u8>,
    pending: Mutex<BinaryHeap<Entry>>,
    notify: Notify,
}

struct BrokerInner {
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    timers: Mutex<Vec<AbortHandle>>,
    seq: AtomicU64,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                queues: Mutex::new(HashMap::new()),
                timers: Mutex::new(Vec::new()),
                seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Declare a queue. Idempotent; the max-priority of the first
    /// declaration wins. Deliveries above the cap rank as if published at
    /// the cap.
    pub fn declare_queue(&self, name: &str, max_priority: Option<u8>) {
        let mut queues = self.inner.queues.lock().expect("broker queues lock");
        queues.entry(name.to_string()).or_insert_with(|| {
            Arc::new(QueueState {
                max_priority,
                pending: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
            })
        });
    }

    fn queue(&self, name: &str) -> Result<Arc<QueueState>, BrokerError> {
        let queues = self.inner.queues.lock().expect("broker queues lock");
        queues
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }

    /// Enqueue a delivery. Never blocks on consumers; fails only on an
    /// undeclared queue or after shutdown.
    pub fn publish(&self, queue: &str, delivery: Delivery) -> Result<(), BrokerError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let q = self.queue(queue)?;
        Self::push(&self.inner, &q, delivery);
        Ok(())
    }

    fn push(inner: &BrokerInner, q: &QueueState, delivery: Delivery) {
        let priority = match q.max_priority {
            Some(max) => delivery.priority.min(max),
            None => 0,
        };
        let seq = inner.seq.fetch_add(1, Ordering::Relaxed);
        q.pending.lock().expect("queue lock").push(Entry {
            priority,
            seq,
            delivery,
        });
        q.notify.notify_one();
    }

    /// Publish into a delay tier: after `ttl` the message is dead-lettered
    /// back into `requeue_to` with a death record merged for `tier_queue`.
    pub fn publish_delayed(
        &self,
        tier_queue: &str,
        mut delivery: Delivery,
        ttl: Duration,
        requeue_to: &str,
    ) -> Result<(), BrokerError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        // Fail fast if the target was never declared.
        self.queue(requeue_to)?;

        let inner = self.inner.clone();
        let tier = tier_queue.to_string();
        let target = requeue_to.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            record_death(&mut delivery.deaths, &tier);
            let q = {
                let queues = inner.queues.lock().expect("broker queues lock");
                queues.get(&target).cloned()
            };
            match q {
                Some(q) => {
                    debug!(tier = %tier, queue = %target, "delay TTL expired, re-injecting");
                    Broker::push(&inner, &q, delivery);
                }
                None => warn!(queue = %target, "delay target queue vanished"),
            }
        });

        let mut timers = self.inner.timers.lock().expect("broker timers lock");
        timers.retain(|t| !t.is_finished());
        timers.push(handle.abort_handle());
        Ok(())
    }

    /// Wait for the next delivery on `queue`. Resolves with `Closed` once
    /// the broker shuts down.
    pub async fn pop(&self, queue: &str) -> Result<Delivery, BrokerError> {
        let q = self.queue(queue)?;
        loop {
            // Enable the waiter before checking state: `notify_waiters`
            // only wakes registered waiters, and registration happens on
            // first poll, not on construction. Without this a shutdown
            // between the check and the await would strand the popper.
            let notified = q.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed);
            }
            if let Some(entry) = q.pending.lock().expect("queue lock").pop() {
                return Ok(entry.delivery);
            }
            notified.await;
        }
    }

    /// Non-blocking pop, for inspection and tests.
    pub fn try_pop(&self, queue: &str) -> Option<Delivery> {
        let q = self.queue(queue).ok()?;
        let entry = q.pending.lock().expect("queue lock").pop();
        entry.map(|e| e.delivery)
    }

    pub fn depth(&self, queue: &str) -> usize {
        match self.queue(queue) {
            Ok(q) => q.pending.lock().expect("queue lock").len(),
            Err(_) => 0,
        }
    }

    /// Close the broker: reject further publishes, abort pending TTL timers
    /// and wake all poppers so consumer loops can drain.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let timers = {
            let mut timers = self.inner.timers.lock().expect("broker timers lock");
            std::mem::take(&mut *timers)
        };
        for t in timers {
            t.abort();
        }
        let queues = self.inner.queues.lock().expect("broker queues lock");
        for q in queues.values() {
            q.notify.notify_waiters();
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge a death record for `queue`, RabbitMQ style: bump the count of an
/// existing entry for the same queue, otherwise append one.
fn record_death(deaths: &mut Vec<DeathEntry>, queue: &str) {
    let now = Utc::now();
    if let Some(entry) = deaths.iter_mut().find(|d| d.queue == queue) {
        entry.count += 1;
        entry.time = now;
    } else {
        deaths.push(DeathEntry {
            queue: queue.to_string(),
            reason: "expired".to_string(),
            count: 1,
            time: now,
        });
    }
}
