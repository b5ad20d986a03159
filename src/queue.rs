//! Deduplicating, rate-limited work queue of request keys
//!
//! Modeled on the classic controller work queue: duplicate pending adds
//! collapse to a single entry, a key is never delivered to two consumers at
//! once, and failed keys become eligible again only after an exponential
//! per-key backoff.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Thread-safe queue of `namespace/name` keys awaiting processing.
///
/// Producers call [`WorkQueue::add`]; consumers loop on [`WorkQueue::get`] and
/// must call [`WorkQueue::done`] for every key they received, even on failure.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

struct Inner {
    /// Keys eligible for delivery, in arrival order.
    queue: VecDeque<String>,
    /// Keys pending delivery or marked for requeue while in flight.
    dirty: HashSet<String>,
    /// Keys currently held by a consumer.
    processing: HashSet<String>,
    /// Keys waiting out a backoff delay, earliest deadline first.
    delayed: BinaryHeap<Reverse<(Instant, String)>>,
    /// Consecutive failure count per key, driving the backoff delay.
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

impl WorkQueue {
    /// Create a queue whose retry delay starts at `base_delay`, doubling per
    /// consecutive failure up to `max_delay`.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                delayed: BinaryHeap::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    /// Enqueue a key. Idempotent: a key that is already pending, or in flight
    /// and marked for requeue, is not enqueued again. Never blocks.
    pub fn add(&self, key: impl Into<String>) {
        let mut inner = self.lock();
        if inner.shutting_down {
            return;
        }
        Self::enqueue(&mut inner, key.into());
        drop(inner);
        self.notify.notify_one();
    }

    /// Record a failure for the key and make it eligible again only after the
    /// key's current exponential backoff delay.
    pub fn add_rate_limited(&self, key: impl Into<String>) {
        let key = key.into();
        let mut inner = self.lock();
        if inner.shutting_down {
            return;
        }
        let attempts = inner.failures.entry(key.clone()).or_insert(0);
        *attempts += 1;
        let delay = self.delay_for(*attempts);
        debug!(key = %key, delay_ms = delay.as_millis() as u64, "requeueing with backoff");
        inner.delayed.push(Reverse((Instant::now() + delay, key)));
        drop(inner);
        // Wake a getter so it re-evaluates its sleep deadline.
        self.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue has been shut
    /// down; all blocked and future callers observe the shutdown immediately.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_deadline = {
                let mut inner = self.lock();
                if inner.shutting_down {
                    return None;
                }
                Self::promote_due(&mut inner);
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                inner.delayed.peek().map(|Reverse((at, _))| *at)
            };

            match next_deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Mark in-flight processing of the key as finished. If the key was
    /// re-added while in flight it becomes deliverable now.
    pub fn done(&self, key: &str) {
        let mut inner = self.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Reset the key's backoff state after a success or a terminal failure.
    pub fn forget(&self, key: &str) {
        self.lock().failures.remove(key);
    }

    /// Consecutive failures recorded for the key.
    pub fn retries(&self, key: &str) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Number of keys pending delivery or waiting out a backoff delay.
    ///
    /// Counting delayed keys keeps the depth stable across promotion out of
    /// the backoff heap, so gauges sampled at add/done time never miss them.
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.queue.len() + inner.delayed.len()
    }

    /// Whether no keys are pending or delayed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain all pending state, unblock every waiting `get()` with the
    /// shutdown flag, and reject further adds.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.shutting_down = true;
        inner.queue.clear();
        inner.dirty.clear();
        inner.delayed.clear();
        inner.failures.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Move delayed keys whose deadline has passed into the pending queue.
    fn promote_due(inner: &mut Inner) {
        let now = Instant::now();
        while let Some(Reverse((at, _))) = inner.delayed.peek() {
            if *at > now {
                break;
            }
            if let Some(Reverse((_, key))) = inner.delayed.pop() {
                Self::enqueue(inner, key);
            }
        }
    }

    fn enqueue(inner: &mut Inner, key: String) {
        if !inner.dirty.insert(key.clone()) {
            return;
        }
        if inner.processing.contains(&key) {
            // Re-queued by done() once the in-flight cycle ends.
            return;
        }
        inner.queue.push_back(key);
    }

    fn delay_for(&self, attempts: u32) -> Duration {
        // Cap the exponent so the multiplication cannot overflow.
        let exp = attempts.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Inner operations never panic, so the lock cannot be poisoned.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
