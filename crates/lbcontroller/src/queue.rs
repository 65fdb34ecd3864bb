//! Key-deduplicating work queue with delayed requeues
//!
//! A key is in at most one of three places: idle (unknown to the queue),
//! queued (`dirty`, waiting in `queue`) or processing (handed out by `get`
//! and not yet released by `done`). Adding a queued key is a no-op; adding a
//! key that is being processed marks it dirty so it is queued again once the
//! worker calls `done`. Bursts of notifications for one key therefore collapse
//! into a single pending reconcile, and no key is processed by two workers at
//! the same time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;
use tracing::trace;

use crate::retry::RetryPolicy;

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    requeues: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            requeues: HashMap::new(),
            shutting_down: false,
        }
    }
}

pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    backoff: RetryPolicy,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(backoff: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }

    /// Mark a key as needing processing
    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!(?key, "Key already queued");
            return;
        }
        if state.processing.contains(&key) {
            // Requeued by `done`
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down and
    /// every queued key has been handed out.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release a key handed out by `get`. Must be called exactly once per `get`.
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Reset the retry counter of a key
    pub async fn forget(&self, key: &K) {
        self.state.lock().await.requeues.remove(key);
    }

    /// How often a key was requeued through `add_rate_limited`
    pub async fn num_requeues(&self, key: &K) -> u32 {
        self.state
            .lock()
            .await
            .requeues
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Requeue a key after its backoff delay and bump its retry counter
    pub async fn add_rate_limited(self: &Arc<Self>, key: K) -> Duration {
        let attempt = {
            let mut state = self.state.lock().await;
            let count = state.requeues.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let delay = self.backoff.delay(attempt);
        self.add_after(key, delay).await;
        delay
    }

    /// Add a key once `delay` has passed
    pub async fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key).await;
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Stop accepting keys and wake every waiting worker
    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }

    /// Number of keys waiting to be handed out
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
