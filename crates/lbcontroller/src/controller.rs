//! Worker loop driving a reconciler from the work queue
//!
//! Each worker takes a key, reconciles it and settles the outcome with the
//! queue: success forgets the retry history, a retryable failure requeues the
//! key with backoff, and anything else is reported once and dropped.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::queue::WorkQueue;
use crate::retry::{Classify, RetryDecision, RetryPolicy};

/// Converges the state behind one key
#[async_trait]
pub trait Reconcile: Send + Sync {
    type Key: Clone + Eq + Hash + Send + Sync + Debug + Display + 'static;
    type Error: Classify + std::error::Error + Send + Sync + 'static;

    async fn reconcile(&self, key: &Self::Key) -> Result<(), Self::Error>;
}

/// Out-of-band sink for errors of keys that are given up on
pub trait ErrorReporter: Send + Sync {
    fn report(&self, key: &str, error: &(dyn std::error::Error + Send + Sync + 'static));
}

/// Reports dropped keys to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, key: &str, error: &(dyn std::error::Error + Send + Sync + 'static)) {
        error!(key, error = %error, "Dropping key after failed reconcile");
    }
}

pub struct Controller<R: Reconcile> {
    queue: Arc<WorkQueue<R::Key>>,
    reconciler: Arc<R>,
    policy: RetryPolicy,
    reporter: Arc<dyn ErrorReporter>,
}

impl<R: Reconcile + 'static> Controller<R> {
    pub fn new(reconciler: Arc<R>, policy: RetryPolicy) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new(policy)),
            reconciler,
            policy,
            reporter: Arc::new(LogReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Queue fed by the event source
    pub fn queue(&self) -> &Arc<WorkQueue<R::Key>> {
        &self.queue
    }

    /// Process one key. Returns `false` once the queue is shut down and empty.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        self.handle(&key).await;
        self.queue.done(&key).await;
        true
    }

    async fn handle(&self, key: &R::Key) {
        let error = match self.reconciler.reconcile(key).await {
            Ok(()) => {
                debug!(%key, "Reconciled");
                self.queue.forget(key).await;
                return;
            }
            Err(error) => error,
        };

        let requeues = self.queue.num_requeues(key).await;
        match self.policy.decide(requeues, error.kind()) {
            RetryDecision::Requeue => {
                let delay = self.queue.add_rate_limited(key.clone()).await;
                warn!(
                    %key,
                    attempt = requeues + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Reconcile failed, requeueing"
                );
            }
            RetryDecision::GiveUp => {
                self.queue.forget(key).await;
                self.reporter.report(&key.to_string(), &error);
            }
        }
    }

    pub async fn run_worker(&self) {
        while self.process_next_item().await {}
    }

    /// Run `workers` workers until `shutdown` resolves and the queue drains
    pub async fn run(self: Arc<Self>, workers: usize, shutdown: impl Future<Output = ()>) {
        info!(workers, "Starting workers");

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move {
                    controller.run_worker().await;
                    debug!(worker, "Worker stopped");
                })
            })
            .collect();

        shutdown.await;
        let pending = self.queue.len().await;
        info!(pending, "Shutting down, draining queue");
        self.queue.shutdown().await;

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("All workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("remote refused")]
    struct TestError(ErrorKind);

    impl Classify for TestError {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    /// Fails the first `failures` calls with errors of `kind`
    struct FlakyReconciler {
        calls: AtomicU32,
        failures: u32,
        kind: ErrorKind,
    }

    impl FlakyReconciler {
        fn new(failures: u32, kind: ErrorKind) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures,
                kind,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Reconcile for FlakyReconciler {
        type Key = String;
        type Error = TestError;

        async fn reconcile(&self, _key: &String) -> Result<(), TestError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(TestError(self.kind))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingReporter(Mutex<Vec<String>>);

    impl RecordingReporter {
        fn reports(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, key: &str, error: &(dyn std::error::Error + Send + Sync + 'static)) {
            self.0.lock().unwrap().push(format!("{key}: {error}"));
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }

    fn controller(
        reconciler: Arc<FlakyReconciler>,
    ) -> (Controller<FlakyReconciler>, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::default());
        let controller = Controller::new(reconciler, fast_policy()).with_reporter(reporter.clone());
        (controller, reporter)
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_run_future_is_send() {
        let (controller, _reporter) = controller(FlakyReconciler::new(0, ErrorKind::Transient));
        let run = Arc::new(controller).run(1, std::future::pending::<()>());
        assert_send(&run);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_key_is_retried_max_times_then_dropped() {
        let reconciler = FlakyReconciler::new(u32::MAX, ErrorKind::Transient);
        let (controller, reporter) = controller(reconciler.clone());
        let key = "default/web".to_string();
        controller.queue().add(key.clone()).await;

        for attempt in 1..=3 {
            assert!(controller.process_next_item().await);
            assert_eq!(controller.queue().num_requeues(&key).await, attempt);
            assert!(reporter.reports().is_empty());
        }

        assert!(controller.process_next_item().await);
        assert_eq!(reconciler.calls(), 4, "one attempt plus three retries");
        assert_eq!(controller.queue().num_requeues(&key).await, 0);
        assert_eq!(reporter.reports(), vec!["default/web: remote refused".to_string()]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(controller.queue().is_empty().await, "dropped key must not come back");
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let reconciler = FlakyReconciler::new(u32::MAX, ErrorKind::Permanent);
        let (controller, reporter) = controller(reconciler.clone());
        controller.queue().add("default/web".to_string()).await;

        assert!(controller.process_next_item().await);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(reconciler.calls(), 1);
        assert_eq!(reporter.reports().len(), 1);
        assert!(controller.queue().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failure_forgets_retries() {
        let reconciler = FlakyReconciler::new(1, ErrorKind::Transient);
        let (controller, reporter) = controller(reconciler.clone());
        let key = "default/web".to_string();
        controller.queue().add(key.clone()).await;

        assert!(controller.process_next_item().await);
        assert_eq!(controller.queue().num_requeues(&key).await, 1);

        assert!(controller.process_next_item().await);
        assert_eq!(reconciler.calls(), 2);
        assert_eq!(controller.queue().num_requeues(&key).await, 0);
        assert!(reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops_on_shutdown() {
        let reconciler = FlakyReconciler::new(0, ErrorKind::Transient);
        let (controller, _reporter) = controller(reconciler.clone());
        let controller = Arc::new(controller);

        for name in ["a", "b", "c"] {
            controller.queue().add(format!("default/{name}")).await;
        }

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(Arc::clone(&controller).run(2, async move {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        run.await.unwrap();

        assert_eq!(reconciler.calls(), 3);
        assert!(controller.queue().is_shutting_down().await);
    }
}
