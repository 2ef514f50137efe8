//! Retry executor with offline queuing
//!
//! Each request gets one attempt budget of `max_retries + 1`, shared by the
//! inline phase and any later queued phase. A request is parked in the queue
//! when the device is offline at call time or goes offline between attempts,
//! and is drained by priority once connectivity returns.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use circlepay_common::Subscription;
use circlepay_domain::constants::{QUEUE_CONCURRENCY, QUEUE_DRAIN_INTERVAL_MS};
use circlepay_domain::{CirclePayError, ConnectivityState, Priority, Result, RetrySettings};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::config::RetryConfig;
use super::queue::{QueueStatus, QueuedRequest, ReplayDescriptor, RequestQueue, TypedJob};
use crate::cache::PersistentCache;
use crate::connectivity::{ConnectivityMonitor, ConnectivityObserver};

/// Per-call options for [`RetryExecutor::execute`]
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub config: RetryConfig,
    pub priority: Priority,
    pub replay: Option<ReplayDescriptor>,
    /// Park the request while offline instead of failing with `Offline`.
    pub defer_when_offline: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl ExecuteOptions {
    /// Options with `config`, Medium priority and offline parking.
    pub fn new(config: RetryConfig) -> Self {
        Self { config, priority: Priority::Medium, replay: None, defer_when_offline: true }
    }

    /// Drain priority while queued.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Persist the request as a pending action if it has to wait.
    pub fn replay(mut self, descriptor: ReplayDescriptor) -> Self {
        self.replay = Some(descriptor);
        self
    }

    /// Never park; fail fast when offline at call time.
    pub fn immediate(mut self) -> Self {
        self.defer_when_offline = false;
        self
    }
}

/// How a request left the executor
enum Settlement {
    Succeeded,
    /// Terminal error; retrying cannot help.
    Rejected(CirclePayError),
    /// Retryable error with no attempts left.
    Exhausted(CirclePayError),
    Cancelled(CirclePayError),
}

enum Drive {
    Settled,
    Park(QueuedRequest),
}

struct QueueWaker(Arc<Notify>);

impl ConnectivityObserver for QueueWaker {
    fn on_online(&self, _state: &ConnectivityState) {
        self.0.notify_one();
    }
}

#[derive(Default)]
struct Lifecycle {
    worker: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

/// Retry executor
pub struct RetryExecutor {
    monitor: Arc<ConnectivityMonitor>,
    cache: Option<Arc<PersistentCache>>,
    defaults: RetryConfig,
    concurrency: usize,
    drain_interval: Duration,
    queue: Mutex<RequestQueue>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

impl RetryExecutor {
    /// Executor with default retry settings and no persistence.
    pub fn new(monitor: Arc<ConnectivityMonitor>) -> Self {
        Self {
            monitor,
            cache: None,
            defaults: RetryConfig::default(),
            concurrency: QUEUE_CONCURRENCY,
            drain_interval: Duration::from_millis(QUEUE_DRAIN_INTERVAL_MS),
            queue: Mutex::new(RequestQueue::default()),
            wake: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Persist requests that carry a [`ReplayDescriptor`] while they are queued.
    pub fn with_cache(mut self, cache: Arc<PersistentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use configured retry defaults, concurrency and drain interval.
    pub fn with_settings(mut self, settings: &RetrySettings) -> Self {
        self.defaults = RetryConfig::from(settings);
        self.concurrency = settings.concurrency.max(1);
        self.drain_interval = Duration::from_millis(settings.drain_interval_ms);
        self
    }

    /// Configuration used when callers do not bring their own.
    pub fn default_config(&self) -> RetryConfig {
        self.defaults.clone()
    }

    /// Options built from the default configuration.
    pub fn default_options(&self) -> ExecuteOptions {
        ExecuteOptions::new(self.default_config())
    }

    /// Start the drain worker and listen for online transitions.
    pub fn start(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.worker.is_some() || self.cancel.is_cancelled() {
            return;
        }

        lifecycle.subscription =
            Some(self.monitor.add_observer(Arc::new(QueueWaker(Arc::clone(&self.wake)))));
        lifecycle.worker = Some(spawn_worker(Arc::downgrade(self), Arc::clone(&self.wake), self.cancel.clone()));

        if !self.queue.lock().is_empty() {
            self.wake.notify_one();
        }
        info!(concurrency = self.concurrency, "retry executor started");
    }

    /// Stop the worker, cancel pending backoff sleeps and reject every queued
    /// request with [`CirclePayError::Cancelled`].
    pub fn dispose(&self) {
        self.cancel.cancel();
        let lifecycle = std::mem::take(&mut *self.lifecycle.lock());
        if let Some(worker) = lifecycle.worker {
            worker.abort();
        }
        drop(lifecycle.subscription);

        let rejected = self.reject(self.queue.lock().take_all(), "retry executor disposed");
        debug!(rejected, "retry executor disposed");
    }

    /// Run `operation` with `config` at `priority`.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation: F,
        config: RetryConfig,
        priority: Priority,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.execute(operation, ExecuteOptions::new(config).priority(priority)).await
    }

    /// Run `operation` under `options`, parking it while offline.
    #[instrument(skip_all, fields(priority = %options.priority))]
    pub async fn execute<T, F, Fut>(&self, operation: F, options: ExecuteOptions) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(CirclePayError::Cancelled("retry executor disposed".into()));
        }

        let (job, receiver) = TypedJob::new(operation);
        let request = QueuedRequest {
            id: Uuid::new_v4(),
            job: Box::new(job),
            config: options.config,
            priority: options.priority,
            sequence: None,
            enqueued_at: None,
            attempts: 0,
            last_error: None,
            replay: options.replay,
            action_id: None,
            defer_when_offline: options.defer_when_offline,
        };

        if self.monitor.is_online() {
            if let Drive::Park(request) = self.drive(request).await {
                self.park(request).await;
            }
        } else if request.defer_when_offline {
            debug!(request_id = %request.id, "offline, queuing request");
            self.park(request).await;
        } else {
            request.job.fail(CirclePayError::Offline("device is offline".into()));
        }

        receiver
            .await
            .unwrap_or_else(|_| Err(CirclePayError::Cancelled("request dropped".into())))
    }

    /// Snapshot of the requests waiting for connectivity.
    pub fn queue_status(&self) -> QueueStatus {
        self.queue.lock().status()
    }

    /// Reject every queued request. Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        let requests = self.queue.lock().take_all();
        self.reject(requests, "queue cleared")
    }

    /// Reject queued requests of `priority`; returns how many.
    pub fn clear_queue_by_priority(&self, priority: Priority) -> usize {
        let requests = self.queue.lock().take_priority(priority);
        self.reject(requests, "queue cleared")
    }

    /// Attempt `request` until it settles or has to wait for connectivity.
    async fn drive(&self, mut request: QueuedRequest) -> Drive {
        loop {
            let outcome = request.job.attempt().await;
            request.attempts += 1;

            let error = match outcome {
                Ok(()) => {
                    if request.attempts > 1 {
                        debug!(request_id = %request.id, attempts = request.attempts, "request succeeded after retry");
                    }
                    self.settle(request, Settlement::Succeeded).await;
                    return Drive::Settled;
                }
                Err(error) => error,
            };

            let attempt_index = request.attempts - 1;
            if !request.config.should_retry(&error, attempt_index) {
                request.config.notify_failure(&error, request.attempts);
                self.settle(request, Settlement::Rejected(error)).await;
                return Drive::Settled;
            }
            if !request.attempts_left() {
                warn!(
                    request_id = %request.id,
                    attempts = request.attempts,
                    error = %error,
                    "retry attempts exhausted"
                );
                request.config.notify_failure(&error, request.attempts);
                self.settle(request, Settlement::Exhausted(error)).await;
                return Drive::Settled;
            }

            request.config.notify_retry(&error, request.attempts);
            request.last_error = Some(error);

            if request.defer_when_offline && !self.monitor.is_online() {
                debug!(request_id = %request.id, attempts = request.attempts, "went offline, parking request");
                return Drive::Park(request);
            }

            let delay = request.config.delay_for(attempt_index);
            debug!(
                request_id = %request.id,
                attempt = request.attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying request"
            );
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let cancelled = CirclePayError::Cancelled("retry executor disposed".into());
                    self.settle(request, Settlement::Cancelled(cancelled)).await;
                    return Drive::Settled;
                }
                () = tokio::time::sleep(delay) => {}
            }

            if request.defer_when_offline && !self.monitor.is_online() {
                return Drive::Park(request);
            }
        }
    }

    async fn park(&self, mut request: QueuedRequest) {
        if request.action_id.is_none() {
            if let (Some(cache), Some(replay)) = (&self.cache, &request.replay) {
                match cache
                    .enqueue_leased_action(replay.kind, replay.payload.clone(), request.priority)
                    .await
                {
                    Ok(action_id) => request.action_id = Some(action_id),
                    Err(err) => warn!(request_id = %request.id, error = %err, "could not persist queued request"),
                }
            }
        }

        if self.cancel.is_cancelled() {
            self.reject(vec![request], "retry executor disposed");
            return;
        }

        self.queue.lock().push(request);
        if self.monitor.is_online() {
            self.wake.notify_one();
        }
    }

    async fn settle(&self, request: QueuedRequest, settlement: Settlement) {
        if let (Some(cache), Some(action_id)) = (&self.cache, &request.action_id) {
            let remove = match &settlement {
                Settlement::Succeeded | Settlement::Rejected(_) => true,
                Settlement::Exhausted(_) => request.priority != Priority::High,
                Settlement::Cancelled(_) => false,
            };
            if !remove {
                info!(action_id = %action_id, "leaving pending action for sync");
            }
            if let Err(err) = cache.release_leased_action(action_id, remove).await {
                warn!(action_id = %action_id, error = %err, "could not remove pending action");
            }
        }

        match settlement {
            Settlement::Succeeded => request.job.succeed(),
            Settlement::Rejected(error)
            | Settlement::Exhausted(error)
            | Settlement::Cancelled(error) => request.job.fail(error),
        }
    }

    fn reject(&self, requests: Vec<QueuedRequest>, reason: &str) -> usize {
        let count = requests.len();
        for request in requests {
            if let (Some(cache), Some(action_id)) = (&self.cache, &request.action_id) {
                cache.release_action(action_id);
            }
            let message = match &request.last_error {
                Some(last) => {
                    debug!(request_id = %request.id, attempts = request.attempts, error = %last, "{reason}");
                    format!("{reason} after {} attempt(s); last error: {last}", request.attempts)
                }
                None => reason.to_string(),
            };
            request.job.fail(CirclePayError::Cancelled(message));
        }
        count
    }

    async fn drain(&self) {
        loop {
            if !self.monitor.is_online() {
                return;
            }
            let batch = self.queue.lock().take_batch(self.concurrency);
            if batch.is_empty() {
                return;
            }
            debug!(batch = batch.len(), "draining request queue");

            let outcomes = futures::future::join_all(batch.into_iter().map(|r| self.drive(r))).await;
            for outcome in outcomes {
                if let Drive::Park(request) = outcome {
                    self.queue.lock().push(request);
                }
            }

            if self.queue.lock().is_empty() || !self.monitor.is_online() {
                return;
            }
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(self.drain_interval) => {}
            }
        }
    }
}

impl Drop for RetryExecutor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_worker(
    executor: Weak<RetryExecutor>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = wake.notified() => {
                    let Some(executor) = executor.upgrade() else { break };
                    executor.drain().await;
                }
            }
        }
    })
}
