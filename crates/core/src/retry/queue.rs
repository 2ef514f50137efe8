//! In-memory priority queue of deferred requests

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use circlepay_domain::{ActionKind, CirclePayError, Priority, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::config::RetryConfig;

/// Lets a queued request be persisted as a pending action and replayed by
/// sync after the process restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayDescriptor {
    pub kind: ActionKind,
    pub payload: serde_json::Value,
}

impl ReplayDescriptor {
    /// Descriptor replaying `payload` as an action of `kind`.
    pub fn new(kind: ActionKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }
}

/// Snapshot of the deferred-request queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub total: usize,
    pub by_priority: BTreeMap<Priority, usize>,
    pub oldest_age: Option<Duration>,
}

/// Type-erased retryable operation whose outcome goes back to the caller.
pub(crate) trait Job: Send {
    /// Start one attempt.
    fn attempt(&mut self) -> BoxFuture<'static, Result<()>>;

    /// Deliver the value produced by the last successful attempt.
    fn succeed(self: Box<Self>);

    fn fail(self: Box<Self>, error: CirclePayError);
}

type Operation<T> = Box<dyn FnMut() -> BoxFuture<'static, Result<T>> + Send>;

pub(crate) struct TypedJob<T> {
    operation: Operation<T>,
    output: Arc<Mutex<Option<T>>>,
    reply: oneshot::Sender<Result<T>>,
}

impl<T: Send + 'static> TypedJob<T> {
    pub(crate) fn new<F, Fut>(mut operation: F) -> (Self, oneshot::Receiver<Result<T>>)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let job = Self {
            operation: Box::new(move || operation().boxed()),
            output: Arc::new(Mutex::new(None)),
            reply,
        };
        (job, receiver)
    }
}

impl<T: Send + 'static> Job for TypedJob<T> {
    fn attempt(&mut self) -> BoxFuture<'static, Result<()>> {
        let pending = (self.operation)();
        let output = Arc::clone(&self.output);
        async move {
            let value = pending.await?;
            *output.lock() = Some(value);
            Ok(())
        }
        .boxed()
    }

    fn succeed(self: Box<Self>) {
        let outcome = self
            .output
            .lock()
            .take()
            .ok_or_else(|| CirclePayError::Internal("request settled without a value".into()));
        // The caller may have gone away; nothing to deliver then.
        let _ = self.reply.send(outcome);
    }

    fn fail(self: Box<Self>, error: CirclePayError) {
        let _ = self.reply.send(Err(error));
    }
}

/// One request owned by the executor
pub(crate) struct QueuedRequest {
    pub id: Uuid,
    pub job: Box<dyn Job>,
    pub config: RetryConfig,
    pub priority: Priority,
    pub sequence: Option<u64>,
    pub enqueued_at: Option<Instant>,
    pub attempts: u32,
    pub last_error: Option<CirclePayError>,
    pub replay: Option<ReplayDescriptor>,
    /// Id of the persisted pending action, once the request was parked.
    pub action_id: Option<String>,
    pub defer_when_offline: bool,
}

impl QueuedRequest {
    pub fn attempts_left(&self) -> bool {
        self.attempts < self.config.max_attempts()
    }
}

/// Requests waiting for connectivity, drained by priority then FIFO
#[derive(Default)]
pub(crate) struct RequestQueue {
    items: Vec<QueuedRequest>,
    next_sequence: u64,
}

impl RequestQueue {
    /// Add a request. A re-parked request keeps its original position.
    pub fn push(&mut self, mut request: QueuedRequest) {
        if request.sequence.is_none() {
            request.sequence = Some(self.next_sequence);
            self.next_sequence += 1;
        }
        request.enqueued_at.get_or_insert_with(Instant::now);
        self.items.push(request);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove up to `limit` requests in drain order.
    pub fn take_batch(&mut self, limit: usize) -> Vec<QueuedRequest> {
        self.items.sort_by_key(|request| (Reverse(request.priority), request.sequence));
        let count = limit.min(self.items.len());
        self.items.drain(..count).collect()
    }

    pub fn take_all(&mut self) -> Vec<QueuedRequest> {
        std::mem::take(&mut self.items)
    }

    pub fn take_priority(&mut self, priority: Priority) -> Vec<QueuedRequest> {
        let (taken, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.items).into_iter().partition(|r| r.priority == priority);
        self.items = kept;
        taken
    }

    pub fn status(&self) -> QueueStatus {
        let now = Instant::now();
        let mut status = QueueStatus { total: self.items.len(), ..QueueStatus::default() };
        for request in &self.items {
            *status.by_priority.entry(request.priority).or_insert(0) += 1;
            if let Some(enqueued_at) = request.enqueued_at {
                let age = now.saturating_duration_since(enqueued_at);
                status.oldest_age = Some(status.oldest_age.map_or(age, |oldest| oldest.max(age)));
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(priority: Priority) -> (QueuedRequest, oneshot::Receiver<Result<u32>>) {
        let (job, receiver) = TypedJob::new(|| async { Ok(7_u32) });
        let request = QueuedRequest {
            id: Uuid::new_v4(),
            job: Box::new(job),
            config: RetryConfig::default(),
            priority,
            sequence: None,
            enqueued_at: None,
            attempts: 0,
            last_error: None,
            replay: None,
            action_id: None,
            defer_when_offline: true,
        };
        (request, receiver)
    }

    #[test]
    fn batches_follow_priority_then_fifo() {
        let mut queue = RequestQueue::default();
        let mut ids = Vec::new();
        for priority in [Priority::Low, Priority::High, Priority::Medium, Priority::High] {
            let (request, _receiver) = request(priority);
            ids.push(request.id);
            queue.push(request);
        }

        let first: Vec<_> = queue.take_batch(3).into_iter().map(|r| r.id).collect();
        assert_eq!(first, vec![ids[1], ids[3], ids[2]]);

        let rest: Vec<_> = queue.take_batch(3).into_iter().map(|r| r.id).collect();
        assert_eq!(rest, vec![ids[0]]);
        assert!(queue.is_empty());
    }

    #[test]
    fn reparked_request_keeps_its_place() {
        let mut queue = RequestQueue::default();
        let (early, _a) = request(Priority::Medium);
        let (late, _b) = request(Priority::Medium);
        let early_id = early.id;
        queue.push(early);
        queue.push(late);

        let taken = queue.take_batch(1).pop().unwrap();
        assert_eq!(taken.id, early_id);
        queue.push(taken);

        assert_eq!(queue.take_batch(1)[0].id, early_id);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_counts_and_age() {
        let mut queue = RequestQueue::default();
        let (low, _a) = request(Priority::Low);
        queue.push(low);
        tokio::time::advance(Duration::from_secs(3)).await;
        let (high, _b) = request(Priority::High);
        queue.push(high);

        let status = queue.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.by_priority.get(&Priority::Low), Some(&1));
        assert_eq!(status.by_priority.get(&Priority::High), Some(&1));
        assert_eq!(status.oldest_age, Some(Duration::from_secs(3)));

        assert_eq!(queue.take_priority(Priority::Low).len(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn job_delivers_last_value() {
        let (request, receiver) = request(Priority::High);
        let mut job = request.job;
        job.attempt().await.unwrap();
        job.succeed();
        assert_eq!(receiver.await.unwrap().unwrap(), 7);
    }
}
