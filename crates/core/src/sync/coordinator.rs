//! Sync coordinator
//!
//! Replays persisted pending actions after the device reconnects. A reconnect
//! only triggers a run after the debounce window has passed without another
//! reconnect, and never sooner than the minimum auto-sync interval after the
//! previous run. Manual syncs skip both checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use circlepay_common::{Clock, ObserverRegistry, Subscription};
use circlepay_domain::{
    CirclePayError, ConnectivityState, PendingAction, Priority, Result, SyncConfig,
    SyncErrorRecord, SyncPhase, SyncProgress, SyncResult, SyncStatus,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::ports::ActionDispatcher;
use crate::cache::PersistentCache;
use crate::connectivity::{ConnectivityMonitor, ConnectivityObserver};

type ProgressListener = dyn Fn(&SyncProgress) + Send + Sync;

struct ReconnectTrigger(Arc<Notify>);

impl ConnectivityObserver for ReconnectTrigger {
    fn on_reconnected(&self, _state: &ConnectivityState, offline_for: Duration) {
        debug!(offline_ms = u64::try_from(offline_for.as_millis()).unwrap_or(u64::MAX), "reconnected");
        self.0.notify_one();
    }
}

/// Clears the in-progress flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

#[derive(Default)]
struct RunReport {
    synced: usize,
    errors: Vec<SyncErrorRecord>,
    interrupted: bool,
}

/// Sync coordinator
pub struct SyncCoordinator {
    cache: Arc<PersistentCache>,
    monitor: Arc<ConnectivityMonitor>,
    dispatcher: Arc<dyn ActionDispatcher>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    running: AtomicBool,
    status: Mutex<SyncStatus>,
    listeners: ObserverRegistry<ProgressListener>,
    reconnects: Arc<Notify>,
    lifecycle: Mutex<Lifecycle>,
}

impl SyncCoordinator {
    /// Coordinator replaying the cache's pending actions through `dispatcher`.
    pub fn new(
        cache: Arc<PersistentCache>,
        monitor: Arc<ConnectivityMonitor>,
        dispatcher: Arc<dyn ActionDispatcher>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            cache,
            monitor,
            dispatcher,
            clock,
            config,
            running: AtomicBool::new(false),
            status: Mutex::new(SyncStatus::default()),
            listeners: ObserverRegistry::new("sync-progress"),
            reconnects: Arc::new(Notify::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Restore the persisted status and start reacting to reconnects.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut restored = self.cache.load_sync_status().await?;
        restored.in_progress = false;
        restored.pending_actions = self.cache.list_pending_actions().await?.len();
        *self.status.lock() = restored;

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.cancel.is_some() {
            return Ok(());
        }
        let token = CancellationToken::new();
        lifecycle.subscription =
            Some(self.monitor.add_observer(Arc::new(ReconnectTrigger(Arc::clone(&self.reconnects)))));
        lifecycle.task = Some(spawn_debouncer(
            Arc::downgrade(self),
            Arc::clone(&self.reconnects),
            self.config.reconnect_debounce(),
            token.clone(),
        ));
        lifecycle.cancel = Some(token);
        info!("sync coordinator started");
        Ok(())
    }

    /// Stop background work and drop progress listeners.
    pub fn dispose(&self) {
        let lifecycle = std::mem::take(&mut *self.lifecycle.lock());
        if let Some(token) = lifecycle.cancel {
            token.cancel();
        }
        if let Some(task) = lifecycle.task {
            task.abort();
        }
        drop(lifecycle.subscription);
        self.listeners.clear();
        debug!("sync coordinator disposed");
    }

    /// Current sync bookkeeping.
    pub fn status(&self) -> SyncStatus {
        let mut status = self.status.lock().clone();
        status.in_progress = self.running.load(Ordering::Acquire);
        status
    }

    /// Whether a sync run is active.
    pub fn is_in_progress(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Receive progress updates until the subscription is dropped.
    pub fn add_progress_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncProgress) + Send + Sync + 'static,
    {
        let listener: Arc<ProgressListener> = Arc::new(listener);
        self.listeners.register(listener)
    }

    /// User-initiated sync; ignores the auto-sync throttle.
    pub async fn request_manual_sync(&self) -> Result<SyncResult> {
        info!("manual sync requested");
        self.perform_full_sync().await
    }

    /// Replay every replayable pending action once, in insertion order.
    #[instrument(skip(self))]
    pub async fn perform_full_sync(&self) -> Result<SyncResult> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(CirclePayError::SyncInProgress);
        }
        let _guard = RunGuard(&self.running);
        let started = tokio::time::Instant::now();
        self.status.lock().in_progress = true;

        self.emit(SyncProgress::new(SyncPhase::Starting, 0, 0).with_item("checking pending actions"));

        let report = match self.cache.list_replayable_actions().await {
            Ok(actions) => self.replay(actions).await,
            Err(err) => {
                error!(error = %err, "could not read pending actions");
                RunReport {
                    errors: vec![SyncErrorRecord {
                        action_id: None,
                        kind: None,
                        message: err.to_string(),
                        retryable: true,
                    }],
                    interrupted: true,
                    ..RunReport::default()
                }
            }
        };

        let success = !report.interrupted;
        if success {
            self.emit(SyncProgress::new(SyncPhase::Completed, report.synced, report.synced));
        } else {
            self.emit(SyncProgress::new(SyncPhase::Failed, report.synced, report.synced));
        }

        self.record_run(success, &report).await;

        let result = SyncResult {
            success,
            synced_actions: report.synced,
            conflicts: Vec::new(),
            errors: report.errors,
            duration: started.elapsed(),
        };
        info!(
            success,
            synced = result.synced_actions,
            errors = result.errors.len(),
            duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            "sync finished"
        );
        Ok(result)
    }

    async fn replay(&self, actions: Vec<PendingAction>) -> RunReport {
        let total = actions.len();
        let mut report = RunReport::default();

        for (index, action) in actions.into_iter().enumerate() {
            if !self.monitor.is_online() {
                warn!(remaining = total - index, "connectivity lost during sync");
                report.errors.push(SyncErrorRecord {
                    action_id: None,
                    kind: None,
                    message: "connectivity lost during sync".to_string(),
                    retryable: true,
                });
                report.interrupted = true;
                break;
            }

            self.emit(SyncProgress::new(SyncPhase::Processing, index, total).with_item(action.kind.as_str()));

            match self.dispatcher.dispatch(&action).await {
                Ok(()) => {
                    if let Err(err) = self.cache.complete_pending_action(&action.id).await {
                        warn!(action_id = %action.id, error = %err, "could not remove replayed action");
                    }
                    report.synced += 1;
                    debug!(action_id = %action.id, kind = %action.kind, "replayed pending action");
                }
                Err(err) => {
                    warn!(action_id = %action.id, kind = %action.kind, error = %err, "pending action replay failed");
                    report.errors.push(SyncErrorRecord {
                        action_id: Some(action.id.clone()),
                        kind: Some(action.kind),
                        message: err.to_string(),
                        retryable: err.is_retryable(),
                    });
                    if let Err(err) = self.record_failure(action).await {
                        warn!(error = %err, "could not update pending action after failure");
                    }
                }
            }
        }
        report
    }

    /// Bump the retry count and drop the action once it reaches the cap.
    async fn record_failure(&self, mut action: PendingAction) -> Result<()> {
        let Some(count) = self.cache.increment_retry_count(&action.id).await? else {
            return Ok(());
        };
        if count < self.config.max_action_retries {
            return Ok(());
        }

        action.retry_count = count;
        if action.priority == Priority::High {
            self.cache.escalate_action(&action).await?;
        }
        self.cache.complete_pending_action(&action.id).await?;
        warn!(action_id = %action.id, retries = count, "pending action dropped after too many failures");
        Ok(())
    }

    async fn record_run(&self, success: bool, report: &RunReport) {
        let pending = match self.cache.list_pending_actions().await {
            Ok(actions) => actions.len(),
            Err(err) => {
                warn!(error = %err, "could not count pending actions");
                self.status.lock().pending_actions
            }
        };

        let snapshot = {
            let mut status = self.status.lock();
            status.in_progress = false;
            status.pending_actions = pending;
            status.last_error = report.errors.last().map(|record| record.message.clone());
            if success {
                let now = self.clock.now_utc();
                status.last_sync_at = Some(now);
                status.next_sync_at = self.next_allowed(now);
            }
            status.clone()
        };

        if let Err(err) = self.cache.save_sync_status(&snapshot).await {
            warn!(error = %err, "could not persist sync status");
        }
    }

    fn next_allowed(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.config.min_auto_sync_interval())
            .ok()
            .and_then(|interval| last.checked_add_signed(interval))
    }

    /// Whether an automatic sync may run now.
    fn auto_sync_due(&self) -> bool {
        let Some(last) = self.status.lock().last_sync_at else {
            return true;
        };
        let elapsed = self.clock.now_utc() - last;
        chrono::Duration::from_std(self.config.min_auto_sync_interval())
            .map_or(true, |interval| elapsed >= interval)
    }

    async fn auto_sync(&self) {
        if self.is_in_progress() {
            debug!("sync already running, skipping auto-sync");
            return;
        }
        if !self.auto_sync_due() {
            debug!("last sync too recent, skipping auto-sync");
            return;
        }
        match self.perform_full_sync().await {
            Ok(_) | Err(CirclePayError::SyncInProgress) => {}
            Err(err) => warn!(error = %err, "auto-sync failed"),
        }
    }

    fn emit(&self, progress: SyncProgress) {
        self.listeners.notify(|listener| listener(&progress));
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        if let Some(token) = self.lifecycle.get_mut().cancel.take() {
            token.cancel();
        }
    }
}

fn spawn_debouncer(
    coordinator: Weak<SyncCoordinator>,
    reconnects: Arc<Notify>,
    debounce: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => return,
                () = reconnects.notified() => {}
            }

            // A newer reconnect inside the window restarts it.
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    () = reconnects.notified() => continue,
                    () = tokio::time::sleep(debounce) => break,
                }
            }

            let Some(coordinator) = coordinator.upgrade() else { return };
            coordinator.auto_sync().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use circlepay_common::MockClock;
    use circlepay_domain::{ActionKind, ConnectivitySignal};
    use serde_json::json;

    use super::*;
    use crate::cache::MemoryStore;
    use crate::connectivity::ChannelConnectivitySource;

    #[derive(Default)]
    struct FakeDispatcher {
        dispatched: Mutex<Vec<String>>,
        failing: Mutex<HashSet<String>>,
        go_offline: Mutex<Option<Arc<ConnectivityMonitor>>>,
    }

    #[async_trait]
    impl ActionDispatcher for FakeDispatcher {
        async fn dispatch(&self, action: &PendingAction) -> Result<()> {
            self.dispatched.lock().push(action.id.clone());
            if let Some(monitor) = self.go_offline.lock().take() {
                monitor.ingest(ConnectivitySignal::disconnected());
            }
            if self.failing.lock().contains(&action.id) {
                return Err(CirclePayError::Http { status: 503, message: "unavailable".into() });
            }
            Ok(())
        }
    }

    struct Harness {
        cache: Arc<PersistentCache>,
        monitor: Arc<ConnectivityMonitor>,
        dispatcher: Arc<FakeDispatcher>,
        clock: MockClock,
        coordinator: Arc<SyncCoordinator>,
    }

    fn harness() -> Harness {
        let clock = MockClock::new();
        let cache = Arc::new(PersistentCache::new(Arc::new(MemoryStore::new()), Arc::new(clock.clone())));
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::new(ChannelConnectivitySource::online()),
            Arc::new(clock.clone()),
            Duration::from_secs(30),
        ));
        monitor.ingest(ConnectivitySignal::wifi(-60));
        let dispatcher = Arc::new(FakeDispatcher::default());
        let coordinator = Arc::new(SyncCoordinator::new(
            cache.clone(),
            monitor.clone(),
            dispatcher.clone(),
            Arc::new(clock.clone()),
            SyncConfig::default(),
        ));
        Harness { cache, monitor, dispatcher, clock, coordinator }
    }

    async fn enqueue(cache: &PersistentCache, kind: ActionKind, priority: Priority) -> String {
        cache.enqueue_pending_action(kind, json!({"kind": kind.as_str()}), priority).await.unwrap()
    }

    #[tokio::test]
    async fn replays_actions_in_insertion_order() {
        let h = harness();
        let first = enqueue(&h.cache, ActionKind::Payment, Priority::Low).await;
        let second = enqueue(&h.cache, ActionKind::WalletCreation, Priority::High).await;

        let progress = Arc::new(Mutex::new(Vec::new()));
        let _subscription = {
            let progress = progress.clone();
            h.coordinator.add_progress_listener(move |p| progress.lock().push(p.phase))
        };

        let result = h.coordinator.perform_full_sync().await.unwrap();

        assert!(result.success);
        assert_eq!(result.synced_actions, 2);
        assert!(result.conflicts.is_empty());
        assert_eq!(*h.dispatcher.dispatched.lock(), vec![first, second]);
        assert!(h.cache.list_pending_actions().await.unwrap().is_empty());
        assert_eq!(
            *progress.lock(),
            vec![SyncPhase::Starting, SyncPhase::Processing, SyncPhase::Processing, SyncPhase::Completed]
        );

        let status = h.coordinator.status();
        assert!(status.last_sync_at.is_some());
        assert!(!status.in_progress);
        assert_eq!(status.pending_actions, 0);
        assert_eq!(h.cache.load_sync_status().await.unwrap(), status);
    }

    #[tokio::test]
    async fn fifth_failure_removes_and_escalates_high_priority() {
        let h = harness();
        let high = enqueue(&h.cache, ActionKind::Transfer, Priority::High).await;
        let low = enqueue(&h.cache, ActionKind::Payment, Priority::Low).await;
        h.dispatcher.failing.lock().extend([high.clone(), low.clone()]);

        for run in 1..=4 {
            let result = h.coordinator.perform_full_sync().await.unwrap();
            assert_eq!(result.errors.len(), 2);
            let pending = h.cache.list_pending_actions().await.unwrap();
            assert_eq!(pending.len(), 2, "run {run}");
            assert!(pending.iter().all(|a| a.retry_count == run));
        }

        h.coordinator.perform_full_sync().await.unwrap();
        assert!(h.cache.list_pending_actions().await.unwrap().is_empty());

        let escalated = h.cache.list_escalated_actions().await.unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].id, high);
        assert_eq!(escalated[0].retry_count, 5);
    }

    #[tokio::test]
    async fn connectivity_loss_leaves_remaining_actions_untouched() {
        let h = harness();
        let first = enqueue(&h.cache, ActionKind::Payment, Priority::High).await;
        let second = enqueue(&h.cache, ActionKind::Payment, Priority::High).await;
        *h.dispatcher.go_offline.lock() = Some(h.monitor.clone());

        let result = h.coordinator.perform_full_sync().await.unwrap();

        assert!(!result.success);
        assert_eq!(result.synced_actions, 1);
        assert_eq!(*h.dispatcher.dispatched.lock(), vec![first]);
        let remaining = h.cache.list_pending_actions().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second);
        assert_eq!(remaining[0].retry_count, 0);
        assert!(h.coordinator.status().last_sync_at.is_none());
    }

    #[tokio::test]
    async fn leased_actions_are_skipped() {
        let h = harness();
        h.cache
            .enqueue_leased_action(ActionKind::ProfileUpdate, json!({}), Priority::Medium)
            .await
            .unwrap();

        let result = h.coordinator.perform_full_sync().await.unwrap();
        assert_eq!(result.synced_actions, 0);
        assert!(h.dispatcher.dispatched.lock().is_empty());
        assert_eq!(h.coordinator.status().pending_actions, 1);
    }

    struct BlockingDispatcher(Arc<Notify>);

    #[async_trait]
    impl ActionDispatcher for BlockingDispatcher {
        async fn dispatch(&self, _action: &PendingAction) -> Result<()> {
            self.0.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_sync_is_rejected() {
        let h = harness();
        enqueue(&h.cache, ActionKind::Payment, Priority::Low).await;
        let release = Arc::new(Notify::new());
        let coordinator = Arc::new(SyncCoordinator::new(
            h.cache.clone(),
            h.monitor.clone(),
            Arc::new(BlockingDispatcher(release.clone())),
            Arc::new(h.clock.clone()),
            SyncConfig::default(),
        ));

        let running = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.perform_full_sync().await })
        };
        while !coordinator.is_in_progress() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(coordinator.request_manual_sync().await, Err(CirclePayError::SyncInProgress)));

        release.notify_one();
        assert!(running.await.unwrap().unwrap().success);
        assert!(!coordinator.is_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_triggers_debounced_auto_sync_once_per_interval() {
        let h = harness();
        h.coordinator.start().await.unwrap();
        enqueue(&h.cache, ActionKind::Payment, Priority::Medium).await;

        h.monitor.ingest(ConnectivitySignal::disconnected());
        h.monitor.ingest(ConnectivitySignal::wifi(-60));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        // flapping inside the window restarts the debounce
        h.monitor.ingest(ConnectivitySignal::disconnected());
        h.monitor.ingest(ConnectivitySignal::wifi(-60));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(h.dispatcher.dispatched.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(h.dispatcher.dispatched.lock().len(), 1);

        // another reconnect right away is throttled
        enqueue(&h.cache, ActionKind::Payment, Priority::Medium).await;
        h.monitor.ingest(ConnectivitySignal::disconnected());
        h.monitor.ingest(ConnectivitySignal::wifi(-60));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.dispatcher.dispatched.lock().len(), 1);

        // once the interval has passed the next reconnect syncs again
        h.clock.advance(Duration::from_secs(5 * 60));
        h.monitor.ingest(ConnectivitySignal::disconnected());
        h.monitor.ingest(ConnectivitySignal::wifi(-60));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.dispatcher.dispatched.lock().len(), 2);

        h.coordinator.dispose();
    }

    #[tokio::test]
    async fn start_restores_persisted_status() {
        let h = harness();
        let persisted = SyncStatus {
            last_sync_at: Some(h.clock.now_utc()),
            in_progress: true,
            last_error: Some("timeout".into()),
            ..SyncStatus::default()
        };
        h.cache.save_sync_status(&persisted).await.unwrap();

        h.coordinator.start().await.unwrap();
        let status = h.coordinator.status();
        assert_eq!(status.last_sync_at, persisted.last_sync_at);
        assert_eq!(status.last_error.as_deref(), Some("timeout"));
        assert!(!status.in_progress);
        h.coordinator.dispose();
    }
}
