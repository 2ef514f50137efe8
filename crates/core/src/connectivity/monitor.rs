//! Connectivity monitor
//!
//! Normalizes raw platform signals into [`ConnectivityState`] snapshots,
//! detects online/offline edges and fans them out to observers.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use circlepay_common::{Clock, ObserverRegistry, Subscription};
use circlepay_domain::{
    ConnectionQuality, ConnectivitySignal, ConnectivityState, ConnectivitySummary, TransportType,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ports::ConnectivitySource;
use super::quality::normalize;

/// Typed connectivity callbacks; every method defaults to a no-op.
pub trait ConnectivityObserver: Send + Sync {
    /// Every new snapshot, unconditionally.
    fn on_state(&self, _state: &ConnectivityState) {}

    /// The device became online (including the first online reading).
    fn on_online(&self, _state: &ConnectivityState) {}

    /// The device went offline (including an offline first reading).
    fn on_offline(&self, _state: &ConnectivityState) {}

    /// Offline to online transition, with how long the device was offline.
    fn on_reconnected(&self, _state: &ConnectivityState, _offline_for: Duration) {}

    /// Quality changed while the device stayed online.
    fn on_quality_changed(&self, _previous: ConnectionQuality, _state: &ConnectivityState) {}
}

struct FnListener<F>(F);

impl<F> ConnectivityObserver for FnListener<F>
where
    F: Fn(&ConnectivityState) + Send + Sync,
{
    fn on_state(&self, state: &ConnectivityState) {
        (self.0)(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Online,
    Offline,
    Reconnected(Duration),
    QualityChanged(ConnectionQuality),
}

#[derive(Default)]
struct Tracker {
    current: Option<ConnectivityState>,
    offline_started_at: Option<Instant>,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Connectivity monitor
pub struct ConnectivityMonitor {
    source: Arc<dyn ConnectivitySource>,
    clock: Arc<dyn Clock>,
    reprobe_interval: Duration,
    tracker: Mutex<Tracker>,
    observers: ObserverRegistry<dyn ConnectivityObserver>,
    lifecycle: Mutex<Lifecycle>,
}

impl ConnectivityMonitor {
    /// Monitor over `source`, re-probing every `reprobe_interval` while online.
    pub fn new(
        source: Arc<dyn ConnectivitySource>,
        clock: Arc<dyn Clock>,
        reprobe_interval: Duration,
    ) -> Self {
        Self {
            source,
            clock,
            reprobe_interval,
            tracker: Mutex::new(Tracker::default()),
            observers: ObserverRegistry::new("connectivity"),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Subscribe to the source, take an initial reading and start the
    /// periodic re-probe. Calling `start` twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let token = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.cancel.is_some() {
                return;
            }
            let token = CancellationToken::new();
            lifecycle.cancel = Some(token.clone());
            token
        };

        let subscription = spawn_subscription(Arc::downgrade(self), self.source.subscribe(), token.clone());

        match self.source.fetch().await {
            Ok(signal) => {
                self.ingest(signal);
            }
            Err(err) => warn!(error = %err, "initial connectivity fetch failed"),
        }

        let reprobe = spawn_reprobe(Arc::downgrade(self), self.reprobe_interval, token);

        self.lifecycle.lock().tasks.extend([subscription, reprobe]);
        info!(online = self.is_online(), "connectivity monitor started");
    }

    /// Stop background tasks and drop every observer.
    pub fn dispose(&self) {
        let lifecycle = std::mem::take(&mut *self.lifecycle.lock());
        if let Some(token) = lifecycle.cancel {
            token.cancel();
        }
        for task in lifecycle.tasks {
            task.abort();
        }
        self.observers.clear();
        debug!("connectivity monitor disposed");
    }

    /// Latest snapshot, `None` before the first signal.
    pub fn current_state(&self) -> Option<ConnectivityState> {
        self.tracker.lock().current.clone()
    }

    /// `is_connected && is_reachable` of the current snapshot; false before
    /// the first reading.
    pub fn is_online(&self) -> bool {
        self.tracker.lock().current.as_ref().is_some_and(ConnectivityState::is_online)
    }

    /// Whether the device is online over Wi-Fi.
    pub fn is_wifi_connected(&self) -> bool {
        self.tracker
            .lock()
            .current
            .as_ref()
            .is_some_and(|state| state.is_connected && state.transport == TransportType::Wifi)
    }

    /// Whether the current connection is billed by usage.
    pub fn is_metered(&self) -> bool {
        self.tracker.lock().current.as_ref().is_some_and(|state| state.is_metered)
    }

    /// Time spent offline so far, `None` while online.
    pub fn offline_duration(&self) -> Option<Duration> {
        let started = self.tracker.lock().offline_started_at?;
        Some(self.clock.now().saturating_duration_since(started))
    }

    /// Display strings for the current state.
    pub fn summary(&self) -> ConnectivitySummary {
        ConnectivitySummary::from_state(self.tracker.lock().current.as_ref())
    }

    /// Register a snapshot listener.
    ///
    /// Fires right away with the current snapshot if one exists, then on
    /// every new snapshot.
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectivityState) + Send + Sync + 'static,
    {
        self.add_observer(Arc::new(FnListener(listener)))
    }

    /// Register a typed observer. `on_state` fires right away with the
    /// current snapshot if one exists.
    pub fn add_observer(&self, observer: Arc<dyn ConnectivityObserver>) -> Subscription {
        let subscription = self.observers.register(Arc::clone(&observer));
        if let Some(state) = self.current_state() {
            if panic::catch_unwind(AssertUnwindSafe(|| observer.on_state(&state))).is_err() {
                error!("connectivity observer panicked on initial state");
            }
        }
        subscription
    }

    /// Normalize `signal` into a new snapshot and dispatch the resulting
    /// edges. Returns the new snapshot.
    pub fn ingest(&self, signal: ConnectivitySignal) -> ConnectivityState {
        let now = self.clock.now();
        let now_utc = self.clock.now_utc();

        let (state, edges) = {
            let mut tracker = self.tracker.lock();
            let previous = tracker.current.take();
            let mut state = normalize(&signal, previous.as_ref(), now_utc);

            let was_online = previous.as_ref().map_or(true, ConnectivityState::is_online);
            let is_online = state.is_online();
            let mut edges = Vec::new();

            if is_online && !was_online {
                let offline_for = tracker
                    .offline_started_at
                    .take()
                    .map(|started| now.saturating_duration_since(started))
                    .unwrap_or_default();
                state.reconnected_at = Some(now_utc);
                edges.push(Edge::Reconnected(offline_for));
                edges.push(Edge::Online);
            } else if is_online && previous.is_none() {
                edges.push(Edge::Online);
            } else if !is_online && was_online {
                tracker.offline_started_at = Some(now);
                edges.push(Edge::Offline);
            } else if let Some(previous) = previous.as_ref() {
                if is_online && previous.quality != state.quality {
                    edges.push(Edge::QualityChanged(previous.quality));
                }
            }

            tracker.current = Some(state.clone());
            (state, edges)
        };

        self.dispatch(&state, &edges);
        state
    }

    fn dispatch(&self, state: &ConnectivityState, edges: &[Edge]) {
        self.observers.notify(|observer| observer.on_state(state));

        for edge in edges {
            match *edge {
                Edge::Online => {
                    self.observers.notify(|observer| observer.on_online(state));
                }
                Edge::Offline => {
                    info!(transport = state.transport.as_str(), "device went offline");
                    self.observers.notify(|observer| observer.on_offline(state));
                }
                Edge::Reconnected(offline_for) => {
                    info!(
                        offline_ms = u64::try_from(offline_for.as_millis()).unwrap_or(u64::MAX),
                        quality = state.quality.as_str(),
                        "device reconnected"
                    );
                    self.observers.notify(|observer| observer.on_reconnected(state, offline_for));
                }
                Edge::QualityChanged(previous) => {
                    debug!(
                        from = previous.as_str(),
                        to = state.quality.as_str(),
                        "connection quality changed"
                    );
                    self.observers.notify(|observer| observer.on_quality_changed(previous, state));
                }
            }
        }
    }

    async fn reprobe(&self) {
        if !self.is_online() {
            return;
        }
        match self.source.fetch().await {
            Ok(signal) => {
                self.ingest(signal);
            }
            Err(err) => warn!(error = %err, "connectivity re-probe failed"),
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Some(token) = self.lifecycle.get_mut().cancel.take() {
            token.cancel();
        }
    }
}

fn spawn_subscription(
    monitor: Weak<ConnectivityMonitor>,
    mut signals: futures::stream::BoxStream<'static, ConnectivitySignal>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                next = signals.next() => {
                    let Some(signal) = next else { break };
                    let Some(monitor) = monitor.upgrade() else { break };
                    monitor.ingest(signal);
                }
            }
        }
    })
}

fn spawn_reprobe(
    monitor: Weak<ConnectivityMonitor>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(monitor) = monitor.upgrade() else { break };
                    monitor.reprobe().await;
                }
            }
        }
    })
}
