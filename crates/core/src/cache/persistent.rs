//! Persistent cache and pending-action queue
//!
//! Response entries live under `cache_{key}` with a schema version and an
//! optional absolute expiry. Stale entries are deleted on read and surface
//! as a miss, never as an error. Pending actions are kept as one JSON list
//! whose read-modify-write cycles are serialized by an async mutex.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use circlepay_common::Clock;
use circlepay_domain::constants::{
    CACHE_KEY_PREFIX, CACHE_SCHEMA_VERSION, CHAINS_TTL_SECS, ESCALATED_ACTIONS_KEY,
    PENDING_ACTIONS_KEY, SYNC_STATUS_KEY, TRANSACTIONS_TTL_SECS, USER_TTL_SECS, WALLETS_TTL_SECS,
};
use circlepay_domain::{
    ActionKind, CirclePayError, PendingAction, Priority, Result, SyncStatus,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ports::KeyValueStore;

/// Stored envelope around a cached value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub stored_at: DateTime<Utc>,
    pub schema_version: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Diagnostics snapshot of the response cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheSizeSummary {
    pub total_items: usize,
    pub estimated_bytes: usize,
    pub items_by_namespace: BTreeMap<String, usize>,
}

/// Type-default TTL for a cache key, matched on its namespace prefix.
pub fn default_ttl(key: &str) -> Option<Duration> {
    const DEFAULTS: [(&str, u64); 4] = [
        ("user", USER_TTL_SECS),
        ("wallets", WALLETS_TTL_SECS),
        ("transactions", TRANSACTIONS_TTL_SECS),
        ("chains", CHAINS_TTL_SECS),
    ];

    DEFAULTS
        .iter()
        .find(|(prefix, _)| key.starts_with(prefix))
        .map(|(_, secs)| Duration::from_secs(*secs))
}

/// Persistent cache built on a [`KeyValueStore`]
pub struct PersistentCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    schema_version: String,
    pending_lock: tokio::sync::Mutex<()>,
    leases: parking_lot::Mutex<HashSet<String>>,
}

impl PersistentCache {
    /// Cache over `store` using the current schema version.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_schema_version(store, clock, CACHE_SCHEMA_VERSION)
    }

    /// Cache that treats entries of any other version as misses.
    pub fn with_schema_version(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        schema_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            schema_version: schema_version.into(),
            pending_lock: tokio::sync::Mutex::new(()),
            leases: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    /// Version stamped on every entry written by this cache.
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    // ------------------------------------------------------------------
    // Response cache
    // ------------------------------------------------------------------

    /// Store `data` under `key`. `ttl` overrides the namespace default.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let stored_at = self.clock.now_utc();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| stored_at.checked_add_signed(ttl));

        let entry = CacheEntry {
            data,
            stored_at,
            schema_version: self.schema_version.clone(),
            expires_at,
        };
        let raw = serde_json::to_string(&entry)?;
        self.store.set(&storage_key(key), raw).await?;
        debug!(key, "cached response");
        Ok(())
    }

    /// Read `key`, deleting it when stale.
    ///
    /// Returns `Ok(None)` on a miss, a schema mismatch or an expired entry.
    /// Only storage failures are reported as errors.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let storage_key = storage_key(key);
        let Some(raw) = self.store.get(&storage_key).await? else {
            return Ok(None);
        };

        let entry: CacheEntry<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key, error = %err, "dropping undecodable cache entry");
                self.store.remove(&storage_key).await?;
                return Ok(None);
            }
        };

        if entry.schema_version != self.schema_version {
            debug!(key, stored = %entry.schema_version, "cache schema mismatch");
            self.store.remove(&storage_key).await?;
            return Ok(None);
        }

        if self.is_expired(key, &entry) {
            debug!(key, "cache entry expired");
            self.store.remove(&storage_key).await?;
            return Ok(None);
        }

        match serde_json::from_value(entry.data) {
            Ok(data) => Ok(Some(data)),
            Err(err) => {
                debug!(key, error = %err, "cached value does not match requested type");
                Ok(None)
            }
        }
    }

    /// Delete the entry for `key`, if any.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(&storage_key(key)).await
    }

    /// Delete every expired or outdated entry. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let mut stale = Vec::new();
        for storage_key in self.cache_keys().await? {
            let Some(raw) = self.store.get(&storage_key).await? else { continue };
            let key = storage_key.trim_start_matches(CACHE_KEY_PREFIX);
            let keep = serde_json::from_str::<CacheEntry<serde_json::Value>>(&raw)
                .map(|entry| {
                    entry.schema_version == self.schema_version && !self.is_expired(key, &entry)
                })
                .unwrap_or(false);
            if !keep {
                stale.push(storage_key);
            }
        }

        if !stale.is_empty() {
            self.store.multi_remove(&stale).await?;
            info!(removed = stale.len(), "removed stale cache entries");
        }
        Ok(stale.len())
    }

    /// Drop every cached response. Pending actions are kept.
    pub async fn clear_all(&self) -> Result<()> {
        let keys = self.cache_keys().await?;
        if !keys.is_empty() {
            self.store.multi_remove(&keys).await?;
        }
        Ok(())
    }

    /// Count and approximate size of cached entries, grouped by namespace.
    pub async fn size_summary(&self) -> Result<CacheSizeSummary> {
        let mut summary = CacheSizeSummary::default();
        for storage_key in self.cache_keys().await? {
            let Some(raw) = self.store.get(&storage_key).await? else { continue };
            let key = storage_key.trim_start_matches(CACHE_KEY_PREFIX);
            let namespace = key.split('_').next().unwrap_or(key).to_string();

            summary.total_items += 1;
            summary.estimated_bytes += storage_key.len() + raw.len();
            *summary.items_by_namespace.entry(namespace).or_insert(0) += 1;
        }
        Ok(summary)
    }

    fn is_expired(&self, key: &str, entry: &CacheEntry<serde_json::Value>) -> bool {
        let now = self.clock.now_utc();
        if let Some(expires_at) = entry.expires_at {
            return now > expires_at;
        }
        default_ttl(key)
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .is_some_and(|ttl| now - entry.stored_at > ttl)
    }

    async fn cache_keys(&self) -> Result<Vec<String>> {
        let keys = self.store.all_keys().await?;
        Ok(keys.into_iter().filter(|key| key.starts_with(CACHE_KEY_PREFIX)).collect())
    }

    // ------------------------------------------------------------------
    // Pending actions
    // ------------------------------------------------------------------

    /// Append a new pending action and return its id.
    pub async fn enqueue_pending_action(
        &self,
        kind: ActionKind,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Result<String> {
        self.insert_action(kind, payload, priority, false).await
    }

    /// Append a pending action already leased to the caller.
    ///
    /// The lease is taken under the same lock as the write, so sync never
    /// sees the action unleased.
    pub async fn enqueue_leased_action(
        &self,
        kind: ActionKind,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Result<String> {
        self.insert_action(kind, payload, priority, true).await
    }

    async fn insert_action(
        &self,
        kind: ActionKind,
        payload: serde_json::Value,
        priority: Priority,
        leased: bool,
    ) -> Result<String> {
        let _guard = self.pending_lock.lock().await;
        let mut actions = self.read_list(PENDING_ACTIONS_KEY).await?;

        let action = PendingAction {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            created_at: self.clock.now_utc(),
            retry_count: 0,
            priority,
        };
        let id = action.id.clone();
        actions.push(action);
        if leased {
            self.leases.lock().insert(id.clone());
        }
        if let Err(err) = self.write_list(PENDING_ACTIONS_KEY, &actions).await {
            self.leases.lock().remove(&id);
            return Err(err);
        }

        info!(action_id = %id, kind = %kind, priority = %priority, leased, "queued pending action");
        Ok(id)
    }

    /// Pending actions in insertion order
    pub async fn list_pending_actions(&self) -> Result<Vec<PendingAction>> {
        let _guard = self.pending_lock.lock().await;
        self.read_list(PENDING_ACTIONS_KEY).await
    }

    /// Pending actions not currently leased by an in-flight request
    pub async fn list_replayable_actions(&self) -> Result<Vec<PendingAction>> {
        let _guard = self.pending_lock.lock().await;
        let actions = self.read_list(PENDING_ACTIONS_KEY).await?;
        let leases = self.leases.lock();
        Ok(actions.into_iter().filter(|action| !leases.contains(&action.id)).collect())
    }

    /// Remove an action. Unknown ids are ignored.
    pub async fn complete_pending_action(&self, id: &str) -> Result<()> {
        let _guard = self.pending_lock.lock().await;
        self.remove_action(id).await
    }

    /// Drop the caller's lease on `id`, removing the action first when
    /// `complete` is set. The lease is released even if the removal fails.
    pub async fn release_leased_action(&self, id: &str, complete: bool) -> Result<()> {
        let _guard = self.pending_lock.lock().await;
        let removed = if complete { self.remove_action(id).await } else { Ok(()) };
        self.leases.lock().remove(id);
        removed
    }

    async fn remove_action(&self, id: &str) -> Result<()> {
        let mut actions = self.read_list(PENDING_ACTIONS_KEY).await?;
        let before = actions.len();
        actions.retain(|action| action.id != id);
        if actions.len() != before {
            self.write_list(PENDING_ACTIONS_KEY, &actions).await?;
            debug!(action_id = id, "completed pending action");
        }
        Ok(())
    }

    /// Bump the retry count of `id`; returns the new count, or `None` if the
    /// action no longer exists.
    pub async fn increment_retry_count(&self, id: &str) -> Result<Option<u32>> {
        let _guard = self.pending_lock.lock().await;
        let mut actions = self.read_list(PENDING_ACTIONS_KEY).await?;
        let Some(action) = actions.iter_mut().find(|action| action.id == id) else {
            return Ok(None);
        };
        action.retry_count = action.retry_count.saturating_add(1);
        let count = action.retry_count;
        self.write_list(PENDING_ACTIONS_KEY, &actions).await?;
        Ok(Some(count))
    }

    /// Drop every pending action and every lease.
    pub async fn clear_all_pending_actions(&self) -> Result<()> {
        let _guard = self.pending_lock.lock().await;
        self.store.remove(PENDING_ACTIONS_KEY).await?;
        self.leases.lock().clear();
        Ok(())
    }

    /// Move an action to the escalated list for manual resolution.
    ///
    /// Escalated actions are never replayed automatically.
    pub async fn escalate_action(&self, action: &PendingAction) -> Result<()> {
        let _guard = self.pending_lock.lock().await;
        let mut escalated = self.read_list(ESCALATED_ACTIONS_KEY).await?;
        if escalated.iter().all(|existing| existing.id != action.id) {
            escalated.push(action.clone());
            self.write_list(ESCALATED_ACTIONS_KEY, &escalated).await?;
        }
        warn!(action_id = %action.id, kind = %action.kind, "escalated pending action");
        Ok(())
    }

    /// Actions awaiting manual resolution, oldest first.
    pub async fn list_escalated_actions(&self) -> Result<Vec<PendingAction>> {
        let _guard = self.pending_lock.lock().await;
        self.read_list(ESCALATED_ACTIONS_KEY).await
    }

    /// Drop a lease without touching the stored action.
    pub fn release_action(&self, id: &str) {
        self.leases.lock().remove(id);
    }

    /// Whether a live request currently owns `id`.
    pub fn is_leased(&self, id: &str) -> bool {
        self.leases.lock().contains(id)
    }

    async fn read_list(&self, key: &str) -> Result<Vec<PendingAction>> {
        match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|err| {
                CirclePayError::Serialization(format!("corrupt action list '{key}': {err}"))
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn write_list(&self, key: &str, actions: &[PendingAction]) -> Result<()> {
        self.store.set(key, serde_json::to_string(actions)?).await
    }

    // ------------------------------------------------------------------
    // Sync status
    // ------------------------------------------------------------------

    /// Persist the latest sync bookkeeping.
    pub async fn save_sync_status(&self, status: &SyncStatus) -> Result<()> {
        self.store.set(SYNC_STATUS_KEY, serde_json::to_string(status)?).await
    }

    /// Last persisted status; a missing or unreadable record yields the default.
    pub async fn load_sync_status(&self) -> Result<SyncStatus> {
        let Some(raw) = self.store.get(SYNC_STATUS_KEY).await? else {
            return Ok(SyncStatus::default());
        };
        Ok(serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(error = %err, "ignoring unreadable sync status");
            SyncStatus::default()
        }))
    }
}

fn storage_key(key: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{key}")
}
