//! The sync engine.
//!
//! Every change is expressed as a [`Mutation`] and applied inside a remote
//! transaction; the in-memory [`EntryStore`] is only updated once the store
//! has committed. Mutations against the same document are serialized on this
//! client, while races between clients are left to the store's
//! compare-and-swap retries.

mod connect;

use crate::cache::{CacheKey, LocalCache};
use crate::error::{Result, StoreError, SyncError};
use crate::events::{EventHub, ListenerId, StatusEvent, SyncStatus};
use crate::remote::{DocumentStore, StoreResult};
use chrono::Utc;
use cradle_engine::{
    normalize_with_report, EntryStore, MergePolicy, MergeReport, Mutation, MutationOutcome,
    Provenance, Record, RecordId, RecordKind, Snapshot, Timestamp,
};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long `connect` waits for server-confirmed data by default.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Audit reason of the write that creates a missing document.
pub const INITIALISE_REASON: &str = "Initialise";

/// Options for one sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// The shared household document
    pub document_id: String,
    pub connect_timeout: Duration,
    /// Applied by [`SyncEngine::merge_snapshot`]
    pub merge_policy: MergePolicy,
}

impl SyncOptions {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            merge_policy: MergePolicy::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }
}

struct ActiveSubscription {
    doc_id: String,
    id: Uuid,
    task: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    cache: Option<LocalCache>,
    connect_timeout: Duration,
    merge_policy: MergePolicy,
    document_id: RwLock<String>,
    entries: RwLock<EntryStore>,
    events: EventHub,
    /// One mutation lock per document id.
    locks: DashMap<String, Arc<Mutex<()>>>,
    subscription: Mutex<Option<ActiveSubscription>>,
}

/// Client-side sync engine for one household document.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn DocumentStore>, options: SyncOptions) -> Self {
        Self::build(store, options, None)
    }

    /// An engine that mirrors server data to `cache` and can queue records
    /// while offline.
    pub fn with_cache(store: Arc<dyn DocumentStore>, options: SyncOptions, cache: LocalCache) -> Self {
        Self::build(store, options, Some(cache))
    }

    fn build(store: Arc<dyn DocumentStore>, options: SyncOptions, cache: Option<LocalCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                cache,
                connect_timeout: options.connect_timeout,
                merge_policy: options.merge_policy,
                document_id: RwLock::new(options.document_id),
                entries: RwLock::new(EntryStore::new()),
                events: EventHub::new(),
                locks: DashMap::new(),
                subscription: Mutex::new(None),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn status(&self) -> SyncStatus {
        self.inner.events.current().status
    }

    pub fn status_event(&self) -> StatusEvent {
        self.inner.events.current()
    }

    pub fn watch_status(&self) -> watch::Receiver<StatusEvent> {
        self.inner.events.watch()
    }

    /// Call `callback(status, message)` on every status event.
    pub fn on_status<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(SyncStatus, &str) + Send + Sync + 'static,
    {
        self.inner.events.on_status(callback)
    }

    /// Call `callback(snapshot, provenance)` whenever the Entry Store is
    /// replaced.
    pub fn on_data_changed<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Snapshot, Provenance) + Send + Sync + 'static,
    {
        self.inner.events.on_data_changed(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove(id)
    }

    pub fn cache(&self) -> Option<&LocalCache> {
        self.inner.cache.as_ref()
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.inner.merge_policy
    }

    pub async fn document_id(&self) -> String {
        self.inner.document_id.read().await.clone()
    }

    /// A copy of the current Entry Store snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.entries.read().await.snapshot().clone()
    }

    pub async fn provenance(&self) -> Option<Provenance> {
        self.inner.entries.read().await.provenance()
    }

    pub async fn revision(&self) -> u64 {
        self.inner.entries.read().await.revision()
    }

    /// One kind's records, newest first.
    pub async fn records(&self, kind: RecordKind) -> Vec<Record> {
        self.inner.entries.read().await.records(kind)
    }

    /// One kind's records within the cached history range preference.
    pub async fn history(&self, kind: RecordKind, now: Timestamp) -> Vec<Record> {
        let range = self
            .inner
            .cache
            .as_ref()
            .map(|cache| cache.preferences().history_range)
            .unwrap_or_default();

        self.records(kind)
            .await
            .into_iter()
            .filter(|record| range.includes(now, record.occurred_at()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Insert or replace one record by id.
    pub async fn save_entry(&self, record: impl Into<Record>, reason: &str) -> Result<MutationOutcome> {
        self.mutate(Mutation::save(record), reason).await
    }

    /// Delete records of one kind by id. Returns how many were removed.
    ///
    /// An empty id list opens no transaction. Missing ids are not an error.
    pub async fn delete_entries<I, S>(&self, kind: RecordKind, ids: I, reason: &str) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<RecordId>,
    {
        match self.mutate(Mutation::delete(kind, ids), reason).await? {
            MutationOutcome::Deleted { removed, .. } => Ok(removed),
            _ => Ok(0),
        }
    }

    /// Union `incoming` into the remote document under the configured
    /// [`MergePolicy`].
    pub async fn merge_snapshot(&self, incoming: Snapshot, reason: &str) -> Result<MergeReport> {
        let mutation = Mutation::merge(incoming, self.inner.merge_policy);
        match self.mutate(mutation, reason).await? {
            MutationOutcome::Merged(report) => {
                if !report.collisions.is_empty() {
                    info!(
                        collisions = report.collisions.len(),
                        policy = %self.inner.merge_policy,
                        "Merge resolved id collisions"
                    );
                }
                Ok(report)
            }
            _ => Ok(MergeReport::default()),
        }
    }

    /// Keep a record on this device when the remote store cannot be
    /// reached. It is shown immediately as a local write and merged by
    /// [`flush_offline`](Self::flush_offline) later.
    pub async fn stash_offline(&self, record: impl Into<Record>) -> Result<Snapshot> {
        let record = record.into();
        record.validate()?;

        let cache = self.inner.cache.as_ref().ok_or_else(|| {
            SyncError::cache(CacheKey::Pending.name(), "no local cache configured")
        })?;
        let pending = cache.record_offline(record.clone())?;

        let mut entries = self.inner.entries.write().await;
        let mut snapshot = entries.snapshot().clone();
        snapshot.upsert(record);
        entries.replace(snapshot.clone(), Provenance::Local);
        drop(entries);

        self.inner.events.emit_data(&snapshot, Provenance::Local);
        self.inner.events.emit_status(
            SyncStatus::Offline,
            "Saved on this device; it will sync when the connection returns",
        );
        Ok(pending)
    }

    /// Merge records stashed while offline and clear them once the merge
    /// committed. Returns `None` when nothing was pending.
    pub async fn flush_offline(&self, reason: &str) -> Result<Option<MergeReport>> {
        let Some(cache) = self.inner.cache.as_ref() else {
            return Ok(None);
        };

        let pending = cache.pending();
        if pending.is_empty() {
            return Ok(None);
        }

        info!(records = pending.record_count(), "Flushing offline entries");
        let report = self.merge_snapshot(pending, reason).await?;
        cache.clear_pending()?;
        Ok(Some(report))
    }

    async fn mutate(&self, mutation: Mutation, reason: &str) -> Result<MutationOutcome> {
        mutation.validate()?;

        if mutation.is_noop() {
            debug!("Nothing to change, skipping transaction");
            return Ok(mutation.apply(&mut Snapshot::new()));
        }

        let reason = if reason.trim().is_empty() {
            mutation.default_reason()
        } else {
            reason
        };
        let doc_id = self.document_id().await;

        let lock = self.inner.lock_for(&doc_id);
        let _guard = lock.lock().await;

        self.inner.events.emit_status(SyncStatus::Saving, reason);

        let inner = &self.inner;
        let mut committed: Option<(Snapshot, MutationOutcome)> = None;
        let result = inner
            .store
            .transaction(
                &doc_id,
                Box::new(|current: Option<&Value>| -> StoreResult<Option<Value>> {
                    let mut snapshot = inner.read_document(&doc_id, current);
                    let outcome = mutation.apply(&mut snapshot);
                    snapshot.touch(Utc::now(), reason);

                    let document = snapshot
                        .to_document()
                        .map_err(|e| StoreError::Serialization(e.to_string()))?;
                    committed = Some((snapshot, outcome));
                    Ok(Some(document))
                }),
            )
            .await;

        let (snapshot, outcome) = match (result, committed) {
            (Ok(_), Some(committed)) => committed,
            // The store reported success without running the mutator.
            (Ok(_), None) => return Err(self.fail(&doc_id, StoreError::Aborted { attempts: 0 })),
            (Err(err), _) => return Err(self.fail(&doc_id, err)),
        };

        info!(
            document = %doc_id,
            reason,
            records = snapshot.record_count(),
            "Mutation committed"
        );

        self.inner
            .publish_unless_stale(snapshot, Provenance::Server)
            .await;
        self.inner.events.emit_status(SyncStatus::Synced, reason);
        Ok(outcome)
    }

    fn fail(&self, doc_id: &str, err: StoreError) -> SyncError {
        let err = SyncError::from(err);
        warn!(document = %doc_id, error = %err, "Mutation failed");
        self.inner
            .events
            .emit_status(SyncStatus::Error, err.status_message());
        err
    }
}

impl Inner {
    fn lock_for(&self, doc_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(doc_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Normalize a document value, logging whatever drift was tolerated.
    fn read_document(&self, doc_id: &str, data: Option<&Value>) -> Snapshot {
        let Some(data) = data else {
            return Snapshot::default();
        };

        let (snapshot, drift) = normalize_with_report(data);
        for finding in &drift {
            warn!(document = %doc_id, %finding, "Tolerated schema drift");
        }
        snapshot
    }

    /// Replace the Entry Store and notify listeners.
    async fn publish(&self, snapshot: Snapshot, provenance: Provenance) {
        if provenance.is_confirmed() {
            self.mirror(&snapshot);
        }
        self.entries
            .write()
            .await
            .replace(snapshot.clone(), provenance);
        self.events.emit_data(&snapshot, provenance);
    }

    /// Publish an observation unless the Entry Store already holds a later
    /// server-confirmed snapshot. Returns the snapshot now in the store.
    ///
    /// Commits and subscription events race each other, so an older one can
    /// arrive after a newer one was published. Documents are ordered by their
    /// write generation, not by client clocks.
    async fn publish_unless_stale(&self, snapshot: Snapshot, provenance: Provenance) -> Snapshot {
        {
            let entries = self.entries.read().await;
            if entries.provenance() == Some(Provenance::Server)
                && snapshot.is_older_than(entries.snapshot())
            {
                debug!(?provenance, "Ignoring an observation older than the Entry Store");
                return entries.snapshot().clone();
            }
        }
        self.publish(snapshot.clone(), provenance).await;
        snapshot
    }

    fn mirror(&self, snapshot: &Snapshot) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.store_snapshot(snapshot) {
                warn!(error = %err, "Could not mirror snapshot to the local cache");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryDocumentStore;

    #[test]
    fn options_defaults() {
        let options = SyncOptions::new("household");
        assert_eq!(options.connect_timeout, Duration::from_secs(4));
        assert_eq!(options.merge_policy, MergePolicy::RemoteWins);

        let options = options
            .with_connect_timeout(Duration::from_millis(10))
            .with_merge_policy(MergePolicy::IncomingWins);
        assert_eq!(options.connect_timeout, Duration::from_millis(10));
        assert_eq!(options.merge_policy, MergePolicy::IncomingWins);
    }

    #[tokio::test]
    async fn lock_is_shared_per_document() {
        let engine = SyncEngine::new(MemoryDocumentStore::new_shared(), SyncOptions::new("a"));

        let first = engine.inner.lock_for("a");
        let second = engine.inner.lock_for("a");
        let other = engine.inner.lock_for("b");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn empty_delete_touches_nothing() {
        let store = MemoryDocumentStore::new_shared();
        let engine = SyncEngine::new(store.clone(), SyncOptions::new("home"));

        let removed = engine
            .delete_entries(RecordKind::Feed, Vec::<String>::new(), "Delete entries")
            .await
            .unwrap();

        assert_eq!(removed, 0);
        assert_eq!(store.version("home"), 0);
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn blank_reason_uses_default() {
        let store = MemoryDocumentStore::new_shared();
        let engine = SyncEngine::new(store, SyncOptions::new("home"));
        let at = "2024-01-01T08:00:00Z".parse().unwrap();

        engine
            .save_entry(cradle_engine::Feed::bottle("f1", at, 90.0), "  ")
            .await
            .unwrap();

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.last_reason.as_deref(), Some("Save entry"));
        assert_eq!(engine.status_event().message, "Save entry");
    }

    #[tokio::test]
    async fn older_generation_does_not_replace_newer() {
        let engine = SyncEngine::new(MemoryDocumentStore::new_shared(), SyncOptions::new("home"));
        let at: Timestamp = "2024-01-01T08:00:00Z".parse().unwrap();

        let mut older = Snapshot::new();
        older.upsert(cradle_engine::Feed::bottle("f1", at, 90.0).into());
        older.touch(at, "Save entry");
        let mut newer = older.clone();
        newer.upsert(cradle_engine::Feed::bottle("f2", at, 90.0).into());
        // Stamped by a client whose clock runs behind
        newer.touch("2024-01-01T07:00:00Z".parse().unwrap(), "Save entry");

        engine
            .inner
            .publish_unless_stale(newer.clone(), Provenance::Server)
            .await;
        let kept = engine
            .inner
            .publish_unless_stale(older, Provenance::Server)
            .await;

        assert_eq!(kept, newer);
        assert_eq!(engine.snapshot().await, newer);
        assert_eq!(engine.revision().await, 1);

        // A cached replica never overrides server data it is older than
        let mut replica = Snapshot::new();
        replica.touch(at, "Save entry");
        engine.inner.publish_unless_stale(replica, Provenance::Cache).await;
        assert_eq!(engine.provenance().await, Some(Provenance::Server));
    }
}
