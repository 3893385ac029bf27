//! In-process document store.
//!
//! Keeps versioned documents in memory and commits transactions with
//! compare-and-swap, retrying the mutator when another writer got there
//! first. Switches simulate losing the network and losing access, so the
//! sync engine's degraded paths can be exercised without a real backend.

use super::{
    DocumentSnapshot, DocumentStore, DocumentSubscription, Mutator, SnapshotMetadata,
    SnapshotSender, StoreResult,
};
use crate::error::StoreError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts a transaction gets before it is aborted.
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
struct StoredDocument {
    value: Value,
    version: u64,
}

#[derive(Debug)]
struct Subscriber {
    id: Uuid,
    sender: SnapshotSender,
}

/// Document store living in this process.
///
/// Thread-safe and can be shared between sync engines via `Arc`, which is
/// how tests model several clients writing to one household.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<String, StoredDocument>,
    /// Live subscriptions, keyed by document id.
    subscribers: DashMap<String, Vec<Subscriber>>,
    offline: AtomicBool,
    denied: AtomicBool,
}

impl MemoryDocumentStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulate losing or regaining the network.
    ///
    /// While offline, reads and writes fail with [`StoreError::Unavailable`]
    /// and new subscriptions only see the on-device replica. Coming back
    /// online pushes a server-confirmed observation to every subscriber.
    pub fn set_offline(&self, offline: bool) {
        let was_offline = self.offline.swap(offline, Ordering::SeqCst);
        info!(offline, "Store connectivity changed");

        if was_offline && !offline {
            let doc_ids: Vec<String> = self.subscribers.iter().map(|e| e.key().clone()).collect();
            for doc_id in doc_ids {
                self.notify(&doc_id, SnapshotMetadata::default());
            }
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Simulate security rules refusing this client.
    pub fn set_access_denied(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }

    /// Number of live subscriptions on a document.
    pub fn subscriber_count(&self, doc_id: &str) -> usize {
        self.subscribers.get(doc_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Commit count of a document, 0 if it does not exist.
    pub fn version(&self, doc_id: &str) -> u64 {
        self.documents.get(doc_id).map(|d| d.version).unwrap_or(0)
    }

    /// Every document as one JSON object keyed by document id.
    pub fn export(&self) -> Value {
        let documents: Map<String, Value> = self
            .documents
            .iter()
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect();
        Value::Object(documents)
    }

    /// Load documents previously written by [`export`](Self::export).
    ///
    /// Returns how many documents were loaded.
    pub fn import(&self, documents: &Value) -> StoreResult<usize> {
        let Some(documents) = documents.as_object() else {
            return Err(StoreError::Serialization(
                "expected an object keyed by document id".into(),
            ));
        };

        for (doc_id, value) in documents {
            self.documents
                .entry(doc_id.clone())
                .and_modify(|d| {
                    d.value = value.clone();
                    d.version += 1;
                })
                .or_insert_with(|| StoredDocument {
                    value: value.clone(),
                    version: 1,
                });
        }

        Ok(documents.len())
    }

    fn check(&self, doc_id: &str) -> StoreResult<()> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(StoreError::PermissionDenied(format!(
                "access to document '{doc_id}' is not allowed"
            )));
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("network unreachable".into()));
        }
        Ok(())
    }

    fn read(&self, doc_id: &str) -> (Option<Value>, u64) {
        match self.documents.get(doc_id) {
            Some(doc) => (Some(doc.value.clone()), doc.version),
            None => (None, 0),
        }
    }

    /// Write `value` if the document is still at `expected`.
    fn commit(&self, doc_id: &str, expected: u64, value: Value) -> bool {
        match self.documents.entry(doc_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let version = entry.get().version;
                if version != expected {
                    return false;
                }
                entry.insert(StoredDocument {
                    value,
                    version: version + 1,
                });
                true
            }
            Entry::Vacant(entry) => {
                if expected != 0 {
                    return false;
                }
                entry.insert(StoredDocument { value, version: 1 });
                true
            }
        }
    }

    /// Send the stored state of a document to its subscribers.
    fn notify(&self, doc_id: &str, metadata: SnapshotMetadata) {
        let (data, _) = self.read(doc_id);
        self.broadcast(DocumentSnapshot::new(doc_id, data, metadata));
    }

    /// Returns the number of subscribers that received the observation.
    fn broadcast(&self, snapshot: DocumentSnapshot) -> usize {
        let Some(mut subscribers) = self.subscribers.get_mut(snapshot.id()) else {
            return 0;
        };

        // Drop subscribers whose receiver is gone.
        subscribers.retain(|s| s.sender.send(Ok(snapshot.clone())).is_ok());
        subscribers.len()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn transaction<'a>(
        &'a self,
        doc_id: &'a str,
        mut mutator: Mutator<'a>,
    ) -> BoxFuture<'a, StoreResult<Option<Value>>> {
        Box::pin(async move {
            for attempt in 1..=MAX_ATTEMPTS {
                self.check(doc_id)?;

                let (current, version) = self.read(doc_id);
                let Some(next) = mutator(current.as_ref())? else {
                    return Ok(None);
                };

                // Other writers may commit between our read and our commit.
                tokio::task::yield_now().await;

                if self.commit(doc_id, version, next.clone()) {
                    debug!(document = %doc_id, attempt, version = version + 1, "Transaction committed");
                    self.notify(doc_id, SnapshotMetadata::default());
                    return Ok(Some(next));
                }

                debug!(document = %doc_id, attempt, "Transaction conflict, retrying");
            }

            warn!(document = %doc_id, attempts = MAX_ATTEMPTS, "Transaction aborted");
            Err(StoreError::Aborted {
                attempts: MAX_ATTEMPTS,
            })
        })
    }

    fn get_once<'a>(&'a self, doc_id: &'a str) -> BoxFuture<'a, StoreResult<DocumentSnapshot>> {
        Box::pin(async move {
            self.check(doc_id)?;
            let (data, _) = self.read(doc_id);
            Ok(DocumentSnapshot::new(doc_id, data, SnapshotMetadata::default()))
        })
    }

    fn set_once<'a>(
        &'a self,
        doc_id: &'a str,
        value: Value,
        merge: bool,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.check(doc_id)?;

            // Echo the write to subscribers before it is confirmed.
            let (current, _) = self.read(doc_id);
            let echo = if merge {
                merge_top_level(current.as_ref(), &value)
            } else {
                value.clone()
            };
            let pending = SnapshotMetadata {
                has_pending_writes: true,
                from_cache: false,
            };
            self.broadcast(DocumentSnapshot::new(doc_id, Some(echo), pending));

            tokio::task::yield_now().await;

            let mut doc = self
                .documents
                .entry(doc_id.to_string())
                .or_insert_with(|| StoredDocument {
                    value: Value::Null,
                    version: 0,
                });
            doc.value = if merge {
                merge_top_level(Some(&doc.value), &value)
            } else {
                value
            };
            doc.version += 1;
            drop(doc);

            debug!(document = %doc_id, merge, "Document set");
            self.notify(doc_id, SnapshotMetadata::default());
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        doc_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<DocumentSubscription>> {
        Box::pin(async move {
            let (sender, receiver) = mpsc::unbounded_channel();
            let id = Uuid::new_v4();

            if self.denied.load(Ordering::SeqCst) {
                // Reported through the channel, which then closes.
                let _ = sender.send(Err(StoreError::PermissionDenied(format!(
                    "access to document '{doc_id}' is not allowed"
                ))));
                return Ok(DocumentSubscription { id, receiver });
            }

            let (data, _) = self.read(doc_id);
            let metadata = SnapshotMetadata {
                has_pending_writes: false,
                from_cache: self.is_offline(),
            };
            let _ = sender.send(Ok(DocumentSnapshot::new(doc_id, data, metadata)));

            self.subscribers
                .entry(doc_id.to_string())
                .or_default()
                .push(Subscriber { id, sender });

            info!(document = %doc_id, subscription = %id, "Subscription registered");
            Ok(DocumentSubscription { id, receiver })
        })
    }

    fn unsubscribe(&self, doc_id: &str, subscription: Uuid) {
        if let Some(mut subscribers) = self.subscribers.get_mut(doc_id) {
            subscribers.retain(|s| s.id != subscription);
        }
        // Clean up empty entries
        self.subscribers.remove_if(doc_id, |_, s| s.is_empty());

        info!(document = %doc_id, subscription = %subscription, "Subscription cancelled");
    }
}

fn merge_top_level(current: Option<&Value>, value: &Value) -> Value {
    match (current, value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            let mut merged = existing.clone();
            for (key, field) in incoming {
                merged.insert(key.clone(), field.clone());
            }
            Value::Object(merged)
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cradle_engine::Provenance;
    use serde_json::json;

    fn increment() -> Mutator<'static> {
        Box::new(|current: Option<&Value>| {
            let count = current.and_then(|v| v["count"].as_u64()).unwrap_or(0);
            Ok(Some(json!({ "count": count + 1 })))
        })
    }

    #[tokio::test]
    async fn transaction_creates_then_updates() {
        let store = MemoryDocumentStore::new();

        let first = store.transaction("home", increment()).await.unwrap();
        assert_eq!(first, Some(json!({"count": 1})));
        store.transaction("home", increment()).await.unwrap();

        assert_eq!(store.version("home"), 2);
        let doc = store.get_once("home").await.unwrap();
        assert_eq!(doc.data(), Some(&json!({"count": 2})));
    }

    #[tokio::test]
    async fn mutator_can_skip_the_write() {
        let store = MemoryDocumentStore::new();
        let result = store
            .transaction("home", Box::new(|_: Option<&Value>| Ok(None)))
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(store.version("home"), 0);
        assert!(!store.get_once("home").await.unwrap().exists());
    }

    #[tokio::test]
    async fn conflicting_transactions_retry() {
        let store = MemoryDocumentStore::new();

        let (a, b) = tokio::join!(
            store.transaction("home", increment()),
            store.transaction("home", increment())
        );
        a.unwrap();
        b.unwrap();

        let doc = store.get_once("home").await.unwrap();
        assert_eq!(doc.data(), Some(&json!({"count": 2})));
    }

    #[tokio::test]
    async fn set_once_echoes_before_confirming() {
        let store = MemoryDocumentStore::new();
        let mut sub = store.subscribe("home").await.unwrap();

        let initial = sub.receiver.recv().await.unwrap().unwrap();
        assert!(!initial.exists());
        assert_eq!(initial.provenance(), Provenance::Server);

        store.set_once("home", json!({"a": 1}), false).await.unwrap();
        store.set_once("home", json!({"b": 2}), true).await.unwrap();

        let echo = sub.receiver.recv().await.unwrap().unwrap();
        assert_eq!(echo.provenance(), Provenance::Local);
        let confirmed = sub.receiver.recv().await.unwrap().unwrap();
        assert_eq!(confirmed.provenance(), Provenance::Server);

        let merged_echo = sub.receiver.recv().await.unwrap().unwrap();
        assert_eq!(merged_echo.data(), Some(&json!({"a": 1, "b": 2})));
        let merged = sub.receiver.recv().await.unwrap().unwrap();
        assert_eq!(merged.data(), Some(&json!({"a": 1, "b": 2})));
    }

    #[tokio::test]
    async fn offline_serves_replica_then_recovers() {
        let store = MemoryDocumentStore::new();
        store.set_once("home", json!({"count": 7}), false).await.unwrap();
        store.set_offline(true);

        let mut sub = store.subscribe("home").await.unwrap();
        let cached = sub.receiver.recv().await.unwrap().unwrap();
        assert_eq!(cached.provenance(), Provenance::Cache);
        assert_eq!(cached.data(), Some(&json!({"count": 7})));

        assert!(matches!(
            store.transaction("home", increment()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.get_once("home").await.is_err());

        store.set_offline(false);
        let fresh = sub.receiver.recv().await.unwrap().unwrap();
        assert_eq!(fresh.provenance(), Provenance::Server);
    }

    #[tokio::test]
    async fn denied_subscription_reports_and_closes() {
        let store = MemoryDocumentStore::new();
        store.set_access_denied(true);

        let mut sub = store.subscribe("home").await.unwrap();
        assert!(matches!(
            sub.receiver.recv().await,
            Some(Err(StoreError::PermissionDenied(_)))
        ));
        assert!(sub.receiver.recv().await.is_none());
        assert_eq!(store.subscriber_count("home"), 0);

        let err = store.get_once("home").await.unwrap_err();
        assert!(err.is_permission());
    }

    #[tokio::test]
    async fn unsubscribe_closes_channel() {
        let store = MemoryDocumentStore::new();
        let mut sub = store.subscribe("home").await.unwrap();
        let _ = sub.receiver.recv().await;
        assert_eq!(store.subscriber_count("home"), 1);

        store.unsubscribe("home", sub.id);

        assert_eq!(store.subscriber_count("home"), 0);
        assert!(sub.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn export_and_import() {
        let store = MemoryDocumentStore::new();
        store.transaction("home", increment()).await.unwrap();

        let exported = store.export();
        let restored = MemoryDocumentStore::new();
        assert_eq!(restored.import(&exported).unwrap(), 1);

        let doc = restored.get_once("home").await.unwrap();
        assert_eq!(doc.data(), Some(&json!({"count": 1})));
        assert!(restored.import(&json!([1, 2])).is_err());
    }
}
