//! Connecting to the remote document and following its changes.

use super::{ActiveSubscription, Inner, SyncEngine, INITIALISE_REASON};
use crate::error::{Result, SyncError};
use crate::events::SyncStatus;
use crate::remote::{SnapshotReceiver, StoreResult};
use chrono::Utc;
use cradle_engine::{EntryStore, Provenance, Snapshot};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl SyncEngine {
    /// Subscribe to the document and wait for its first server-confirmed
    /// snapshot.
    ///
    /// Any previous subscription is cancelled first, and a missing document
    /// is created. If no server-confirmed snapshot arrives within the
    /// connect timeout, resolves with the best data available (the cached
    /// replica, a one-shot read, or the local cache mirror) and reports
    /// `offline`. The subscription keeps running either way.
    ///
    /// Fails only if the subscription errors before any data was seen.
    pub async fn connect(&self) -> Result<Snapshot> {
        // The slot stays locked until the new subscription is installed, so
        // overlapping calls cannot leave an older subscription running.
        let mut slot = self.inner.subscription.lock().await;
        if let Some(previous) = slot.take() {
            self.inner.cancel(previous);
        }

        let doc_id = self.document_id().await;
        self.inner.ensure_document(&doc_id).await;

        let subscription = match self.inner.store.subscribe(&doc_id).await {
            Ok(subscription) => subscription,
            Err(err) => {
                let err = SyncError::from(err);
                self.inner
                    .events
                    .emit_status(SyncStatus::Error, err.status_message());
                return Err(err);
            }
        };

        let (first_tx, first_rx) = oneshot::channel();
        let task = tokio::spawn(follow(
            self.inner.clone(),
            doc_id.clone(),
            subscription.receiver,
            first_tx,
        ));
        let subscription_id = subscription.id;
        *slot = Some(ActiveSubscription {
            doc_id: doc_id.clone(),
            id: subscription_id,
            task,
        });
        drop(slot);
        info!(document = %doc_id, subscription = %subscription_id, "Subscribed to document");

        match tokio::time::timeout(self.inner.connect_timeout, first_rx).await {
            Ok(Ok(Ok(snapshot))) => Ok(snapshot),
            Ok(Ok(Err(err))) => {
                self.inner.cancel_if_current(subscription_id).await;
                Err(err)
            }
            Ok(Err(_)) if !self.inner.is_current(subscription_id).await => {
                debug!(document = %doc_id, "Connect superseded by a newer subscription");
                Ok(self.snapshot().await)
            }
            Ok(Err(_)) => {
                debug!(document = %doc_id, "Subscription ended before server data");
                Ok(self.inner.fallback(&doc_id).await)
            }
            Err(_) => {
                warn!(
                    document = %doc_id,
                    timeout_ms = u64::try_from(self.inner.connect_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    "No server-confirmed data in time"
                );
                Ok(self.inner.fallback(&doc_id).await)
            }
        }
    }

    /// Cancel the live subscription, if any.
    pub async fn disconnect(&self) {
        let active = self.inner.subscription.lock().await.take();
        if let Some(active) = active {
            self.inner.cancel(active);
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    /// Point the engine at another household document.
    ///
    /// Cancels the current subscription and clears the Entry Store so no
    /// records of the previous household remain visible. Call
    /// [`connect`](Self::connect) afterwards.
    pub async fn switch_document(&self, doc_id: impl Into<String>) {
        let mut slot = self.inner.subscription.lock().await;
        if let Some(previous) = slot.take() {
            self.inner.cancel(previous);
        }

        let doc_id = doc_id.into();
        *self.inner.document_id.write().await = doc_id.clone();
        *self.inner.entries.write().await = EntryStore::new();
        drop(slot);

        info!(document = %doc_id, "Switched document");
        self.inner
            .events
            .emit_status(SyncStatus::Idle, format!("Switched to {doc_id}"));
    }
}

impl Inner {
    /// Stop forwarding a subscription and release it at the store.
    fn cancel(&self, active: ActiveSubscription) {
        self.store.unsubscribe(&active.doc_id, active.id);
        active.task.abort();
        info!(document = %active.doc_id, subscription = %active.id, "Subscription cancelled");
    }

    async fn is_current(&self, id: Uuid) -> bool {
        self.subscription
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| active.id == id)
    }

    /// Cancel the live subscription only if it is still `id`.
    async fn cancel_if_current(&self, id: Uuid) {
        let mut slot = self.subscription.lock().await;
        if slot.as_ref().is_some_and(|active| active.id == id) {
            if let Some(active) = slot.take() {
                self.cancel(active);
            }
        }
    }

    /// Create the document if it does not exist yet.
    ///
    /// Failures are only logged; the subscription that follows decides
    /// whether connecting failed.
    async fn ensure_document(&self, doc_id: &str) {
        match self.store.get_once(doc_id).await {
            Ok(doc) if doc.exists() => return,
            Ok(_) => {}
            Err(err) => {
                warn!(document = %doc_id, error = %err, "Could not check remote document");
                return;
            }
        }

        let mut initial = Snapshot::new();
        initial.touch(Utc::now(), INITIALISE_REASON);
        let document = match initial.to_document() {
            Ok(document) => document,
            Err(err) => {
                warn!(document = %doc_id, error = %err, "Could not build initial document");
                return;
            }
        };

        // Another client may create it between the read and this write.
        let created = self
            .store
            .transaction(
                doc_id,
                Box::new(move |current: Option<&Value>| -> StoreResult<Option<Value>> {
                    Ok(current.is_none().then(|| document.clone()))
                }),
            )
            .await;

        match created {
            Ok(Some(_)) => info!(document = %doc_id, "Created remote document"),
            Ok(None) => debug!(document = %doc_id, "Remote document already created"),
            Err(err) => warn!(document = %doc_id, error = %err, "Could not create remote document"),
        }
    }

    /// Best data available when the server did not answer in time.
    async fn fallback(&self, doc_id: &str) -> Snapshot {
        self.events.emit_status(
            SyncStatus::Offline,
            "Offline: showing the last known data",
        );

        // Whatever the subscription already delivered, usually the replica.
        {
            let entries = self.entries.read().await;
            if entries.provenance().is_some() {
                return entries.snapshot().clone();
            }
        }

        match self.store.get_once(doc_id).await {
            Ok(doc) if doc.exists() => {
                let snapshot = self.read_document(doc_id, doc.data());
                self.publish(snapshot.clone(), doc.provenance()).await;
                return snapshot;
            }
            Ok(_) => debug!(document = %doc_id, "One-shot read found no document"),
            Err(err) => debug!(document = %doc_id, error = %err, "One-shot read failed"),
        }

        if let Some(snapshot) = self.cache.as_ref().and_then(|cache| cache.load_snapshot()) {
            debug!(records = snapshot.record_count(), "Using local cache mirror");
            self.publish(snapshot.clone(), Provenance::Cache).await;
            return snapshot;
        }

        Snapshot::default()
    }
}

/// Forward subscription observations into the Entry Store.
///
/// `first` receives the first server-confirmed snapshot, or the error if the
/// subscription fails before any data was seen.
async fn follow(
    inner: Arc<Inner>,
    doc_id: String,
    mut receiver: SnapshotReceiver,
    first: oneshot::Sender<Result<Snapshot>>,
) {
    let mut first = Some(first);
    let mut seen_data = false;

    while let Some(observation) = receiver.recv().await {
        let document = match observation {
            Ok(document) => document,
            Err(err) => {
                let err = SyncError::from(err);
                warn!(document = %doc_id, error = %err, "Subscription error");
                inner
                    .events
                    .emit_status(SyncStatus::Error, err.status_message());

                // Keep showing the last good data if there is any.
                if !seen_data {
                    if let Some(first) = first.take() {
                        let _ = first.send(Err(err));
                    }
                }
                continue;
            }
        };

        let provenance = document.provenance();
        if !document.exists() && provenance != Provenance::Server {
            debug!(document = %doc_id, ?provenance, "Ignoring observation of a missing document");
            continue;
        }

        let snapshot = inner.read_document(&doc_id, document.data());
        seen_data = true;
        let snapshot = inner.publish_unless_stale(snapshot, provenance).await;

        match provenance {
            Provenance::Local => inner
                .events
                .emit_status_change(SyncStatus::Saving, "Saving changes"),
            Provenance::Server => {
                inner
                    .events
                    .emit_status_change(SyncStatus::Synced, "Up to date");
                if let Some(first) = first.take() {
                    let _ = first.send(Ok(snapshot));
                }
            }
            Provenance::Cache => {}
        }
    }

    debug!(document = %doc_id, "Subscription closed");
}
