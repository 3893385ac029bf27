//! Status and data-change notifications for the presentation layer.
//!
//! Listeners are plain callbacks registered under an id. They are invoked
//! outside of any registry lock, so a callback may register or remove
//! listeners itself.

use cradle_engine::{Provenance, Snapshot};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

/// Connection and save state shown to the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Saving,
    Synced,
    Error,
    Offline,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Saving => "saving",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
            SyncStatus::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// The last status emitted, with its human-readable message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusEvent {
    pub status: SyncStatus,
    pub message: String,
}

/// Identifies a registered listener.
pub type ListenerId = Uuid;

type StatusCallback = Arc<dyn Fn(SyncStatus, &str) + Send + Sync>;
type DataCallback = Arc<dyn Fn(&Snapshot, Provenance) + Send + Sync>;

/// Registry of status and data-change listeners.
pub struct EventHub {
    status: watch::Sender<StatusEvent>,
    status_listeners: DashMap<ListenerId, StatusCallback>,
    data_listeners: DashMap<ListenerId, DataCallback>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("status", &*self.status.borrow())
            .field("status_listeners", &self.status_listeners.len())
            .field("data_listeners", &self.data_listeners.len())
            .finish()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (status, _) = watch::channel(StatusEvent::default());
        Self {
            status,
            status_listeners: DashMap::new(),
            data_listeners: DashMap::new(),
        }
    }

    pub fn on_status<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(SyncStatus, &str) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.status_listeners.insert(id, Arc::new(callback));
        id
    }

    pub fn on_data_changed<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Snapshot, Provenance) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.data_listeners.insert(id, Arc::new(callback));
        id
    }

    /// Remove a listener of either kind. Returns false if the id is unknown.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.status_listeners.remove(&id).is_some() || self.data_listeners.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.status_listeners.len() + self.data_listeners.len()
    }

    pub fn current(&self) -> StatusEvent {
        self.status.borrow().clone()
    }

    /// Watch status changes as a stream of values instead of callbacks.
    pub fn watch(&self) -> watch::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    /// Emit a status, even if it equals the current one.
    pub(crate) fn emit_status(&self, status: SyncStatus, message: impl Into<String>) {
        let message = message.into();
        self.status.send_replace(StatusEvent {
            status,
            message: message.clone(),
        });
        self.notify_status(status, &message);
    }

    /// Emit a status only when it differs from the current one.
    pub(crate) fn emit_status_change(&self, status: SyncStatus, message: impl Into<String>) {
        let message = message.into();
        let changed = self.status.send_if_modified(|current| {
            if current.status == status {
                return false;
            }
            *current = StatusEvent {
                status,
                message: message.clone(),
            };
            true
        });

        if changed {
            self.notify_status(status, &message);
        }
    }

    pub(crate) fn emit_data(&self, snapshot: &Snapshot, provenance: Provenance) {
        let callbacks: Vec<DataCallback> =
            self.data_listeners.iter().map(|e| e.value().clone()).collect();

        debug!(
            provenance = ?provenance,
            records = snapshot.record_count(),
            listeners = callbacks.len(),
            "Data changed"
        );

        for callback in callbacks {
            callback(snapshot, provenance);
        }
    }

    fn notify_status(&self, status: SyncStatus, message: &str) {
        let callbacks: Vec<StatusCallback> = self
            .status_listeners
            .iter()
            .map(|e| e.value().clone())
            .collect();

        debug!(%status, detail = message, "Status changed");

        for callback in callbacks {
            callback(status, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn status_listeners_receive_every_emit() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.on_status(move |status, _| sink.lock().unwrap().push(status));

        hub.emit_status(SyncStatus::Saving, "Save entry");
        hub.emit_status(SyncStatus::Synced, "Save entry");
        hub.emit_status(SyncStatus::Synced, "Save entry");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SyncStatus::Saving, SyncStatus::Synced, SyncStatus::Synced]
        );
        assert_eq!(hub.current().status, SyncStatus::Synced);
    }

    #[test]
    fn status_change_skips_repeats() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.on_status(move |status, _| sink.lock().unwrap().push(status));

        hub.emit_status_change(SyncStatus::Synced, "Up to date");
        hub.emit_status_change(SyncStatus::Synced, "Up to date");
        hub.emit_status_change(SyncStatus::Offline, "No network");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SyncStatus::Synced, SyncStatus::Offline]
        );
    }

    #[test]
    fn removed_listeners_stop_receiving() {
        let hub = EventHub::new();
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        let id = hub.on_data_changed(move |_, _| *sink.lock().unwrap() += 1);

        hub.emit_data(&Snapshot::new(), Provenance::Server);
        assert!(hub.remove(id));
        assert!(!hub.remove(id));
        hub.emit_data(&Snapshot::new(), Provenance::Server);

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn watch_sees_latest_status() {
        let hub = EventHub::new();
        let receiver = hub.watch();

        hub.emit_status(SyncStatus::Offline, "No network");

        assert_eq!(receiver.borrow().status, SyncStatus::Offline);
        assert_eq!(receiver.borrow().message, "No network");
    }

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(SyncStatus::Offline.to_string(), "offline");
        assert_eq!(
            serde_json::to_value(SyncStatus::Synced).unwrap(),
            serde_json::json!("synced")
        );
    }
}
