//! Documents as observed through a remote store.

use cradle_engine::Provenance;
use serde_json::Value;

/// How fresh an observation is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotMetadata {
    /// The observation includes this client's write, not yet confirmed
    pub has_pending_writes: bool,
    /// Served from the on-device replica rather than the network
    pub from_cache: bool,
}

/// One observation of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    id: String,
    data: Option<Value>,
    pub metadata: SnapshotMetadata,
}

impl DocumentSnapshot {
    pub fn new(id: impl Into<String>, data: Option<Value>, metadata: SnapshotMetadata) -> Self {
        Self {
            id: id.into(),
            data,
            metadata,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Pending writes make an observation a local echo even when it was
    /// also served from cache.
    pub fn provenance(&self) -> Provenance {
        if self.metadata.has_pending_writes {
            Provenance::Local
        } else if self.metadata.from_cache {
            Provenance::Cache
        } else {
            Provenance::Server
        }
    }
}
