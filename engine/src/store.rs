//! Entry Store - the in-memory copy of the household's records.
//!
//! One controller owns the store and replaces its snapshot wholesale whenever
//! a newer observation arrives. Callers get copies, never references into a
//! store shared with the remote layer.

use crate::{Record, RecordKind, Snapshot};
use serde::{Deserialize, Serialize};

/// Where a snapshot observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// This client's own write, echoed before the server confirmed it
    Local,
    /// An on-device replica of the remote document, not confirmed fresh
    Cache,
    /// Confirmed durable state
    Server,
}

impl Provenance {
    pub fn is_confirmed(self) -> bool {
        self == Provenance::Server
    }
}

/// The current snapshot and what it was observed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryStore {
    snapshot: Snapshot,
    provenance: Option<Provenance>,
    revision: u64,
}

impl EntryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Provenance of the current snapshot, `None` until the first replace.
    pub fn provenance(&self) -> Option<Provenance> {
        self.provenance
    }

    /// Incremented on every replace.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replace the whole snapshot. Returns the new revision.
    pub fn replace(&mut self, snapshot: Snapshot, provenance: Provenance) -> u64 {
        self.snapshot = snapshot;
        self.provenance = Some(provenance);
        self.revision += 1;
        self.revision
    }

    pub fn get(&self, kind: RecordKind, id: &str) -> Option<Record> {
        self.snapshot.get(kind, id)
    }

    /// One kind's records, newest first.
    pub fn records(&self, kind: RecordKind) -> Vec<Record> {
        self.snapshot.records(kind)
    }

    pub fn count(&self, kind: RecordKind) -> usize {
        self.snapshot.len(kind)
    }

    /// The most recent records across every kind, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Record> {
        let mut all: Vec<Record> = RecordKind::ALL
            .iter()
            .flat_map(|kind| self.snapshot.records(*kind))
            .collect();
        all.sort_by(|a, b| {
            b.occurred_at()
                .cmp(&a.occurred_at())
                .then_with(|| b.id().cmp(a.id()))
        });
        all.truncate(limit);
        all
    }
}
