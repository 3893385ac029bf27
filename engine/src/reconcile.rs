//! Merging an incoming snapshot into the remote one.
//!
//! Used on reconnect, when a local cache may hold records the remote document
//! has never seen. The result is the union of both snapshots keyed by id,
//! per kind.
//!
//! # Collisions
//!
//! When an id exists on both sides with different contents, the
//! [`MergePolicy`] decides. The default is [`MergePolicy::RemoteWins`]: after
//! the first successful merge the remote document is ground truth, and a merge
//! only adds ids the remote lacks. Exact clock comparison is not available
//! across the local/remote boundary, so "incoming is newer" cannot be decided
//! reliably; callers that want the incoming side to win must opt in with
//! [`MergePolicy::IncomingWins`].
//!
//! Merging is idempotent under both policies: applying the same incoming
//! snapshot twice yields the same records as applying it once.

use crate::{error::Result, Entry, Error, RecordId, RecordKind, Snapshot};
use crate::snapshot::Collection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who wins when both sides hold a record with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Keep the remote record (default)
    #[default]
    RemoteWins,
    /// Replace the remote record with the incoming one
    IncomingWins,
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::RemoteWins => f.write_str("remote-wins"),
            MergePolicy::IncomingWins => f.write_str("incoming-wins"),
        }
    }
}

impl FromStr for MergePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote-wins" | "remote" => Ok(MergePolicy::RemoteWins),
            "incoming-wins" | "incoming" | "local-wins" | "local" => {
                Ok(MergePolicy::IncomingWins)
            }
            other => Err(Error::UnknownMergePolicy(other.to_string())),
        }
    }
}

/// How a collision was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// The remote record was kept
    KeptRemote,
    /// The incoming record replaced the remote one
    TookIncoming,
}

/// An id present on both sides with different contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collision {
    pub kind: RecordKind,
    pub id: RecordId,
    pub resolution: Resolution,
}

/// What a merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// Ids that only the incoming side had
    pub added: Vec<(RecordKind, RecordId)>,
    /// Ids on both sides whose records differed
    pub collisions: Vec<Collision>,
}

impl MergeReport {
    /// Whether the merge changed any record.
    pub fn changed(&self) -> bool {
        !self.added.is_empty()
            || self
                .collisions
                .iter()
                .any(|c| c.resolution == Resolution::TookIncoming)
    }
}

/// Merges incoming snapshots into remote ones under a fixed policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    policy: MergePolicy,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Merge `incoming` into a copy of `remote`.
    ///
    /// The result keeps the remote metadata; the caller stamps a fresh
    /// `updatedAt` and reason when it writes.
    pub fn merge(&self, remote: &Snapshot, incoming: &Snapshot) -> (Snapshot, MergeReport) {
        let mut merged = remote.clone();
        let mut report = MergeReport::default();

        self.merge_collection(&mut merged.feeds, &incoming.feeds, &mut report);
        self.merge_collection(&mut merged.eliminations, &incoming.eliminations, &mut report);
        self.merge_collection(&mut merged.medications, &incoming.medications, &mut report);
        self.merge_collection(&mut merged.measurements, &incoming.measurements, &mut report);

        (merged, report)
    }

    fn merge_collection<T: Entry>(
        &self,
        target: &mut Collection<T>,
        incoming: &Collection<T>,
        report: &mut MergeReport,
    ) {
        for entry in incoming.iter() {
            let id = entry.id().to_string();
            match target.get(&id) {
                None => {
                    target.upsert(entry.clone());
                    report.added.push((T::KIND, id));
                }
                Some(existing) if existing == entry => {}
                Some(_) => {
                    let resolution = match self.policy {
                        MergePolicy::RemoteWins => Resolution::KeptRemote,
                        MergePolicy::IncomingWins => {
                            target.upsert(entry.clone());
                            Resolution::TookIncoming
                        }
                    };
                    report.collisions.push(Collision {
                        kind: T::KIND,
                        id,
                        resolution,
                    });
                }
            }
        }
    }
}
