//! Mutations applied to a snapshot inside a remote transaction.
//!
//! Changes are expressed as mutations, not direct edits. A mutation is
//! validated once before the transaction opens and may then be applied more
//! than once, since the store retries the transaction body when a concurrent
//! write lands first. `apply` is therefore pure with respect to its input.

use crate::{
    error::Result, MergePolicy, MergeReport, Record, RecordId, RecordKind, Reconciler, Snapshot,
};
use std::collections::BTreeSet;

/// A change to the remote snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert or fully replace one record by id
    Save(Record),
    /// Remove every listed id of one kind
    Delete {
        kind: RecordKind,
        ids: BTreeSet<RecordId>,
    },
    /// Union an incoming snapshot into the remote one
    Merge {
        incoming: Snapshot,
        policy: MergePolicy,
    },
}

/// What applying a mutation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Saved {
        kind: RecordKind,
        id: RecordId,
        replaced: bool,
    },
    Deleted {
        kind: RecordKind,
        removed: usize,
    },
    Merged(MergeReport),
}

impl Mutation {
    pub fn save(record: impl Into<Record>) -> Self {
        Mutation::Save(record.into())
    }

    /// Delete by ids. Blank ids are dropped.
    pub fn delete<I, S>(kind: RecordKind, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RecordId>,
    {
        let ids = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &RecordId| !id.trim().is_empty())
            .collect();
        Mutation::Delete { kind, ids }
    }

    pub fn merge(incoming: Snapshot, policy: MergePolicy) -> Self {
        Mutation::Merge { incoming, policy }
    }

    /// Check the mutation before any transaction opens. Every record of a
    /// merged snapshot must be valid.
    pub fn validate(&self) -> Result<()> {
        match self {
            Mutation::Save(record) => record.validate(),
            Mutation::Delete { .. } => Ok(()),
            Mutation::Merge { incoming, .. } => incoming.validate(),
        }
    }

    /// Whether applying this mutation cannot change anything, so no
    /// transaction is needed.
    pub fn is_noop(&self) -> bool {
        matches!(self, Mutation::Delete { ids, .. } if ids.is_empty())
    }

    /// Audit reason used when the caller supplies none.
    pub fn default_reason(&self) -> &'static str {
        match self {
            Mutation::Save(_) => "Save entry",
            Mutation::Delete { .. } => "Delete entries",
            Mutation::Merge { .. } => "Merge snapshot",
        }
    }

    /// Apply to a snapshot. Metadata is left for the caller to stamp.
    pub fn apply(&self, snapshot: &mut Snapshot) -> MutationOutcome {
        match self {
            Mutation::Save(record) => {
                let replaced = snapshot.upsert(record.clone());
                MutationOutcome::Saved {
                    kind: record.kind(),
                    id: record.id().to_string(),
                    replaced,
                }
            }
            Mutation::Delete { kind, ids } => MutationOutcome::Deleted {
                kind: *kind,
                removed: snapshot.remove(*kind, ids),
            },
            Mutation::Merge { incoming, policy } => {
                let (merged, report) = Reconciler::new(*policy).merge(snapshot, incoming);
                *snapshot = merged;
                MutationOutcome::Merged(report)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Feed, Measurement, Timestamp};

    fn at(text: &str) -> Timestamp {
        text.parse().unwrap()
    }

    #[test]
    fn save_inserts_then_replaces() {
        let mut snapshot = Snapshot::new();
        let save = Mutation::save(Feed::bottle("f1", at("2024-01-01T08:00:00Z"), 120.0));

        assert_eq!(
            save.apply(&mut snapshot),
            MutationOutcome::Saved {
                kind: RecordKind::Feed,
                id: "f1".into(),
                replaced: false
            }
        );
        assert!(matches!(
            save.apply(&mut snapshot),
            MutationOutcome::Saved { replaced: true, .. }
        ));
        assert_eq!(snapshot.len(RecordKind::Feed), 1);
    }

    #[test]
    fn delete_drops_blank_ids() {
        let delete = Mutation::delete(RecordKind::Feed, ["", "  "]);
        assert!(delete.is_noop());

        let delete = Mutation::delete(RecordKind::Feed, vec!["f1".to_string()]);
        assert!(!delete.is_noop());
    }

    #[test]
    fn delete_reports_removed_count() {
        let mut snapshot = Snapshot::new();
        Mutation::save(Feed::bottle("f1", at("2024-01-01T08:00:00Z"), 120.0)).apply(&mut snapshot);

        let outcome = Mutation::delete(RecordKind::Feed, ["f1", "missing"]).apply(&mut snapshot);
        assert_eq!(
            outcome,
            MutationOutcome::Deleted {
                kind: RecordKind::Feed,
                removed: 1
            }
        );
    }

    #[test]
    fn invalid_save_fails_validation() {
        let save = Mutation::save(Measurement::new("m1", at("2024-01-01T08:00:00Z")));
        assert_eq!(save.validate(), Err(Error::EmptyMeasurement("m1".into())));
    }

    #[test]
    fn merge_with_an_invalid_record_fails_validation() {
        let mut incoming = Snapshot::new();
        incoming.upsert(Feed::bottle("ok", at("2024-01-01T08:00:00Z"), 60.0).into());
        incoming.upsert(Measurement::new("m-empty", at("2024-01-01T08:00:00Z")).into());

        let merge = Mutation::merge(incoming, MergePolicy::RemoteWins);
        assert_eq!(
            merge.validate(),
            Err(Error::EmptyMeasurement("m-empty".into()))
        );
    }

    #[test]
    fn merge_keeps_target_metadata() {
        let mut snapshot = Snapshot::new();
        snapshot.touch(at("2024-01-01T10:00:00Z"), "Initialise");

        let mut incoming = Snapshot::new();
        incoming.upsert(Feed::bottle("f1", at("2024-01-01T08:00:00Z"), 120.0).into());

        let outcome = Mutation::merge(incoming, MergePolicy::RemoteWins).apply(&mut snapshot);
        assert!(matches!(outcome, MutationOutcome::Merged(ref report) if report.added.len() == 1));
        assert_eq!(snapshot.last_reason.as_deref(), Some("Initialise"));
        assert_eq!(snapshot.len(RecordKind::Feed), 1);
    }

    #[test]
    fn default_reasons() {
        assert_eq!(
            Mutation::delete(RecordKind::Feed, Vec::<String>::new()).default_reason(),
            "Delete entries"
        );
        assert_eq!(
            Mutation::merge(Snapshot::new(), MergePolicy::default()).default_reason(),
            "Merge snapshot"
        );
    }
}
