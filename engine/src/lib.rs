//! # Cradle Engine
//!
//! Deterministic record model and merge logic for a local-first baby-care
//! tracker.
//!
//! This crate holds everything about the tracker's data that can be expressed
//! without IO: the four record variants, write-side validation, the snapshot
//! that aggregates them, normalization of arbitrarily-shaped remote documents,
//! and the merge policy used when a local cache is reconciled against the
//! remote document.
//!
//! ## Design Principles
//!
//! - **No IO**: no files, network, timers or logging
//! - **Deterministic**: collections serialize in a fixed order
//! - **Tolerant reads, strict writes**: documents from older schema versions
//!   normalize to empty collections, while new writes are validated
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is one of [`Feed`], [`Elimination`], [`Medication`] or
//! [`Measurement`]. Each variant lives in its own [`Collection`] keyed by id,
//! so ids only need to be unique within a variant.
//!
//! ### Snapshots
//!
//! A [`Snapshot`] holds the four collections plus `updatedAt` and
//! `lastReason`. [`normalize`] turns any JSON value into a snapshot and never
//! fails; [`normalize_with_report`] also returns the [`Drift`] it tolerated.
//!
//! ### Mutations
//!
//! Changes are expressed as [`Mutation`]s (save, delete, merge) that are
//! applied to a snapshot read inside a remote transaction.
//!
//! ### Merging
//!
//! The [`Reconciler`] unions a remote and an incoming snapshot by id. On an id
//! collision the [`MergePolicy`] decides the winner:
//! - [`MergePolicy::RemoteWins`] - keep the remote record (default)
//! - [`MergePolicy::IncomingWins`] - replace it with the incoming record
//!
//! ## Quick Start
//!
//! ```rust
//! use cradle_engine::{normalize, Feed, Mutation, RecordKind};
//! use serde_json::json;
//!
//! // An old document without the `meds` and `measurements` keys.
//! let mut snapshot = normalize(&json!({"feeds": [], "elims": []}));
//! assert!(snapshot.measurements.is_empty());
//!
//! let at = "2024-01-01T08:00:00Z".parse().unwrap();
//! let save = Mutation::save(Feed::bottle("f1", at, 120.0));
//! save.validate().unwrap();
//! save.apply(&mut snapshot);
//!
//! assert_eq!(snapshot.len(RecordKind::Feed), 1);
//! ```

pub mod error;
pub mod operation;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod timer;

// Re-export main types at crate root
pub use error::Error;
pub use operation::{Mutation, MutationOutcome};
pub use reconcile::{Collision, MergePolicy, MergeReport, Reconciler, Resolution};
pub use record::{
    new_record_id, BreastSide, DoseKey, Elimination, Entry, Feed, FeedSource, Measurement,
    Medication, Record, RecordKind, MAX_ELIMINATION_COUNT,
};
pub use snapshot::{normalize, normalize_with_report, Collection, Drift, Snapshot};
pub use store::{EntryStore, Provenance};
pub use timer::FeedTimer;

/// Type aliases for clarity
pub type RecordId = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
