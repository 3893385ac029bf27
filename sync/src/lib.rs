//! # Cradle Sync
//!
//! Keeps a client's view of a household's baby-care records in step with a
//! shared remote document.
//!
//! ## Components
//!
//! - [`SyncEngine`]: funnels saves, deletes and merges through remote
//!   transactions, follows the document's change subscription, and reports
//!   status and data changes to the presentation layer
//! - [`DocumentStore`]: the remote store collaborator, with
//!   [`MemoryDocumentStore`] as the in-process implementation
//! - [`LocalCache`]: on-device fallback data, records queued while offline,
//!   and UI preferences
//!
//! Record types, normalization and merge rules live in [`cradle_engine`].
//!
//! ## Example
//!
//! ```rust
//! use cradle_engine::{Feed, RecordKind};
//! use cradle_sync::{MemoryDocumentStore, SyncEngine, SyncOptions, SyncStatus};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cradle_sync::Result<()> {
//! let store = MemoryDocumentStore::new_shared();
//! let engine = SyncEngine::new(store, SyncOptions::new("household-1"));
//!
//! engine.connect().await?;
//!
//! let at = "2024-01-01T08:00:00Z".parse().unwrap();
//! engine.save_entry(Feed::bottle("f1", at, 120.0), "Save entry").await?;
//!
//! assert_eq!(engine.status(), SyncStatus::Synced);
//! assert_eq!(engine.records(RecordKind::Feed).await.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod remote;

pub use cache::{CacheKey, HistoryRange, LocalCache, Preferences};
pub use config::{Config, ConfigError};
pub use engine::{SyncEngine, SyncOptions, DEFAULT_CONNECT_TIMEOUT};
pub use error::{Result, StoreError, SyncError};
pub use events::{EventHub, ListenerId, StatusEvent, SyncStatus};
pub use remote::{
    DocumentSnapshot, DocumentStore, DocumentSubscription, MemoryDocumentStore, Mutator,
    SnapshotMetadata, StoreResult,
};
