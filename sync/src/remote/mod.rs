//! The remote document store collaborator.
//!
//! A household shares one document. The store offers atomic read-modify-write
//! transactions, one-shot reads and writes, and a push subscription that
//! delivers every observation of the document tagged with where it came from.

mod document;
mod memory;

pub use document::{DocumentSnapshot, SnapshotMetadata};
pub use memory::MemoryDocumentStore;

use crate::error::StoreError;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Body of a transaction.
///
/// Called with the current document value (`None` if the document does not
/// exist) and returns the value to write, or `None` to leave the document
/// untouched. The store calls it again whenever a concurrent write lands
/// between its read and its commit.
pub type Mutator<'a> =
    Box<dyn FnMut(Option<&Value>) -> StoreResult<Option<Value>> + Send + 'a>;

/// Sender half of a subscription channel.
pub type SnapshotSender = mpsc::UnboundedSender<StoreResult<DocumentSnapshot>>;

/// Receiver half of a subscription channel.
pub type SnapshotReceiver = mpsc::UnboundedReceiver<StoreResult<DocumentSnapshot>>;

/// A live subscription to one document.
///
/// The channel closes when the subscription is cancelled or the store
/// gives up on it.
#[derive(Debug)]
pub struct DocumentSubscription {
    pub id: Uuid,
    pub receiver: SnapshotReceiver,
}

/// A remote store holding one JSON document per household.
pub trait DocumentStore: Send + Sync {
    /// Run `mutator` against the current document and commit its result
    /// atomically, retrying on conflicting writes.
    ///
    /// Returns the committed value, or `None` when the mutator chose not to
    /// write.
    fn transaction<'a>(
        &'a self,
        doc_id: &'a str,
        mutator: Mutator<'a>,
    ) -> BoxFuture<'a, StoreResult<Option<Value>>>;

    fn get_once<'a>(&'a self, doc_id: &'a str) -> BoxFuture<'a, StoreResult<DocumentSnapshot>>;

    /// Write a document outright. With `merge`, top-level keys of `value`
    /// are merged into the existing document instead of replacing it.
    fn set_once<'a>(
        &'a self,
        doc_id: &'a str,
        value: Value,
        merge: bool,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Start delivering observations of a document.
    fn subscribe<'a>(&'a self, doc_id: &'a str)
        -> BoxFuture<'a, StoreResult<DocumentSubscription>>;

    /// Cancel a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, doc_id: &str, subscription: Uuid);
}
