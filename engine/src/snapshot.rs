//! Snapshots of the four record collections.
//!
//! A snapshot is what the remote document holds and what the presentation
//! layer renders. Collections are keyed by id (ids are unique per variant, not
//! globally) and always serialize newest first, ties broken by id descending,
//! so two snapshots with the same records produce identical documents.

use crate::{
    error::Result, Elimination, Entry, Error, Feed, Measurement, Medication, Record, RecordId,
    RecordKind, Timestamp,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Ordering used for every collection: `occurredAt` descending, then id
/// descending.
pub fn newest_first<T: Entry>(a: &T, b: &T) -> Ordering {
    b.occurred_at()
        .cmp(&a.occurred_at())
        .then_with(|| b.id().cmp(a.id()))
}

/// The records of one variant, keyed by id.
///
/// Entries read from a document keep their document form and are written
/// back verbatim until replaced, so fields this client does not know about
/// survive its writes. Entries that do not parse are kept as found.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    entries: BTreeMap<RecordId, T>,
    originals: BTreeMap<RecordId, Value>,
    unreadable: Vec<Value>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            originals: BTreeMap::new(),
            unreadable: Vec::new(),
        }
    }
}

/// Compares records, not the document form they were read from.
impl<T: PartialEq> PartialEq for Collection<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.unreadable == other.unreadable
    }
}

impl<T: Entry> Collection<T> {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a record by ID.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert or fully replace a record by id. Returns the replaced record.
    pub fn upsert(&mut self, entry: T) -> Option<T> {
        let id = entry.id().to_string();
        self.forget(&id);
        self.entries.insert(id, entry)
    }

    /// Remove a record, including an unreadable entry with the same id.
    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.forget(id);
        self.entries.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
        self.entries.keys()
    }

    /// Records newest first.
    pub fn sorted(&self) -> Vec<&T> {
        let mut sorted: Vec<&T> = self.entries.values().collect();
        sorted.sort_by(|a, b| newest_first(*a, *b));
        sorted
    }

    /// Validate every record. Unreadable entries are not checked.
    pub fn validate(&self) -> Result<()> {
        self.entries.values().try_for_each(T::validate)
    }

    /// Entries that could not be read, in document order.
    pub fn unreadable(&self) -> &[Value] {
        &self.unreadable
    }

    /// Read one document entry. Returns what was tolerated, if anything.
    ///
    /// When an id repeats, the later entry wins whether or not it parses.
    fn read_entry(&mut self, index: usize, item: &Value) -> Option<Drift> {
        let kind = T::KIND;
        let Some(id) = entry_id(item) else {
            self.unreadable.push(item.clone());
            return Some(Drift::MissingId { kind, index });
        };

        match T::deserialize(item) {
            Ok(entry) => {
                self.upsert(entry);
                self.originals.insert(id, item.clone());
                None
            }
            Err(err) => {
                self.remove(&id);
                self.unreadable.push(item.clone());
                Some(Drift::MalformedEntry {
                    kind,
                    index,
                    reason: err.to_string(),
                })
            }
        }
    }

    fn forget(&mut self, id: &str) {
        self.originals.remove(id);
        self.unreadable
            .retain(|item| entry_id(item).as_deref() != Some(id));
    }
}

/// The id of a document entry: a non-blank string, or a number read as its
/// decimal string.
fn entry_id(item: &Value) -> Option<RecordId> {
    match item.get("id")? {
        Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// One written entry: either its document form or the typed record.
#[derive(Serialize)]
#[serde(untagged)]
enum Written<'a, T> {
    Document(&'a Value),
    Entry(&'a T),
}

impl<T: Entry> FromIterator<T> for Collection<T> {
    /// Later entries win when an id repeats.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut collection = Self::new();
        collection.extend(iter);
        collection
    }
}

impl<T: Entry> Extend<T> for Collection<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for entry in iter {
            self.upsert(entry);
        }
    }
}

impl<T: Entry> Serialize for Collection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let entries = self.sorted().into_iter().map(|entry| {
            match self.originals.get(entry.id()) {
                Some(document) => Written::Document(document),
                None => Written::Entry(entry),
            }
        });
        let unreadable = self.unreadable.iter().map(Written::Document);
        serializer.collect_seq(entries.chain(unreadable))
    }
}

impl<'de, T: Entry> Deserialize<'de> for Collection<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let items = Vec::<Value>::deserialize(deserializer)?;
        let mut collection = Self::new();
        for (index, item) in items.iter().enumerate() {
            collection.read_entry(index, item);
        }
        Ok(collection)
    }
}

/// The four collections plus audit metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub feeds: Collection<Feed>,
    #[serde(rename = "elims", default)]
    pub eliminations: Collection<Elimination>,
    #[serde(rename = "meds", default)]
    pub medications: Collection<Medication>,
    #[serde(default)]
    pub measurements: Collection<Measurement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reason: Option<String>,
    /// Number of writes the document has seen, bumped by [`touch`]. Orders
    /// observations of one document without comparing client clocks.
    ///
    /// [`touch`]: Snapshot::touch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// Document keys this client does not know, written back unchanged.
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

/// Run `$body` with `$c` bound to the collection for `$kind`.
macro_rules! with_collection {
    ($snapshot:expr, $kind:expr, |mut $c:ident| $body:expr) => {
        match $kind {
            RecordKind::Feed => {
                let $c = &mut $snapshot.feeds;
                $body
            }
            RecordKind::Elimination => {
                let $c = &mut $snapshot.eliminations;
                $body
            }
            RecordKind::Medication => {
                let $c = &mut $snapshot.medications;
                $body
            }
            RecordKind::Measurement => {
                let $c = &mut $snapshot.measurements;
                $body
            }
        }
    };
    ($snapshot:expr, $kind:expr, |$c:ident| $body:expr) => {
        match $kind {
            RecordKind::Feed => {
                let $c = &$snapshot.feeds;
                $body
            }
            RecordKind::Elimination => {
                let $c = &$snapshot.eliminations;
                $body
            }
            RecordKind::Medication => {
                let $c = &$snapshot.medications;
                $body
            }
            RecordKind::Measurement => {
                let $c = &$snapshot.measurements;
                $body
            }
        }
    };
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of one kind.
    pub fn len(&self, kind: RecordKind) -> usize {
        with_collection!(self, kind, |c| c.len())
    }

    /// Count total records across all collections.
    pub fn record_count(&self) -> usize {
        RecordKind::ALL.iter().map(|kind| self.len(*kind)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    pub fn contains(&self, kind: RecordKind, id: &str) -> bool {
        with_collection!(self, kind, |c| c.contains(id))
    }

    /// Get a copy of one record.
    pub fn get(&self, kind: RecordKind, id: &str) -> Option<Record> {
        with_collection!(self, kind, |c| c.get(id).cloned().map(Record::from))
    }

    /// Copies of one kind's records, newest first.
    pub fn records(&self, kind: RecordKind) -> Vec<Record> {
        with_collection!(self, kind, |c| c
            .sorted()
            .into_iter()
            .cloned()
            .map(Record::from)
            .collect())
    }

    /// Ids of one kind, in id order.
    pub fn ids(&self, kind: RecordKind) -> Vec<RecordId> {
        with_collection!(self, kind, |c| c.ids().cloned().collect())
    }

    /// Insert or replace a record by id. Returns true when a record was
    /// replaced.
    pub fn upsert(&mut self, record: Record) -> bool {
        match record {
            Record::Feed(r) => self.feeds.upsert(r).is_some(),
            Record::Elimination(r) => self.eliminations.upsert(r).is_some(),
            Record::Medication(r) => self.medications.upsert(r).is_some(),
            Record::Measurement(r) => self.measurements.upsert(r).is_some(),
        }
    }

    /// Remove every listed id of one kind. Missing ids are ignored. Returns
    /// how many records were removed.
    pub fn remove(&mut self, kind: RecordKind, ids: &BTreeSet<RecordId>) -> usize {
        with_collection!(self, kind, |mut c| ids
            .iter()
            .filter(|id| c.remove(id).is_some())
            .count())
    }

    /// Whether both snapshots hold the same records, ignoring metadata.
    pub fn same_records(&self, other: &Snapshot) -> bool {
        self.feeds == other.feeds
            && self.eliminations == other.eliminations
            && self.medications == other.medications
            && self.measurements == other.measurements
    }

    /// Validate every record of every kind.
    pub fn validate(&self) -> Result<()> {
        self.feeds.validate()?;
        self.eliminations.validate()?;
        self.medications.validate()?;
        self.measurements.validate()
    }

    /// Stamp the audit metadata of a write.
    pub fn touch(&mut self, at: Timestamp, reason: impl Into<String>) {
        self.updated_at = Some(at);
        self.last_reason = Some(reason.into());
        self.generation = Some(self.generation.map_or(1, |n| n.saturating_add(1)));
    }

    /// Whether this snapshot is known to be older than `other`: both carry a
    /// generation and this one's is lower.
    pub fn is_older_than(&self, other: &Snapshot) -> bool {
        matches!(
            (self.generation, other.generation),
            (Some(mine), Some(theirs)) if mine < theirs
        )
    }

    /// The document shape stored remotely: the collections inside a
    /// `snapshot` envelope and the audit fields under `metadata`.
    pub fn to_document(&self) -> Result<Value> {
        let mut collections = self.extra.clone();
        collections.insert("feeds".into(), to_value(&self.feeds)?);
        collections.insert("elims".into(), to_value(&self.eliminations)?);
        collections.insert("meds".into(), to_value(&self.medications)?);
        collections.insert("measurements".into(), to_value(&self.measurements)?);

        let mut metadata = Map::new();
        if let Some(updated_at) = self.updated_at {
            metadata.insert("updatedAt".into(), Value::String(updated_at.to_rfc3339()));
        }
        if let Some(reason) = &self.last_reason {
            metadata.insert("lastReason".into(), Value::String(reason.clone()));
        }
        if let Some(generation) = self.generation {
            metadata.insert("generation".into(), Value::from(generation));
        }

        Ok(json!({
            "snapshot": Value::Object(collections),
            "metadata": Value::Object(metadata),
        }))
    }

    /// Serialize to the flat JSON shape used by the local cache.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidDocument(e.to_string()))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::InvalidDocument(e.to_string()))
}

/// Something [`normalize_with_report`] tolerated instead of failing on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// The document was neither an object nor null.
    NotAnObject,
    /// A collection key was absent, typically a document written before the
    /// variant existed.
    MissingCollection(RecordKind),
    /// A collection key held something other than a list.
    NotAList(RecordKind),
    /// An entry had no id and was skipped.
    MissingId { kind: RecordKind, index: usize },
    /// An entry did not parse and was skipped.
    MalformedEntry {
        kind: RecordKind,
        index: usize,
        reason: String,
    },
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drift::NotAnObject => write!(f, "document is not an object"),
            Drift::MissingCollection(kind) => {
                write!(f, "document has no '{}' collection", kind.document_key())
            }
            Drift::NotAList(kind) => {
                write!(f, "'{}' is not a list", kind.document_key())
            }
            Drift::MissingId { kind, index } => {
                write!(f, "{} entry {} has no id", kind, index)
            }
            Drift::MalformedEntry {
                kind,
                index,
                reason,
            } => write!(f, "{} entry {} is malformed: {}", kind, index, reason),
        }
    }
}

/// Turn any JSON value into a snapshot. Never fails; see
/// [`normalize_with_report`].
pub fn normalize(raw: &Value) -> Snapshot {
    normalize_with_report(raw).0
}

/// Turn any JSON value into a snapshot, reporting what was tolerated.
///
/// Accepts both the enveloped document shape (`{snapshot: {...}, metadata:
/// {...}}`) and flat snapshots. Absent or non-list collections become empty,
/// unparseable entries are skipped, and when an id repeats within a list the
/// last occurrence wins. The result owns all of its data.
pub fn normalize_with_report(raw: &Value) -> (Snapshot, Vec<Drift>) {
    let mut drift = Vec::new();

    let Some(document) = raw.as_object() else {
        if !raw.is_null() {
            drift.push(Drift::NotAnObject);
        }
        return (Snapshot::default(), drift);
    };

    let (body, enveloped) = match document.get("snapshot") {
        Some(Value::Object(inner)) => (inner, true),
        _ => (document, false),
    };

    let mut snapshot = Snapshot::default();
    read_collection(body, &mut snapshot.feeds, &mut drift);
    read_collection(body, &mut snapshot.eliminations, &mut drift);
    read_collection(body, &mut snapshot.medications, &mut drift);
    read_collection(body, &mut snapshot.measurements, &mut drift);

    let metadata = match document.get("metadata") {
        Some(Value::Object(metadata)) => metadata,
        _ => body,
    };
    snapshot.updated_at = metadata.get("updatedAt").and_then(parse_timestamp);
    snapshot.last_reason = metadata
        .get("lastReason")
        .and_then(Value::as_str)
        .map(str::to_owned);
    snapshot.generation = metadata.get("generation").and_then(Value::as_u64);

    snapshot.extra = body
        .iter()
        .filter(|(key, _)| !is_known_key(key, enveloped))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    (snapshot, drift)
}

fn is_known_key(key: &str, enveloped: bool) -> bool {
    if RecordKind::ALL.iter().any(|kind| kind.document_key() == key) {
        return true;
    }
    // Flat documents carry their metadata next to the collections.
    !enveloped && matches!(
        key,
        "metadata" | "updatedAt" | "lastReason" | "generation"
    )
}

fn read_collection<T: Entry>(
    body: &Map<String, Value>,
    target: &mut Collection<T>,
    drift: &mut Vec<Drift>,
) {
    let kind = T::KIND;
    let items = match body.get(kind.document_key()) {
        Some(Value::Array(items)) => items,
        Some(_) => {
            drift.push(Drift::NotAList(kind));
            return;
        }
        None => {
            drift.push(Drift::MissingCollection(kind));
            return;
        }
    };

    for (index, item) in items.iter().enumerate() {
        drift.extend(target.read_entry(index, item));
    }
}

fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    let text = value.as_str()?;
    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|at| at.with_timezone(&chrono::Utc))
}
