//! Local cache for offline fallback and UI preferences.
//!
//! Values are stored as JSON, one file per key under a data directory, or in
//! memory. Reads are tolerant: a missing, unreadable or corrupt entry reads
//! as absent. Writes report failures.

use crate::error::{Result, SyncError};
use chrono::Duration;
use cradle_engine::{normalize, FeedTimer, Record, RecordKind, Snapshot, Timestamp};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Mirror of one collection of the last server-confirmed snapshot
    Collection(RecordKind),
    /// Records saved while the remote store was unreachable
    Pending,
    Preferences,
    FeedTimer,
}

impl CacheKey {
    pub fn name(self) -> &'static str {
        match self {
            CacheKey::Collection(kind) => kind.document_key(),
            CacheKey::Pending => "pending",
            CacheKey::Preferences => "preferences",
            CacheKey::FeedTimer => "feedTimer",
        }
    }

    fn filename(self) -> String {
        format!("{}.json", self.name())
    }
}

/// How far back the history view reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRange {
    Day,
    #[default]
    Week,
    Month,
    All,
}

impl HistoryRange {
    /// Oldest instant still shown, `None` for [`HistoryRange::All`].
    pub fn cutoff(self, now: Timestamp) -> Option<Timestamp> {
        let window = match self {
            HistoryRange::Day => Duration::days(1),
            HistoryRange::Week => Duration::days(7),
            HistoryRange::Month => Duration::days(30),
            HistoryRange::All => return None,
        };
        Some(now - window)
    }

    pub fn includes(self, now: Timestamp, at: Timestamp) -> bool {
        self.cutoff(now).map_or(true, |cutoff| at >= cutoff)
    }
}

/// UI preferences remembered on this device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub history_range: HistoryRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero_image: Option<String>,
}

#[derive(Debug)]
enum Backend {
    Directory(PathBuf),
    Memory(DashMap<CacheKey, String>),
}

/// Durable key-value storage private to this client.
#[derive(Debug)]
pub struct LocalCache {
    backend: Backend,
}

impl LocalCache {
    /// A cache persisted under `data_dir`. The directory is created on the
    /// first write.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Directory(data_dir.into()),
        }
    }

    /// A cache that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(DashMap::new()),
        }
    }

    /// The data directory, `None` for an in-memory cache.
    pub fn data_dir(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Directory(dir) => Some(dir),
            Backend::Memory(_) => None,
        }
    }

    /// The last mirrored server snapshot, if any collection was cached.
    pub fn load_snapshot(&self) -> Option<Snapshot> {
        let mut body = Map::new();
        for kind in RecordKind::ALL {
            if let Some(items) = self.read::<Value>(CacheKey::Collection(kind)) {
                body.insert(kind.document_key().to_string(), items);
            }
        }

        if body.is_empty() {
            return None;
        }
        Some(normalize(&Value::Object(body)))
    }

    /// Mirror a server-confirmed snapshot.
    pub fn store_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.write(CacheKey::Collection(RecordKind::Feed), &snapshot.feeds)?;
        self.write(
            CacheKey::Collection(RecordKind::Elimination),
            &snapshot.eliminations,
        )?;
        self.write(
            CacheKey::Collection(RecordKind::Medication),
            &snapshot.medications,
        )?;
        self.write(
            CacheKey::Collection(RecordKind::Measurement),
            &snapshot.measurements,
        )
    }

    /// Records waiting to be merged into the remote document.
    pub fn pending(&self) -> Snapshot {
        self.read::<Value>(CacheKey::Pending)
            .map(|raw| normalize(&raw))
            .unwrap_or_default()
    }

    /// Queue a record for the next merge. Returns the updated queue.
    pub fn record_offline(&self, record: Record) -> Result<Snapshot> {
        let mut pending = self.pending();
        pending.upsert(record);
        self.write(CacheKey::Pending, &pending)?;
        Ok(pending)
    }

    pub fn clear_pending(&self) -> Result<()> {
        self.remove(CacheKey::Pending)
    }

    pub fn preferences(&self) -> Preferences {
        self.read(CacheKey::Preferences).unwrap_or_default()
    }

    pub fn set_preferences(&self, preferences: &Preferences) -> Result<()> {
        self.write(CacheKey::Preferences, preferences)
    }

    /// The in-progress feed timer, if one was running.
    pub fn feed_timer(&self) -> Option<FeedTimer> {
        self.read(CacheKey::FeedTimer)
    }

    pub fn set_feed_timer(&self, timer: &FeedTimer) -> Result<()> {
        self.write(CacheKey::FeedTimer, timer)
    }

    pub fn clear_feed_timer(&self) -> Result<()> {
        self.remove(CacheKey::FeedTimer)
    }

    fn read<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
        let raw = self.read_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = key.name(), error = %e, "Ignoring corrupt cache entry");
                None
            }
        }
    }

    fn read_raw(&self, key: CacheKey) -> Option<String> {
        match &self.backend {
            Backend::Directory(dir) => {
                let path = dir.join(key.filename());
                match fs::read_to_string(&path) {
                    Ok(contents) => Some(contents),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                    Err(e) => {
                        warn!(key = key.name(), path = %path.display(), error = %e, "Could not read cache entry");
                        None
                    }
                }
            }
            Backend::Memory(entries) => entries.get(&key).map(|v| v.clone()),
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: CacheKey, value: &T) -> Result<()> {
        let contents =
            serde_json::to_string(value).map_err(|e| SyncError::cache(key.name(), e))?;

        match &self.backend {
            Backend::Directory(dir) => {
                // Ensure data directory exists
                fs::create_dir_all(dir).map_err(|e| SyncError::cache(key.name(), e))?;
                fs::write(dir.join(key.filename()), contents)
                    .map_err(|e| SyncError::cache(key.name(), e))?;
            }
            Backend::Memory(entries) => {
                entries.insert(key, contents);
            }
        }

        debug!(key = key.name(), "Cache entry written");
        Ok(())
    }

    fn remove(&self, key: CacheKey) -> Result<()> {
        match &self.backend {
            Backend::Directory(dir) => match fs::remove_file(dir.join(key.filename())) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(SyncError::cache(key.name(), e)),
            },
            Backend::Memory(entries) => {
                entries.remove(&key);
                Ok(())
            }
        }
    }
}
