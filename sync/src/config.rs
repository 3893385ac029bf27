//! Configuration management for the sync client.

use crate::engine::SyncOptions;
use cradle_engine::MergePolicy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Sync client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared household document to sync
    pub document_id: String,
    /// Directory of the local cache
    pub cache_dir: PathBuf,
    /// JSON file the in-process remote store is persisted to
    pub remote_path: PathBuf,
    /// How long `connect` waits for server-confirmed data
    pub connect_timeout: Duration,
    /// Winner when a merged id exists on both sides
    pub merge_policy: MergePolicy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let document_id = var("CRADLE_DOCUMENT_ID")
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::MissingDocumentId)?;

        let cache_dir = var("CRADLE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".cradle"));

        let remote_path = var("CRADLE_REMOTE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_dir.join("remote.json"));

        let connect_timeout = var("CRADLE_CONNECT_TIMEOUT_MS")
            .unwrap_or_else(|| "4000".to_string())
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidConnectTimeout)?;

        let merge_policy = match var("CRADLE_MERGE_POLICY") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidMergePolicy(raw))?,
            None => MergePolicy::default(),
        };

        Ok(Self {
            document_id,
            cache_dir,
            remote_path,
            connect_timeout,
            merge_policy,
        })
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions::new(self.document_id.clone())
            .with_connect_timeout(self.connect_timeout)
            .with_merge_policy(self.merge_policy)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("CRADLE_DOCUMENT_ID environment variable is required")]
    MissingDocumentId,

    #[error("Invalid CRADLE_CONNECT_TIMEOUT_MS value")]
    InvalidConnectTimeout,

    #[error("Invalid CRADLE_MERGE_POLICY value: {0}")]
    InvalidMergePolicy(String),
}
