//! Cradle Sync - runs one sync session for a household document.
//!
//! Hydrates an in-process remote store from disk, connects, merges any
//! records queued while offline, and writes the store back.

use chrono::Utc;
use cradle_engine::RecordKind;
use cradle_sync::{Config, LocalCache, MemoryDocumentStore, SyncEngine};
use std::fs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cradle_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Cradle sync for document {}", config.document_id);

    // Hydrate the remote store
    let store = MemoryDocumentStore::new_shared();
    if config.remote_path.exists() {
        let raw = fs::read_to_string(&config.remote_path)?;
        let loaded = store.import(&serde_json::from_str(&raw)?)?;
        tracing::info!(
            "Loaded {} document(s) from {}",
            loaded,
            config.remote_path.display()
        );
    }

    let cache = LocalCache::new(&config.cache_dir);
    let engine = SyncEngine::with_cache(store.clone(), config.sync_options(), cache);
    engine.on_status(|status, message| tracing::info!(%status, "{}", message));

    let snapshot = engine.connect().await?;
    tracing::info!(
        feeds = snapshot.len(RecordKind::Feed),
        eliminations = snapshot.len(RecordKind::Elimination),
        medications = snapshot.len(RecordKind::Medication),
        measurements = snapshot.len(RecordKind::Measurement),
        "Connected"
    );

    if let Some(report) = engine.flush_offline("Merge offline entries").await? {
        tracing::info!(
            added = report.added.len(),
            collisions = report.collisions.len(),
            "Merged offline entries"
        );
    }

    if let Some(timer) = engine.cache().and_then(|cache| cache.feed_timer()) {
        tracing::info!(
            side = ?timer.side,
            elapsed_seconds = timer.elapsed_seconds(Utc::now()),
            "Feed timer is running"
        );
    }

    // Persist the remote store
    if let Some(parent) = config.remote_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config.remote_path, serde_json::to_string_pretty(&store.export())?)?;
    tracing::info!("Saved remote store to {}", config.remote_path.display());

    engine.disconnect().await;
    Ok(())
}
