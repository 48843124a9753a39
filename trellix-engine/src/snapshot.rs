//! Local session snapshot
//!
//! The whole store is written as one JSON document under a fixed namespace
//! and replaced wholesale on every save. There is no schema versioning.

use crate::config::SnapshotConfig;
use crate::error::Result;
use crate::store::{EntityStore, StoreSnapshot};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Reads and writes `<dir>/<namespace>.json`
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(config: &SnapshotConfig) -> Self {
        Self {
            path: config.path(),
        }
    }

    /// Use an explicit file path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full store content, replacing any previous snapshot
    pub async fn save(&self, store: &EntityStore) -> Result<()> {
        let snapshot = store.snapshot();
        let content = serde_json::to_string_pretty(&snapshot)?;
        atomic_write(&self.path, content.as_bytes()).await?;
        info!(
            path = %self.path.display(),
            boards = snapshot.boards.len(),
            lists = snapshot.lists.len(),
            cards = snapshot.cards.len(),
            "saved snapshot"
        );
        Ok(())
    }

    /// Rebuild a store from the snapshot; an absent file gives an empty store
    pub async fn load(&self) -> Result<EntityStore> {
        if !fs::try_exists(&self.path).await? {
            debug!(path = %self.path.display(), "no snapshot, starting empty");
            return Ok(EntityStore::new());
        }
        let content = fs::read_to_string(&self.path).await?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content)?;
        EntityStore::from_snapshot(snapshot)
    }

    /// Remove the snapshot if present
    pub async fn clear(&self) -> Result<()> {
        if fs::try_exists(&self.path).await? {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }
}

/// Atomic write: temp file in the same directory, then rename
async fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content).await?;
    fs::rename(&temp_path, path).await?;

    Ok(())
}
