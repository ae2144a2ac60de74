//! Snapshot storage for the ledger state

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::ledger::LedgerState;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// The last saved snapshot, or `None` for a fresh ledger.
    async fn load(&self) -> Result<Option<LedgerState>, String>;

    async fn save(&self, state: &LedgerState) -> Result<(), String>;
}

/// Keeps the latest snapshot in memory only
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<LedgerState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load(&self) -> Result<Option<LedgerState>, String> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, state: &LedgerState) -> Result<(), String> {
        *self.snapshot.lock().await = Some(state.clone());
        Ok(())
    }
}

/// Pretty JSON snapshot on disk. Each save writes and syncs a staging file,
/// then renames it over the previous snapshot.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn load(&self) -> Result<Option<LedgerState>, String> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.to_string()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| format!("corrupt ledger snapshot {}: {}", self.path.display(), err))
    }

    async fn save(&self, state: &LedgerState) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| err.to_string())?;
        }

        let payload = serde_json::to_string_pretty(state).map_err(|err| err.to_string())?;
        let staging = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&staging)
            .await
            .map_err(|err| err.to_string())?;
        file.write_all(payload.as_bytes())
            .await
            .map_err(|err| err.to_string())?;
        // The rename must not land before the data does.
        file.sync_all().await.map_err(|err| err.to_string())?;
        drop(file);

        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|err| err.to_string())
    }
}
