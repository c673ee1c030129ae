//! File-backed storage
//!
//! The whole [`StorageSnapshot`] lives in one JSON document. Every mutation
//! rewrites it through a temporary file and an atomic rename while the write
//! lock is held, so readers never observe a half-written file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use meshguard_core::storage::StorageResult;
use meshguard_core::{
    MeshStorage, MessageId, SavedPeer, SosMessage, SosStatus, StorageError, StorageSnapshot,
};

#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    state: RwLock<StorageSnapshot>,
}

impl FileStorage {
    /// Load `path`, or start empty if it does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StorageSnapshot::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(
            "opened storage at {} with {} message(s)",
            path.display(),
            snapshot.messages.len()
        );

        Ok(Self {
            path,
            state: RwLock::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` and write the result to disk
    async fn mutate<T>(&self, change: impl FnOnce(&mut StorageSnapshot) -> T) -> StorageResult<T> {
        let mut state = self.state.write().await;
        let result = change(&mut state);
        write_atomically(&self.path, &state).await?;
        Ok(result)
    }
}

async fn write_atomically(path: &Path, snapshot: &StorageSnapshot) -> StorageResult<()> {
    let data = serde_json::to_vec_pretty(snapshot)?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = tokio::fs::File::create(&temp_path).await?;
    file.write_all(&data).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        StorageError::Backend {
            reason: format!("failed to replace {}: {}", path.display(), e),
        }
    })
}

#[async_trait]
impl MeshStorage for FileStorage {
    async fn save_message(&self, message: &SosMessage) -> StorageResult<()> {
        self.mutate(|s| s.upsert_message(message)).await
    }

    async fn get_message(&self, id: &MessageId) -> StorageResult<Option<SosMessage>> {
        Ok(self.state.read().await.message(id).cloned())
    }

    async fn get_all_messages(&self) -> StorageResult<Vec<SosMessage>> {
        Ok(self.state.read().await.messages_newest_first())
    }

    async fn get_queued_messages(&self) -> StorageResult<Vec<SosMessage>> {
        Ok(self.state.read().await.queued())
    }

    async fn update_message_status(
        &self,
        id: &MessageId,
        status: SosStatus,
    ) -> StorageResult<bool> {
        self.mutate(|s| s.set_status(id, status)).await
    }

    async fn delete_message(&self, id: &MessageId) -> StorageResult<bool> {
        self.mutate(|s| s.remove_message(id)).await
    }

    async fn save_peer(&self, peer: &SavedPeer) -> StorageResult<()> {
        self.mutate(|s| s.upsert_peer(peer)).await
    }

    async fn get_all_saved_peers(&self) -> StorageResult<Vec<SavedPeer>> {
        Ok(self.state.read().await.saved_peers.clone())
    }

    async fn get_preference(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.state.read().await.preferences.get(key).cloned())
    }

    async fn set_preference(&self, key: &str, value: &str) -> StorageResult<()> {
        self.mutate(|s| {
            s.preferences.insert(key.to_string(), value.to_string());
        })
        .await
    }
}
