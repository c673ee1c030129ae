//! Persistent state of a MeshGuard node
//!
//! Messages, saved peers and preferences live behind [`MeshStorage`]. The
//! in-memory [`MemoryStorage`] backs tests and ephemeral nodes; the runtime
//! provides a file-backed implementation built on the same [`StorageSnapshot`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::StorageError;
use crate::types::{MessageId, PeerId, SavedPeer, SosMessage, SosStatus};

pub type StorageResult<T> = core::result::Result<T, StorageError>;

/// Preference key under which the local sender id is kept
pub const SENDER_ID_KEY: &str = "sender_id";

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

#[async_trait]
pub trait MeshStorage: Send + Sync {
    /// Insert or replace a message by id
    async fn save_message(&self, message: &SosMessage) -> StorageResult<()>;

    async fn get_message(&self, id: &MessageId) -> StorageResult<Option<SosMessage>>;

    /// Every stored message, newest first
    async fn get_all_messages(&self) -> StorageResult<Vec<SosMessage>>;

    /// Locally originated messages that have not reached any link yet
    async fn get_queued_messages(&self) -> StorageResult<Vec<SosMessage>>;

    /// Returns false if no message has this id
    async fn update_message_status(&self, id: &MessageId, status: SosStatus)
        -> StorageResult<bool>;

    /// Returns false if no message has this id
    async fn delete_message(&self, id: &MessageId) -> StorageResult<bool>;

    /// Insert or replace a saved peer by id
    async fn save_peer(&self, peer: &SavedPeer) -> StorageResult<()>;

    async fn get_all_saved_peers(&self) -> StorageResult<Vec<SavedPeer>>;

    async fn get_preference(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set_preference(&self, key: &str, value: &str) -> StorageResult<()>;
}

// ----------------------------------------------------------------------------
// Snapshot
// ----------------------------------------------------------------------------

/// Complete storage contents; the unit a file backend reads and writes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSnapshot {
    pub messages: Vec<SosMessage>,
    pub saved_peers: Vec<SavedPeer>,
    pub preferences: BTreeMap<String, String>,
}

impl StorageSnapshot {
    pub fn upsert_message(&mut self, message: &SosMessage) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => self.messages.push(message.clone()),
        }
    }

    pub fn message(&self, id: &MessageId) -> Option<&SosMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn messages_newest_first(&self) -> Vec<SosMessage> {
        let mut messages = self.messages.clone();
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        messages
    }

    pub fn queued(&self) -> Vec<SosMessage> {
        let mut queued: Vec<SosMessage> = self
            .messages
            .iter()
            .filter(|m| m.status == SosStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by_key(|m| m.timestamp);
        queued
    }

    pub fn set_status(&mut self, id: &MessageId, status: SosStatus) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                message.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove_message(&mut self, id: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| &m.id != id);
        self.messages.len() != before
    }

    pub fn upsert_peer(&mut self, peer: &SavedPeer) {
        match self.saved_peers.iter_mut().find(|p| p.id == peer.id) {
            Some(existing) => *existing = peer.clone(),
            None => self.saved_peers.push(peer.clone()),
        }
    }

    pub fn saved_peer(&self, id: &PeerId) -> Option<&SavedPeer> {
        self.saved_peers.iter().find(|p| &p.id == id)
    }
}

// ----------------------------------------------------------------------------
// Memory Storage
// ----------------------------------------------------------------------------

/// Volatile storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<StorageSnapshot>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StorageSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    pub async fn snapshot(&self) -> StorageSnapshot {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl MeshStorage for MemoryStorage {
    async fn save_message(&self, message: &SosMessage) -> StorageResult<()> {
        self.state.write().await.upsert_message(message);
        Ok(())
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
        Ok(self.state.write().await.set_status(id, status))
    }

    async fn delete_message(&self, id: &MessageId) -> StorageResult<bool> {
        Ok(self.state.write().await.remove_message(id))
    }

    async fn save_peer(&self, peer: &SavedPeer) -> StorageResult<()> {
        self.state.write().await.upsert_peer(peer);
        Ok(())
    }

    async fn get_all_saved_peers(&self) -> StorageResult<Vec<SavedPeer>> {
        Ok(self.state.read().await.saved_peers.clone())
    }

    async fn get_preference(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.state.read().await.preferences.get(key).cloned())
    }

    async fn set_preference(&self, key: &str, value: &str) -> StorageResult<()> {
        self.state
            .write()
            .await
            .preferences
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
