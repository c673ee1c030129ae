//! Mesh membership registry
//!
//! The single owner of connected sessions. Only the Core Logic task mutates
//! it; everyone else observes the connected set through a watch snapshot or
//! through `AppEvent::PeerCountChanged`.

use std::collections::HashMap;

use tokio::sync::watch;

use meshguard_core::protocol::BroadcastReport;
use meshguard_core::{AppEvent, PeerId, SessionKey};

use super::session::ConnectionSession;

// ----------------------------------------------------------------------------
// Mesh Registry
// ----------------------------------------------------------------------------

/// Connected sessions keyed by peer id
pub struct MeshRegistry {
    peers: HashMap<PeerId, ConnectionSession>,
    keys: HashMap<SessionKey, PeerId>,
    snapshot: watch::Sender<Vec<PeerId>>,
}

impl MeshRegistry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Vec::new());
        Self {
            peers: HashMap::new(),
            keys: HashMap::new(),
            snapshot,
        }
    }

    /// Observe the connected peer ids
    pub fn watch(&self) -> watch::Receiver<Vec<PeerId>> {
        self.snapshot.subscribe()
    }

    /// Insert a connected session
    ///
    /// Returns the count change event and any session previously registered
    /// under the same peer id, which the caller must close.
    pub fn register(
        &mut self,
        session: ConnectionSession,
    ) -> (AppEvent, Option<ConnectionSession>) {
        let peer_id = session.peer_id().clone();
        self.keys.insert(session.key(), peer_id.clone());
        let replaced = self.peers.insert(peer_id, session);
        if let Some(old) = &replaced {
            self.keys.remove(&old.key());
        }
        (self.publish(), replaced)
    }

    /// Remove a peer; `None` if it was not registered
    pub fn deregister(&mut self, peer_id: &PeerId) -> Option<(ConnectionSession, AppEvent)> {
        let session = self.peers.remove(peer_id)?;
        self.keys.remove(&session.key());
        Some((session, self.publish()))
    }

    /// Peer registered under a session key
    pub fn peer_for(&self, key: SessionKey) -> Option<&PeerId> {
        self.keys.get(&key)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut ConnectionSession> {
        self.peers.get_mut(peer_id)
    }

    pub fn session_mut(&mut self, key: SessionKey) -> Option<&mut ConnectionSession> {
        let peer_id = self.keys.get(&key)?;
        self.peers.get_mut(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Connected peer ids in sorted order
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Write one frame to every connected session not in `exclude`
    pub fn broadcast(&mut self, frame: &[u8], exclude: &[PeerId]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (peer_id, session) in self.peers.iter_mut() {
            if exclude.contains(peer_id) {
                report.excluded += 1;
                continue;
            }
            match session.send(frame.to_vec()) {
                Ok(()) => report.delivered.push(peer_id.clone()),
                Err(e) => {
                    tracing::warn!("send to {} failed: {}", peer_id, e);
                    report.failed.push(peer_id.clone());
                }
            }
        }
        report
    }

    /// Close and drop every connected session
    pub fn close_all(&mut self) -> Option<AppEvent> {
        if self.peers.is_empty() {
            return None;
        }
        for session in self.peers.values_mut() {
            session.close();
        }
        self.peers.clear();
        self.keys.clear();
        Some(self.publish())
    }

    fn publish(&self) -> AppEvent {
        let ids = self.peer_ids();
        let count = ids.len();
        self.snapshot.send_replace(ids);
        AppEvent::PeerCountChanged { count }
    }
}

impl Default for MeshRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
