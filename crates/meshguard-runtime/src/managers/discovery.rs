//! Local discovery and reconnection
//!
//! [`DiscoveryManager`] turns announcement records into session decisions.
//! [`ReconnectTracker`] remembers which saved peers have an attempt in flight
//! so a sweep never replays the same peer twice.

use std::collections::HashMap;

use meshguard_core::{
    AnnouncementRecord, PeerId, SavedPeer, SessionDescription, SessionKey, SignalKind,
};

use super::registry::MeshRegistry;
use super::session::SessionManager;

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

/// What the coordinator should do about one announcement record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryAction {
    Ignore,
    /// Open a discovery initiator towards `peer`
    Initiate { peer: PeerId },
    /// Open a discovery responder for `peer` and feed it `offer`
    Respond {
        peer: PeerId,
        offer: SessionDescription,
    },
    /// Feed `description` to the session already held for `peer`
    Forward {
        peer: PeerId,
        description: SessionDescription,
    },
}

/// Presence and signaling decisions for the local announcement medium
#[derive(Debug)]
pub struct DiscoveryManager {
    me: PeerId,
    stats: DiscoveryStats,
}

impl DiscoveryManager {
    pub fn new(me: PeerId) -> Self {
        Self {
            me,
            stats: DiscoveryStats::default(),
        }
    }

    /// Id this device announces
    pub fn me(&self) -> &PeerId {
        &self.me
    }

    pub fn presence(&self) -> AnnouncementRecord {
        AnnouncementRecord::presence(self.me.clone())
    }

    /// Address a local description to `peer`
    pub fn signal_to(&self, peer: &PeerId, description: SessionDescription) -> AnnouncementRecord {
        AnnouncementRecord::signal(self.me.clone(), peer.clone(), description)
    }

    /// Decide how to react to a record
    ///
    /// Of two devices that hear each other only the one with the lower id
    /// dials, so a pair never ends up with two crossing sessions.
    pub fn on_record(
        &mut self,
        record: AnnouncementRecord,
        registry: &MeshRegistry,
        sessions: &SessionManager,
    ) -> DiscoveryAction {
        if !record.concerns(&self.me) {
            return DiscoveryAction::Ignore;
        }
        self.stats.records_seen += 1;

        match record {
            AnnouncementRecord::Presence { sender } => {
                let known = registry.contains(&sender) || sessions.key_of(&sender).is_some();
                if known || self.me >= sender {
                    return DiscoveryAction::Ignore;
                }
                self.stats.initiated += 1;
                DiscoveryAction::Initiate { peer: sender }
            }
            AnnouncementRecord::Signal { sender, signal, .. } => {
                if registry.contains(&sender) || sessions.key_of(&sender).is_some() {
                    return DiscoveryAction::Forward {
                        peer: sender,
                        description: signal,
                    };
                }
                if signal.kind == SignalKind::Offer {
                    self.stats.responded += 1;
                    return DiscoveryAction::Respond {
                        peer: sender,
                        offer: signal,
                    };
                }
                tracing::debug!("ignoring {} from unknown {}", signal.kind, sender);
                DiscoveryAction::Ignore
            }
        }
    }

    pub fn stats(&self) -> &DiscoveryStats {
        &self.stats
    }
}

/// Statistics for discovery
#[derive(Debug, Clone, Default)]
pub struct DiscoveryStats {
    pub records_seen: u64,
    pub initiated: u64,
    pub responded: u64,
}

// ----------------------------------------------------------------------------
// Reconnection
// ----------------------------------------------------------------------------

/// In-flight reconnection attempts by saved peer
#[derive(Debug, Default)]
pub struct ReconnectTracker {
    attempts: HashMap<PeerId, SessionKey>,
}

impl ReconnectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved peers a sweep should replay now
    ///
    /// Nothing is replayed while any peer is connected.
    pub fn due<'a>(
        &self,
        saved: &'a [SavedPeer],
        registry: &MeshRegistry,
        sessions: &SessionManager,
    ) -> Vec<&'a SavedPeer> {
        if !registry.is_empty() {
            return Vec::new();
        }
        saved
            .iter()
            .filter(|peer| !self.attempts.contains_key(&peer.id))
            .filter(|peer| sessions.key_of(&peer.id).is_none())
            .filter(|peer| !peer.signal.is_degenerate())
            .collect()
    }

    pub fn track(&mut self, peer: PeerId, key: SessionKey) {
        self.attempts.insert(peer, key);
    }

    /// Forget the attempt for `peer` if it is the one with `key`
    pub fn finish(&mut self, peer: &PeerId, key: SessionKey) -> bool {
        if self.attempts.get(peer) == Some(&key) {
            self.attempts.remove(peer);
            true
        } else {
            false
        }
    }

    pub fn in_flight(&self) -> usize {
        self.attempts.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
