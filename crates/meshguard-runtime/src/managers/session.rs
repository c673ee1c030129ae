//! Connection sessions for the MeshGuard runtime
//!
//! A [`ConnectionSession`] wraps one [`PeerLink`] together with the lifecycle
//! state machine that tracks it. The [`SessionManager`] owns every session
//! that has not reached link-up yet; connected sessions move to the
//! [`MeshRegistry`](super::registry::MeshRegistry).

use std::collections::HashMap;

use meshguard_core::channel::EventSender;
use meshguard_core::protocol::session_state::{LifecycleEvent, SessionLifecycle};
use meshguard_core::transport::SharedLinkFactory;
use meshguard_core::{
    LifecycleError, LinkEventSink, MeshResult, PeerId, PeerLink, SessionDescription, SessionKey,
    SessionOrigin, SessionRole, Signal, Timestamp,
};

// ----------------------------------------------------------------------------
// Connection Session
// ----------------------------------------------------------------------------

/// One link plus the bookkeeping the coordinator keeps about it
pub struct ConnectionSession {
    key: SessionKey,
    peer_id: PeerId,
    role: SessionRole,
    origin: SessionOrigin,
    lifecycle: SessionLifecycle,
    link: Box<dyn PeerLink>,
    /// Offer this responder was created from
    remote_signal: Option<Signal>,
    /// Latest local description waiting for the batching window to close
    batched: Option<SessionDescription>,
    batch_armed: bool,
}

impl ConnectionSession {
    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    pub fn remote_signal(&self) -> Option<&Signal> {
        self.remote_signal.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle.is_connected()
    }

    /// Advance the lifecycle; on error the current state is kept
    pub fn apply(&mut self, event: LifecycleEvent) -> Result<(), LifecycleError> {
        let next = self.lifecycle.clone().transition(event, Timestamp::now())?;
        self.lifecycle = next;
        Ok(())
    }

    /// Feed a remote description to the link
    pub fn feed_remote(&mut self, description: SessionDescription) -> MeshResult<()> {
        self.link.signal(description)?;
        if let Err(e) = self.apply(LifecycleEvent::RemoteSignal) {
            tracing::debug!("{} ignoring lifecycle change: {}", self.key, e);
        }
        Ok(())
    }

    /// Buffer a local description; true when this opens a new batching window
    pub fn buffer_local(&mut self, description: SessionDescription) -> bool {
        self.batched = Some(description);
        if self.batch_armed {
            false
        } else {
            self.batch_armed = true;
            true
        }
    }

    /// Close the batching window and hand back the latest description
    pub fn take_batched(&mut self) -> Option<SessionDescription> {
        self.batch_armed = false;
        self.batched.take()
    }

    pub fn send(&mut self, data: Vec<u8>) -> MeshResult<()> {
        self.link.send(data)
    }

    /// Close the link and mark the session closed
    pub fn close(&mut self) {
        self.link.close();
        if !self.lifecycle.is_terminal() {
            let _ = self.apply(LifecycleEvent::Close);
        }
    }
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("key", &self.key)
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("origin", &self.origin)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

/// Owns sessions that are still negotiating
pub struct SessionManager {
    factory: SharedLinkFactory,
    events: EventSender,
    sessions: HashMap<SessionKey, ConnectionSession>,
    next_key: u64,
    stats: SessionStats,
}

impl SessionManager {
    pub fn new(factory: SharedLinkFactory, events: EventSender) -> Self {
        Self {
            factory,
            events,
            sessions: HashMap::new(),
            next_key: 1,
            stats: SessionStats::default(),
        }
    }

    /// Open a link for `peer_id`; a responder is fed `remote` right away
    pub fn create(
        &mut self,
        peer_id: PeerId,
        role: SessionRole,
        origin: SessionOrigin,
        remote: Option<SessionDescription>,
    ) -> MeshResult<SessionKey> {
        let key = SessionKey(self.next_key);
        self.next_key += 1;

        let sink = LinkEventSink::new(key, self.events.clone());
        let link = self.factory.open(role, sink)?;
        let mut session = ConnectionSession {
            key,
            peer_id,
            role,
            origin,
            lifecycle: SessionLifecycle::new(Timestamp::now()),
            link,
            remote_signal: remote.as_ref().map(Signal::from_description),
            batched: None,
            batch_armed: false,
        };

        if let Some(description) = remote {
            if let Err(e) = session.feed_remote(description) {
                session.close();
                self.stats.sessions_failed += 1;
                return Err(e);
            }
        }

        tracing::debug!(
            "opened {} {:?} session {} for {}",
            origin,
            role,
            key,
            session.peer_id
        );
        self.sessions.insert(key, session);
        self.stats.sessions_created += 1;
        Ok(key)
    }

    pub fn get(&self, key: SessionKey) -> Option<&ConnectionSession> {
        self.sessions.get(&key)
    }

    pub fn get_mut(&mut self, key: SessionKey) -> Option<&mut ConnectionSession> {
        self.sessions.get_mut(&key)
    }

    /// Key of the negotiating session for `peer_id`, if any
    pub fn key_of(&self, peer_id: &PeerId) -> Option<SessionKey> {
        self.sessions
            .values()
            .find(|s| &s.peer_id == peer_id && !s.lifecycle.is_terminal())
            .map(|s| s.key)
    }

    /// Remove a session without closing its link (used when it connects)
    pub fn take(&mut self, key: SessionKey) -> Option<ConnectionSession> {
        self.sessions.remove(&key)
    }

    /// Remove and close a session
    pub fn close(&mut self, key: SessionKey) -> Option<ConnectionSession> {
        let mut session = self.sessions.remove(&key)?;
        session.close();
        self.stats.sessions_closed += 1;
        Some(session)
    }

    pub fn close_all(&mut self) {
        let keys: Vec<SessionKey> = self.sessions.keys().copied().collect();
        for key in keys {
            self.close(key);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn record_failure(&mut self) {
        self.stats.sessions_failed += 1;
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Statistics for session management
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub sessions_failed: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::memory::MemoryLinkNetwork;
    use meshguard_core::channel::{create_event_channel, Event, LinkEvent};
    use meshguard_core::{ChannelConfig, SignalKind};
    use std::sync::Arc;

    fn manager() -> (SessionManager, meshguard_core::channel::EventReceiver) {
        let (sender, receiver) = create_event_channel(&ChannelConfig::testing());
        let network = MemoryLinkNetwork::new();
        (SessionManager::new(Arc::new(network), sender), receiver)
    }

    #[tokio::test]
    async fn test_initiator_reports_offer() {
        let (mut sessions, mut events) = manager();
        let key = sessions
            .create(
                PeerId::random_manual(),
                SessionRole::Initiator,
                SessionOrigin::Manual,
                None,
            )
            .unwrap();

        match events.recv().await.unwrap() {
            Event::Link {
                key: reported,
                event: LinkEvent::Signal(description),
            } => {
                assert_eq!(reported, key);
                assert_eq!(description.kind, SignalKind::Offer);
                assert!(!description.is_degenerate());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(sessions.stats().sessions_created, 1);
    }

    #[tokio::test]
    async fn test_responder_with_degenerate_offer_fails() {
        let (mut sessions, _events) = manager();
        let result = sessions.create(
            PeerId::random_manual(),
            SessionRole::Responder,
            SessionOrigin::Manual,
            Some(SessionDescription::new(SignalKind::Offer, "")),
        );
        assert!(result.is_err());
        assert!(sessions.is_empty());
        assert_eq!(sessions.stats().sessions_failed, 1);
    }

    #[tokio::test]
    async fn test_batching_window() {
        let (mut sessions, _events) = manager();
        let peer = PeerId::random_manual();
        let key = sessions
            .create(peer.clone(), SessionRole::Initiator, SessionOrigin::Manual, None)
            .unwrap();
        let session = sessions.get_mut(key).unwrap();

        assert!(session.buffer_local(SessionDescription::new(SignalKind::Offer, "a")));
        assert!(!session.buffer_local(SessionDescription::new(SignalKind::Offer, "b")));
        assert_eq!(session.take_batched().unwrap().sdp, "b");
        assert!(session.take_batched().is_none());
        assert!(session.buffer_local(SessionDescription::new(SignalKind::Offer, "c")));

        assert_eq!(sessions.key_of(&peer), Some(key));
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let (mut sessions, _events) = manager();
        let key = sessions
            .create(
                PeerId::random_manual(),
                SessionRole::Initiator,
                SessionOrigin::Manual,
                None,
            )
            .unwrap();

        let closed = sessions.close(key).unwrap();
        assert_eq!(closed.lifecycle().state_name(), "Closed");
        assert!(sessions.get(key).is_none());
        assert!(sessions.close(key).is_none());
    }
}
