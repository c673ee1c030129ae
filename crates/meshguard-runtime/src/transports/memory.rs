//! In-process links and announcement bus
//!
//! [`MemoryLinkNetwork`] connects links that live in the same process. A link
//! registers under its username fragment when opened; a responder fed an offer
//! looks the initiator up by the offer's ufrag, and the initiator completes
//! the pairing when it is fed the matching answer. Credentials are checked the
//! same way a network link would check them.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use meshguard_core::protocol::{host_candidate, Candidates, LinkCredentials};
use meshguard_core::{
    AnnouncementMedium, AnnouncementRecord, LinkEvent, LinkEventSink, LinkFactory, MeshError,
    MeshResult, PeerLink, SessionDescription, SessionRole, Signal, SignalKind, TransportError,
};

use super::spawn_outbox;

const FIRST_PORT: u16 = 40_000;

// ----------------------------------------------------------------------------
// Link Network
// ----------------------------------------------------------------------------

/// Shared switchboard for in-process links
#[derive(Clone, Default)]
pub struct MemoryLinkNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    links: HashMap<String, Weak<Endpoint>>,
    next_port: u16,
    /// When set, answers are accepted but links never come up
    stalled: bool,
}

struct Endpoint {
    credentials: LinkCredentials,
    outbox: mpsc::UnboundedSender<LinkEvent>,
    state: Mutex<EndpointState>,
}

#[derive(Default)]
struct EndpointState {
    /// Ufrag of the initiator a responder answered
    answered: Option<String>,
    remote: Option<Weak<Endpoint>>,
    connected: bool,
    closed: bool,
}

impl MemoryLinkNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept answers without ever bringing links up
    pub fn stall_connections(&self, stalled: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.stalled = stalled;
        }
    }

    /// Number of links currently open on the network
    pub fn open_links(&self) -> usize {
        self.inner
            .lock()
            .map(|state| state.links.values().filter(|l| l.strong_count() > 0).count())
            .unwrap_or(0)
    }

    fn register(&self, endpoint: &Arc<Endpoint>) -> u16 {
        let Ok(mut state) = self.inner.lock() else {
            return 0;
        };
        state
            .links
            .insert(endpoint.credentials.ufrag.clone(), Arc::downgrade(endpoint));
        let port = FIRST_PORT.wrapping_add(state.next_port);
        state.next_port = state.next_port.wrapping_add(1);
        port
    }

    fn lookup(&self, ufrag: &str) -> Option<Arc<Endpoint>> {
        self.inner.lock().ok()?.links.get(ufrag)?.upgrade()
    }

    fn remove(&self, ufrag: &str) {
        if let Ok(mut state) = self.inner.lock() {
            state.links.remove(ufrag);
        }
    }

    fn is_stalled(&self) -> bool {
        self.inner.lock().map(|s| s.stalled).unwrap_or(false)
    }
}

impl LinkFactory for MemoryLinkNetwork {
    fn open(&self, role: SessionRole, sink: LinkEventSink) -> MeshResult<Box<dyn PeerLink>> {
        let endpoint = Arc::new(Endpoint {
            credentials: LinkCredentials::generate(),
            outbox: spawn_outbox(sink),
            state: Mutex::new(EndpointState::default()),
        });
        let port = self.register(&endpoint);
        let link = MemoryLink {
            network: self.clone(),
            endpoint,
            role,
            port,
        };

        if role == SessionRole::Initiator {
            link.emit(LinkEvent::Signal(link.description(SignalKind::Offer)));
        }
        Ok(Box::new(link))
    }
}

// ----------------------------------------------------------------------------
// Memory Link
// ----------------------------------------------------------------------------

pub struct MemoryLink {
    network: MemoryLinkNetwork,
    endpoint: Arc<Endpoint>,
    role: SessionRole,
    port: u16,
}

impl MemoryLink {
    fn description(&self, kind: SignalKind) -> SessionDescription {
        let mut candidates = Candidates::new();
        candidates.push(host_candidate("udp", Ipv4Addr::LOCALHOST, self.port));
        self.endpoint
            .credentials
            .to_signal(kind, candidates)
            .to_description()
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.endpoint.outbox.send(event);
    }

    fn failed(&self, reason: &str) -> MeshError {
        MeshError::connection_failed(self.endpoint.credentials.ufrag.clone(), reason)
    }

    /// Responder side: answer the initiator named by the offer
    fn answer(&mut self, offer: &Signal) -> MeshResult<()> {
        let initiator = self
            .network
            .lookup(&offer.ice_ufrag)
            .ok_or_else(|| self.failed("peer unreachable"))?;
        if !initiator.credentials.matches(&offer.ice_ufrag, &offer.ice_pwd) {
            return Err(self.failed("credentials rejected"));
        }

        with_state(&self.endpoint, |state| {
            state.answered = Some(offer.ice_ufrag.clone());
        });
        self.emit(LinkEvent::Signal(self.description(SignalKind::Answer)));
        Ok(())
    }

    /// Initiator side: complete the pairing with the responder named by the
    /// answer
    fn complete(&mut self, answer: &Signal) -> MeshResult<()> {
        if with_state(&self.endpoint, |state| state.connected) {
            return Ok(());
        }
        let responder = self
            .network
            .lookup(&answer.ice_ufrag)
            .ok_or_else(|| self.failed("peer unreachable"))?;
        let answered = with_state(&responder, |state| state.answered.clone());
        if !responder.credentials.matches(&answer.ice_ufrag, &answer.ice_pwd)
            || answered.as_deref() != Some(self.endpoint.credentials.ufrag.as_str())
        {
            return Err(self.failed("credentials rejected"));
        }
        if self.network.is_stalled() {
            tracing::debug!("memory network stalled, leaving link down");
            return Ok(());
        }

        with_state(&self.endpoint, |state| {
            state.remote = Some(Arc::downgrade(&responder));
            state.connected = true;
        });
        with_state(&responder, |state| {
            state.remote = Some(Arc::downgrade(&self.endpoint));
            state.connected = true;
        });
        self.emit(LinkEvent::Connected);
        let _ = responder.outbox.send(LinkEvent::Connected);
        Ok(())
    }
}

impl PeerLink for MemoryLink {
    fn signal(&mut self, description: SessionDescription) -> MeshResult<()> {
        if with_state(&self.endpoint, |state| state.closed) {
            return Err(TransportError::Closed {
                reason: "link closed".into(),
            }
            .into());
        }
        let remote = Signal::from_description(&description);
        if remote.is_degenerate() {
            return Err(self.failed("remote description has no credentials"));
        }

        match (self.role, remote.kind) {
            (SessionRole::Responder, SignalKind::Offer) => self.answer(&remote),
            (SessionRole::Initiator, SignalKind::Answer) => self.complete(&remote),
            (_, kind) => Err(self.failed(&format!("unexpected {kind}"))),
        }
    }

    fn send(&mut self, data: Vec<u8>) -> MeshResult<()> {
        let remote = with_state(&self.endpoint, |state| {
            if state.connected {
                state.remote.as_ref().and_then(Weak::upgrade)
            } else {
                None
            }
        });
        let remote = remote.ok_or_else(|| TransportError::NotConnected {
            peer_id: self.endpoint.credentials.ufrag.clone(),
        })?;
        remote
            .outbox
            .send(LinkEvent::Data(data))
            .map_err(|_| MeshError::send_failed("remote link gone"))
    }

    fn close(&mut self) {
        let remote = with_state(&self.endpoint, |state| {
            if state.closed {
                return None;
            }
            state.closed = true;
            state.connected = false;
            state.remote.take().and_then(|r| r.upgrade())
        });
        self.network.remove(&self.endpoint.credentials.ufrag);

        if let Some(remote) = remote {
            let was_connected = with_state(&remote, |state| {
                let was = state.connected;
                state.connected = false;
                state.remote = None;
                was
            });
            if was_connected {
                let _ = remote.outbox.send(LinkEvent::Closed);
            }
        }
    }

    fn is_connected(&self) -> bool {
        with_state(&self.endpoint, |state| state.connected)
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn with_state<R>(endpoint: &Endpoint, f: impl FnOnce(&mut EndpointState) -> R) -> R {
    let mut guard = match endpoint.state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard)
}

// ----------------------------------------------------------------------------
// Announcement Bus
// ----------------------------------------------------------------------------

/// In-process announcement medium shared by every node holding a clone
#[derive(Clone)]
pub struct MemoryAnnouncementBus {
    records: broadcast::Sender<AnnouncementRecord>,
}

impl MemoryAnnouncementBus {
    pub fn new() -> Self {
        let (records, _) = broadcast::channel(256);
        Self { records }
    }
}

impl Default for MemoryAnnouncementBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnnouncementMedium for MemoryAnnouncementBus {
    async fn post(&self, record: &AnnouncementRecord) -> MeshResult<()> {
        // Nobody listening is not an error on a broadcast medium
        let _ = self.records.send(record.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AnnouncementRecord> {
        self.records.subscribe()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
