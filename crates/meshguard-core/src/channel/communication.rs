//! CSP Channel Communication Protocol Types
//!
//! This module defines the typed communication protocol.
//! All inter-task communication flows through these channel message types.

use core::fmt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::protocol::announce::AnnouncementRecord;
use crate::protocol::handshake::HandshakeState;
use crate::protocol::signal::{SessionDescription, SignalKind};
use crate::transport::SessionKey;
use crate::types::{Location, PeerId, SosMessage};

// ----------------------------------------------------------------------------
// Command: UI/External → Core Logic
// ----------------------------------------------------------------------------

/// Commands sent from the UI and external systems to the Core Logic task
#[derive(Debug)]
pub enum Command {
    /// Create an initiator session and show its offer code
    StartInitiation,
    /// The user switched from showing the offer to scanning the answer
    ScanAnswer,
    /// A code scanned or pasted by the user
    SubmitPeerSignal { text: String },
    /// Abandon the current handshake
    ResetHandshake,
    /// Originate an SOS message; the stored message is returned on `reply`
    SendSos {
        text: String,
        is_auto_triggered: bool,
        location: Option<Location>,
        reply: Option<oneshot::Sender<SosMessage>>,
    },
    /// Originate the diagnostic test message
    SendTest {
        reply: Option<oneshot::Sender<SosMessage>>,
    },
    /// Request a status report
    GetSystemStatus,
    /// Close every session and stop the loop
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartInitiation => "StartInitiation",
            Command::ScanAnswer => "ScanAnswer",
            Command::SubmitPeerSignal { .. } => "SubmitPeerSignal",
            Command::ResetHandshake => "ResetHandshake",
            Command::SendSos { .. } => "SendSos",
            Command::SendTest { .. } => "SendTest",
            Command::GetSystemStatus => "GetSystemStatus",
            Command::Shutdown => "Shutdown",
        }
    }
}

// ----------------------------------------------------------------------------
// Event: Links, Discovery and Timers → Core Logic
// ----------------------------------------------------------------------------

/// Something a link reported about its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link produced a local transport description
    Signal(SessionDescription),
    /// The data channel is open
    Connected,
    /// One frame arrived
    Data(Vec<u8>),
    /// The link failed
    Error(String),
    /// The link closed
    Closed,
}

impl LinkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::Signal(_) => "Signal",
            LinkEvent::Connected => "Connected",
            LinkEvent::Data(_) => "Data",
            LinkEvent::Error(_) => "Error",
            LinkEvent::Closed => "Closed",
        }
    }
}

/// Deadlines armed by the Core Logic task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Batching window for a manual session's local descriptions closed
    SignalBatch { key: SessionKey },
    /// Finalizing window of a handshake generation elapsed
    HandshakeTimeout { epoch: u64 },
    /// Post-success settle window of a handshake generation elapsed
    HandshakeSettled { epoch: u64 },
    /// A reconnection attempt reached its deadline
    AttemptExpired { key: SessionKey },
    /// Periodic reconnection sweep
    ReconnectTick,
    /// Periodic presence announcement
    PresenceTick,
}

/// Events delivered to the Core Logic task
#[derive(Debug, Clone)]
pub enum Event {
    Link { key: SessionKey, event: LinkEvent },
    Announcement(AnnouncementRecord),
    Timer(TimerEvent),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Link { event, .. } => event.name(),
            Event::Announcement(AnnouncementRecord::Presence { .. }) => "Presence",
            Event::Announcement(AnnouncementRecord::Signal { .. }) => "DiscoverySignal",
            Event::Timer(_) => "Timer",
        }
    }
}

// ----------------------------------------------------------------------------
// AppEvent: Core Logic → UI
// ----------------------------------------------------------------------------

/// Application events sent from the Core Logic task to UI subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEvent {
    /// A code is ready to be shown to the other device
    SignalReady { kind: SignalKind, text: String },
    /// The displayed code should be cleared
    DisplayCleared,
    /// Code scanning should stop
    StopScanning,
    /// The handshake coordinator moved between phases
    HandshakeStateChanged {
        from: HandshakeState,
        to: HandshakeState,
    },
    /// A manual pairing reached link-up
    HandshakeSucceeded { peer_id: PeerId },
    /// Number of connected peers changed
    PeerCountChanged { count: usize },
    /// A pairing or link problem the user should see
    PeerError { message: String },
    /// A previously unseen SOS message arrived
    MessageDelivered { message: SosMessage },
    /// Response to `Command::GetSystemStatus`
    SystemStatusReport(SystemStatus),
}

/// Snapshot of the Core Logic task's view of the mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub sender_id: String,
    pub discovery_id: Option<PeerId>,
    pub connected_peers: Vec<PeerId>,
    pub handshake_state: Option<HandshakeState>,
    pub active_sessions: usize,
    pub messages_processed: u64,
    pub duplicates_detected: u64,
    /// Saved peers replayed by the reconnection sweep
    pub reconnect_attempts: u64,
    pub uptime_seconds: u64,
}

impl fmt::Display for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppEvent::SignalReady { kind, .. } => write!(f, "{kind} code ready"),
            AppEvent::DisplayCleared => write!(f, "display cleared"),
            AppEvent::StopScanning => write!(f, "stop scanning"),
            AppEvent::HandshakeStateChanged { from, to } => write!(f, "handshake {from} -> {to}"),
            AppEvent::HandshakeSucceeded { peer_id } => write!(f, "connected to {peer_id}"),
            AppEvent::PeerCountChanged { count } => write!(f, "{count} peer(s) connected"),
            AppEvent::PeerError { message } => write!(f, "error: {message}"),
            AppEvent::MessageDelivered { message } => {
                write!(f, "SOS from {} ({} hops): {}", message.sender_id, message.hops, message.text)
            }
            AppEvent::SystemStatusReport(status) => write!(
                f,
                "{} peer(s), {} session(s), {} message(s) processed",
                status.connected_peers.len(),
                status.active_sessions,
                status.messages_processed
            ),
        }
    }
}
