//! Core types for the MeshGuard protocol
//!
//! This module defines the fundamental types used throughout the protocol,
//! using newtype patterns for identifiers and serde representations that
//! match what peers put on the wire.

use core::fmt;
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::protocol::signal::Signal;

// ----------------------------------------------------------------------------
// Peer Identifier
// ----------------------------------------------------------------------------

/// Identifier of a mesh participant or of one side of a manual pairing
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Prefix for ephemeral ids announced on the local discovery medium
    pub const DISCOVERY_PREFIX: &'static str = "p-";
    /// Prefix for ids synthesized for out-of-band (code) pairings
    pub const MANUAL_PREFIX: &'static str = "qr-";

    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Ephemeral id this device announces to the local discovery medium
    pub fn random_discovery() -> Self {
        Self(format!("{}{}", Self::DISCOVERY_PREFIX, random_suffix(6)))
    }

    /// Locally synthesized id for a session paired through scanned codes
    pub fn random_manual() -> Self {
        Self(format!("{}{}", Self::MANUAL_PREFIX, random_suffix(5)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_manual(&self) -> bool {
        self.0.starts_with(Self::MANUAL_PREFIX)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

fn random_suffix(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

// ----------------------------------------------------------------------------
// Message Identifier
// ----------------------------------------------------------------------------

/// Globally unique SOS message id; the only deduplication key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0 + other)
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / 1000
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of wall-clock time, swappable in tests
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Time source backed by the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// SOS Message
// ----------------------------------------------------------------------------

/// Delivery status of an SOS message as seen by this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SosStatus {
    /// Created locally and not yet written to any link
    Queued,
    /// Written to at least one link by its originator
    Sent,
    /// Copy forwarded by an intermediate device
    Relayed,
    /// Arrived from the mesh
    Received,
}

impl fmt::Display for SosStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SosStatus::Queued => write!(f, "queued"),
            SosStatus::Sent => write!(f, "sent"),
            SosStatus::Relayed => write!(f, "relayed"),
            SosStatus::Received => write!(f, "received"),
        }
    }
}

/// Position attached to a message at capture time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters
    pub accuracy: f64,
}

/// The payload unit flooded across the mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosMessage {
    pub id: MessageId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub timestamp: Timestamp,
    pub status: SosStatus,
    #[serde(default)]
    pub is_auto_triggered: bool,
    pub sender_id: String,
    #[serde(default)]
    pub hops: u32,
}

impl SosMessage {
    /// Create a fresh locally originated message (hops 0, queued)
    pub fn new_local(
        text: impl Into<String>,
        sender_id: impl Into<String>,
        is_auto_triggered: bool,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            text: text.into(),
            location: None,
            timestamp,
            status: SosStatus::Queued,
            is_auto_triggered,
            sender_id: sender_id.into(),
            hops: 0,
        }
    }

    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    /// Encode for a link frame
    pub fn to_wire(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a link frame
    pub fn from_wire(data: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

// ----------------------------------------------------------------------------
// Saved Peer
// ----------------------------------------------------------------------------

/// Last-known signal of a peer we once accepted, kept for reconnection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPeer {
    pub id: PeerId,
    pub signal: Signal,
    pub saved_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_prefixes() {
        let discovery = PeerId::random_discovery();
        assert!(discovery.as_str().starts_with("p-"));
        assert_eq!(discovery.as_str().len(), 8);

        let manual = PeerId::random_manual();
        assert!(manual.is_manual());
        assert_eq!(manual.as_str().len(), 8);
        assert_ne!(PeerId::random_manual(), manual);
    }

    #[test]
    fn test_sos_message_wire_shape() {
        let message = SosMessage {
            id: MessageId::from("m1"),
            text: "help".to_string(),
            location: None,
            timestamp: Timestamp::new(1_700_000_000_000),
            status: SosStatus::Queued,
            is_auto_triggered: true,
            sender_id: "local-user".to_string(),
            hops: 2,
        };

        let json: serde_json::Value = serde_json::from_slice(&message.to_wire().unwrap()).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["status"], "queued");
        assert_eq!(json["isAutoTriggered"], true);
        assert_eq!(json["senderId"], "local-user");
        assert_eq!(json["hops"], 2);
        assert!(json.get("location").is_none());
    }

    #[test]
    fn test_sos_message_accepts_original_payload() {
        let raw = br#"{"id":"abc","text":"trapped","timestamp":1,"status":"received",
            "isAutoTriggered":false,"senderId":"local-user","hops":3,
            "location":{"latitude":1.5,"longitude":2.5,"accuracy":10}}"#;
        let message = SosMessage::from_wire(raw).unwrap();
        assert_eq!(message.hops, 3);
        assert_eq!(message.status, SosStatus::Received);
        assert_eq!(message.location.unwrap().accuracy, 10.0);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let start = Timestamp::new(1000);
        let later = start + 500;
        assert_eq!(later - start, 500);
        assert_eq!(start - later, 0);
        assert_eq!(later.as_secs(), 1);
    }
}
