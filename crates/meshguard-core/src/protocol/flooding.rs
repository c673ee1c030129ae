//! Flooding policy
//!
//! Decides what copy of an SOS message goes on the wire and whether an
//! accepted message may travel further. The router applies this policy; it
//! owns no state of its own.

use serde::{Deserialize, Serialize};

use crate::types::{PeerId, SosMessage, SosStatus};

/// Hop count at which a received message stops being relayed
pub const MAX_HOPS: u32 = 5;

/// Hop bound and copy rules for flooded messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodPolicy {
    max_hops: u32,
}

impl FloodPolicy {
    pub fn new(max_hops: u32) -> Self {
        Self { max_hops }
    }

    pub fn max_hops(&self) -> u32 {
        self.max_hops
    }

    /// A received message may be relayed only while its stored hop count is
    /// below the bound
    pub fn should_relay(&self, message: &SosMessage) -> bool {
        message.hops < self.max_hops
    }

    /// The copy written to links; the stored message is left untouched
    pub fn outgoing_copy(&self, message: &SosMessage) -> SosMessage {
        let mut copy = message.clone();
        copy.hops = message.hops.saturating_add(1);
        copy
    }

    /// The copy sent on by an intermediate device
    pub fn relay_copy(&self, message: &SosMessage) -> SosMessage {
        let mut copy = self.outgoing_copy(message);
        copy.status = SosStatus::Relayed;
        copy
    }

    /// The form in which an accepted message is stored and surfaced
    pub fn accepted(&self, mut message: SosMessage) -> SosMessage {
        message.status = SosStatus::Received;
        message
    }
}

impl Default for FloodPolicy {
    fn default() -> Self {
        Self::new(MAX_HOPS)
    }
}

/// Outcome of writing one message to the connected peers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    /// Peers the frame was written to
    pub delivered: Vec<PeerId>,
    /// Peers whose link refused the frame
    pub failed: Vec<PeerId>,
    /// Peers skipped because they were excluded
    pub excluded: usize,
}

impl BroadcastReport {
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}
