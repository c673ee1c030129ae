//! Records exchanged on the local discovery medium

use serde::{Deserialize, Serialize};

use crate::protocol::signal::SessionDescription;
use crate::types::PeerId;

/// A record posted to, or read from, the discovery medium
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnnouncementRecord {
    /// "I am here"
    Presence { sender: PeerId },
    /// A transport description addressed to one device
    Signal {
        sender: PeerId,
        target: PeerId,
        signal: SessionDescription,
    },
}

impl AnnouncementRecord {
    pub fn presence(sender: PeerId) -> Self {
        AnnouncementRecord::Presence { sender }
    }

    pub fn signal(sender: PeerId, target: PeerId, signal: SessionDescription) -> Self {
        AnnouncementRecord::Signal {
            sender,
            target,
            signal,
        }
    }

    pub fn sender(&self) -> &PeerId {
        match self {
            AnnouncementRecord::Presence { sender } => sender,
            AnnouncementRecord::Signal { sender, .. } => sender,
        }
    }

    /// Whether this device should look at the record at all
    pub fn concerns(&self, me: &PeerId) -> bool {
        match self {
            AnnouncementRecord::Presence { sender } => sender != me,
            AnnouncementRecord::Signal { sender, target, .. } => sender != me && target == me,
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
