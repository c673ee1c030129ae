//! Transport abstraction for MeshGuard
//!
//! Two seams separate protocol logic from the network:
//! - [`LinkFactory`] / [`PeerLink`]: one point-to-point data link per session,
//!   negotiated with offer/answer descriptions
//! - [`AnnouncementMedium`]: the shared local medium used for presence and
//!   discovery signaling
//!
//! Links report back through a [`LinkEventSink`] that tags every event with
//! the session it belongs to.

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::channel::{ChannelError, Event, EventSender, LinkEvent, NonBlockingSend};
use crate::protocol::announce::AnnouncementRecord;
use crate::protocol::session_state::SessionRole;
use crate::protocol::signal::SessionDescription;
use crate::Result;

// ----------------------------------------------------------------------------
// Session Key
// ----------------------------------------------------------------------------

/// Process-local handle of one connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub u64);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Link Event Sink
// ----------------------------------------------------------------------------

/// Where a link reports what happens to it
#[derive(Debug, Clone)]
pub struct LinkEventSink {
    key: SessionKey,
    events: EventSender,
}

impl LinkEventSink {
    pub fn new(key: SessionKey, events: EventSender) -> Self {
        Self { key, events }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Deliver an event, waiting for queue space; false once the core is gone
    pub async fn emit(&self, event: LinkEvent) -> bool {
        self.events
            .send(Event::Link {
                key: self.key,
                event,
            })
            .await
            .is_ok()
    }

    /// Deliver an event from synchronous code
    pub fn try_emit(&self, event: LinkEvent) -> core::result::Result<(), ChannelError> {
        self.events.try_send_non_blocking(Event::Link {
            key: self.key,
            event,
        })
    }
}

// ----------------------------------------------------------------------------
// Link Traits
// ----------------------------------------------------------------------------

/// One point-to-point data link
///
/// An initiator link starts gathering as soon as it is opened and reports its
/// offer as `LinkEvent::Signal`. A responder link stays quiet until it is fed
/// an offer, then reports its answer. Every other outcome (link-up, frames,
/// errors, closure) arrives through the sink as well.
pub trait PeerLink: Send {
    /// Feed a remote description
    fn signal(&mut self, description: SessionDescription) -> Result<()>;

    /// Write one frame; fails if the data channel is not open
    fn send(&mut self, data: Vec<u8>) -> Result<()>;

    /// Close the link; idempotent and never reported as an error
    fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Creates links
pub trait LinkFactory: Send + Sync {
    fn open(&self, role: SessionRole, sink: LinkEventSink) -> Result<Box<dyn PeerLink>>;
}

// ----------------------------------------------------------------------------
// Announcement Medium
// ----------------------------------------------------------------------------

/// Shared local medium for discovery records
#[async_trait]
pub trait AnnouncementMedium: Send + Sync {
    /// Publish a record to every listener, this device included
    async fn post(&self, record: &AnnouncementRecord) -> Result<()>;

    /// Receive every record published after subscription
    fn subscribe(&self) -> broadcast::Receiver<AnnouncementRecord>;
}

pub type SharedLinkFactory = Arc<dyn LinkFactory>;
pub type SharedAnnouncementMedium = Arc<dyn AnnouncementMedium>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{create_event_channel, ChannelConfig};

    #[tokio::test]
    async fn test_sink_tags_events_with_session_key() {
        let (sender, mut receiver) = create_event_channel(&ChannelConfig::default());
        let sink = LinkEventSink::new(SessionKey(7), sender);

        assert!(sink.emit(LinkEvent::Connected).await);
        sink.try_emit(LinkEvent::Closed).unwrap();

        match receiver.recv().await.unwrap() {
            Event::Link { key, event } => {
                assert_eq!(key, SessionKey(7));
                assert_eq!(event, LinkEvent::Connected);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            receiver.recv().await,
            Some(Event::Link {
                event: LinkEvent::Closed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_sink_reports_closed_core() {
        let (sender, receiver) = create_event_channel(&ChannelConfig::default());
        drop(receiver);
        let sink = LinkEventSink::new(SessionKey(1), sender);
        assert!(!sink.emit(LinkEvent::Connected).await);
        assert_eq!(
            sink.try_emit(LinkEvent::Connected),
            Err(ChannelError::ChannelClosed)
        );
    }
}
