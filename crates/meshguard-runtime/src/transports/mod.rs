//! Concrete links and announcement media
//!
//! - [`memory`]: in-process link network and announcement bus for tests and
//!   simulation
//! - [`tcp`]: links over TCP, with host candidates naming listeners
//! - [`udp`]: announcement medium over IPv4 multicast

pub mod memory;
pub mod tcp;
pub mod udp;

pub use memory::{MemoryAnnouncementBus, MemoryLinkNetwork};
pub use tcp::TcpLinkFactory;
pub use udp::{UdpAnnouncementMedium, UdpDiscoveryConfig};

use meshguard_core::{LinkEvent, LinkEventSink};
use tokio::sync::mpsc;

/// Ordered outbox from a link to the Core Logic task
///
/// Links report from synchronous trait methods and from background tasks;
/// funnelling everything through one FIFO keeps a link's events in order.
pub(crate) fn spawn_outbox(sink: LinkEventSink) -> mpsc::UnboundedSender<LinkEvent> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<LinkEvent>();
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if !sink.emit(event).await {
                break;
            }
        }
    });
    sender
}
