//! Announcement medium over IPv4 multicast
//!
//! Every record is one JSON datagram sent to an administratively scoped
//! group. Loopback is left on so a node hears its own records, which the
//! discovery manager filters by sender.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use meshguard_core::{AnnouncementMedium, AnnouncementRecord, MeshResult, TransportError};

/// Largest datagram read from the group
const MAX_DATAGRAM: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpDiscoveryConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Interface to join the group on; unspecified lets the OS choose
    pub interface: Ipv4Addr,
}

impl Default for UdpDiscoveryConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(239, 255, 42, 99),
            port: 47474,
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

pub struct UdpAnnouncementMedium {
    socket: Arc<UdpSocket>,
    target: SocketAddrV4,
    records: broadcast::Sender<AnnouncementRecord>,
    listener: JoinHandle<()>,
}

impl UdpAnnouncementMedium {
    /// Join the group and start listening
    pub async fn bind(config: UdpDiscoveryConfig) -> MeshResult<Self> {
        if !config.group.is_multicast() {
            return Err(TransportError::InvalidConfiguration {
                reason: format!("{} is not a multicast group", config.group),
            }
            .into());
        }

        let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port))
            .map_err(TransportError::NetworkIo)?;
        socket
            .join_multicast_v4(&config.group, &config.interface)
            .map_err(TransportError::NetworkIo)?;
        socket
            .set_multicast_loop_v4(true)
            .map_err(TransportError::NetworkIo)?;
        socket
            .set_nonblocking(true)
            .map_err(TransportError::NetworkIo)?;
        let socket = Arc::new(UdpSocket::from_std(socket).map_err(TransportError::NetworkIo)?);

        let (records, _) = broadcast::channel(256);
        let listener = tokio::spawn(receive_loop(socket.clone(), records.clone()));
        tracing::info!(
            "joined discovery group {}:{}",
            config.group,
            config.port
        );

        Ok(Self {
            socket,
            target: SocketAddrV4::new(config.group, config.port),
            records,
            listener,
        })
    }
}

#[async_trait]
impl AnnouncementMedium for UdpAnnouncementMedium {
    async fn post(&self, record: &AnnouncementRecord) -> MeshResult<()> {
        let payload = record.to_json()?;
        self.socket
            .send_to(payload.as_bytes(), self.target)
            .await
            .map_err(TransportError::NetworkIo)?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AnnouncementRecord> {
        self.records.subscribe()
    }
}

impl Drop for UdpAnnouncementMedium {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, records: broadcast::Sender<AnnouncementRecord>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!("discovery receive failed: {}", e);
                continue;
            }
        };
        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            tracing::debug!("non-utf8 datagram from {}", from);
            continue;
        };
        match AnnouncementRecord::from_json(text) {
            // No subscribers is not an error
            Ok(record) => {
                let _ = records.send(record);
            }
            Err(e) => tracing::debug!("ignoring datagram from {}: {}", from, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_unicast_group() {
        let config = UdpDiscoveryConfig {
            group: Ipv4Addr::new(192, 168, 1, 1),
            ..UdpDiscoveryConfig::default()
        };
        assert!(UdpAnnouncementMedium::bind(config).await.is_err());
    }

    #[test]
    fn test_default_group_is_admin_scoped() {
        let config = UdpDiscoveryConfig::default();
        assert!(config.group.is_multicast());
        assert_eq!(config.group.octets()[0..2], [239, 255]);
    }
}
