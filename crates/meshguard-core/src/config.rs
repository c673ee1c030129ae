//! Centralized Configuration Management
//!
//! All tunables of a MeshGuard node in one place. Durations are stored as
//! milliseconds so the structures read naturally from TOML.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::protocol::deduplication::DEFAULT_GENERATION_CAPACITY;
use crate::protocol::flooding::MAX_HOPS;
use crate::task_logging::LogLevel;

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Configuration for CSP channel buffer sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for Command channels (UI → Core Logic)
    pub command_buffer_size: usize,
    /// Buffer size for Event channels (Links, discovery, timers → Core Logic)
    pub event_buffer_size: usize,
    /// Buffer size for AppEvent broadcast (Core Logic → UI)
    pub app_event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,
            event_buffer_size: 256,
            app_event_buffer_size: 128,
        }
    }
}

impl ChannelConfig {
    pub fn low_memory() -> Self {
        Self {
            command_buffer_size: 10,
            event_buffer_size: 64,
            app_event_buffer_size: 32,
        }
    }

    pub fn testing() -> Self {
        Self {
            command_buffer_size: 100,
            event_buffer_size: 512,
            app_event_buffer_size: 512,
        }
    }
}

// ----------------------------------------------------------------------------
// Handshake Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Quiet period after a manual session's first local description before
    /// the latest one is encoded and shown
    pub signal_batch_ms: u64,
    /// How long the Finalizing phase may wait for link-up
    pub handshake_timeout_ms: u64,
    /// Delay between a successful pairing and the automatic reset
    pub settle_delay_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            signal_batch_ms: 1_500,
            handshake_timeout_ms: 30_000,
            settle_delay_ms: 3_000,
        }
    }
}

impl HandshakeConfig {
    pub fn signal_batch(&self) -> Duration {
        Duration::from_millis(self.signal_batch_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// ----------------------------------------------------------------------------
// Membership Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshMembershipConfig {
    /// Join the local discovery medium at start
    pub discovery_enabled: bool,
    /// Replay saved peers while nobody is connected
    pub reconnect_enabled: bool,
    /// Period of the reconnection sweep
    pub reconnect_interval_ms: u64,
    /// Deadline of a single reconnection attempt
    pub reconnect_attempt_timeout_ms: u64,
    /// Period of presence announcements
    pub presence_interval_ms: u64,
}

impl Default for MeshMembershipConfig {
    fn default() -> Self {
        Self {
            discovery_enabled: true,
            reconnect_enabled: true,
            reconnect_interval_ms: 20_000,
            reconnect_attempt_timeout_ms: 30_000,
            presence_interval_ms: 10_000,
        }
    }
}

impl MeshMembershipConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn reconnect_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_attempt_timeout_ms)
    }

    pub fn presence_interval(&self) -> Duration {
        Duration::from_millis(self.presence_interval_ms)
    }
}

// ----------------------------------------------------------------------------
// Router Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Received messages at or beyond this hop count are not relayed
    pub max_hops: u32,
    /// Upper bound on position acquisition when sending an SOS
    pub location_timeout_ms: u64,
    /// Ids held per in-memory deduplication generation
    pub dedup_capacity: usize,
    /// Sender id used until one is persisted
    pub default_sender_id: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_hops: MAX_HOPS,
            location_timeout_ms: 5_000,
            dedup_capacity: DEFAULT_GENERATION_CAPACITY,
            default_sender_id: "local-user".to_string(),
        }
    }
}

impl RouterConfig {
    pub fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.location_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log channel traffic between tasks
    pub task_logging: bool,
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            task_logging: false,
            level: LogLevel::Info,
        }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Master configuration for a MeshGuard node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub channels: ChannelConfig,
    pub handshake: HandshakeConfig,
    pub membership: MeshMembershipConfig,
    pub router: RouterConfig,
    pub logging: LoggingConfig,
}

impl MeshConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic configuration for in-process tests
    pub fn testing() -> Self {
        Self {
            channels: ChannelConfig::testing(),
            handshake: HandshakeConfig::default(),
            membership: MeshMembershipConfig {
                discovery_enabled: false,
                reconnect_enabled: false,
                ..MeshMembershipConfig::default()
            },
            router: RouterConfig::default(),
            logging: LoggingConfig {
                task_logging: true,
                level: LogLevel::Debug,
            },
        }
    }

    pub fn with_channels(mut self, channels: ChannelConfig) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_membership(mut self, membership: MeshMembershipConfig) -> Self {
        self.membership = membership;
        self
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<(), String> {
        if self.channels.command_buffer_size == 0 {
            return Err("Command buffer size cannot be zero".into());
        }
        if self.channels.event_buffer_size == 0 {
            return Err("Event buffer size cannot be zero".into());
        }
        if self.channels.app_event_buffer_size == 0 {
            return Err("App event buffer size cannot be zero".into());
        }

        if self.handshake.handshake_timeout_ms == 0 {
            return Err("Handshake timeout cannot be zero".into());
        }
        if self.handshake.signal_batch_ms >= self.handshake.handshake_timeout_ms {
            return Err("Signal batch window must be shorter than the handshake timeout".into());
        }

        if self.membership.reconnect_enabled && self.membership.reconnect_interval_ms == 0 {
            return Err("Reconnect interval cannot be zero".into());
        }
        if self.membership.discovery_enabled && self.membership.presence_interval_ms == 0 {
            return Err("Presence interval cannot be zero".into());
        }

        if self.router.max_hops == 0 {
            return Err("Max hops cannot be zero".into());
        }
        if self.router.dedup_capacity == 0 {
            return Err("Deduplication capacity cannot be zero".into());
        }
        if self.router.default_sender_id.trim().is_empty() {
            return Err("Default sender id cannot be empty".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MeshConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.handshake.signal_batch(), Duration::from_millis(1500));
        assert_eq!(config.handshake.handshake_timeout(), Duration::from_secs(30));
        assert_eq!(config.membership.reconnect_interval(), Duration::from_secs(20));
        assert_eq!(config.membership.presence_interval(), Duration::from_secs(10));
        assert_eq!(config.router.max_hops, 5);
        assert!(MeshConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_nonsense() {
        let config = MeshConfig::default().with_router(RouterConfig {
            max_hops: 0,
            ..RouterConfig::default()
        });
        assert!(config.validate().is_err());

        let config = MeshConfig::default().with_handshake(HandshakeConfig {
            signal_batch_ms: 40_000,
            ..HandshakeConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_like_input_fills_defaults() {
        let config: MeshConfig =
            serde_json::from_str(r#"{"router":{"max_hops":3}}"#).unwrap();
        assert_eq!(config.router.max_hops, 3);
        assert_eq!(config.router.location_timeout_ms, 5_000);
        assert_eq!(config.handshake, HandshakeConfig::default());
    }
}
