//! MeshGuard CLI Configuration Management
//!
//! Configuration is read from the first TOML file found, in order:
//! - the path given with `--config`
//! - `meshguard.toml` in the working directory
//! - `meshguard/meshguard.toml` under the platform config directory
//!
//! Missing sections take their defaults; command line flags are applied on
//! top by the command handlers.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use meshguard_core::{Location, MeshConfig};
use meshguard_runtime::UdpDiscoveryConfig;

/// File name looked up in the working and config directories
pub const CONFIG_FILE_NAME: &str = "meshguard.toml";

/// Name of the message store inside the data directory
pub const STORE_FILE_NAME: &str = "store.json";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the MeshGuard CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Protocol and runtime tunables
    pub mesh: MeshConfig,
    pub node: NodeConfig,
    /// Local multicast group used for discovery
    pub discovery: UdpDiscoveryConfig,
    pub cli: CliConfig,
}

/// Where this node listens and stores its data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address link listeners bind to
    pub listen: IpAddr,
    /// Address written into pairing codes; detected when unset
    pub advertise: Option<Ipv4Addr>,
    /// Defaults to the platform data directory
    pub data_dir: Option<PathBuf>,
    /// Fixed position attached to outgoing messages
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub prompt: String,
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise: None,
            data_dir: None,
            location: None,
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            prompt: "meshguard> ".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load from `path` if given, otherwise from the first default location
    /// that exists
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        for candidate in Self::default_paths() {
            if candidate.is_file() {
                return Self::load_from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::FileSystem(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)
            .map_err(|e| ConfigError::Loading(format!("Failed to load {}: {}", path.display(), e)))?;
        tracing::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| ConfigError::Loading(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("meshguard").join(CONFIG_FILE_NAME));
        }
        paths
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mesh.validate().map_err(ConfigError::Validation)?;

        if !self.discovery.group.is_multicast() {
            return Err(ConfigError::Validation(format!(
                "Discovery group {} is not a multicast address",
                self.discovery.group
            )));
        }
        if self.discovery.port == 0 {
            return Err(ConfigError::Validation(
                "Discovery port must be greater than 0".to_string(),
            ));
        }

        if let Some(location) = &self.node.location {
            if !(-90.0..=90.0).contains(&location.latitude)
                || !(-180.0..=180.0).contains(&location.longitude)
            {
                return Err(ConfigError::Validation(format!(
                    "Location {}, {} is out of range",
                    location.latitude, location.longitude
                )));
            }
        }
        Ok(())
    }

    /// Directory holding the message store
    pub fn data_dir(&self) -> PathBuf {
        self.node.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("meshguard")
        })
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join(STORE_FILE_NAME)
    }

    /// Address peers should dial, as written into pairing codes
    pub fn advertise_address(&self) -> Ipv4Addr {
        if let Some(address) = self.node.advertise {
            return address;
        }
        match self.node.listen {
            IpAddr::V4(address) if !address.is_unspecified() => address,
            _ => outbound_address(&self.discovery).unwrap_or(Ipv4Addr::LOCALHOST),
        }
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example = AppConfig {
            node: NodeConfig {
                advertise: Some(Ipv4Addr::new(192, 168, 1, 20)),
                data_dir: Some(PathBuf::from("/var/lib/meshguard")),
                ..NodeConfig::default()
            },
            ..AppConfig::default()
        };
        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

/// Local address the OS would route discovery traffic from
fn outbound_address(discovery: &UdpDiscoveryConfig) -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((discovery.group, discovery.port)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(address) if !address.is_unspecified() => Some(address),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cli.prompt, "meshguard> ");
        assert_eq!(config.mesh.router.max_hops, 5);
        assert!(config.store_path().ends_with("meshguard/store.json"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [node]
            listen = "10.0.0.5"
            data_dir = "/tmp/mg"

            [mesh.router]
            max_hops = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.node.listen, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(config.advertise_address(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(config.store_path(), PathBuf::from("/tmp/mg/store.json"));
        assert_eq!(config.mesh.router.max_hops, 3);
        assert_eq!(config.mesh.handshake.settle_delay_ms, 3_000);
        assert_eq!(config.discovery, UdpDiscoveryConfig::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.discovery.group = Ipv4Addr::new(10, 0, 0, 1);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = AppConfig::default();
        config.node.location = Some(Location {
            latitude: 123.0,
            longitude: 0.0,
            accuracy: 5.0,
        });
        assert!(config.validate().is_err());

        assert!(AppConfig::from_toml("[mesh.router]\nmax_hops = 0").is_err());
        assert!(AppConfig::from_toml("not = [toml").is_err());
    }

    #[test]
    fn test_explicit_advertise_wins() {
        let mut config = AppConfig::default();
        config.node.advertise = Some(Ipv4Addr::new(192, 168, 4, 1));
        assert_eq!(config.advertise_address(), Ipv4Addr::new(192, 168, 4, 1));
    }

    #[test]
    fn test_example_config_round_trips() {
        let example = AppConfig::example_config();
        assert!(example.contains("[node]"));
        assert!(example.contains("[discovery]"));
        let parsed = AppConfig::from_toml(&example).unwrap();
        assert_eq!(parsed.node.advertise, Some(Ipv4Addr::new(192, 168, 1, 20)));
    }
}
