//! MeshGuard Runtime Engine
//!
//! This crate contains the runtime engine of a MeshGuard node, including:
//! - `CoreLogicTask`: The central task owning the handshake, sessions and mesh
//! - Session, registry, discovery and flooding managers
//! - Link and announcement transports (in-memory, TCP, UDP multicast)
//! - File-backed storage
//!
//! `meshguard-core` provides the protocol rules and the traits this crate
//! plugs concrete implementations into.

pub mod builder;
pub mod logic;
pub mod managers;
pub mod storage;
pub mod timers;
pub mod transports;

pub use builder::{create_cli_runtime, create_test_runtime, RuntimeBuilder, RuntimeHandle};
pub use managers::*;
pub use storage::FileStorage;
pub use transports::{
    MemoryAnnouncementBus, MemoryLinkNetwork, TcpLinkFactory, UdpAnnouncementMedium,
    UdpDiscoveryConfig,
};

// Re-export core types for convenience
pub use meshguard_core::{
    channel::{AppEventReceiver, CommandSender},
    AppEvent, Command, MeshConfig, MeshError, MeshResult, PeerId, SosMessage, SosStatus,
};
