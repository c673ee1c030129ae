//! Stateful managers for the MeshGuard runtime
//!
//! This module contains manager structs that maintain state and orchestrate
//! protocol functionality for the Core Logic task.

pub mod discovery;
pub mod registry;
pub mod router;
pub mod session;

pub use discovery::{DiscoveryAction, DiscoveryManager, DiscoveryStats, ReconnectTracker};
pub use registry::MeshRegistry;
pub use router::{FloodingRouter, RouterStats};
pub use session::{ConnectionSession, SessionManager, SessionStats};
