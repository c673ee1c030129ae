//! MeshGuard Protocol Module
//!
//! This module contains the pure protocol logic shared by every runtime:
//! - `signal`: Transport descriptions and the minimal signal projected from them
//! - `codec`: Compact, URL-safe text encoding of signals
//! - `handshake`: Handshake coordinator state machine
//! - `session_state`: Linear session lifecycle
//! - `deduplication`: Bounded seen-message tracking
//! - `flooding`: Hop bound and copy rules for flooded messages
//! - `announce`: Discovery medium records
//! - `credentials`: Link credential generation

pub mod announce;
pub mod codec;
pub mod credentials;
pub mod deduplication;
pub mod flooding;
pub mod handshake;
pub mod session_state;
pub mod signal;

// Re-export signal types
pub use signal::{prioritize_candidates, Candidates, SessionDescription, Signal, SignalKind};

// Re-export codec functions
pub use codec::{decode, decode_description, encode, encode_description};

// Re-export handshake types
pub use handshake::{
    HandshakeCoordinator, HandshakeEffect, HandshakeEvent, HandshakeState, HandshakeTransition,
};

// Re-export lifecycle types
pub use session_state::{LifecycleEvent, SessionLifecycle, SessionOrigin, SessionRole};

// Re-export mesh types
pub use announce::AnnouncementRecord;
pub use credentials::{host_candidate, LinkCredentials};
pub use deduplication::{DeduplicationStats, SeenMessages};
pub use flooding::{BroadcastReport, FloodPolicy, MAX_HOPS};
