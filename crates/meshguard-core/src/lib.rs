//! MeshGuard Core Protocol Implementation
//!
//! This crate provides the runtime-agnostic pieces of the MeshGuard offline SOS
//! mesh: the signal codec used for out-of-band pairing, the handshake
//! coordinator and session lifecycle state machines, the flooding and
//! deduplication rules, the CSP channel vocabulary shared with the runtime, and
//! the traits behind which links, discovery, storage and positioning live.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod errors;
pub mod location;
pub mod protocol;
pub mod storage;
pub mod task_logging;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{
    AppEvent, ChannelConfig, Command, Event, LinkEvent, SystemStatus, TimerEvent,
};
pub use config::{
    HandshakeConfig, LoggingConfig, MeshConfig, MeshMembershipConfig, RouterConfig,
};
pub use errors::{
    CodecError, LifecycleError, MeshError, MeshResult, Result, SequenceError, StorageError,
    TimeoutError, TransportError,
};
pub use location::{acquire_location, FixedLocation, LocationError, LocationProvider, NoLocation};
pub use protocol::{
    AnnouncementRecord, HandshakeCoordinator, HandshakeEffect, HandshakeEvent, HandshakeState,
    SessionDescription, SessionOrigin, SessionRole, Signal, SignalKind,
};
pub use storage::{MemoryStorage, MeshStorage, StorageSnapshot, SENDER_ID_KEY};
pub use transport::{
    AnnouncementMedium, LinkEventSink, LinkFactory, PeerLink, SessionKey,
};
pub use types::{
    Location, MessageId, PeerId, SavedPeer, SosMessage, SosStatus, SystemTimeSource, TimeSource,
    Timestamp,
};
