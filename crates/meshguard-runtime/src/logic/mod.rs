//! Core Logic Module
//!
//! This module contains the core logic task implementation split into focused components:
//! - `state`: Core application state and statistics
//! - `handlers`: Command and event handlers, and the handshake effect driver
//! - `task`: Main CoreLogicTask implementation and coordination
//!
//! All mesh state (the handshake coordinator, negotiating sessions, the
//! registry of connected sessions and the deduplication cache) is owned by a
//! single `CoreLogicTask` and mutated only from its event loop. Links, the
//! announcement listener and timers talk to it exclusively through the event
//! channel.

pub mod handlers;
pub mod state;
pub mod task;

pub use handlers::{drive_handshake, CommandHandlers, EventHandlers, TEST_MESSAGE_TEXT};
pub use state::{AppEventPublisher, CoreState, CoreStats, LoggerWrapper};
pub use task::CoreLogicTask;
