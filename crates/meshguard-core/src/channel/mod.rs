//! Channel Module
//!
//! This module contains the CSP (Communicating Sequential Processes) channel infrastructure:
//! - `communication`: Commands, events and app events
//! - `utils`: Channel aliases, constructors and send helpers

pub mod communication;
pub mod utils;

// Re-export communication types
pub use communication::{AppEvent, Command, Event, LinkEvent, SystemStatus, TimerEvent};

// Re-export ChannelConfig from config module
pub use crate::config::ChannelConfig;

// Re-export utility types
pub use utils::{
    create_app_event_channel, create_command_channel, create_event_channel, AppEventReceiver,
    AppEventSender, ChannelError, CommandReceiver, CommandSender, EventReceiver,
    EventSender, NonBlockingSend,
};
