//! Channel Utilities for CSP Communication
//!
//! Channel type aliases, constructors and the non-blocking send helper used
//! by link code that must never stall on a full Core Logic queue.

use core::fmt;

use tokio::sync::{broadcast, mpsc};

use crate::channel::communication::{AppEvent, Command, Event};
use crate::config::ChannelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    ChannelFull,
    ChannelClosed,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::ChannelFull => write!(f, "Channel buffer is full"),
            ChannelError::ChannelClosed => write!(f, "Channel is closed"),
        }
    }
}

impl std::error::Error for ChannelError {}

// ----------------------------------------------------------------------------
// Channel Types
// ----------------------------------------------------------------------------

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;
pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;
pub type AppEventSender = broadcast::Sender<AppEvent>;
pub type AppEventReceiver = broadcast::Receiver<AppEvent>;

// ----------------------------------------------------------------------------
// Channel Creation Utilities
// ----------------------------------------------------------------------------

/// Create bounded command channel (UI → Core Logic)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

/// Create bounded event channel (Links, discovery, timers → Core Logic)
pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    mpsc::channel(config.event_buffer_size)
}

/// Create broadcast app event channel (Core Logic → any number of UIs)
///
/// Slow subscribers lose the oldest events rather than stalling the loop.
pub fn create_app_event_channel(config: &ChannelConfig) -> (AppEventSender, AppEventReceiver) {
    broadcast::channel(config.app_event_buffer_size)
}

// ----------------------------------------------------------------------------
// Non-blocking Send Utilities
// ----------------------------------------------------------------------------

/// Non-blocking send for link code running outside the async runtime
pub trait NonBlockingSend<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError>;
}

impl NonBlockingSend<Event> for EventSender {
    fn try_send_non_blocking(&self, event: Event) -> Result<(), ChannelError> {
        self.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::ChannelClosed,
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.command_buffer_size, 32);
        assert_eq!(config.event_buffer_size, 256);
        assert_eq!(config.app_event_buffer_size, 128);
    }

    #[tokio::test]
    async fn test_command_channel_creation() {
        let config = ChannelConfig::default();
        let (sender, mut receiver) = create_command_channel(&config);

        sender.send(Command::StartInitiation).await.unwrap();

        match receiver.recv().await.unwrap() {
            Command::StartInitiation => (),
            other => panic!("Unexpected command type: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_event_channel_reports_full() {
        let config = ChannelConfig {
            event_buffer_size: 1,
            ..ChannelConfig::default()
        };
        let (sender, _receiver) = create_event_channel(&config);
        let tick = || Event::Timer(crate::channel::TimerEvent::PresenceTick);

        assert!(sender.try_send_non_blocking(tick()).is_ok());
        assert_eq!(
            sender.try_send_non_blocking(tick()),
            Err(ChannelError::ChannelFull)
        );
    }
}
