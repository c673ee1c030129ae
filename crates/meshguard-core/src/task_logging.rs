//! Task Communication Logging Infrastructure
//!
//! Structured logging of CSP channel traffic between the Core Logic task and
//! the tasks around it, emitted through `tracing`.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::channel::{AppEvent, Command, Event, LinkEvent, TimerEvent};
use crate::protocol::announce::AnnouncementRecord;

// ----------------------------------------------------------------------------
// Log Event Types
// ----------------------------------------------------------------------------

/// Log levels for task communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Task identifiers for communication logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskId {
    CoreLogic,
    Link,
    Discovery,
    Timer,
    UI,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::CoreLogic => write!(f, "CoreLogic"),
            TaskId::Link => write!(f, "Link"),
            TaskId::Discovery => write!(f, "Discovery"),
            TaskId::Timer => write!(f, "Timer"),
            TaskId::UI => write!(f, "UI"),
        }
    }
}

/// Communication direction for channel messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Send,
    Receive,
    Drop,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "→"),
            Direction::Receive => write!(f, "←"),
            Direction::Drop => write!(f, "✗"),
        }
    }
}

/// Message type classification for logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Command(String),
    Event(String),
    AppEvent(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Command(cmd) => write!(f, "Command::{}", cmd),
            MessageType::Event(event) => write!(f, "Event::{}", event),
            MessageType::AppEvent(app_event) => write!(f, "AppEvent::{}", app_event),
        }
    }
}

// ----------------------------------------------------------------------------
// Message Type Extraction
// ----------------------------------------------------------------------------

impl From<&Command> for MessageType {
    fn from(command: &Command) -> Self {
        MessageType::Command(command.name().to_string())
    }
}

impl From<&Event> for MessageType {
    fn from(event: &Event) -> Self {
        MessageType::Event(event.name().to_string())
    }
}

impl From<&AppEvent> for MessageType {
    fn from(app_event: &AppEvent) -> Self {
        let variant = match app_event {
            AppEvent::SignalReady { .. } => "SignalReady",
            AppEvent::DisplayCleared => "DisplayCleared",
            AppEvent::StopScanning => "StopScanning",
            AppEvent::HandshakeStateChanged { .. } => "HandshakeStateChanged",
            AppEvent::HandshakeSucceeded { .. } => "HandshakeSucceeded",
            AppEvent::PeerCountChanged { .. } => "PeerCountChanged",
            AppEvent::PeerError { .. } => "PeerError",
            AppEvent::MessageDelivered { .. } => "MessageDelivered",
            AppEvent::SystemStatusReport(_) => "SystemStatusReport",
        };
        MessageType::AppEvent(variant.to_string())
    }
}

// ----------------------------------------------------------------------------
// Message Summary Generation
// ----------------------------------------------------------------------------

pub trait MessageSummary {
    fn summary(&self) -> String;
}

impl MessageSummary for Command {
    fn summary(&self) -> String {
        match self {
            Command::StartInitiation => "starting initiation".to_string(),
            Command::ScanAnswer => "scanning for answer".to_string(),
            Command::SubmitPeerSignal { text } => format!("code bytes:{}", text.len()),
            Command::ResetHandshake => "resetting handshake".to_string(),
            Command::SendSos {
                text,
                is_auto_triggered,
                location,
                ..
            } => format!(
                "text:{:.20} auto:{} located:{}",
                text,
                is_auto_triggered,
                location.is_some()
            ),
            Command::SendTest { .. } => "sending test message".to_string(),
            Command::GetSystemStatus => "requesting system status".to_string(),
            Command::Shutdown => "shutting down".to_string(),
        }
    }
}

impl MessageSummary for Event {
    fn summary(&self) -> String {
        match self {
            Event::Link { key, event } => match event {
                LinkEvent::Signal(desc) => format!("{} {} sdp bytes:{}", key, desc.kind, desc.sdp.len()),
                LinkEvent::Data(data) => format!("{} bytes:{}", key, data.len()),
                LinkEvent::Error(reason) => format!("{} reason:{}", key, reason),
                LinkEvent::Connected | LinkEvent::Closed => key.to_string(),
            },
            Event::Announcement(AnnouncementRecord::Presence { sender }) => {
                format!("from:{}", sender)
            }
            Event::Announcement(AnnouncementRecord::Signal {
                sender,
                target,
                signal,
            }) => format!("from:{} to:{} {}", sender, target, signal.kind),
            Event::Timer(timer) => match timer {
                TimerEvent::SignalBatch { key } => format!("signal batch {}", key),
                TimerEvent::HandshakeTimeout { epoch } => format!("handshake timeout epoch:{}", epoch),
                TimerEvent::HandshakeSettled { epoch } => format!("handshake settled epoch:{}", epoch),
                TimerEvent::AttemptExpired { key } => format!("attempt expired {}", key),
                TimerEvent::ReconnectTick => "reconnect tick".to_string(),
                TimerEvent::PresenceTick => "presence tick".to_string(),
            },
        }
    }
}

impl MessageSummary for AppEvent {
    fn summary(&self) -> String {
        self.to_string()
    }
}

// ----------------------------------------------------------------------------
// Logger Implementation
// ----------------------------------------------------------------------------

/// Task communication logger
pub trait TaskLogger {
    fn log_send<T>(&self, from: TaskId, to: TaskId, message: &T)
    where
        for<'a> &'a T: Into<MessageType>,
        T: MessageSummary;

    fn log_receive<T>(&self, from: TaskId, to: TaskId, message: &T)
    where
        for<'a> &'a T: Into<MessageType>,
        T: MessageSummary;

    fn log_drop<T>(&self, from: TaskId, to: TaskId, message: &T, reason: &str)
    where
        for<'a> &'a T: Into<MessageType>,
        T: MessageSummary;

    fn log_task_event(&self, task: TaskId, level: LogLevel, message: &str);
}

/// Logger that forwards to the `tracing` subscriber
#[derive(Debug, Clone)]
pub struct TracingLogger {
    min_level: LogLevel,
}

impl TracingLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new(LogLevel::Debug)
    }
}

impl TaskLogger for TracingLogger {
    fn log_send<T>(&self, from: TaskId, to: TaskId, message: &T)
    where
        for<'a> &'a T: Into<MessageType>,
        T: MessageSummary,
    {
        if !self.should_log(LogLevel::Debug) {
            return;
        }
        let kind: MessageType = message.into();
        tracing::debug!("{} {} {} {} {}", from, Direction::Send, to, kind, message.summary());
    }

    fn log_receive<T>(&self, from: TaskId, to: TaskId, message: &T)
    where
        for<'a> &'a T: Into<MessageType>,
        T: MessageSummary,
    {
        if !self.should_log(LogLevel::Debug) {
            return;
        }
        let kind: MessageType = message.into();
        tracing::debug!("{} {} {} {} {}", to, Direction::Receive, from, kind, message.summary());
    }

    fn log_drop<T>(&self, from: TaskId, to: TaskId, message: &T, reason: &str)
    where
        for<'a> &'a T: Into<MessageType>,
        T: MessageSummary,
    {
        if !self.should_log(LogLevel::Warn) {
            return;
        }
        let kind: MessageType = message.into();
        tracing::warn!(
            "{} {} {} {} {} reason:{}",
            from,
            Direction::Drop,
            to,
            kind,
            message.summary(),
            reason
        );
    }

    fn log_task_event(&self, task: TaskId, level: LogLevel, message: &str) {
        if !self.should_log(level) {
            return;
        }
        match level {
            LogLevel::Trace => tracing::trace!("{} {}", task, message),
            LogLevel::Debug => tracing::debug!("{} {}", task, message),
            LogLevel::Info => tracing::info!("{} {}", task, message),
            LogLevel::Warn => tracing::warn!("{} {}", task, message),
            LogLevel::Error => tracing::error!("{} {}", task, message),
        }
    }
}

/// Logger that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogger;

impl TaskLogger for NoOpLogger {
    fn log_send<T>(&self, _from: TaskId, _to: TaskId, _message: &T)
    where
        for<'a> &'a T: Into<MessageType>,
        T: MessageSummary,
    {
    }

    fn log_receive<T>(&self, _from: TaskId, _to: TaskId, _message: &T)
    where
        for<'a> &'a T: Into<MessageType>,
        T: MessageSummary,
    {
    }

    fn log_drop<T>(&self, _from: TaskId, _to: TaskId, _message: &T, _reason: &str)
    where
        for<'a> &'a T: Into<MessageType>,
        T: MessageSummary,
    {
    }

    fn log_task_event(&self, _task: TaskId, _level: LogLevel, _message: &str) {}
}
