//! Core Logic State Management
//!
//! Contains the core application state, statistics, and logger wrapper.

use std::sync::Arc;

use meshguard_core::channel::{AppEventSender, EventSender};
use tokio::sync::broadcast::error::SendError;
use meshguard_core::task_logging::{LogLevel, NoOpLogger, TaskId, TaskLogger, TracingLogger};
use meshguard_core::transport::{SharedAnnouncementMedium, SharedLinkFactory};
use meshguard_core::{
    AppEvent, Command, Event, HandshakeCoordinator, MeshConfig, MeshStorage, PeerId, Timestamp,
};

use crate::managers::{
    DiscoveryManager, FloodingRouter, MeshRegistry, ReconnectTracker, SessionManager,
};
use crate::timers::TimerService;

// ----------------------------------------------------------------------------
// Core Logic State
// ----------------------------------------------------------------------------

/// Core application state owned by the Core Logic task
pub struct CoreState {
    /// Identity stamped on locally originated messages
    pub sender_id: String,
    /// Manual pairing state machine
    pub coordinator: HandshakeCoordinator,
    /// Sessions still negotiating
    pub sessions: SessionManager,
    /// Connected sessions
    pub registry: MeshRegistry,
    /// Flooding and deduplication
    pub router: FloodingRouter,
    /// UI fan-out, shared with handlers that must publish mid-operation
    pub publisher: AppEventPublisher,
    /// Present when the node joined an announcement medium
    pub discovery: Option<DiscoveryManager>,
    pub reconnect: ReconnectTracker,
    pub storage: Arc<dyn MeshStorage>,
    pub medium: Option<SharedAnnouncementMedium>,
    pub timers: TimerService,
    pub config: MeshConfig,
    /// Task start time
    pub start_time: Timestamp,
    /// Statistics
    pub stats: CoreStats,
}

impl CoreState {
    pub fn new(
        config: MeshConfig,
        factory: SharedLinkFactory,
        events: EventSender,
        publisher: AppEventPublisher,
        storage: Arc<dyn MeshStorage>,
        medium: Option<SharedAnnouncementMedium>,
        discovery_id: PeerId,
    ) -> Self {
        let discovery = medium
            .as_ref()
            .filter(|_| config.membership.discovery_enabled)
            .map(|_| DiscoveryManager::new(discovery_id));

        Self {
            sender_id: config.router.default_sender_id.clone(),
            coordinator: HandshakeCoordinator::new(config.handshake.clone()),
            sessions: SessionManager::new(factory, events.clone()),
            registry: MeshRegistry::new(),
            router: FloodingRouter::new(&config.router),
            publisher,
            discovery,
            reconnect: ReconnectTracker::new(),
            storage,
            medium,
            timers: TimerService::new(events),
            config,
            start_time: Timestamp::now(),
            stats: CoreStats::default(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        (Timestamp::now() - self.start_time) / 1000
    }
}

// ----------------------------------------------------------------------------
// App Event Publisher
// ----------------------------------------------------------------------------

/// Publishes app events to UI subscribers and logs each one
#[derive(Debug, Clone)]
pub struct AppEventPublisher {
    sender: AppEventSender,
    logger: LoggerWrapper,
}

impl AppEventPublisher {
    pub fn new(sender: AppEventSender, logger: LoggerWrapper) -> Self {
        Self { sender, logger }
    }

    /// Publish to UI subscribers; false when nobody is listening
    pub fn publish(&self, app_event: AppEvent) -> bool {
        self.logger.log_send_app_event(&app_event);
        match self.sender.send(app_event) {
            Ok(_) => true,
            Err(SendError(app_event)) => {
                self.logger.log_drop_app_event(&app_event, "no subscribers");
                false
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Logger Wrapper
// ----------------------------------------------------------------------------

/// Logger wrapper for object safety
#[derive(Debug, Clone)]
pub enum LoggerWrapper {
    Tracing(TracingLogger),
    NoOp(NoOpLogger),
}

impl LoggerWrapper {
    pub fn log_receive_command(&self, message: &Command) {
        match self {
            LoggerWrapper::Tracing(logger) => logger.log_receive(TaskId::UI, TaskId::CoreLogic, message),
            LoggerWrapper::NoOp(logger) => logger.log_receive(TaskId::UI, TaskId::CoreLogic, message),
        }
    }

    pub fn log_receive_event(&self, from: TaskId, message: &Event) {
        match self {
            LoggerWrapper::Tracing(logger) => logger.log_receive(from, TaskId::CoreLogic, message),
            LoggerWrapper::NoOp(logger) => logger.log_receive(from, TaskId::CoreLogic, message),
        }
    }

    pub fn log_send_app_event(&self, message: &AppEvent) {
        match self {
            LoggerWrapper::Tracing(logger) => logger.log_send(TaskId::CoreLogic, TaskId::UI, message),
            LoggerWrapper::NoOp(logger) => logger.log_send(TaskId::CoreLogic, TaskId::UI, message),
        }
    }

    pub fn log_drop_app_event(&self, message: &AppEvent, reason: &str) {
        match self {
            LoggerWrapper::Tracing(logger) => {
                logger.log_drop(TaskId::CoreLogic, TaskId::UI, message, reason)
            }
            LoggerWrapper::NoOp(logger) => {
                logger.log_drop(TaskId::CoreLogic, TaskId::UI, message, reason)
            }
        }
    }

    pub fn log_task_event(&self, level: LogLevel, message: &str) {
        match self {
            LoggerWrapper::Tracing(logger) => logger.log_task_event(TaskId::CoreLogic, level, message),
            LoggerWrapper::NoOp(logger) => logger.log_task_event(TaskId::CoreLogic, level, message),
        }
    }
}

/// Statistics for the Core Logic task
#[derive(Debug, Clone, Default)]
pub struct CoreStats {
    pub commands_processed: u64,
    pub events_processed: u64,
    pub app_events_generated: u64,
    pub handshake_transitions: u64,
    pub handshake_rejections: u64,
    pub sessions_connected: u64,
    pub reconnect_attempts: u64,
}
