//! Core Logic Task Implementation
//!
//! Contains the main CoreLogicTask struct and its coordination logic.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use meshguard_core::channel::{CommandReceiver, EventReceiver, EventSender};
use meshguard_core::task_logging::{LogLevel, TaskId};
use meshguard_core::{AppEvent, Command, Event, MeshError, MeshResult, TimerEvent, SENDER_ID_KEY};

use super::handlers::{CommandHandlers, EventHandlers};
use super::state::{CoreState, CoreStats, LoggerWrapper};

// ----------------------------------------------------------------------------
// Core Logic Task
// ----------------------------------------------------------------------------

/// The Core Logic task that processes all commands and events
pub struct CoreLogicTask {
    /// Core application state
    state: CoreState,
    /// Channel for receiving commands from UI and external systems
    command_receiver: CommandReceiver,
    /// Channel for receiving events from links, discovery and timers
    event_receiver: EventReceiver,
    /// Handed to the announcement listener
    event_sender: EventSender,
    /// Logger for task communication (using enum for object safety)
    logger: LoggerWrapper,
    /// Listener and periodic timers started with the task
    background: Vec<JoinHandle<()>>,
    /// Whether the task should continue running
    running: bool,
}

impl CoreLogicTask {
    pub fn new(
        state: CoreState,
        command_receiver: CommandReceiver,
        event_receiver: EventReceiver,
        event_sender: EventSender,
        logger: LoggerWrapper,
    ) -> Self {
        Self {
            state,
            command_receiver,
            event_receiver,
            event_sender,
            logger,
            background: Vec::new(),
            running: true,
        }
    }

    /// Run the main Core Logic task loop
    pub async fn run(&mut self) -> MeshResult<()> {
        self.logger
            .log_task_event(LogLevel::Info, "Core Logic task starting");
        self.start().await;

        while self.running {
            tokio::select! {
                // Process command from UI or external systems
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => {
                            self.logger.log_receive_command(&command);
                            if let Err(e) = self.process_command(command).await {
                                self.handle_error("command", e);
                            }
                        }
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                // Process event from links, discovery and timers
                event = self.event_receiver.recv() => {
                    match event {
                        Some(event) => {
                            let from = match &event {
                                Event::Link { .. } => TaskId::Link,
                                Event::Announcement(_) => TaskId::Discovery,
                                Event::Timer(_) => TaskId::Timer,
                            };
                            self.logger.log_receive_event(from, &event);
                            if let Err(e) = self.process_event(event).await {
                                self.handle_error("event", e);
                            }
                        }
                        None => {
                            info!("Event channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        self.stop();
        self.logger
            .log_task_event(LogLevel::Info, "Core Logic task stopped");
        Ok(())
    }

    /// Get current statistics
    pub fn stats(&self) -> &CoreStats {
        &self.state.stats
    }

    pub fn state(&self) -> &CoreState {
        &self.state
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn start(&mut self) {
        self.load_sender_id().await;

        if let (Some(_), Some(medium)) = (&self.state.discovery, &self.state.medium) {
            let mut records = medium.subscribe();
            let events = self.event_sender.clone();
            self.background.push(tokio::spawn(async move {
                loop {
                    match records.recv().await {
                        Ok(record) => {
                            if events.send(Event::Announcement(record)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("announcement listener skipped {} record(s)", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }));

            EventHandlers::announce_presence(&mut self.state).await;
            let period = self.state.config.membership.presence_interval();
            self.background
                .push(self.state.timers.every(period, TimerEvent::PresenceTick));
        }

        if self.state.config.membership.reconnect_enabled {
            let period = self.state.config.membership.reconnect_interval();
            self.background
                .push(self.state.timers.every(period, TimerEvent::ReconnectTick));
        }

        info!(
            "node {} ready (discovery: {})",
            self.state.sender_id,
            self.state.discovery.is_some()
        );
    }

    /// Use the persisted sender id, persisting the default on first start
    async fn load_sender_id(&mut self) {
        match self.state.storage.get_preference(SENDER_ID_KEY).await {
            Ok(Some(id)) if !id.trim().is_empty() => self.state.sender_id = id,
            Ok(_) => {
                if let Err(e) = self
                    .state
                    .storage
                    .set_preference(SENDER_ID_KEY, &self.state.sender_id)
                    .await
                {
                    warn!("could not persist sender id: {}", e);
                }
            }
            Err(e) => warn!("could not read sender id: {}", e),
        }
    }

    fn stop(&mut self) {
        for handle in self.background.drain(..) {
            handle.abort();
        }
        self.state.sessions.close_all();
        if let Some(count) = self.state.registry.close_all() {
            self.send_app_event(count);
        }
        self.running = false;
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    async fn process_command(&mut self, command: Command) -> MeshResult<()> {
        self.state.stats.commands_processed += 1;

        let app_events = match command {
            Command::StartInitiation => CommandHandlers::handle_start_initiation(&mut self.state)?,
            Command::ScanAnswer => CommandHandlers::handle_scan_answer(&mut self.state)?,
            Command::SubmitPeerSignal { text } => {
                CommandHandlers::handle_submit_peer_signal(&mut self.state, &text)?
            }
            Command::ResetHandshake => CommandHandlers::handle_reset(&mut self.state)?,
            Command::SendSos {
                text,
                is_auto_triggered,
                location,
                reply,
            } => {
                CommandHandlers::handle_send_sos(
                    &mut self.state,
                    text,
                    is_auto_triggered,
                    location,
                    reply,
                )
                .await?
            }
            Command::SendTest { reply } => {
                CommandHandlers::handle_send_test(&mut self.state, reply).await?
            }
            Command::GetSystemStatus => CommandHandlers::handle_get_system_status(&self.state)?,
            Command::Shutdown => {
                self.running = false;
                CommandHandlers::handle_shutdown(&mut self.state)?
            }
        };

        for app_event in app_events {
            self.send_app_event(app_event);
        }
        Ok(())
    }

    async fn process_event(&mut self, event: Event) -> MeshResult<()> {
        self.state.stats.events_processed += 1;

        let app_events = match event {
            Event::Link { key, event } => {
                EventHandlers::handle_link_event(&mut self.state, key, event).await?
            }
            Event::Announcement(record) => {
                EventHandlers::handle_announcement(&mut self.state, record).await?
            }
            Event::Timer(timer) => EventHandlers::handle_timer(&mut self.state, timer).await?,
        };

        for app_event in app_events {
            self.send_app_event(app_event);
        }
        Ok(())
    }

    /// Publish to UI subscribers; having none is not an error
    fn send_app_event(&mut self, app_event: AppEvent) {
        if self.state.publisher.publish(app_event) {
            self.state.stats.app_events_generated += 1;
        }
    }

    fn handle_error(&mut self, context: &str, e: MeshError) {
        if e.is_unrecoverable() {
            error!(
                "Unrecoverable error processing {}, shutting down CoreLogicTask: {}",
                context, e
            );
            self.running = false;
            return;
        }
        match e {
            MeshError::Storage(_) | MeshError::Transport(_) => {
                warn!("Error processing {}: {}", context, e)
            }
            _ => error!("Error processing {}: {}", context, e),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::state::AppEventPublisher;
    use crate::transports::MemoryLinkNetwork;
    use meshguard_core::channel::{
        create_app_event_channel, create_command_channel, create_event_channel,
    };
    use meshguard_core::task_logging::NoOpLogger;
    use crate::transports::MemoryAnnouncementBus;
    use meshguard_core::transport::{AnnouncementMedium, SharedAnnouncementMedium};
    use meshguard_core::{
        AnnouncementRecord, HandshakeState, MemoryStorage, MeshConfig, MeshStorage, PeerId,
    };
    use std::sync::Arc;

    fn task(storage: Arc<MemoryStorage>) -> (CoreLogicTask, meshguard_core::channel::CommandSender) {
        task_with_medium(storage, MeshConfig::testing(), None)
    }

    fn task_with_medium(
        storage: Arc<MemoryStorage>,
        config: MeshConfig,
        medium: Option<SharedAnnouncementMedium>,
    ) -> (CoreLogicTask, meshguard_core::channel::CommandSender) {
        let (commands, command_receiver) = create_command_channel(&config.channels);
        let (events, event_receiver) = create_event_channel(&config.channels);
        let (app_events, _) = create_app_event_channel(&config.channels);
        let logger = LoggerWrapper::NoOp(NoOpLogger);
        let state = CoreState::new(
            config,
            Arc::new(MemoryLinkNetwork::new()),
            events.clone(),
            AppEventPublisher::new(app_events, logger.clone()),
            storage,
            medium,
            PeerId::random_discovery(),
        );
        let task = CoreLogicTask::new(
            state,
            command_receiver,
            event_receiver,
            events,
            logger,
        );
        (task, commands)
    }

    #[tokio::test]
    async fn test_sender_id_is_persisted_on_first_start() {
        let storage = Arc::new(MemoryStorage::new());
        let (mut task, commands) = task(storage.clone());
        commands.send(Command::Shutdown).await.unwrap();
        task.run().await.unwrap();

        assert_eq!(
            storage.get_preference(SENDER_ID_KEY).await.unwrap().as_deref(),
            Some("local-user")
        );
        assert_eq!(task.stats().commands_processed, 1);
    }

    #[tokio::test]
    async fn test_stored_sender_id_wins() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_preference(SENDER_ID_KEY, "rescuer-7").await.unwrap();
        let (mut task, commands) = task(storage);
        commands.send(Command::Shutdown).await.unwrap();
        task.run().await.unwrap();
        assert_eq!(task.state().sender_id, "rescuer-7");
    }

    #[tokio::test]
    async fn test_loop_stops_when_commands_close() {
        let (mut task, commands) = task(Arc::new(MemoryStorage::new()));
        commands.send(Command::StartInitiation).await.unwrap();
        drop(commands);
        task.run().await.unwrap();

        // Stopping closes the pending initiator
        assert_eq!(task.state().sessions.len(), 0);
        assert_eq!(task.state().coordinator.state(), HandshakeState::Generating);
    }

    #[tokio::test]
    async fn test_spawned_task_announces_presence() {
        let bus = Arc::new(MemoryAnnouncementBus::new());
        let mut records = bus.subscribe();
        let mut config = MeshConfig::testing();
        config.membership.discovery_enabled = true;
        let medium: SharedAnnouncementMedium = bus.clone();
        let (mut task, commands) =
            task_with_medium(Arc::new(MemoryStorage::new()), config, Some(medium));

        // Must be spawnable on the multi-threaded runtime
        let handle = tokio::spawn(async move { task.run().await });

        match records.recv().await.unwrap() {
            AnnouncementRecord::Presence { sender } => {
                assert!(sender.as_str().starts_with(PeerId::DISCOVERY_PREFIX))
            }
            other => panic!("unexpected record {other:?}"),
        }

        commands.send(Command::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}
