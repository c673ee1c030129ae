//! Runtime Builder API
//!
//! Provides a builder-style API for consumers (CLI/simulator/tests) to plug in
//! links, discovery, storage and positioning, and get back a handle for
//! commands and app events.

use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::info;

use meshguard_core::channel::{
    create_app_event_channel, create_command_channel, create_event_channel, AppEventReceiver,
    AppEventSender, CommandSender,
};
use meshguard_core::task_logging::{LogLevel, NoOpLogger, TracingLogger};
use meshguard_core::transport::{SharedAnnouncementMedium, SharedLinkFactory};
use meshguard_core::{
    acquire_location, Command, LocationProvider, MemoryStorage, MeshConfig, MeshError,
    MeshResult, MeshStorage, NoLocation, PeerId, SosMessage,
};

use crate::logic::{AppEventPublisher, CoreLogicTask, CoreState, LoggerWrapper};
use crate::transports::MemoryLinkNetwork;

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for a MeshGuard node
pub struct RuntimeBuilder {
    config: MeshConfig,
    link_factory: Option<SharedLinkFactory>,
    medium: Option<SharedAnnouncementMedium>,
    storage: Option<Arc<dyn MeshStorage>>,
    location: Option<Arc<dyn LocationProvider>>,
    discovery_id: Option<PeerId>,
    enable_logging: bool,
    log_level: LogLevel,
}

impl RuntimeBuilder {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            enable_logging: config.logging.task_logging,
            log_level: config.logging.level,
            config,
            link_factory: None,
            medium: None,
            storage: None,
            location: None,
            discovery_id: None,
        }
    }

    /// Set the factory that opens peer links (required)
    pub fn with_link_factory(mut self, factory: SharedLinkFactory) -> Self {
        self.link_factory = Some(factory);
        self
    }

    /// Join a local announcement medium for discovery
    pub fn with_announcement_medium(mut self, medium: SharedAnnouncementMedium) -> Self {
        self.medium = Some(medium);
        self
    }

    /// Persist through `storage` instead of memory
    pub fn with_storage(mut self, storage: Arc<dyn MeshStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_location(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = Some(location);
        self
    }

    /// Id announced on the discovery medium; random if unset
    pub fn with_discovery_id(mut self, id: PeerId) -> Self {
        self.discovery_id = Some(id);
        self
    }

    /// Configure console logging
    pub fn with_console_logging(mut self, level: LogLevel) -> Self {
        self.enable_logging = true;
        self.log_level = level;
        self
    }

    /// Disable logging
    pub fn with_no_logging(mut self) -> Self {
        self.enable_logging = false;
        self
    }

    /// Build and start the runtime
    pub async fn build_and_start(self) -> MeshResult<RuntimeHandle> {
        self.config.validate().map_err(MeshError::config_error)?;
        let factory = self
            .link_factory
            .ok_or_else(|| MeshError::config_error("a link factory is required"))?;

        let channel_config = self.config.channels.clone();
        let (command_sender, command_receiver) = create_command_channel(&channel_config);
        let (app_event_sender, _) = create_app_event_channel(&channel_config);
        let (event_sender, event_receiver) = create_event_channel(&channel_config);

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let discovery_id = self.discovery_id.unwrap_or_else(PeerId::random_discovery);
        let location_timeout = self.config.router.location_timeout();

        let logger = if self.enable_logging {
            LoggerWrapper::Tracing(TracingLogger::new(self.log_level))
        } else {
            LoggerWrapper::NoOp(NoOpLogger)
        };

        let state = CoreState::new(
            self.config,
            factory,
            event_sender.clone(),
            AppEventPublisher::new(app_event_sender.clone(), logger.clone()),
            storage.clone(),
            self.medium,
            discovery_id.clone(),
        );
        let peers = state.registry.watch();

        let mut task = CoreLogicTask::new(
            state,
            command_receiver,
            event_receiver,
            event_sender,
            logger,
        );
        let core_handle = tokio::spawn(async move { task.run().await });

        info!("MeshGuard runtime started (discovery id {})", discovery_id);

        Ok(RuntimeHandle {
            discovery_id,
            command_sender,
            app_event_sender,
            peers,
            storage,
            location: self.location.unwrap_or_else(|| Arc::new(NoLocation)),
            location_timeout,
            core_handle: Some(core_handle),
            running: true,
        })
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle to a running MeshGuard node
pub struct RuntimeHandle {
    discovery_id: PeerId,
    command_sender: CommandSender,
    app_event_sender: AppEventSender,
    peers: watch::Receiver<Vec<PeerId>>,
    storage: Arc<dyn MeshStorage>,
    location: Arc<dyn LocationProvider>,
    location_timeout: Duration,
    core_handle: Option<JoinHandle<MeshResult<()>>>,
    running: bool,
}

impl RuntimeHandle {
    /// Id this node announces on the discovery medium
    pub fn discovery_id(&self) -> &PeerId {
        &self.discovery_id
    }

    /// Receive every app event published from now on
    pub fn subscribe(&self) -> AppEventReceiver {
        self.app_event_sender.subscribe()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.borrow().len()
    }

    pub fn connected_peer_ids(&self) -> Vec<PeerId> {
        self.peers.borrow().clone()
    }

    /// Watch the connected peer set
    pub fn watch_peers(&self) -> watch::Receiver<Vec<PeerId>> {
        self.peers.clone()
    }

    /// Send a command to the runtime
    pub async fn send_command(&self, command: Command) -> MeshResult<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| MeshError::channel_error("Failed to send command to runtime"))
    }

    /// Show an offer code for another device to scan
    pub async fn start_initiation(&self) -> MeshResult<()> {
        self.send_command(Command::StartInitiation).await
    }

    /// Switch from showing the offer to scanning the answer
    pub async fn scan_answer(&self) -> MeshResult<()> {
        self.send_command(Command::ScanAnswer).await
    }

    /// Hand a scanned or pasted code to the handshake
    pub async fn submit_peer_signal(&self, text: impl Into<String>) -> MeshResult<()> {
        self.send_command(Command::SubmitPeerSignal { text: text.into() })
            .await
    }

    pub async fn reset(&self) -> MeshResult<()> {
        self.send_command(Command::ResetHandshake).await
    }

    /// Ask for a `SystemStatusReport` app event
    pub async fn request_status(&self) -> MeshResult<()> {
        self.send_command(Command::GetSystemStatus).await
    }

    /// Originate an SOS; the position is looked up before it enters the mesh
    pub async fn send(
        &self,
        text: impl Into<String>,
        is_auto_triggered: bool,
    ) -> MeshResult<SosMessage> {
        let location = acquire_location(self.location.as_ref(), self.location_timeout).await;
        let (reply, response) = oneshot::channel();
        self.send_command(Command::SendSos {
            text: text.into(),
            is_auto_triggered,
            location,
            reply: Some(reply),
        })
        .await?;
        response
            .await
            .map_err(|_| MeshError::channel_error("Core Logic task dropped the reply"))
    }

    /// Originate the diagnostic test message
    pub async fn send_test(&self) -> MeshResult<SosMessage> {
        let (reply, response) = oneshot::channel();
        self.send_command(Command::SendTest { reply: Some(reply) })
            .await?;
        response
            .await
            .map_err(|_| MeshError::channel_error("Core Logic task dropped the reply"))
    }

    /// Every stored message, newest first
    pub async fn messages(&self) -> MeshResult<Vec<SosMessage>> {
        Ok(self.storage.get_all_messages().await?)
    }

    /// Check if the runtime is still running
    pub fn is_running(&self) -> bool {
        self.running
            && self
                .core_handle
                .as_ref()
                .is_some_and(|h| !h.is_finished())
    }

    /// Wait for the runtime to complete
    pub async fn wait(&mut self) -> MeshResult<()> {
        if let Some(handle) = self.core_handle.take() {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(MeshError::channel_error(format!(
                    "Core Logic task panicked: {}",
                    e
                ))),
            }
        } else {
            Ok(())
        }
    }

    /// Shutdown the runtime gracefully
    pub async fn shutdown(&mut self) -> MeshResult<()> {
        info!("Shutting down MeshGuard runtime");

        let _ = self.send_command(Command::Shutdown).await;

        if let Some(handle) = self.core_handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
        }

        self.running = false;
        info!("MeshGuard runtime shut down");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Convenience Functions
// ----------------------------------------------------------------------------

/// Create a node on an in-process link network with test configuration
pub async fn create_test_runtime(network: &MemoryLinkNetwork) -> MeshResult<RuntimeHandle> {
    RuntimeBuilder::new(MeshConfig::testing())
        .with_link_factory(Arc::new(network.clone()))
        .with_no_logging()
        .build_and_start()
        .await
}

/// Create a node with console logging for CLI applications
pub async fn create_cli_runtime(
    config: MeshConfig,
    factory: SharedLinkFactory,
    medium: Option<SharedAnnouncementMedium>,
    storage: Arc<dyn MeshStorage>,
) -> MeshResult<RuntimeHandle> {
    let level = config.logging.level;
    let mut builder = RuntimeBuilder::new(config)
        .with_link_factory(factory)
        .with_storage(storage)
        .with_console_logging(level);
    if let Some(medium) = medium {
        builder = builder.with_announcement_medium(medium);
    }
    builder.build_and_start().await
}
