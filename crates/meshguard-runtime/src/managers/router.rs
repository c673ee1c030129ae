//! Flooding router for the MeshGuard runtime
//!
//! Applies the [`FloodPolicy`] to messages originated locally or received
//! from a link: deduplicate by id, persist, surface to the UI, and write the
//! hop-incremented copy to the connected sessions.

use meshguard_core::protocol::{BroadcastReport, FloodPolicy, SeenMessages};
use meshguard_core::{AppEvent, MeshStorage, PeerId, RouterConfig, SosMessage, SosStatus};

use super::registry::MeshRegistry;

// ----------------------------------------------------------------------------
// Flooding Router
// ----------------------------------------------------------------------------

/// Dedup cache plus the flood rules
#[derive(Debug)]
pub struct FloodingRouter {
    policy: FloodPolicy,
    seen: SeenMessages,
    stats: RouterStats,
}

impl FloodingRouter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            policy: FloodPolicy::new(config.max_hops),
            seen: SeenMessages::new(config.dedup_capacity),
            stats: RouterStats::default(),
        }
    }

    pub fn policy(&self) -> &FloodPolicy {
        &self.policy
    }

    pub fn seen(&self) -> &SeenMessages {
        &self.seen
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Persist, deliver and flood a locally created message
    ///
    /// `deliver` receives the local delivery event before any frame is
    /// written. Returns the message as stored after the broadcast.
    pub async fn originate(
        &mut self,
        mut message: SosMessage,
        registry: &mut MeshRegistry,
        storage: &dyn MeshStorage,
        deliver: impl FnOnce(AppEvent),
    ) -> SosMessage {
        self.seen.insert(message.id.clone());
        self.stats.originated += 1;
        self.persist(storage, &message).await;
        deliver(AppEvent::MessageDelivered {
            message: message.clone(),
        });

        let report = self.broadcast(&message, &[], registry);
        if report.any_delivered() && message.status == SosStatus::Queued {
            message.status = SosStatus::Sent;
            self.promote(storage, &message).await;
        }
        tracing::info!(
            "originated {} to {} peer(s), {} failed",
            message.id,
            report.delivered.len(),
            report.failed.len()
        );

        message
    }

    /// Handle one frame from `from`
    ///
    /// A new message is handed to `deliver` before it is relayed; returns
    /// whether the message was new.
    pub async fn receive(
        &mut self,
        raw: &[u8],
        from: &PeerId,
        registry: &mut MeshRegistry,
        storage: &dyn MeshStorage,
        deliver: impl FnOnce(AppEvent),
    ) -> bool {
        let incoming = match SosMessage::from_wire(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("dropping unparsable frame from {}: {}", from, e);
                self.stats.undecodable += 1;
                return false;
            }
        };

        if self.seen.check_and_add(&incoming.id) {
            tracing::debug!("duplicate {} from {}", incoming.id, from);
            self.stats.duplicates += 1;
            return false;
        }
        match storage.get_message(&incoming.id).await {
            Ok(Some(_)) => {
                tracing::debug!("{} already stored, dropping", incoming.id);
                self.stats.duplicates += 1;
                return false;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("storage lookup for {} failed: {}", incoming.id, e),
        }

        let message = self.policy.accepted(incoming);
        self.stats.received += 1;
        self.persist(storage, &message).await;

        let relay = self
            .policy
            .should_relay(&message)
            .then(|| self.policy.relay_copy(&message));
        if relay.is_none() {
            tracing::debug!("{} reached hop bound {}", message.id, message.hops);
        }
        deliver(AppEvent::MessageDelivered { message });

        if let Some(copy) = relay {
            let report = self.write(&copy, &[from.clone()], registry);
            self.stats.relayed += report.delivered.len() as u64;
            tracing::debug!(
                "relayed {} at hops {} to {} peer(s)",
                copy.id,
                copy.hops,
                report.delivered.len()
            );
        }
        true
    }

    /// Write the hop-incremented copy of `message` to every connected peer
    /// not in `exclude`
    pub fn broadcast(
        &mut self,
        message: &SosMessage,
        exclude: &[PeerId],
        registry: &mut MeshRegistry,
    ) -> BroadcastReport {
        let copy = self.policy.outgoing_copy(message);
        self.write(&copy, exclude, registry)
    }

    /// Broadcast every stored Queued message and promote the ones that left
    pub async fn flush_queued(
        &mut self,
        registry: &mut MeshRegistry,
        storage: &dyn MeshStorage,
    ) -> usize {
        let queued = match storage.get_queued_messages().await {
            Ok(queued) => queued,
            Err(e) => {
                tracing::warn!("could not read queued messages: {}", e);
                return 0;
            }
        };

        let mut flushed = 0;
        for mut message in queued {
            self.seen.insert(message.id.clone());
            if self.broadcast(&message, &[], registry).any_delivered() {
                message.status = SosStatus::Sent;
                self.promote(storage, &message).await;
                flushed += 1;
            }
        }
        if flushed > 0 {
            tracing::info!("flushed {} queued message(s)", flushed);
        }
        flushed
    }

    fn write(
        &mut self,
        copy: &SosMessage,
        exclude: &[PeerId],
        registry: &mut MeshRegistry,
    ) -> BroadcastReport {
        let frame = match copy.to_wire() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("could not encode {}: {}", copy.id, e);
                return BroadcastReport::default();
            }
        };
        let report = registry.broadcast(&frame, exclude);
        self.stats.send_failures += report.failed.len() as u64;
        report
    }

    async fn persist(&mut self, storage: &dyn MeshStorage, message: &SosMessage) {
        if let Err(e) = storage.save_message(message).await {
            tracing::warn!("could not persist {}: {}", message.id, e);
            self.stats.persist_failures += 1;
        }
    }

    async fn promote(&mut self, storage: &dyn MeshStorage, message: &SosMessage) {
        if let Err(e) = storage
            .update_message_status(&message.id, message.status)
            .await
        {
            tracing::warn!("could not update status of {}: {}", message.id, e);
            self.stats.persist_failures += 1;
        }
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Statistics for the flooding router
#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    pub originated: u64,
    pub received: u64,
    pub duplicates: u64,
    pub relayed: u64,
    pub undecodable: u64,
    pub send_failures: u64,
    pub persist_failures: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
