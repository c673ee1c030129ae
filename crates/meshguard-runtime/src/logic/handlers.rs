//! Core Logic Command and Event Handlers
//!
//! Contains all the command and event handling logic for the Core Logic task.
//! Handlers take the state by mutable reference and return the app events to
//! publish, in order.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use meshguard_core::protocol::codec;
use meshguard_core::protocol::LifecycleEvent;
use meshguard_core::{
    AnnouncementRecord, AppEvent, HandshakeEffect, HandshakeEvent, LinkEvent, Location, MeshError,
    MeshResult, SavedPeer, SessionDescription, SessionKey, SessionOrigin, SessionRole,
    SosMessage, SosStatus, SystemStatus, TimerEvent, Timestamp,
};

use super::state::{AppEventPublisher, CoreState, CoreStats};
use crate::managers::DiscoveryAction;

/// Text of the diagnostic message sent by `send_test`
pub const TEST_MESSAGE_TEXT: &str = "Test Message - Mesh Network Active";

// ----------------------------------------------------------------------------
// Command Handlers
// ----------------------------------------------------------------------------

/// Handlers for commands from the UI
pub struct CommandHandlers;

impl CommandHandlers {
    pub fn handle_start_initiation(state: &mut CoreState) -> MeshResult<Vec<AppEvent>> {
        Ok(drive_handshake(state, HandshakeEvent::StartInitiation))
    }

    pub fn handle_scan_answer(state: &mut CoreState) -> MeshResult<Vec<AppEvent>> {
        Ok(drive_handshake(state, HandshakeEvent::ScanAnswerRequested))
    }

    /// Decode a scanned or pasted code and hand it to the coordinator
    pub fn handle_submit_peer_signal(
        state: &mut CoreState,
        text: &str,
    ) -> MeshResult<Vec<AppEvent>> {
        match codec::decode(text) {
            Ok(signal) => Ok(drive_handshake(state, HandshakeEvent::PeerSignal(signal))),
            Err(e) => {
                debug!("rejected submitted code: {}", e);
                Ok(vec![AppEvent::PeerError {
                    message: MeshError::from(e).user_message(),
                }])
            }
        }
    }

    pub fn handle_reset(state: &mut CoreState) -> MeshResult<Vec<AppEvent>> {
        Ok(drive_handshake(state, HandshakeEvent::Reset))
    }

    pub async fn handle_send_sos(
        state: &mut CoreState,
        text: String,
        is_auto_triggered: bool,
        location: Option<Location>,
        reply: Option<oneshot::Sender<SosMessage>>,
    ) -> MeshResult<Vec<AppEvent>> {
        let message = SosMessage::new_local(
            text,
            state.sender_id.clone(),
            is_auto_triggered,
            Timestamp::now(),
        )
        .with_location(location);
        Ok(Self::originate(state, message, reply).await)
    }

    pub async fn handle_send_test(
        state: &mut CoreState,
        reply: Option<oneshot::Sender<SosMessage>>,
    ) -> MeshResult<Vec<AppEvent>> {
        let mut message = SosMessage::new_local(
            TEST_MESSAGE_TEXT,
            state.sender_id.clone(),
            false,
            Timestamp::now(),
        );
        message.status = SosStatus::Sent;
        Ok(Self::originate(state, message, reply).await)
    }

    pub fn handle_get_system_status(state: &CoreState) -> MeshResult<Vec<AppEvent>> {
        let dedup = state.router.seen().stats();
        let status = SystemStatus {
            sender_id: state.sender_id.clone(),
            discovery_id: state.discovery.as_ref().map(|d| d.me().clone()),
            connected_peers: state.registry.peer_ids(),
            handshake_state: Some(state.coordinator.state()),
            active_sessions: state.sessions.len() + state.registry.len(),
            messages_processed: dedup.messages_processed,
            duplicates_detected: state.router.stats().duplicates,
            reconnect_attempts: state.stats.reconnect_attempts,
            uptime_seconds: state.uptime_seconds(),
        };
        Ok(vec![AppEvent::SystemStatusReport(status)])
    }

    /// Close every session; the task stops after this
    pub fn handle_shutdown(state: &mut CoreState) -> MeshResult<Vec<AppEvent>> {
        state.sessions.close_all();
        Ok(state.registry.close_all().into_iter().collect())
    }

    async fn originate(
        state: &mut CoreState,
        message: SosMessage,
        reply: Option<oneshot::Sender<SosMessage>>,
    ) -> Vec<AppEvent> {
        let deliver = delivery(&state.publisher, &mut state.stats);
        let stored = state
            .router
            .originate(message, &mut state.registry, state.storage.as_ref(), deliver)
            .await;
        if let Some(reply) = reply {
            let _ = reply.send(stored);
        }
        Vec::new()
    }
}

// ----------------------------------------------------------------------------
// Event Handlers
// ----------------------------------------------------------------------------

/// Handlers for link, discovery and timer events
pub struct EventHandlers;

impl EventHandlers {
    pub async fn handle_link_event(
        state: &mut CoreState,
        key: SessionKey,
        event: LinkEvent,
    ) -> MeshResult<Vec<AppEvent>> {
        let app_events = match event {
            LinkEvent::Signal(description) => Self::on_local_signal(state, key, description).await,
            LinkEvent::Connected => Self::on_connected(state, key).await,
            LinkEvent::Data(frame) => Self::on_frame(state, key, frame).await,
            LinkEvent::Error(reason) => Self::on_link_down(state, key, Some(reason)),
            LinkEvent::Closed => Self::on_link_down(state, key, None),
        };
        Ok(app_events)
    }

    pub async fn handle_announcement(
        state: &mut CoreState,
        record: AnnouncementRecord,
    ) -> MeshResult<Vec<AppEvent>> {
        let Some(discovery) = state.discovery.as_mut() else {
            return Ok(Vec::new());
        };

        match discovery.on_record(record, &state.registry, &state.sessions) {
            DiscoveryAction::Ignore => {}
            DiscoveryAction::Initiate { peer } => {
                info!("discovered {}, dialling", peer);
                if let Err(e) = state.sessions.create(
                    peer.clone(),
                    SessionRole::Initiator,
                    SessionOrigin::Discovery,
                    None,
                ) {
                    warn!("could not dial discovered {}: {}", peer, e);
                }
            }
            DiscoveryAction::Respond { peer, offer } => {
                if let Err(e) = state.sessions.create(
                    peer.clone(),
                    SessionRole::Responder,
                    SessionOrigin::Discovery,
                    Some(offer),
                ) {
                    warn!("could not answer {}: {}", peer, e);
                }
            }
            DiscoveryAction::Forward { peer, description } => {
                if let Some(key) = state.sessions.key_of(&peer) {
                    let fed = state
                        .sessions
                        .get_mut(key)
                        .map(|session| session.feed_remote(description));
                    if let Some(Err(e)) = fed {
                        warn!("{} rejected description from {}: {}", key, peer, e);
                        state.sessions.close(key);
                        state.sessions.record_failure();
                    }
                } else if let Some(session) = state.registry.get_mut(&peer) {
                    if let Err(e) = session.feed_remote(description) {
                        debug!("connected {} ignored description: {}", peer, e);
                    }
                }
            }
        }
        Ok(Vec::new())
    }

    pub async fn handle_timer(
        state: &mut CoreState,
        timer: TimerEvent,
    ) -> MeshResult<Vec<AppEvent>> {
        let app_events = match timer {
            TimerEvent::SignalBatch { key } => Self::on_signal_batch(state, key),
            TimerEvent::HandshakeTimeout { epoch } => {
                drive_handshake(state, HandshakeEvent::Timeout { epoch })
            }
            TimerEvent::HandshakeSettled { epoch } => {
                drive_handshake(state, HandshakeEvent::SettleElapsed { epoch })
            }
            TimerEvent::AttemptExpired { key } => {
                Self::on_attempt_expired(state, key);
                Vec::new()
            }
            TimerEvent::ReconnectTick => {
                Self::on_reconnect_tick(state).await;
                Vec::new()
            }
            TimerEvent::PresenceTick => {
                Self::announce_presence(state).await;
                Vec::new()
            }
        };
        Ok(app_events)
    }

    /// Post a presence record if the node is on an announcement medium
    pub async fn announce_presence(state: &mut CoreState) {
        let (Some(discovery), Some(medium)) = (&state.discovery, state.medium.clone()) else {
            return;
        };
        let record = discovery.presence();
        if let Err(e) = medium.post(&record).await {
            warn!("could not announce presence: {}", e);
        }
    }

    // ------------------------------------------------------------------------
    // Link events
    // ------------------------------------------------------------------------

    async fn on_local_signal(
        state: &mut CoreState,
        key: SessionKey,
        description: SessionDescription,
    ) -> Vec<AppEvent> {
        let session = match state.sessions.get_mut(key) {
            Some(session) => session,
            None => match state.registry.session_mut(key) {
                Some(session) => session,
                None => {
                    debug!("local description from unknown {}", key);
                    return Vec::new();
                }
            },
        };
        if let Err(e) = session.apply(LifecycleEvent::LocalSignal) {
            debug!("{}: {}", key, e);
        }

        if session.origin() == SessionOrigin::Discovery {
            let peer = session.peer_id().clone();
            if let (Some(discovery), Some(medium)) = (&state.discovery, &state.medium) {
                let record = discovery.signal_to(&peer, description);
                if let Err(e) = medium.post(&record).await {
                    warn!("could not post description for {}: {}", peer, e);
                }
            }
        } else if session.buffer_local(description) {
            state.timers.arm(
                state.config.handshake.signal_batch(),
                TimerEvent::SignalBatch { key },
            );
        }
        Vec::new()
    }

    fn on_signal_batch(state: &mut CoreState, key: SessionKey) -> Vec<AppEvent> {
        let Some(session) = state.sessions.get_mut(key) else {
            return Vec::new();
        };
        let Some(description) = session.take_batched() else {
            return Vec::new();
        };
        if description.is_degenerate() {
            warn!("discarding empty local description from {}", key);
            return Vec::new();
        }

        match session.origin() {
            SessionOrigin::Manual => {
                let peer_id = session.peer_id().clone();
                match codec::encode_description(&description) {
                    Ok(text) => {
                        let event = HandshakeEvent::LocalSignal {
                            peer_id,
                            kind: description.kind,
                            text,
                        };
                        drive_handshake(state, event)
                    }
                    Err(e) => {
                        warn!("could not encode {} for {}: {}", description.kind, peer_id, e);
                        state.sessions.close(key);
                        state.sessions.record_failure();
                        let mut app_events = vec![AppEvent::PeerError {
                            message: MeshError::from(e).user_message(),
                        }];
                        app_events.extend(drive_handshake(
                            state,
                            HandshakeEvent::SessionFailed { peer_id },
                        ));
                        app_events
                    }
                }
            }
            origin => {
                debug!("{} {} gathered {}", origin, key, description.kind);
                Vec::new()
            }
        }
    }

    async fn on_connected(state: &mut CoreState, key: SessionKey) -> Vec<AppEvent> {
        let Some(session) = state.sessions.get_mut(key) else {
            debug!("link-up from unknown {}", key);
            return Vec::new();
        };
        if let Err(e) = session.apply(LifecycleEvent::LinkUp) {
            warn!("{} ignoring link-up: {}", key, e);
            return Vec::new();
        }
        let Some(session) = state.sessions.take(key) else {
            return Vec::new();
        };

        let peer_id = session.peer_id().clone();
        let origin = session.origin();
        let saved = match (session.role(), session.remote_signal()) {
            (SessionRole::Responder, Some(signal)) => Some(SavedPeer {
                id: peer_id.clone(),
                signal: signal.clone(),
                saved_at: Timestamp::now(),
            }),
            _ => None,
        };
        state.stats.sessions_connected += 1;
        info!("{} session {} connected to {}", origin, key, peer_id);

        let (count, replaced) = state.registry.register(session);
        if let Some(mut previous) = replaced {
            debug!("replacing earlier session {} for {}", previous.key(), peer_id);
            previous.close();
        }
        let mut app_events = vec![count];

        if let Some(peer) = saved {
            if let Err(e) = state.storage.save_peer(&peer).await {
                warn!("could not save peer {}: {}", peer.id, e);
            }
        }
        if origin == SessionOrigin::Reconnect {
            state.reconnect.finish(&peer_id, key);
        }

        app_events.extend(drive_handshake(
            state,
            HandshakeEvent::SessionConnected { peer_id },
        ));
        state
            .router
            .flush_queued(&mut state.registry, state.storage.as_ref())
            .await;
        app_events
    }

    async fn on_frame(state: &mut CoreState, key: SessionKey, frame: Vec<u8>) -> Vec<AppEvent> {
        let Some(peer) = state.registry.peer_for(key).cloned() else {
            debug!("frame from unregistered {}", key);
            return Vec::new();
        };
        let deliver = delivery(&state.publisher, &mut state.stats);
        state
            .router
            .receive(&frame, &peer, &mut state.registry, state.storage.as_ref(), deliver)
            .await;
        Vec::new()
    }

    /// Link failed or closed; `reason` is set for failures
    fn on_link_down(state: &mut CoreState, key: SessionKey, reason: Option<String>) -> Vec<AppEvent> {
        let mut app_events = Vec::new();
        let session = match state.sessions.take(key) {
            Some(session) => Some(session),
            None => match state.registry.peer_for(key).cloned() {
                Some(peer) => state.registry.deregister(&peer).map(|(session, count)| {
                    app_events.push(count);
                    session
                }),
                None => None,
            },
        };
        let Some(mut session) = session else {
            debug!("link down for unknown {}", key);
            return app_events;
        };

        let lifecycle_event = match &reason {
            Some(reason) => LifecycleEvent::LinkError {
                reason: reason.clone(),
            },
            None => LifecycleEvent::Close,
        };
        if let Err(e) = session.apply(lifecycle_event) {
            debug!("{}: {}", key, e);
        }
        session.close();

        let peer_id = session.peer_id().clone();
        match (session.origin(), reason) {
            (SessionOrigin::Reconnect, _) => {
                state.reconnect.finish(&peer_id, key);
                debug!("reconnect attempt to {} ended", peer_id);
            }
            (origin, Some(reason)) => {
                warn!("{} link to {} failed: {}", origin, peer_id, reason);
                state.sessions.record_failure();
                app_events.push(AppEvent::PeerError { message: reason });
            }
            (_, None) => info!("link to {} closed", peer_id),
        }

        app_events.extend(drive_handshake(
            state,
            HandshakeEvent::SessionFailed { peer_id },
        ));
        app_events
    }

    // ------------------------------------------------------------------------
    // Reconnection
    // ------------------------------------------------------------------------

    async fn on_reconnect_tick(state: &mut CoreState) {
        if !state.config.membership.reconnect_enabled || !state.registry.is_empty() {
            return;
        }
        let saved = match state.storage.get_all_saved_peers().await {
            Ok(saved) => saved,
            Err(e) => {
                debug!("could not load saved peers: {}", e);
                return;
            }
        };

        let due: Vec<SavedPeer> = state
            .reconnect
            .due(&saved, &state.registry, &state.sessions)
            .into_iter()
            .cloned()
            .collect();
        for peer in due {
            state.stats.reconnect_attempts += 1;
            match state.sessions.create(
                peer.id.clone(),
                SessionRole::Responder,
                SessionOrigin::Reconnect,
                Some(peer.signal.to_description()),
            ) {
                Ok(key) => {
                    debug!("replaying saved signal of {} on {}", peer.id, key);
                    state.reconnect.track(peer.id, key);
                    state.timers.arm(
                        state.config.membership.reconnect_attempt_timeout(),
                        TimerEvent::AttemptExpired { key },
                    );
                }
                Err(e) => debug!("reconnect to {} failed: {}", peer.id, e),
            }
        }
    }

    fn on_attempt_expired(state: &mut CoreState, key: SessionKey) {
        let Some(session) = state.sessions.get(key) else {
            return;
        };
        if session.is_connected() {
            return;
        }
        let peer_id = session.peer_id().clone();
        state.sessions.close(key);
        state.reconnect.finish(&peer_id, key);
        debug!("reconnect attempt {} to {} expired", key, peer_id);
    }
}

// ----------------------------------------------------------------------------
// Local Delivery
// ----------------------------------------------------------------------------

/// Publish a delivered message straight away, ahead of any link write
fn delivery<'a>(
    publisher: &'a AppEventPublisher,
    stats: &'a mut CoreStats,
) -> impl FnOnce(AppEvent) + 'a {
    move |app_event| {
        if publisher.publish(app_event) {
            stats.app_events_generated += 1;
        }
    }
}

// ----------------------------------------------------------------------------
// Handshake Driver
// ----------------------------------------------------------------------------

/// Feed an event to the coordinator and carry out its effects
///
/// Effects can produce follow-up events (a session that cannot be opened
/// counts as failed), which are processed in order before returning.
pub fn drive_handshake(state: &mut CoreState, event: HandshakeEvent) -> Vec<AppEvent> {
    let mut app_events = Vec::new();
    let mut pending = VecDeque::from([event]);

    while let Some(event) = pending.pop_front() {
        let transition = match state.coordinator.handle(event) {
            Ok(transition) => transition,
            Err(e) => {
                state.stats.handshake_rejections += 1;
                debug!("handshake rejected signal: {}", e);
                app_events.push(AppEvent::PeerError {
                    message: MeshError::from(e).user_message(),
                });
                continue;
            }
        };
        if transition.from != transition.to {
            state.stats.handshake_transitions += 1;
            debug!(
                "handshake {} -> {} on {}",
                transition.from, transition.to, transition.event
            );
        }

        for effect in transition.effects {
            if let Some(follow_up) = execute_effect(state, effect, &mut app_events) {
                pending.push_back(follow_up);
            }
        }
    }
    app_events
}

fn execute_effect(
    state: &mut CoreState,
    effect: HandshakeEffect,
    app_events: &mut Vec<AppEvent>,
) -> Option<HandshakeEvent> {
    match effect {
        HandshakeEffect::StateChanged { from, to } => {
            app_events.push(AppEvent::HandshakeStateChanged { from, to });
        }
        HandshakeEffect::CreateInitiator { peer_id } => {
            if let Err(e) = state.sessions.create(
                peer_id.clone(),
                SessionRole::Initiator,
                SessionOrigin::Manual,
                None,
            ) {
                warn!("could not open initiator {}: {}", peer_id, e);
                app_events.push(AppEvent::PeerError {
                    message: e.user_message(),
                });
                return Some(HandshakeEvent::SessionFailed { peer_id });
            }
        }
        HandshakeEffect::CreateResponder { peer_id, signal } => {
            if let Err(e) = state.sessions.create(
                peer_id.clone(),
                SessionRole::Responder,
                SessionOrigin::Manual,
                Some(signal.to_description()),
            ) {
                warn!("could not open responder {}: {}", peer_id, e);
                app_events.push(AppEvent::PeerError {
                    message: e.user_message(),
                });
                return Some(HandshakeEvent::SessionFailed { peer_id });
            }
        }
        HandshakeEffect::DeliverAnswer { peer_id, signal } => {
            let Some(peer_id) = peer_id else {
                warn!("answer scanned with no pending initiator");
                return None;
            };
            let Some(key) = state.sessions.key_of(&peer_id) else {
                warn!("pending initiator {} is gone", peer_id);
                return None;
            };
            let fed = state
                .sessions
                .get_mut(key)
                .map(|session| session.feed_remote(signal.to_description()));
            if let Some(Err(e)) = fed {
                warn!("initiator {} rejected answer: {}", peer_id, e);
                app_events.push(AppEvent::PeerError {
                    message: e.user_message(),
                });
                state.sessions.close(key);
                state.sessions.record_failure();
                return Some(HandshakeEvent::SessionFailed { peer_id });
            }
        }
        HandshakeEffect::CloseSession { peer_id } => {
            if let Some(key) = state.sessions.key_of(&peer_id) {
                debug!("closing abandoned session {} for {}", key, peer_id);
                state.sessions.close(key);
            }
        }
        HandshakeEffect::DisplaySignal { kind, text } => {
            app_events.push(AppEvent::SignalReady { kind, text });
        }
        HandshakeEffect::ClearDisplay => app_events.push(AppEvent::DisplayCleared),
        HandshakeEffect::StopScanning => app_events.push(AppEvent::StopScanning),
        HandshakeEffect::ArmTimeout { epoch, after } => {
            state
                .timers
                .arm(after, TimerEvent::HandshakeTimeout { epoch });
        }
        HandshakeEffect::ArmSettle { epoch, after } => {
            state
                .timers
                .arm(after, TimerEvent::HandshakeSettled { epoch });
        }
        HandshakeEffect::ReportError { message } => {
            app_events.push(AppEvent::PeerError { message });
        }
        HandshakeEffect::ReportSuccess { peer_id } => {
            info!("paired with {}", peer_id);
            app_events.push(AppEvent::HandshakeSucceeded { peer_id });
        }
    }
    None
}
