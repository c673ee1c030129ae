//! Handshake Coordinator State Machine
//!
//! Sequences one out-of-band pairing at a time. The coordinator is pure: it
//! consumes [`HandshakeEvent`]s and answers with the [`HandshakeEffect`]s the
//! runtime must carry out (create or close sessions, arm timers, surface codes
//! and errors). It never touches a link itself.

use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::config::HandshakeConfig;
use crate::errors::SequenceError;
use crate::protocol::signal::{Signal, SignalKind};
use crate::types::PeerId;

// ----------------------------------------------------------------------------
// Handshake State
// ----------------------------------------------------------------------------

/// Phase of the single in-flight handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeState {
    /// Nothing in flight
    Idle,
    /// Initiator session is gathering its offer
    Generating,
    /// Our offer is on display, waiting for the peer to scan it
    AwaitingPeerScan,
    /// We are scanning for the peer's answer
    AwaitingAnswer,
    /// Responder session is answering a scanned offer
    ProcessingPeerOffer,
    /// Our answer is on display, waiting for the initiator to scan it
    AwaitingInitiatorScan,
    /// Answer delivered, waiting for link-up
    Finalizing,
}

impl HandshakeState {
    pub fn accepts_offer(&self) -> bool {
        matches!(
            self,
            HandshakeState::Idle
                | HandshakeState::ProcessingPeerOffer
                | HandshakeState::AwaitingInitiatorScan
        )
    }

    pub fn accepts_answer(&self) -> bool {
        matches!(
            self,
            HandshakeState::AwaitingAnswer | HandshakeState::AwaitingPeerScan | HandshakeState::Idle
        )
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Idle => "Idle",
            HandshakeState::Generating => "Generating",
            HandshakeState::AwaitingPeerScan => "AwaitingPeerScan",
            HandshakeState::AwaitingAnswer => "AwaitingAnswer",
            HandshakeState::ProcessingPeerOffer => "ProcessingPeerOffer",
            HandshakeState::AwaitingInitiatorScan => "AwaitingInitiatorScan",
            HandshakeState::Finalizing => "Finalizing",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Events and Effects
// ----------------------------------------------------------------------------

/// Inputs to the coordinator
#[derive(Debug, Clone)]
pub enum HandshakeEvent {
    /// User asked to show an offer code
    StartInitiation,
    /// User switched from showing the offer to scanning the answer
    ScanAnswerRequested,
    /// A session finished gathering and produced an encoded signal
    LocalSignal {
        peer_id: PeerId,
        kind: SignalKind,
        text: String,
    },
    /// A code supplied by the user decoded to this signal
    PeerSignal(Signal),
    /// A session reported link-up
    SessionConnected { peer_id: PeerId },
    /// A session failed or closed before link-up
    SessionFailed { peer_id: PeerId },
    /// Finalizing timer fired
    Timeout { epoch: u64 },
    /// Post-success settle timer fired
    SettleElapsed { epoch: u64 },
    /// User abandoned the handshake
    Reset,
}

impl HandshakeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeEvent::StartInitiation => "StartInitiation",
            HandshakeEvent::ScanAnswerRequested => "ScanAnswerRequested",
            HandshakeEvent::LocalSignal { .. } => "LocalSignal",
            HandshakeEvent::PeerSignal(_) => "PeerSignal",
            HandshakeEvent::SessionConnected { .. } => "SessionConnected",
            HandshakeEvent::SessionFailed { .. } => "SessionFailed",
            HandshakeEvent::Timeout { .. } => "Timeout",
            HandshakeEvent::SettleElapsed { .. } => "SettleElapsed",
            HandshakeEvent::Reset => "Reset",
        }
    }
}

/// Work the runtime performs on behalf of the coordinator, in order
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeEffect {
    StateChanged {
        from: HandshakeState,
        to: HandshakeState,
    },
    CreateInitiator {
        peer_id: PeerId,
    },
    CreateResponder {
        peer_id: PeerId,
        signal: Signal,
    },
    /// Hand the answer to the pending initiator, if there is one
    DeliverAnswer {
        peer_id: Option<PeerId>,
        signal: Signal,
    },
    CloseSession {
        peer_id: PeerId,
    },
    DisplaySignal {
        kind: SignalKind,
        text: String,
    },
    ClearDisplay,
    StopScanning,
    ArmTimeout {
        epoch: u64,
        after: Duration,
    },
    ArmSettle {
        epoch: u64,
        after: Duration,
    },
    ReportError {
        message: String,
    },
    ReportSuccess {
        peer_id: PeerId,
    },
}

/// Result of feeding one event to the coordinator
#[derive(Debug, Clone)]
pub struct HandshakeTransition {
    pub event: &'static str,
    pub from: HandshakeState,
    pub to: HandshakeState,
    pub effects: Vec<HandshakeEffect>,
}

impl HandshakeTransition {
    pub fn is_noop(&self) -> bool {
        self.effects.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Coordinator
// ----------------------------------------------------------------------------

/// The process-wide handshake state machine
#[derive(Debug, Clone)]
pub struct HandshakeCoordinator {
    state: HandshakeState,
    /// Session created by the coordinator and not yet handed to the registry
    pending: Option<PeerId>,
    /// Pending session that reached link-up; kept only until the settle reset
    connected: Option<PeerId>,
    /// Generation counter; timers from older generations are ignored
    epoch: u64,
    config: HandshakeConfig,
}

impl HandshakeCoordinator {
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            state: HandshakeState::Idle,
            pending: None,
            connected: None,
            epoch: 0,
            config,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn pending(&self) -> Option<&PeerId> {
        self.pending.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether `peer_id` is the session this handshake is driving
    pub fn is_pending(&self, peer_id: &PeerId) -> bool {
        self.pending.as_ref() == Some(peer_id)
    }

    /// Process an event; a rejected signal leaves the coordinator untouched
    pub fn handle(&mut self, event: HandshakeEvent) -> Result<HandshakeTransition, SequenceError> {
        let from = self.state;
        let name = event.name();
        let mut effects = Vec::new();

        match event {
            HandshakeEvent::StartInitiation => {
                self.reset_into(&mut effects);
                let peer_id = PeerId::random_manual();
                self.pending = Some(peer_id.clone());
                self.state = HandshakeState::Generating;
                effects.push(HandshakeEffect::CreateInitiator { peer_id });
            }

            HandshakeEvent::ScanAnswerRequested => {
                if self.state == HandshakeState::AwaitingPeerScan {
                    self.state = HandshakeState::AwaitingAnswer;
                }
            }

            HandshakeEvent::LocalSignal {
                peer_id,
                kind,
                text,
            } => {
                if self.is_pending(&peer_id) {
                    match (self.state, kind) {
                        (HandshakeState::Generating, SignalKind::Offer) => {
                            self.state = HandshakeState::AwaitingPeerScan;
                            effects.push(HandshakeEffect::DisplaySignal { kind, text });
                        }
                        (HandshakeState::ProcessingPeerOffer, SignalKind::Answer) => {
                            self.state = HandshakeState::AwaitingInitiatorScan;
                            effects.push(HandshakeEffect::DisplaySignal { kind, text });
                        }
                        _ => {}
                    }
                }
            }

            HandshakeEvent::PeerSignal(signal) => match signal.kind {
                SignalKind::Offer => {
                    if !self.state.accepts_offer() {
                        return Err(SequenceError::OfferRejected {
                            state: self.state.to_string(),
                        });
                    }
                    effects.push(HandshakeEffect::StopScanning);
                    if let Some(previous) = self.pending.take() {
                        effects.push(HandshakeEffect::CloseSession { peer_id: previous });
                    }
                    let peer_id = PeerId::random_manual();
                    self.pending = Some(peer_id.clone());
                    self.connected = None;
                    self.state = HandshakeState::ProcessingPeerOffer;
                    effects.push(HandshakeEffect::CreateResponder { peer_id, signal });
                }
                SignalKind::Answer => {
                    if !self.state.accepts_answer() {
                        return Err(SequenceError::AnswerRejected {
                            state: self.state.to_string(),
                        });
                    }
                    self.state = HandshakeState::Finalizing;
                    effects.push(HandshakeEffect::StopScanning);
                    effects.push(HandshakeEffect::DeliverAnswer {
                        peer_id: self.pending.clone(),
                        signal,
                    });
                    effects.push(HandshakeEffect::ArmTimeout {
                        epoch: self.epoch,
                        after: self.config.handshake_timeout(),
                    });
                }
            },

            HandshakeEvent::SessionConnected { peer_id } => {
                if self.is_pending(&peer_id) {
                    // Ownership moves to the registry; reset must not close it
                    self.pending = None;
                    self.connected = Some(peer_id.clone());
                    effects.push(HandshakeEffect::ReportSuccess { peer_id });
                    effects.push(HandshakeEffect::ArmSettle {
                        epoch: self.epoch,
                        after: self.config.settle_delay(),
                    });
                }
            }

            HandshakeEvent::SessionFailed { peer_id } => {
                if self.is_pending(&peer_id) {
                    self.pending = None;
                    self.reset_into(&mut effects);
                }
            }

            HandshakeEvent::Timeout { epoch } => {
                if epoch == self.epoch
                    && self.state == HandshakeState::Finalizing
                    && self.connected.is_none()
                {
                    self.reset_into(&mut effects);
                    effects.push(HandshakeEffect::ReportError {
                        message: "connection timeout".to_string(),
                    });
                }
            }

            HandshakeEvent::SettleElapsed { epoch } => {
                if epoch == self.epoch && self.connected.is_some() {
                    self.reset_into(&mut effects);
                }
            }

            HandshakeEvent::Reset => {
                self.reset_into(&mut effects);
            }
        }

        let to = self.state;
        if from != to {
            effects.insert(0, HandshakeEffect::StateChanged { from, to });
        }

        Ok(HandshakeTransition {
            event: name,
            from,
            to,
            effects,
        })
    }

    fn reset_into(&mut self, effects: &mut Vec<HandshakeEffect>) {
        if let Some(peer_id) = self.pending.take() {
            effects.push(HandshakeEffect::CloseSession { peer_id });
        }
        self.connected = None;
        self.epoch += 1;
        self.state = HandshakeState::Idle;
        effects.push(HandshakeEffect::StopScanning);
        effects.push(HandshakeEffect::ClearDisplay);
    }
}

impl Default for HandshakeCoordinator {
    fn default() -> Self {
        Self::new(HandshakeConfig::default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> Signal {
        let mut signal = Signal::degenerate(SignalKind::Offer);
        signal.ice_ufrag = "uf".into();
        signal
    }

    fn answer() -> Signal {
        let mut signal = Signal::degenerate(SignalKind::Answer);
        signal.ice_ufrag = "uf".into();
        signal
    }

    fn created_initiator(transition: &HandshakeTransition) -> PeerId {
        transition
            .effects
            .iter()
            .find_map(|e| match e {
                HandshakeEffect::CreateInitiator { peer_id } => Some(peer_id.clone()),
                _ => None,
            })
            .expect("initiator created")
    }

    /// Start an initiation and let its offer reach the display
    fn offer_shown(coordinator: &mut HandshakeCoordinator) -> PeerId {
        let peer_id = created_initiator(&coordinator.handle(HandshakeEvent::StartInitiation).unwrap());
        coordinator
            .handle(HandshakeEvent::LocalSignal {
                peer_id: peer_id.clone(),
                kind: SignalKind::Offer,
                text: "code".into(),
            })
            .unwrap();
        assert_eq!(coordinator.state(), HandshakeState::AwaitingPeerScan);
        peer_id
    }

    #[test]
    fn test_start_initiation_creates_manual_initiator() {
        let mut coordinator = HandshakeCoordinator::default();
        let transition = coordinator.handle(HandshakeEvent::StartInitiation).unwrap();

        assert_eq!(coordinator.state(), HandshakeState::Generating);
        let peer_id = created_initiator(&transition);
        assert!(peer_id.is_manual());
        assert!(coordinator.is_pending(&peer_id));
        assert_eq!(
            transition.effects[0],
            HandshakeEffect::StateChanged {
                from: HandshakeState::Idle,
                to: HandshakeState::Generating
            }
        );
    }

    #[test]
    fn test_offer_displayed_only_while_generating() {
        let mut coordinator = HandshakeCoordinator::default();
        let peer_id = created_initiator(&coordinator.handle(HandshakeEvent::StartInitiation).unwrap());

        // Signals from unrelated sessions are ignored
        let stray = coordinator
            .handle(HandshakeEvent::LocalSignal {
                peer_id: PeerId::from("qr-other"),
                kind: SignalKind::Offer,
                text: "x".into(),
            })
            .unwrap();
        assert!(stray.is_noop());

        let transition = coordinator
            .handle(HandshakeEvent::LocalSignal {
                peer_id,
                kind: SignalKind::Offer,
                text: "code".into(),
            })
            .unwrap();
        assert_eq!(coordinator.state(), HandshakeState::AwaitingPeerScan);
        assert!(transition.effects.contains(&HandshakeEffect::DisplaySignal {
            kind: SignalKind::Offer,
            text: "code".into()
        }));
    }

    #[test]
    fn test_second_start_closes_previous_pending_session() {
        let mut coordinator = HandshakeCoordinator::default();
        let first = created_initiator(&coordinator.handle(HandshakeEvent::StartInitiation).unwrap());
        let transition = coordinator.handle(HandshakeEvent::StartInitiation).unwrap();
        let second = created_initiator(&transition);

        assert_ne!(first, second);
        assert!(transition
            .effects
            .contains(&HandshakeEffect::CloseSession { peer_id: first }));
        assert!(coordinator.is_pending(&second));
    }

    #[test]
    fn test_offer_in_finalizing_is_rejected() {
        let mut coordinator = HandshakeCoordinator::default();
        coordinator.handle(HandshakeEvent::PeerSignal(answer())).unwrap();
        assert_eq!(coordinator.state(), HandshakeState::Finalizing);
        let epoch = coordinator.epoch();

        let err = coordinator
            .handle(HandshakeEvent::PeerSignal(offer()))
            .unwrap_err();
        assert_eq!(err.to_string(), "peer must scan your offer first");
        assert_eq!(coordinator.state(), HandshakeState::Finalizing);
        assert_eq!(coordinator.epoch(), epoch);
    }

    #[test]
    fn test_answer_in_idle_moves_to_finalizing() {
        let mut coordinator = HandshakeCoordinator::default();
        let transition = coordinator.handle(HandshakeEvent::PeerSignal(answer())).unwrap();

        assert_eq!(coordinator.state(), HandshakeState::Finalizing);
        assert!(transition.effects.iter().any(|e| matches!(
            e,
            HandshakeEffect::DeliverAnswer { peer_id: None, .. }
        )));
        assert!(transition.effects.contains(&HandshakeEffect::ArmTimeout {
            epoch: 0,
            after: Duration::from_secs(30)
        }));
    }

    #[test]
    fn test_answer_rejected_while_generating() {
        let mut coordinator = HandshakeCoordinator::default();
        coordinator.handle(HandshakeEvent::StartInitiation).unwrap();
        let err = coordinator
            .handle(HandshakeEvent::PeerSignal(answer()))
            .unwrap_err();
        assert_eq!(err.to_string(), "scan the initiator code first");
        assert_eq!(coordinator.state(), HandshakeState::Generating);
    }

    #[test]
    fn test_offer_replaces_pending_responder() {
        let mut coordinator = HandshakeCoordinator::default();
        coordinator.handle(HandshakeEvent::PeerSignal(offer())).unwrap();
        assert_eq!(coordinator.state(), HandshakeState::ProcessingPeerOffer);
        let first = coordinator.pending().cloned().unwrap();

        let transition = coordinator.handle(HandshakeEvent::PeerSignal(offer())).unwrap();
        assert!(transition
            .effects
            .contains(&HandshakeEffect::CloseSession { peer_id: first.clone() }));
        assert_ne!(coordinator.pending(), Some(&first));
    }

    #[test]
    fn test_timeout_resets_and_reports() {
        let mut coordinator = HandshakeCoordinator::default();
        let peer_id = offer_shown(&mut coordinator);
        let epoch = coordinator.epoch();
        coordinator.handle(HandshakeEvent::PeerSignal(answer())).unwrap();
        assert_eq!(coordinator.state(), HandshakeState::Finalizing);

        // A timer from an older generation does nothing
        let stale = coordinator
            .handle(HandshakeEvent::Timeout { epoch: epoch - 1 })
            .unwrap();
        assert!(stale.is_noop());

        let transition = coordinator.handle(HandshakeEvent::Timeout { epoch }).unwrap();
        assert_eq!(coordinator.state(), HandshakeState::Idle);
        assert!(transition.effects.contains(&HandshakeEffect::ReportError {
            message: "connection timeout".into()
        }));
        assert!(transition
            .effects
            .contains(&HandshakeEffect::CloseSession { peer_id }));
        assert!(coordinator.pending().is_none());
        assert_eq!(coordinator.epoch(), epoch + 1);
    }

    #[test]
    fn test_success_then_settle_reset_keeps_session_open() {
        let mut coordinator = HandshakeCoordinator::default();
        let peer_id = offer_shown(&mut coordinator);
        coordinator.handle(HandshakeEvent::PeerSignal(answer())).unwrap();
        assert_eq!(coordinator.state(), HandshakeState::Finalizing);
        let epoch = coordinator.epoch();

        let transition = coordinator
            .handle(HandshakeEvent::SessionConnected {
                peer_id: peer_id.clone(),
            })
            .unwrap();
        assert!(transition.effects.contains(&HandshakeEffect::ReportSuccess {
            peer_id: peer_id.clone()
        }));

        // Timeout after success is ignored
        assert!(coordinator
            .handle(HandshakeEvent::Timeout { epoch })
            .unwrap()
            .is_noop());

        let settle = coordinator
            .handle(HandshakeEvent::SettleElapsed { epoch })
            .unwrap();
        assert_eq!(coordinator.state(), HandshakeState::Idle);
        assert!(!settle
            .effects
            .iter()
            .any(|e| matches!(e, HandshakeEffect::CloseSession { .. })));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut coordinator = HandshakeCoordinator::default();
        coordinator.handle(HandshakeEvent::StartInitiation).unwrap();
        let first = coordinator.handle(HandshakeEvent::Reset).unwrap();
        assert!(first
            .effects
            .iter()
            .any(|e| matches!(e, HandshakeEffect::CloseSession { .. })));

        let second = coordinator.handle(HandshakeEvent::Reset).unwrap();
        assert_eq!(coordinator.state(), HandshakeState::Idle);
        assert_eq!(
            second.effects,
            vec![HandshakeEffect::StopScanning, HandshakeEffect::ClearDisplay]
        );
    }

    #[test]
    fn test_scan_answer_request() {
        let mut coordinator = HandshakeCoordinator::default();
        offer_shown(&mut coordinator);
        coordinator.handle(HandshakeEvent::ScanAnswerRequested).unwrap();
        assert_eq!(coordinator.state(), HandshakeState::AwaitingAnswer);
        coordinator.handle(HandshakeEvent::PeerSignal(answer())).unwrap();
        assert_eq!(coordinator.state(), HandshakeState::Finalizing);
    }

    #[test]
    fn test_pending_failure_resets() {
        let mut coordinator = HandshakeCoordinator::default();
        coordinator.handle(HandshakeEvent::PeerSignal(offer())).unwrap();
        let peer_id = coordinator.pending().cloned().unwrap();
        let transition = coordinator
            .handle(HandshakeEvent::SessionFailed { peer_id })
            .unwrap();
        assert_eq!(coordinator.state(), HandshakeState::Idle);
        assert!(!transition
            .effects
            .iter()
            .any(|e| matches!(e, HandshakeEffect::CloseSession { .. })));
    }
}
