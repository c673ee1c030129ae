//! Unit Tests for Pure Functions
//!
//! Drives two handshake coordinators against each other through the signal
//! codec, the way two phones pair by scanning each other's codes, and checks
//! the flooding and deduplication rules together.

use meshguard_core::protocol::{
    codec, FloodPolicy, HandshakeCoordinator, HandshakeEffect, HandshakeEvent, HandshakeState,
    SeenMessages, SessionDescription, Signal, SignalKind,
};
use meshguard_core::{HandshakeConfig, PeerId, SosMessage, SosStatus, Timestamp};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn description(kind: SignalKind, ufrag: &str) -> SessionDescription {
    let mut signal = Signal::degenerate(kind);
    signal.ice_ufrag = ufrag.to_string();
    signal.ice_pwd = "0123456789abcdefghijkl".to_string();
    signal.fingerprint = "AA:BB".to_string();
    signal
        .candidates
        .push("1 1 tcp 2113937151 127.0.0.1 40000 typ host IP4".to_string());
    signal.to_description_at(Timestamp::new(1_700_000_000_000))
}

fn find<T>(effects: &[HandshakeEffect], f: impl Fn(&HandshakeEffect) -> Option<T>) -> T {
    effects.iter().find_map(f).expect("expected effect missing")
}

// ----------------------------------------------------------------------------
// Manual Pairing
// ----------------------------------------------------------------------------

#[test]
fn test_two_coordinators_pair_through_codes() {
    let mut a = HandshakeCoordinator::new(HandshakeConfig::default());
    let mut b = HandshakeCoordinator::new(HandshakeConfig::default());

    // A shows an offer
    let t = a.handle(HandshakeEvent::StartInitiation).unwrap();
    let a_session = find(&t.effects, |e| match e {
        HandshakeEffect::CreateInitiator { peer_id } => Some(peer_id.clone()),
        _ => None,
    });
    let offer_text = codec::encode_description(&description(SignalKind::Offer, "aaaa")).unwrap();
    let t = a
        .handle(HandshakeEvent::LocalSignal {
            peer_id: a_session.clone(),
            kind: SignalKind::Offer,
            text: offer_text.clone(),
        })
        .unwrap();
    assert_eq!(a.state(), HandshakeState::AwaitingPeerScan);
    let shown = find(&t.effects, |e| match e {
        HandshakeEffect::DisplaySignal { text, .. } => Some(text.clone()),
        _ => None,
    });

    // B scans it and answers
    let scanned = codec::decode(&shown).unwrap();
    let t = b.handle(HandshakeEvent::PeerSignal(scanned)).unwrap();
    assert_eq!(b.state(), HandshakeState::ProcessingPeerOffer);
    let (b_session, offer_for_b) = find(&t.effects, |e| match e {
        HandshakeEffect::CreateResponder { peer_id, signal } => {
            Some((peer_id.clone(), signal.clone()))
        }
        _ => None,
    });
    assert_eq!(offer_for_b.ice_ufrag, "aaaa");

    let answer_text = codec::encode_description(&description(SignalKind::Answer, "bbbb")).unwrap();
    b.handle(HandshakeEvent::LocalSignal {
        peer_id: b_session.clone(),
        kind: SignalKind::Answer,
        text: answer_text.clone(),
    })
    .unwrap();
    assert_eq!(b.state(), HandshakeState::AwaitingInitiatorScan);

    // A scans the answer
    a.handle(HandshakeEvent::ScanAnswerRequested).unwrap();
    let t = a
        .handle(HandshakeEvent::PeerSignal(codec::decode(&answer_text).unwrap()))
        .unwrap();
    assert_eq!(a.state(), HandshakeState::Finalizing);
    let delivered_to = find(&t.effects, |e| match e {
        HandshakeEffect::DeliverAnswer { peer_id, .. } => Some(peer_id.clone()),
        _ => None,
    });
    assert_eq!(delivered_to, Some(a_session.clone()));

    // Both links come up
    let t = a
        .handle(HandshakeEvent::SessionConnected {
            peer_id: a_session.clone(),
        })
        .unwrap();
    assert!(t
        .effects
        .contains(&HandshakeEffect::ReportSuccess { peer_id: a_session }));
    let t = b
        .handle(HandshakeEvent::SessionConnected {
            peer_id: b_session.clone(),
        })
        .unwrap();
    assert!(t
        .effects
        .contains(&HandshakeEffect::ReportSuccess { peer_id: b_session }));
}

#[test]
fn test_rejections_leave_state_untouched() {
    let mut coordinator = HandshakeCoordinator::default();
    coordinator.handle(HandshakeEvent::StartInitiation).unwrap();
    let pending = coordinator.pending().cloned();

    let offer_text = codec::encode_description(&description(SignalKind::Offer, "zzzz")).unwrap();
    let offer = codec::decode(&offer_text).unwrap();
    let err = coordinator
        .handle(HandshakeEvent::PeerSignal(offer))
        .unwrap_err();
    assert_eq!(err.to_string(), "peer must scan your offer first");
    assert_eq!(coordinator.state(), HandshakeState::Generating);
    assert_eq!(coordinator.pending().cloned(), pending);
}

#[test]
fn test_degenerate_code_still_decodes() {
    let text = codec::encode(&Signal::degenerate(SignalKind::Offer)).unwrap();
    let signal = codec::decode(&text).unwrap();
    assert!(signal.is_degenerate());
    assert!(signal.to_description().is_degenerate());
}

// ----------------------------------------------------------------------------
// Flooding and Deduplication
// ----------------------------------------------------------------------------

#[test]
fn test_flood_chain_stops_at_hop_bound() {
    let policy = FloodPolicy::default();
    let mut message = SosMessage::new_local("help", "local-user", false, Timestamp::new(1));
    let mut relays = 0;

    // Each iteration is one device receiving the previous device's copy
    let mut wire = policy.outgoing_copy(&message);
    loop {
        let stored = policy.accepted(wire.clone());
        assert_eq!(stored.status, SosStatus::Received);
        if !policy.should_relay(&stored) {
            break;
        }
        relays += 1;
        wire = policy.relay_copy(&stored);
        message = stored;
    }

    assert_eq!(message.hops, 4);
    assert_eq!(wire.hops, 5);
    assert_eq!(relays, 4);
}

#[test]
fn test_dedup_is_keyed_by_id_only() {
    let mut seen = SeenMessages::default();
    let message = SosMessage::new_local("help", "local-user", false, Timestamp::new(1));
    let mut relayed = FloodPolicy::default().relay_copy(&message);
    relayed.text = "different body".into();

    assert!(!seen.check_and_add(&message.id));
    assert!(seen.check_and_add(&relayed.id));
    assert!(!seen.check_and_add(
        &SosMessage::new_local("help", "local-user", false, Timestamp::new(1)).id
    ));
}

#[test]
fn test_manual_ids_are_distinct_from_discovery_ids() {
    let manual = PeerId::random_manual();
    let discovery = PeerId::random_discovery();
    assert!(manual.is_manual());
    assert!(!discovery.is_manual());
}
