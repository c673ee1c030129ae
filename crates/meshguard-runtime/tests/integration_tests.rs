//! Integration tests for MeshGuard nodes on the in-process link network
//!
//! Every test runs on a paused clock, so signal batching, handshake timeouts
//! and presence ticks elapse as soon as the nodes go idle.

use std::sync::Arc;

use meshguard_core::channel::AppEventReceiver;
use meshguard_core::{
    AppEvent, HandshakeState, MemoryStorage, MeshConfig, MeshMembershipConfig, MeshStorage, PeerId,
    RouterConfig, SignalKind, SosStatus, SystemStatus,
};
use meshguard_runtime::{
    create_test_runtime, MemoryAnnouncementBus, MemoryLinkNetwork, RuntimeBuilder, RuntimeHandle,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, timeout, Duration};

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Wait for the first app event `pick` accepts
async fn expect_event<T>(
    events: &mut AppEventReceiver,
    mut pick: impl FnMut(AppEvent) -> Option<T>,
) -> T {
    timeout(Duration::from_secs(120), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(value) = pick(event) {
                        return value;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("app event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for app event")
}

fn code_of(kind: SignalKind) -> impl FnMut(AppEvent) -> Option<String> {
    move |event| match event {
        AppEvent::SignalReady { kind: k, text } if k == kind => Some(text),
        _ => None,
    }
}

fn returned_to_idle(event: AppEvent) -> Option<()> {
    matches!(
        event,
        AppEvent::HandshakeStateChanged {
            to: HandshakeState::Idle,
            ..
        }
    )
    .then_some(())
}

fn delivered(event: AppEvent) -> Option<meshguard_core::SosMessage> {
    match event {
        AppEvent::MessageDelivered { message } => Some(message),
        _ => None,
    }
}

/// Pair `initiator` with `responder` by exchanging codes, and wait until both
/// handshakes have settled back to Idle
async fn pair(initiator: &RuntimeHandle, responder: &RuntimeHandle) {
    let mut initiator_events = initiator.subscribe();
    let mut responder_events = responder.subscribe();

    initiator.start_initiation().await.unwrap();
    let offer = expect_event(&mut initiator_events, code_of(SignalKind::Offer)).await;

    responder.submit_peer_signal(offer).await.unwrap();
    let answer = expect_event(&mut responder_events, code_of(SignalKind::Answer)).await;

    initiator.scan_answer().await.unwrap();
    initiator.submit_peer_signal(answer).await.unwrap();

    for events in [&mut initiator_events, &mut responder_events] {
        expect_event(events, |e| {
            matches!(e, AppEvent::HandshakeSucceeded { .. }).then_some(())
        })
        .await;
        expect_event(events, returned_to_idle).await;
    }
}

async fn status(node: &RuntimeHandle) -> SystemStatus {
    let mut events = node.subscribe();
    node.request_status().await.unwrap();
    expect_event(&mut events, |e| match e {
        AppEvent::SystemStatusReport(status) => Some(status),
        _ => None,
    })
    .await
}

async fn nodes(network: &MemoryLinkNetwork, count: usize) -> Vec<RuntimeHandle> {
    let mut nodes = Vec::with_capacity(count);
    for _ in 0..count {
        nodes.push(create_test_runtime(network).await.unwrap());
    }
    nodes
}

async fn shutdown_all(nodes: Vec<RuntimeHandle>) {
    let shutdowns = nodes.into_iter().map(|mut node| async move {
        node.shutdown().await.unwrap();
    });
    futures::future::join_all(shutdowns).await;
}

// ----------------------------------------------------------------------------
// Manual Pairing
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_code_pairing_connects_both_devices() {
    let network = MemoryLinkNetwork::new();
    let a = create_test_runtime(&network).await.unwrap();
    let b = create_test_runtime(&network).await.unwrap();
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    pair(&a, &b).await;

    for events in [&mut a_events, &mut b_events] {
        let count = expect_event(events, |e| match e {
            AppEvent::PeerCountChanged { count } => Some(count),
            _ => None,
        })
        .await;
        assert_eq!(count, 1);
    }
    assert_eq!(a.peer_count(), 1);
    assert_eq!(b.peer_count(), 1);

    // Settled handshakes no longer own the links
    assert_eq!(network.open_links(), 2);
    assert_eq!(status(&a).await.handshake_state, Some(HandshakeState::Idle));

    shutdown_all(vec![a, b]).await;
}

#[tokio::test(start_paused = true)]
async fn test_garbage_code_reports_invalid_format() {
    let network = MemoryLinkNetwork::new();
    let a = create_test_runtime(&network).await.unwrap();
    let mut events = a.subscribe();

    a.submit_peer_signal("definitely not a code").await.unwrap();
    let message = expect_event(&mut events, |e| match e {
        AppEvent::PeerError { message } => Some(message),
        _ => None,
    })
    .await;
    assert_eq!(message, "invalid code format");
    assert_eq!(status(&a).await.handshake_state, Some(HandshakeState::Idle));

    shutdown_all(vec![a]).await;
}

#[tokio::test(start_paused = true)]
async fn test_second_initiation_replaces_pending_session() {
    let network = MemoryLinkNetwork::new();
    let a = create_test_runtime(&network).await.unwrap();
    let mut events = a.subscribe();

    a.start_initiation().await.unwrap();
    let first = expect_event(&mut events, code_of(SignalKind::Offer)).await;
    assert_eq!(network.open_links(), 1);

    a.start_initiation().await.unwrap();
    let second = expect_event(&mut events, code_of(SignalKind::Offer)).await;
    assert_ne!(first, second);
    assert_eq!(network.open_links(), 1);

    shutdown_all(vec![a]).await;
}

#[tokio::test(start_paused = true)]
async fn test_finalizing_times_out_without_link_up() {
    let network = MemoryLinkNetwork::new();
    network.stall_connections(true);
    let a = create_test_runtime(&network).await.unwrap();
    let b = create_test_runtime(&network).await.unwrap();
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    a.start_initiation().await.unwrap();
    let offer = expect_event(&mut a_events, code_of(SignalKind::Offer)).await;
    b.submit_peer_signal(offer).await.unwrap();
    let answer = expect_event(&mut b_events, code_of(SignalKind::Answer)).await;
    a.scan_answer().await.unwrap();
    a.submit_peer_signal(answer).await.unwrap();

    let started = tokio::time::Instant::now();
    let message = expect_event(&mut a_events, |e| match e {
        AppEvent::PeerError { message } => Some(message),
        _ => None,
    })
    .await;
    assert_eq!(message, "connection timeout");
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(status(&a).await.handshake_state, Some(HandshakeState::Idle));
    assert_eq!(a.peer_count(), 0);

    shutdown_all(vec![a, b]).await;
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_display_and_session() {
    let network = MemoryLinkNetwork::new();
    let a = create_test_runtime(&network).await.unwrap();
    let mut events = a.subscribe();

    a.start_initiation().await.unwrap();
    expect_event(&mut events, code_of(SignalKind::Offer)).await;

    a.reset().await.unwrap();
    expect_event(&mut events, |e| {
        matches!(e, AppEvent::DisplayCleared).then_some(())
    })
    .await;
    assert_eq!(network.open_links(), 0);

    shutdown_all(vec![a]).await;
}

// ----------------------------------------------------------------------------
// Messaging
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_send_without_peers_is_queued_then_flushed() {
    let network = MemoryLinkNetwork::new();
    let a = create_test_runtime(&network).await.unwrap();
    let b = create_test_runtime(&network).await.unwrap();

    let queued = tokio_test::assert_ok!(a.send("trapped under rubble", false).await);
    assert_eq!(queued.status, SosStatus::Queued);
    assert_eq!(queued.hops, 0);
    assert_eq!(queued.sender_id, "local-user");

    let mut b_events = b.subscribe();
    pair(&a, &b).await;

    let received = expect_event(&mut b_events, delivered).await;
    assert_eq!(received.id, queued.id);
    assert_eq!(received.status, SosStatus::Received);
    assert_eq!(received.hops, 1);

    let stored = a.messages().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, SosStatus::Sent);

    shutdown_all(vec![a, b]).await;
}

#[tokio::test(start_paused = true)]
async fn test_hub_relays_to_everyone_but_the_source() {
    let network = MemoryLinkNetwork::new();
    let mut all = nodes(&network, 4).await;
    let (hub, rest) = all.split_first_mut().unwrap();
    for leaf in rest.iter() {
        pair(hub, leaf).await;
    }
    assert_eq!(hub.peer_count(), 3);

    let (a, others) = rest.split_first().unwrap();
    let mut hub_events = hub.subscribe();
    let mut other_events: Vec<_> = others.iter().map(|n| n.subscribe()).collect();

    let sent = a.send("need water", true).await.unwrap();
    assert_eq!(sent.status, SosStatus::Sent);

    let at_hub = expect_event(&mut hub_events, delivered).await;
    assert_eq!(at_hub.hops, 1);
    for events in other_events.iter_mut() {
        let relayed = expect_event(events, delivered).await;
        assert_eq!(relayed.id, sent.id);
        assert_eq!(relayed.hops, 2);
        assert!(relayed.is_auto_triggered);
    }

    sleep(Duration::from_millis(100)).await;
    assert_eq!(status(a).await.duplicates_detected, 0);
    assert_eq!(a.messages().await.unwrap().len(), 1);

    shutdown_all(all).await;
}

#[tokio::test(start_paused = true)]
async fn test_triangle_stores_each_message_once() {
    let network = MemoryLinkNetwork::new();
    let all = nodes(&network, 3).await;
    pair(&all[0], &all[1]).await;
    pair(&all[1], &all[2]).await;
    pair(&all[2], &all[0]).await;

    let sent = all[0].send("smoke on floor 3", false).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let mut duplicates = 0;
    for node in &all {
        let stored = node.messages().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, sent.id);
        duplicates += status(node).await.duplicates_detected;
    }
    // Two accepting devices each relay once to the peer that did not send it
    assert_eq!(duplicates, 2);

    shutdown_all(all).await;
}

#[tokio::test(start_paused = true)]
async fn test_relay_stops_at_hop_bound() {
    let network = MemoryLinkNetwork::new();
    let config = MeshConfig::testing().with_router(RouterConfig {
        max_hops: 2,
        ..RouterConfig::default()
    });
    let mut line = Vec::new();
    for _ in 0..4 {
        let node = RuntimeBuilder::new(config.clone())
            .with_link_factory(Arc::new(network.clone()))
            .with_no_logging()
            .build_and_start()
            .await
            .unwrap();
        line.push(node);
    }
    for hop in line.windows(2) {
        pair(&hop[0], &hop[1]).await;
    }

    let mut third = line[2].subscribe();
    line[0].send("help", false).await.unwrap();
    let at_third = expect_event(&mut third, delivered).await;
    assert_eq!(at_third.hops, 2);

    sleep(Duration::from_secs(1)).await;
    assert!(line[3].messages().await.unwrap().is_empty());

    shutdown_all(line).await;
}

#[tokio::test(start_paused = true)]
async fn test_peer_departure_updates_count() {
    let network = MemoryLinkNetwork::new();
    let a = create_test_runtime(&network).await.unwrap();
    let mut b = create_test_runtime(&network).await.unwrap();
    pair(&a, &b).await;

    let mut a_events = a.subscribe();
    b.shutdown().await.unwrap();

    let count = expect_event(&mut a_events, |e| match e {
        AppEvent::PeerCountChanged { count } => Some(count),
        _ => None,
    })
    .await;
    assert_eq!(count, 0);
    assert!(a.connected_peer_ids().is_empty());

    shutdown_all(vec![a]).await;
}

// ----------------------------------------------------------------------------
// Reconnection
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_responder_saves_offer_and_replays_it_silently() {
    let network = MemoryLinkNetwork::new();
    let config = MeshConfig::testing().with_membership(MeshMembershipConfig {
        discovery_enabled: false,
        reconnect_enabled: true,
        ..MeshMembershipConfig::default()
    });
    let a_storage = Arc::new(MemoryStorage::new());
    let b_storage = Arc::new(MemoryStorage::new());

    let mut a = RuntimeBuilder::new(config.clone())
        .with_link_factory(Arc::new(network.clone()))
        .with_storage(a_storage.clone())
        .with_no_logging()
        .build_and_start()
        .await
        .unwrap();
    let b = RuntimeBuilder::new(config)
        .with_link_factory(Arc::new(network.clone()))
        .with_storage(b_storage.clone())
        .with_no_logging()
        .build_and_start()
        .await
        .unwrap();
    pair(&a, &b).await;

    // Only the side that scanned an offer keeps it
    let saved = b_storage.get_all_saved_peers().await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].signal.kind, SignalKind::Offer);
    assert!(saved[0].id.is_manual());
    assert!(a_storage.get_all_saved_peers().await.unwrap().is_empty());

    let mut b_events = b.subscribe();
    a.shutdown().await.unwrap();
    let count = expect_event(&mut b_events, |e| match e {
        AppEvent::PeerCountChanged { count } => Some(count),
        _ => None,
    })
    .await;
    assert_eq!(count, 0);

    // Two sweeps replay the saved offer of a device that is gone
    sleep(Duration::from_secs(45)).await;
    let report = status(&b).await;
    assert!(report.reconnect_attempts >= 1);
    assert!(report.connected_peers.is_empty());
    assert_eq!(report.handshake_state, Some(HandshakeState::Idle));

    let mut errors = Vec::new();
    while let Ok(event) = b_events.try_recv() {
        if let AppEvent::PeerError { message } = event {
            errors.push(message);
        }
    }
    assert!(errors.is_empty(), "reconnect surfaced errors: {errors:?}");

    shutdown_all(vec![b]).await;
}

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_discovery_pairs_nodes_on_the_same_medium() {
    let network = MemoryLinkNetwork::new();
    let bus = MemoryAnnouncementBus::new();
    let config = MeshConfig::testing().with_membership(MeshMembershipConfig {
        discovery_enabled: true,
        reconnect_enabled: false,
        ..MeshMembershipConfig::default()
    });

    let mut nodes = Vec::new();
    for id in ["p-aaaaaa", "p-zzzzzz"] {
        let node = RuntimeBuilder::new(config.clone())
            .with_link_factory(Arc::new(network.clone()))
            .with_announcement_medium(Arc::new(bus.clone()))
            .with_discovery_id(PeerId::new(id))
            .with_no_logging()
            .build_and_start()
            .await
            .unwrap();
        nodes.push(node);
    }

    for node in &nodes {
        let mut peers = node.watch_peers();
        timeout(Duration::from_secs(120), peers.wait_for(|p| p.len() == 1))
            .await
            .expect("discovery did not connect")
            .unwrap();
    }
    assert_eq!(nodes[0].connected_peer_ids(), vec![PeerId::new("p-zzzzzz")]);
    assert_eq!(nodes[1].connected_peer_ids(), vec![PeerId::new("p-aaaaaa")]);

    // Discovery pairing never touches the manual handshake
    assert_eq!(
        status(&nodes[0]).await.handshake_state,
        Some(HandshakeState::Idle)
    );

    let mut events = nodes[1].subscribe();
    let sent = nodes[0].send_test().await.unwrap();
    let received = expect_event(&mut events, delivered).await;
    assert_eq!(received.id, sent.id);

    shutdown_all(nodes).await;
}
