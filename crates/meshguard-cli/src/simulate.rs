//! In-memory mesh simulation
//!
//! Builds a line of nodes on one [`MemoryLinkNetwork`], pairs neighbours by
//! passing their codes along exactly as two people would, then floods one SOS
//! from the first node and reports where it arrived.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tracing::info;

use meshguard_core::channel::AppEventReceiver;
use meshguard_core::{AppEvent, HandshakeConfig, MeshConfig, SignalKind, SosMessage};
use meshguard_runtime::{MemoryLinkNetwork, RuntimeBuilder, RuntimeHandle};

/// Longest wait for any single pairing step
const STEP_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the flood may take to reach the end of the line
const FLOOD_TIMEOUT: Duration = Duration::from_secs(3);

/// Timings short enough for a line of nodes to pair in seconds
pub fn simulation_config() -> MeshConfig {
    MeshConfig::testing().with_handshake(HandshakeConfig {
        signal_batch_ms: 50,
        handshake_timeout_ms: 5_000,
        settle_delay_ms: 100,
    })
}

/// What one node saw of the flooded message
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub node: usize,
    pub message: Option<SosMessage>,
}

pub async fn run(count: usize, text: &str) -> Result<()> {
    let arrivals = simulate_line(count, text).await?;
    println!("{:<6} {:<10} {:<5}", "node", "status", "hops");
    for arrival in arrivals {
        match arrival.message {
            Some(message) => println!(
                "{:<6} {:<10} {:<5}",
                arrival.node,
                message.status.to_string(),
                message.hops
            ),
            None => println!("{:<6} {:<10} {:<5}", arrival.node, "-", "-"),
        }
    }
    Ok(())
}

/// Pair `count` nodes in a line, send `text` from node 0 and collect what
/// every node stored
pub async fn simulate_line(count: usize, text: &str) -> Result<Vec<Arrival>> {
    if count < 2 {
        bail!("a mesh needs at least 2 nodes, got {count}");
    }

    let network = MemoryLinkNetwork::new();
    let mut nodes = Vec::with_capacity(count);
    for _ in 0..count {
        let node = RuntimeBuilder::new(simulation_config())
            .with_link_factory(Arc::new(network.clone()))
            .with_no_logging()
            .build_and_start()
            .await?;
        nodes.push(node);
    }

    for (index, pair) in nodes.windows(2).enumerate() {
        pair_nodes(&pair[0], &pair[1]).await?;
        info!("paired node {} with node {}", index, index + 1);
    }

    let mut receivers: Vec<_> = nodes.iter().map(|node| node.subscribe()).collect();
    let sent = nodes[0].send(text, false).await?;

    let deadline = Instant::now() + FLOOD_TIMEOUT;
    let mut arrivals = vec![Arrival {
        node: 0,
        message: Some(sent.clone()),
    }];
    for (index, events) in receivers.iter_mut().enumerate().skip(1) {
        let message = timeout_at(deadline, wait_for(events, |event| match event {
            AppEvent::MessageDelivered { message } if message.id == sent.id => Some(message),
            _ => None,
        }))
        .await
        .ok()
        .transpose()?;
        arrivals.push(Arrival {
            node: index,
            message,
        });
    }

    for mut node in nodes {
        node.shutdown().await?;
    }
    Ok(arrivals)
}

/// Exchange codes between two nodes and wait until both handshakes settle
pub async fn pair_nodes(initiator: &RuntimeHandle, responder: &RuntimeHandle) -> Result<()> {
    let mut initiator_events = initiator.subscribe();
    let mut responder_events = responder.subscribe();

    initiator.start_initiation().await?;
    let offer = step(&mut initiator_events, code_of(SignalKind::Offer)).await?;

    responder.submit_peer_signal(offer).await?;
    let answer = step(&mut responder_events, code_of(SignalKind::Answer)).await?;

    initiator.scan_answer().await?;
    initiator.submit_peer_signal(answer).await?;

    for events in [&mut initiator_events, &mut responder_events] {
        step(events, |event| match event {
            AppEvent::HandshakeSucceeded { .. } => Some(Ok(())),
            AppEvent::PeerError { message } => Some(Err(anyhow!(message))),
            _ => None,
        })
        .await??;
        step(events, |event| match event {
            AppEvent::HandshakeStateChanged { to, .. }
                if to == meshguard_core::HandshakeState::Idle =>
            {
                Some(())
            }
            _ => None,
        })
        .await?;
    }
    Ok(())
}

fn code_of(kind: SignalKind) -> impl FnMut(AppEvent) -> Option<String> {
    move |event| match event {
        AppEvent::SignalReady { kind: k, text } if k == kind => Some(text),
        _ => None,
    }
}

async fn step<T>(
    events: &mut AppEventReceiver,
    pick: impl FnMut(AppEvent) -> Option<T>,
) -> Result<T> {
    timeout(STEP_TIMEOUT, wait_for(events, pick))
        .await
        .map_err(|_| anyhow!("pairing step timed out"))?
}

async fn wait_for<T>(
    events: &mut AppEventReceiver,
    mut pick: impl FnMut(AppEvent) -> Option<T>,
) -> Result<T> {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(value) = pick(event) {
                    return Ok(value);
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => bail!("node stopped"),
        }
    }
}
