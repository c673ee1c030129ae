//! Links over TCP
//!
//! An initiator binds a listener and advertises it as a host candidate in its
//! offer. A responder fed that offer dials the candidates in order and opens
//! the stream with a hello line carrying its own ufrag and the initiator's
//! password. The initiator accepts the stream only once the answer has been
//! delivered and the hello's ufrag matches it; it replies `ok` and both sides
//! switch to framing.
//!
//! Wire format after the hello: [4-byte LE length][frame bytes]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use meshguard_core::protocol::{host_candidate, Candidates, LinkCredentials};
use meshguard_core::{
    LinkEvent, LinkEventSink, LinkFactory, MeshError, MeshResult, PeerLink, SessionDescription,
    SessionRole, Signal, SignalKind, TransportError,
};

use super::spawn_outbox;

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const ACCEPTED: &str = "ok";

// ----------------------------------------------------------------------------
// Factory
// ----------------------------------------------------------------------------

/// Opens TCP links
#[derive(Debug, Clone)]
pub struct TcpLinkFactory {
    /// Address initiators bind their listener to
    bind: IpAddr,
    /// Address written into host candidates
    advertise: Ipv4Addr,
    connect_timeout: Duration,
    /// How long a dialled stream may wait for the initiator to accept it
    accept_timeout: Duration,
    dial_attempts: u32,
    dial_retry: Duration,
}

impl TcpLinkFactory {
    pub fn new(bind: IpAddr, advertise: Ipv4Addr) -> Self {
        Self {
            bind,
            advertise,
            connect_timeout: Duration::from_secs(5),
            accept_timeout: Duration::from_secs(120),
            dial_attempts: 5,
            dial_retry: Duration::from_millis(500),
        }
    }

    /// Factory for links between processes on this machine
    pub fn loopback() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), Ipv4Addr::LOCALHOST)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }
}

impl LinkFactory for TcpLinkFactory {
    fn open(&self, role: SessionRole, sink: LinkEventSink) -> MeshResult<Box<dyn PeerLink>> {
        let credentials = LinkCredentials::generate();
        let outbox = spawn_outbox(sink);
        let (answer_tx, answer_rx) = watch::channel(None);
        let link = TcpLink {
            config: self.clone(),
            role,
            credentials,
            outbox,
            answer: answer_tx,
            shared: Arc::new(Mutex::new(Shared::default())),
        };

        if role == SessionRole::Initiator {
            link.listen(answer_rx)?;
        }
        Ok(Box::new(link))
    }
}

// ----------------------------------------------------------------------------
// Link
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Shared {
    writer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    tasks: Vec<JoinHandle<()>>,
    connected: bool,
    closed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct DialHello {
    ufrag: String,
    pwd: String,
}

pub struct TcpLink {
    config: TcpLinkFactory,
    role: SessionRole,
    credentials: LinkCredentials,
    outbox: mpsc::UnboundedSender<LinkEvent>,
    /// Ufrag of the delivered answer
    answer: watch::Sender<Option<String>>,
    shared: Arc<Mutex<Shared>>,
}

impl TcpLink {
    fn description(&self, kind: SignalKind, port: Option<u16>) -> SessionDescription {
        let mut candidates = Candidates::new();
        if let Some(port) = port {
            candidates.push(host_candidate("tcp", self.config.advertise, port));
        }
        self.credentials.to_signal(kind, candidates).to_description()
    }

    fn failed(&self, reason: impl Into<String>) -> MeshError {
        MeshError::connection_failed(self.credentials.ufrag.clone(), reason)
    }

    /// Initiator: bind, advertise, and accept the first verified dial
    fn listen(&self, answer: watch::Receiver<Option<String>>) -> MeshResult<()> {
        let listener = std::net::TcpListener::bind((self.config.bind, 0))
            .map_err(TransportError::NetworkIo)?;
        listener
            .set_nonblocking(true)
            .map_err(TransportError::NetworkIo)?;
        let listener = TcpListener::from_std(listener).map_err(TransportError::NetworkIo)?;
        let port = listener
            .local_addr()
            .map_err(TransportError::NetworkIo)?
            .port();

        let _ = self
            .outbox
            .send(LinkEvent::Signal(self.description(SignalKind::Offer, Some(port))));
        tracing::debug!("tcp initiator {} listening on port {}", self.credentials.ufrag, port);

        let task = tokio::spawn(accept_loop(
            listener,
            self.credentials.clone(),
            answer,
            self.outbox.clone(),
            self.shared.clone(),
        ));
        lock(&self.shared).tasks.push(task);
        Ok(())
    }

    /// Responder: answer the offer and dial its candidates
    fn dial(&self, offer: Signal) -> MeshResult<()> {
        let targets: Vec<SocketAddr> = offer
            .candidates
            .iter()
            .filter_map(|candidate| candidate_address(candidate))
            .collect();
        if targets.is_empty() {
            return Err(self.failed("offer has no reachable candidate"));
        }

        let _ = self
            .outbox
            .send(LinkEvent::Signal(self.description(SignalKind::Answer, None)));

        let hello = DialHello {
            ufrag: self.credentials.ufrag.clone(),
            pwd: offer.ice_pwd,
        };
        let task = tokio::spawn(dial_loop(
            targets,
            hello,
            self.config.clone(),
            self.outbox.clone(),
            self.shared.clone(),
        ));
        lock(&self.shared).tasks.push(task);
        Ok(())
    }
}

impl PeerLink for TcpLink {
    fn signal(&mut self, description: SessionDescription) -> MeshResult<()> {
        if lock(&self.shared).closed {
            return Err(TransportError::Closed {
                reason: "link closed".into(),
            }
            .into());
        }
        let remote = Signal::from_description(&description);
        if remote.is_degenerate() {
            return Err(self.failed("remote description has no credentials"));
        }

        match (self.role, remote.kind) {
            (SessionRole::Initiator, SignalKind::Answer) => {
                self.answer.send_replace(Some(remote.ice_ufrag));
                Ok(())
            }
            (SessionRole::Responder, SignalKind::Offer) => {
                if lock(&self.shared).tasks.is_empty() {
                    self.dial(remote)
                } else {
                    tracing::debug!("tcp responder already dialling, ignoring offer");
                    Ok(())
                }
            }
            (_, kind) => Err(self.failed(format!("unexpected {kind}"))),
        }
    }

    fn send(&mut self, data: Vec<u8>) -> MeshResult<()> {
        if data.len() > MAX_FRAME_LEN {
            return Err(MeshError::send_failed("frame too large"));
        }
        let shared = lock(&self.shared);
        let writer = shared
            .writer
            .as_ref()
            .filter(|_| shared.connected)
            .ok_or_else(|| TransportError::NotConnected {
                peer_id: self.credentials.ufrag.clone(),
            })?;
        writer
            .send(data)
            .map_err(|_| MeshError::send_failed("writer stopped"))
    }

    fn close(&mut self) {
        let mut shared = lock(&self.shared);
        if shared.closed {
            return;
        }
        shared.closed = true;
        shared.connected = false;
        shared.writer = None;
        for task in shared.tasks.drain(..) {
            task.abort();
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.shared).connected
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock(shared: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Socket address named by a candidate line
fn candidate_address(candidate: &str) -> Option<SocketAddr> {
    let parts: Vec<&str> = candidate.split_whitespace().collect();
    let address: IpAddr = parts.get(4)?.parse().ok()?;
    let port: u16 = parts.get(5)?.parse().ok()?;
    Some(SocketAddr::new(address, port))
}

// ----------------------------------------------------------------------------
// Background Tasks
// ----------------------------------------------------------------------------

async fn accept_loop(
    listener: TcpListener,
    credentials: LinkCredentials,
    answer: watch::Receiver<Option<String>>,
    outbox: mpsc::UnboundedSender<LinkEvent>,
    shared: Arc<Mutex<Shared>>,
) {
    loop {
        let (stream, from) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                let _ = outbox.send(LinkEvent::Error(format!("accept failed: {e}")));
                return;
            }
        };

        let credentials = credentials.clone();
        let answer = answer.clone();
        let outbox = outbox.clone();
        let inner = shared.clone();
        let task = tokio::spawn(async move {
            match verify_dial(stream, &credentials, answer).await {
                Ok((reader, writer)) => start_framing(reader, writer, outbox, inner),
                Err(e) => tracing::debug!("rejected dial from {}: {:#}", from, e),
            }
        });
        let mut guard = lock(&shared);
        // Rejected dials leave finished handles behind
        guard.tasks.retain(|task| !task.is_finished());
        guard.tasks.push(task);
    }
}

/// Read the hello, wait for the answer, and accept the stream if they agree
async fn verify_dial(
    stream: TcpStream,
    credentials: &LinkCredentials,
    mut answer: watch::Receiver<Option<String>>,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut line = String::new();
    reader.read_line(&mut line).await.context("read hello")?;
    let hello: DialHello = serde_json::from_str(line.trim()).context("decode hello")?;
    anyhow::ensure!(hello.pwd == credentials.pwd, "wrong password");

    let expected = answer
        .wait_for(Option::is_some)
        .await
        .context("answer never delivered")?
        .clone();
    anyhow::ensure!(
        expected.as_deref() == Some(hello.ufrag.as_str()),
        "hello from {} does not match the answer",
        hello.ufrag
    );

    write
        .write_all(format!("{ACCEPTED}\n").as_bytes())
        .await
        .context("write accept")?;
    Ok((reader, write))
}

async fn dial_loop(
    targets: Vec<SocketAddr>,
    hello: DialHello,
    config: TcpLinkFactory,
    outbox: mpsc::UnboundedSender<LinkEvent>,
    shared: Arc<Mutex<Shared>>,
) {
    for attempt in 0..config.dial_attempts {
        for target in &targets {
            match dial(*target, &hello, &config).await {
                Ok((reader, writer)) => {
                    start_framing(reader, writer, outbox, shared);
                    return;
                }
                Err(e) => tracing::debug!("dial {} attempt {} failed: {:#}", target, attempt, e),
            }
        }
        tokio::time::sleep(config.dial_retry).await;
    }
    let _ = outbox.send(LinkEvent::Error("peer unreachable".into()));
}

async fn dial(
    target: SocketAddr,
    hello: &DialHello,
    config: &TcpLinkFactory,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(target))
        .await
        .context("connect timed out")?
        .with_context(|| format!("connect to {target}"))?;
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut line = serde_json::to_string(hello).context("encode hello")?;
    line.push('\n');
    write.write_all(line.as_bytes()).await.context("write hello")?;

    let mut reply = String::new();
    tokio::time::timeout(config.accept_timeout, reader.read_line(&mut reply))
        .await
        .context("initiator did not accept in time")?
        .context("read accept")?;
    anyhow::ensure!(reply.trim() == ACCEPTED, "dial refused");
    Ok((reader, write))
}

/// Hand a verified stream to a reader and a writer task and report link-up
fn start_framing(
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    outbox: mpsc::UnboundedSender<LinkEvent>,
    shared: Arc<Mutex<Shared>>,
) {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let mut guard = lock(&shared);
    if guard.closed || guard.connected {
        return;
    }
    guard.writer = Some(frames_tx);
    guard.connected = true;
    guard
        .tasks
        .push(tokio::spawn(write_frames(writer, frames_rx, outbox.clone())));
    let _ = outbox.send(LinkEvent::Connected);
    guard
        .tasks
        .push(tokio::spawn(read_frames(reader, outbox, shared.clone())));
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    outbox: mpsc::UnboundedSender<LinkEvent>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            let _ = outbox.send(LinkEvent::Error(format!("{e:#}")));
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_frames(
    mut reader: BufReader<OwnedReadHalf>,
    outbox: mpsc::UnboundedSender<LinkEvent>,
    shared: Arc<Mutex<Shared>>,
) {
    let outcome = loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                let _ = outbox.send(LinkEvent::Data(frame));
            }
            Ok(None) => break LinkEvent::Closed,
            Err(e) => break LinkEvent::Error(format!("{e:#}")),
        }
    };
    let mut guard = lock(&shared);
    guard.connected = false;
    guard.writer = None;
    drop(guard);
    let _ = outbox.send(outcome);
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    let len = (frame.len() as u32).to_le_bytes();
    writer.write_all(&len).await.context("write length")?;
    writer.write_all(frame).await.context("write frame")?;
    writer.flush().await.context("flush")?;
    Ok(())
}

/// `None` on a clean end of stream between frames
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("read length"),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "frame too large: {len} bytes");

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await.context("read frame")?;
    Ok(Some(frame))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use meshguard_core::channel::{create_event_channel, Event, EventReceiver};
    use meshguard_core::{ChannelConfig, SessionKey};

    async fn next(events: &mut EventReceiver) -> (SessionKey, LinkEvent) {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("event channel closed");
        match event {
            Event::Link { key, event } => (key, event),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_candidate_address() {
        assert_eq!(
            candidate_address("1 1 tcp 2113937151 127.0.0.1 4100 typ host IP4"),
            Some("127.0.0.1:4100".parse().unwrap())
        );
        assert_eq!(candidate_address("1 1 tcp 2113937151 host"), None);
    }

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"hello").await.unwrap();
        drop(a);
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_links_pair_over_loopback() {
        let factory = TcpLinkFactory::loopback();
        let (sender, mut events) = create_event_channel(&ChannelConfig::testing());

        let mut initiator = factory
            .open(SessionRole::Initiator, LinkEventSink::new(SessionKey(1), sender.clone()))
            .unwrap();
        let (_, LinkEvent::Signal(offer)) = next(&mut events).await else {
            panic!("expected offer");
        };
        assert_eq!(offer.candidates().len(), 1);

        let mut responder = factory
            .open(SessionRole::Responder, LinkEventSink::new(SessionKey(2), sender))
            .unwrap();
        responder.signal(offer).unwrap();
        let (_, LinkEvent::Signal(answer)) = next(&mut events).await else {
            panic!("expected answer");
        };

        initiator.signal(answer).unwrap();
        let mut connected = vec![next(&mut events).await, next(&mut events).await];
        connected.sort_by_key(|(key, _)| *key);
        assert_eq!(connected[0], (SessionKey(1), LinkEvent::Connected));
        assert_eq!(connected[1], (SessionKey(2), LinkEvent::Connected));

        responder.send(b"sos".to_vec()).unwrap();
        assert_eq!(
            next(&mut events).await,
            (SessionKey(1), LinkEvent::Data(b"sos".to_vec()))
        );

        responder.close();
        assert_eq!(next(&mut events).await, (SessionKey(1), LinkEvent::Closed));
    }

    #[tokio::test]
    async fn test_rejected_dials_do_not_accumulate() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (outbox, _outcomes) = mpsc::unbounded_channel();
        let (_answer_tx, answer) = watch::channel(None);
        let accepting = tokio::spawn(accept_loop(
            listener,
            LinkCredentials::generate(),
            answer,
            outbox,
            shared.clone(),
        ));

        for _ in 0..8 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"not a hello\n").await.unwrap();
            drop(stream);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(lock(&shared).tasks.len() <= 2);
        assert!(!lock(&shared).connected);
        accepting.abort();
    }

    #[tokio::test]
    async fn test_initiator_rejects_degenerate_answer() {
        let factory = TcpLinkFactory::loopback();
        let (sender, _events) = create_event_channel(&ChannelConfig::testing());
        let mut initiator = factory
            .open(SessionRole::Initiator, LinkEventSink::new(SessionKey(1), sender))
            .unwrap();

        let result = initiator.signal(SessionDescription::new(SignalKind::Answer, ""));
        assert!(result.is_err());
        assert!(!initiator.is_connected());
    }
}
