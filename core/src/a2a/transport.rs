//! Line-delimited JSON transport between agents.
//!
//! Each connection carries one JSON-encoded [`AgentMessage`] per line. A
//! [`PeerLink`] keeps one logical connection per peer and multiplexes every
//! session over it, using the session id as the correlation key.

use crate::a2a::{AgentCard, AgentMessage, ErrorPayload, MessageKind, new_session_id};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, WriteHalf,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

pub trait WireStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> WireStream for T {}

pub type BoxedStream = Box<dyn WireStream>;

pub fn encode(message: &AgentMessage) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode(line: &str) -> Result<AgentMessage> {
    serde_json::from_str(line.trim())
        .map_err(|e| AgentError::Protocol(format!("undecodable message: {e}")))
}

pub struct MessageReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// `None` at end of stream. A `Protocol` error means one bad line; the
    /// stream is still usable. Any other error means the stream is broken.
    pub async fn next(&mut self) -> Option<Result<AgentMessage>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some(decode(&line)),
                Ok(None) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send(&mut self, message: &AgentMessage) -> Result<()> {
        let line = encode(message)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Dials a peer address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<BoxedStream>;
}

pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &str) -> Result<BoxedStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                AgentError::Transport(format!(
                    "connect to {address} timed out after {:?}",
                    self.connect_timeout
                ))
            })??;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based), doubling each time.
    pub fn delay(&self, retry: u32) -> Duration {
        self.initial
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max)
    }
}

#[derive(Debug)]
pub enum LinkEvent {
    Message(AgentMessage),
    Lost(AgentError),
}

#[derive(Default)]
struct LinkState {
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<LinkEvent>>>,
    live_generation: AtomicU64,
}

impl LinkState {
    fn dispatch(&self, peer: &str, message: AgentMessage) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let terminal = message.kind.ends_exchange();
        let session_id = message.session_id.clone();
        match subscribers.get(&session_id) {
            Some(tx) => {
                if tx.send(LinkEvent::Message(message)).is_err() || terminal {
                    subscribers.remove(&session_id);
                }
            }
            None => debug!(peer, %session_id, "dropping message for unsubscribed session"),
        }
    }

    fn lost(&self, peer: &str, generation: u64, error: AgentError) {
        if self
            .live_generation
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let drained: Vec<_> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        warn!(peer, in_flight = drained.len(), "peer connection lost: {error}");
        for (_, tx) in drained {
            let _ = tx.send(LinkEvent::Lost(error.clone()));
        }
    }
}

struct LinkWriter {
    generation: u64,
    sink: MessageWriter<WriteHalf<BoxedStream>>,
    _reader: AbortOnDropHandle<()>,
}

/// One logical connection to a peer agent, shared by all sessions routed to it.
pub struct PeerLink {
    name: String,
    address: String,
    capabilities: Vec<String>,
    connector: Arc<dyn Connector>,
    backoff: BackoffPolicy,
    writer: tokio::sync::Mutex<Option<LinkWriter>>,
    state: Arc<LinkState>,
    next_generation: AtomicU64,
}

impl PeerLink {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        capabilities: Vec<String>,
        connector: Arc<dyn Connector>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            capabilities,
            connector,
            backoff,
            writer: tokio::sync::Mutex::new(None),
            state: Arc::new(LinkState::default()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Registers interest in one session's inbound messages. A terminal
    /// message or a lost connection ends the subscription.
    pub fn subscribe(&self, session_id: &str) -> mpsc::UnboundedReceiver<LinkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), tx);
        rx
    }

    pub fn unsubscribe(&self, session_id: &str) {
        self.state
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }

    /// Subscribes to `message`'s session, then sends it.
    pub async fn request(
        &self,
        message: &AgentMessage,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>> {
        let events = self.subscribe(&message.session_id);
        if let Err(e) = self.send(message).await {
            self.unsubscribe(&message.session_id);
            return Err(e);
        }
        Ok(events)
    }

    /// Asks the peer for its agent card.
    pub async fn discover(&self, timeout: Duration) -> Result<AgentCard> {
        let session_id = new_session_id();
        let mut events = self.request(&AgentMessage::discover(session_id.clone())).await?;
        let event = tokio::time::timeout(timeout, events.recv()).await;
        self.unsubscribe(&session_id);

        match event {
            Err(_) => Err(AgentError::Transport(format!(
                "{} did not answer discovery within {timeout:?}",
                self.name
            ))),
            Ok(None) => Err(AgentError::Transport(format!(
                "{} closed the discovery exchange",
                self.name
            ))),
            Ok(Some(LinkEvent::Lost(e))) => Err(e),
            Ok(Some(LinkEvent::Message(reply))) => match reply.kind {
                MessageKind::Card => reply.decode(),
                MessageKind::Error => {
                    let detail = reply
                        .decode::<ErrorPayload>()
                        .map(|p| p.message)
                        .unwrap_or_default();
                    Err(AgentError::Protocol(format!("discovery refused: {detail}")))
                }
                other => Err(AgentError::Protocol(format!(
                    "expected a card, got {other:?}"
                ))),
            },
        }
    }

    pub async fn send(&self, message: &AgentMessage) -> Result<()> {
        let mut guard = self.writer.lock().await;

        let live = self.state.live_generation.load(Ordering::SeqCst);
        let usable = matches!(guard.as_ref(), Some(w) if w.generation == live);
        if !usable {
            *guard = None;
            *guard = Some(self.connect().await?);
        }

        let Some(writer) = guard.as_mut() else {
            return Err(AgentError::Transport(format!("no connection to {}", self.name)));
        };
        if let Err(e) = writer.sink.send(message).await {
            let generation = writer.generation;
            *guard = None;
            self.state.lost(&self.name, generation, e.clone());
            return Err(e);
        }
        Ok(())
    }

    async fn connect(&self) -> Result<LinkWriter> {
        let attempts = self.backoff.attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff.delay(attempt - 1)).await;
            }
            match self.connector.connect(&self.address).await {
                Ok(stream) => {
                    info!(peer = %self.name, address = %self.address, attempt, "connected to peer");
                    return Ok(self.start(stream));
                }
                Err(e) => {
                    warn!(peer = %self.name, address = %self.address, attempt, "connect failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(AgentError::PeerUnreachable(format!(
            "{} at {}: {}",
            self.name,
            self.address,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn start(&self, stream: BoxedStream) -> LinkWriter {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .live_generation
            .store(generation, Ordering::SeqCst);

        let (read, write) = tokio::io::split(stream);
        let state = self.state.clone();
        let peer = self.name.clone();
        let reader = tokio::spawn(async move {
            let mut reader = MessageReader::new(read);
            loop {
                match reader.next().await {
                    Some(Ok(message)) => state.dispatch(&peer, message),
                    Some(Err(AgentError::Protocol(detail))) => {
                        warn!(peer = %peer, %detail, "skipping malformed line from peer");
                    }
                    Some(Err(e)) => {
                        state.lost(&peer, generation, e);
                        return;
                    }
                    None => {
                        state.lost(
                            &peer,
                            generation,
                            AgentError::Transport("connection closed by peer".into()),
                        );
                        return;
                    }
                }
            }
        });

        LinkWriter {
            generation,
            sink: MessageWriter::new(write),
            _reader: AbortOnDropHandle::new(reader),
        }
    }
}
