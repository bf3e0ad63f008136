use crate::a2a::router::Router;
use crate::a2a::transport::{MessageReader, MessageWriter};
use crate::a2a::{AgentMessage, MessageKind};
use crate::error::{AgentError, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accepts peer and client connections and feeds their messages to a [`Router`].
pub struct AgentServer {
    router: Router,
}

impl AgentServer {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!(
            agent = %self.router.agent_name(),
            address = ?listener.local_addr().ok(),
            "agent server listening"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("agent server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer_addr, "set_nodelay failed: {e}");
            }

            let router = self.router.clone();
            let connection_shutdown = shutdown.child_token();
            tokio::spawn(async move {
                info!(%peer_addr, "connection opened");
                tokio::select! {
                    _ = connection_shutdown.cancelled() => {}
                    _ = serve_connection(router, stream, peer_addr.to_string()) => {}
                }
                info!(%peer_addr, "connection closed");
            });
        }
    }
}

/// Runs one connection until the remote side hangs up. Sessions opened over
/// it are cancelled when it goes away.
pub async fn serve_connection<S>(router: Router, stream: S, requester: String)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    let (outbox, mut outgoing) = mpsc::unbounded_channel::<AgentMessage>();

    let writer = tokio::spawn(async move {
        let mut writer = MessageWriter::new(write);
        while let Some(message) = outgoing.recv().await {
            if let Err(e) = writer.send(&message).await {
                warn!("write to connection failed: {e}");
                break;
            }
        }
    });

    let mut reader = MessageReader::new(read);
    let mut opened = Vec::new();

    while let Some(next) = reader.next().await {
        let message = match next {
            Ok(message) => message,
            Err(AgentError::Protocol(detail)) => {
                warn!(%requester, %detail, "rejecting malformed message");
                let _ = outbox.send(AgentMessage::error("", &AgentError::Protocol(detail)));
                continue;
            }
            Err(e) => {
                warn!(%requester, "connection read failed: {e}");
                break;
            }
        };

        let session_id = message.session_id.clone();
        debug!(%requester, %session_id, kind = ?message.kind, "inbound message");
        let result = match message.kind {
            MessageKind::Request => router
                .open(message, requester.clone(), outbox.clone())
                .map(|id| opened.push(id)),
            MessageKind::Escalate => router
                .accept_handoff(message, outbox.clone())
                .map(|id| opened.push(id)),
            MessageKind::Discover => AgentMessage::card(session_id.clone(), router.card())
                .map(|card| {
                    let _ = outbox.send(card);
                }),
            _ => router.route(message),
        };
        if let Err(e) = result {
            warn!(%requester, %session_id, "message rejected: {e}");
            let _ = outbox.send(AgentMessage::error(session_id, &e));
        }
    }

    for session_id in opened {
        let _ = router.cancel(&session_id);
    }
    writer.abort();
}
