//! Session routing: one supervised task per session, progress streaming to the
//! requester and escalation to peer agents.

use crate::a2a::session::{Outbox, Session, SessionEntry, SessionStatus, SessionTable};
use crate::a2a::transport::{LinkEvent, PeerLink};
use crate::a2a::{
    AgentCard, AgentMessage, EscalatePayload, MessageKind, RequestPayload, new_session_id,
};
use crate::agent::{AgentCore, AgentOutcome, ConversationContext, Progress, ProgressSink, Turn};
use crate::error::{AgentError, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RoutingPolicy {
    /// Extra delivery attempts after the first failed escalation.
    pub peer_retries: u32,
    pub retry_backoff: Duration,
    pub max_hops: u32,
    pub session_retention: Duration,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            peer_retries: 1,
            retry_backoff: Duration::from_millis(500),
            max_hops: 3,
            session_retention: Duration::from_secs(300),
        }
    }
}

#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    agent_name: String,
    card: AgentCard,
    core: Arc<AgentCore>,
    sessions: SessionTable,
    peers: Vec<Arc<PeerLink>>,
    policy: RoutingPolicy,
}

enum RelayEnd {
    Finished,
    Cancelled,
    Lost(AgentError),
}

impl Router {
    pub fn new(
        agent_name: impl Into<String>,
        core: Arc<AgentCore>,
        peers: Vec<Arc<PeerLink>>,
        policy: RoutingPolicy,
    ) -> Self {
        let agent_name = agent_name.into();
        let card = AgentCard::new(
            agent_name.clone(),
            String::new(),
            String::new(),
            env!("CARGO_PKG_VERSION"),
        )
        .with_registry(core.executor().registry());
        Self {
            inner: Arc::new(RouterInner {
                agent_name,
                card,
                core,
                sessions: SessionTable::new(),
                peers,
                policy,
            }),
        }
    }

    /// Replaces the card published to peers. Call before the router is
    /// cloned or served.
    pub fn with_card(mut self, card: AgentCard) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.card = card;
            return self;
        }
        warn!(agent = %self.inner.agent_name, "router already shared, card unchanged");
        self
    }

    pub fn agent_name(&self) -> &str {
        &self.inner.agent_name
    }

    pub fn card(&self) -> &AgentCard {
        &self.inner.card
    }

    pub fn peers(&self) -> &[Arc<PeerLink>] {
        &self.inner.peers
    }

    /// Starts a run for a `Request` message. Everything the run produces goes
    /// to `outbox`, ending with exactly one terminal message. A request on a
    /// completed session continues its conversation.
    pub fn open(
        &self,
        request: AgentMessage,
        requester: impl Into<String>,
        outbox: Outbox,
    ) -> Result<String> {
        if request.kind != MessageKind::Request {
            return Err(AgentError::Protocol(format!(
                "expected a request, got {:?}",
                request.kind
            )));
        }
        let payload: RequestPayload = request.decode()?;
        let session_id = if request.session_id.trim().is_empty() {
            new_session_id()
        } else {
            request.session_id
        };
        let requester = payload.requester.unwrap_or_else(|| requester.into());
        let context = ConversationContext::new(session_id.clone());

        self.start(session_id, requester, 0, context, payload.query, outbox, true)
    }

    /// In-process convenience over [`Router::open`] on a fresh session.
    pub fn open_stream(
        &self,
        query: impl Into<String>,
    ) -> Result<(String, UnboundedReceiverStream<AgentMessage>)> {
        let session_id = new_session_id();
        let replies = self.open_stream_in(session_id.clone(), query)?;
        Ok((session_id, replies))
    }

    /// Sends `query` on `session_id`, continuing it if it has completed.
    pub fn open_stream_in(
        &self,
        session_id: impl Into<String>,
        query: impl Into<String>,
    ) -> Result<UnboundedReceiverStream<AgentMessage>> {
        let (outbox, rx) = mpsc::unbounded_channel();
        self.open(AgentMessage::request(session_id, query), "local", outbox)?;
        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Takes over a session escalated to this agent by a peer.
    pub fn accept_handoff(&self, message: AgentMessage, outbox: Outbox) -> Result<String> {
        if message.kind != MessageKind::Escalate {
            return Err(AgentError::Protocol(format!(
                "expected an escalation, got {:?}",
                message.kind
            )));
        }
        let payload: EscalatePayload = message.decode()?;
        if payload.hops > self.inner.policy.max_hops {
            return Err(AgentError::HopLimitExceeded(self.inner.policy.max_hops));
        }

        let mut context =
            ConversationContext::from_turns(message.session_id.clone(), payload.context);
        context.push(Turn::Note {
            text: format!("handed off by {}: {}", payload.origin, payload.reason),
        });
        info!(
            session_id = %message.session_id,
            origin = %payload.origin,
            hops = payload.hops,
            "accepted escalated session"
        );

        self.start(
            message.session_id,
            payload.origin,
            payload.hops,
            context,
            payload.query,
            outbox,
            false,
        )
    }

    /// Dispatches an inbound message for an existing session.
    ///
    /// `Cancel` stops the session. `Escalate` stops the local run and hands
    /// the session to a peer in the background. Responses are accepted only
    /// for a session that is relaying a peer. A `Request` continues the
    /// session on the outbox it last used.
    pub fn route(&self, message: AgentMessage) -> Result<()> {
        let session_id = message.session_id.clone();
        match message.kind {
            MessageKind::Cancel => self.cancel(&session_id),
            MessageKind::Escalate => {
                let run = self.inner.sessions.with_entry(&session_id, |e| {
                    if e.is_closed() {
                        return Err(AgentError::UnknownSession(session_id.clone()));
                    }
                    if e.session().status == SessionStatus::Escalated {
                        return Err(AgentError::SessionBusy(session_id.clone()));
                    }
                    Ok(e.take_over())
                })??;
                info!(%session_id, run, "local run superseded by escalation");
                tokio::spawn(escalate(self.inner.clone(), message, run));
                Ok(())
            }
            MessageKind::PartialResponse | MessageKind::FinalResponse | MessageKind::Error => {
                self.inner.sessions.with_entry(&session_id, |e| {
                    if e.is_closed() {
                        return Err(AgentError::UnknownSession(session_id.clone()));
                    }
                    if e.session().status != SessionStatus::Escalated {
                        return Err(AgentError::Protocol(format!(
                            "session {session_id} is not relaying a peer"
                        )));
                    }
                    relay_into(e, message);
                    Ok(())
                })?
            }
            MessageKind::Request => {
                let (requester, outbox) = self.inner.sessions.with_entry(&session_id, |e| {
                    (e.session().requester.clone(), e.outbox().clone())
                })?;
                self.open(message, requester, outbox).map(|_| ())
            }
            MessageKind::Discover | MessageKind::Card => Err(AgentError::Protocol(format!(
                "{:?} is answered by the server, not routed",
                message.kind
            ))),
        }
    }

    /// Forwards progress to the session's requester. Dropped once the
    /// session has delivered its terminal message.
    pub fn stream(&self, session_id: &str, progress: Progress) -> Result<()> {
        self.inner.sessions.with_entry(session_id, |e| {
            e.deliver(AgentMessage::partial(session_id, &progress));
        })
    }

    /// Stops a session. Only the first cancel of an open session produces the
    /// `Cancelled` error message.
    pub fn cancel(&self, session_id: &str) -> Result<()> {
        self.inner.sessions.with_entry(session_id, |e| {
            if e.is_closed() {
                return;
            }
            e.cancel_token().cancel();
            e.set_status(SessionStatus::Failed);
            e.deliver(AgentMessage::error(session_id, &AgentError::Cancelled));
            info!(session_id, "session cancelled");
        })
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.session(session_id).map(|s| s.status)
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.inner.sessions.snapshot(session_id)
    }

    pub fn open_sessions(&self) -> usize {
        self.inner.sessions.open_count()
    }

    #[allow(clippy::too_many_arguments)]
    fn start(
        &self,
        session_id: String,
        requester: String,
        hops: u32,
        context: ConversationContext,
        query: String,
        outbox: Outbox,
        resume: bool,
    ) -> Result<String> {
        let pruned = self
            .inner
            .sessions
            .prune(self.inner.policy.session_retention);
        if pruned > 0 {
            info!(pruned, "pruned finished sessions");
        }

        let cancel = CancellationToken::new();
        let session = Session::new(session_id.clone(), requester.clone(), hops);
        let (run, kept) = self
            .inner
            .sessions
            .open(session, outbox, cancel.clone(), resume)?;
        let resumed = kept.is_some();
        let context = kept.unwrap_or(context);
        info!(session_id = %session_id, %requester, hops, run, resumed, "session opened");

        let inner = self.inner.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            let worker = tokio::spawn(drive(
                inner.clone(),
                id.clone(),
                run,
                context,
                query,
                cancel,
            ));
            if let Err(e) = worker.await {
                if e.is_panic() {
                    error!(session_id = %id, run, "session task panicked");
                    inner.fail(&id, run, AgentError::Engine("session task panicked".into()));
                }
            }
        });

        Ok(session_id)
    }
}

/// Delivers a peer's reply into a relaying session. A peer error fails it.
fn relay_into(entry: &mut SessionEntry, message: AgentMessage) {
    if message.kind == MessageKind::Error {
        entry.set_status(SessionStatus::Failed);
    }
    entry.deliver(message);
}

impl RouterInner {
    fn stream(&self, session_id: &str, run: u64, progress: Progress) {
        let _ = self.sessions.with_entry(session_id, |e| {
            if e.is_current(run) {
                e.deliver(AgentMessage::partial(session_id, &progress));
            }
        });
    }

    fn complete(&self, session_id: &str, run: u64, answer: String, context: ConversationContext) {
        let agent = Some(self.agent_name.clone());
        let _ = self.sessions.with_entry(session_id, |e| {
            if e.is_current(run) {
                e.set_status(SessionStatus::Completed);
                e.keep_context(context);
                e.deliver(AgentMessage::final_response(session_id, answer, agent));
            }
        });
    }

    fn fail(&self, session_id: &str, run: u64, error: AgentError) {
        let _ = self.sessions.with_entry(session_id, |e| {
            if e.is_current(run) {
                warn!(session_id, "session failed: {error}");
                e.set_status(SessionStatus::Failed);
                e.deliver(AgentMessage::error(session_id, &error));
            } else {
                debug!(session_id, run, "dropping outcome of a retired run: {error}");
            }
        });
    }

    /// Explicit capability first, then a capability named in the hint, then
    /// a `*` peer.
    fn select_peer(&self, capability: Option<&str>, hint: &str) -> Option<Arc<PeerLink>> {
        let hint = hint.to_lowercase();
        let explicit = capability.and_then(|wanted| {
            self.peers.iter().find(|p| {
                p.capabilities()
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(wanted))
            })
        });
        explicit
            .or_else(|| {
                self.peers.iter().find(|p| {
                    p.capabilities()
                        .iter()
                        .any(|c| c != "*" && hint.contains(&c.to_lowercase()))
                })
            })
            .or_else(|| {
                self.peers
                    .iter()
                    .find(|p| p.capabilities().iter().any(|c| c == "*"))
            })
            .cloned()
    }

    /// Relays one delivery attempt. Partials already forwarded by an earlier
    /// attempt are skipped.
    async fn relay(
        &self,
        session_id: &str,
        run: u64,
        events: &mut mpsc::UnboundedReceiver<LinkEvent>,
        forwarded: &mut Vec<Value>,
        cancel: &CancellationToken,
    ) -> RelayEnd {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RelayEnd::Cancelled,
                event = events.recv() => event,
            };
            match event {
                Some(LinkEvent::Message(message)) => {
                    let terminal = message.is_terminal();
                    if message.kind == MessageKind::PartialResponse {
                        if forwarded.contains(&message.payload) {
                            debug!(session_id, "skipping partial replayed by the peer");
                            continue;
                        }
                        forwarded.push(message.payload.clone());
                    }
                    let _ = self.sessions.with_entry(session_id, |e| {
                        if e.is_current(run) {
                            relay_into(e, message);
                        }
                    });
                    if terminal {
                        return RelayEnd::Finished;
                    }
                }
                Some(LinkEvent::Lost(e)) => return RelayEnd::Lost(e),
                None => {
                    return RelayEnd::Lost(AgentError::Transport(
                        "peer subscription closed".into(),
                    ));
                }
            }
        }
    }
}

struct SessionSink<'a> {
    inner: &'a RouterInner,
    session_id: &'a str,
    run: u64,
}

impl ProgressSink for SessionSink<'_> {
    fn emit(&self, progress: Progress) {
        self.inner.stream(self.session_id, self.run, progress);
    }
}

async fn drive(
    inner: Arc<RouterInner>,
    session_id: String,
    run: u64,
    mut context: ConversationContext,
    query: String,
    cancel: CancellationToken,
) {
    let sink = SessionSink {
        inner: &inner,
        session_id: &session_id,
        run,
    };
    let outcome = inner.core.run(&mut context, &query, &sink, &cancel).await;

    match outcome {
        AgentOutcome::Answered(answer) => inner.complete(&session_id, run, answer, context),
        AgentOutcome::Failed(e) => inner.fail(&session_id, run, e),
        AgentOutcome::Escalated(reason) => {
            let hops = inner
                .sessions
                .with_entry(&session_id, |e| e.session().hops)
                .unwrap_or(0);
            let payload = EscalatePayload {
                reason,
                query,
                origin: inner.agent_name.clone(),
                capability: None,
                hops: hops + 1,
                context: context.turns().to_vec(),
            };
            let message = AgentMessage::escalate(session_id, &payload);
            escalate(inner.clone(), message, run).await;
        }
    }
}

/// Delivers an escalation to a peer and relays its replies until one is
/// terminal. Delivery is retried `peer_retries` times with backoff; a
/// connection lost mid-relay counts as a failed attempt.
async fn escalate(inner: Arc<RouterInner>, message: AgentMessage, run: u64) {
    let session_id = message.session_id.clone();
    let payload: EscalatePayload = match message.decode() {
        Ok(payload) => payload,
        Err(e) => return inner.fail(&session_id, run, e),
    };
    if payload.hops > inner.policy.max_hops {
        return inner.fail(
            &session_id,
            run,
            AgentError::HopLimitExceeded(inner.policy.max_hops),
        );
    }

    let cancel = match inner.sessions.with_entry(&session_id, |e| {
        if !e.is_current(run) {
            return None;
        }
        e.set_status(SessionStatus::Escalated);
        Some(e.cancel_token().clone())
    }) {
        Ok(Some(cancel)) => cancel,
        Ok(None) => {
            debug!(%session_id, run, "session closed before escalation");
            return;
        }
        Err(e) => {
            warn!(%session_id, "cannot escalate: {e}");
            return;
        }
    };

    let hint = format!("{} {}", payload.reason, payload.query);
    let Some(peer) = inner.select_peer(payload.capability.as_deref(), &hint) else {
        return inner.fail(
            &session_id,
            run,
            AgentError::PeerUnreachable("no peer configured for escalation".into()),
        );
    };
    inner.stream(
        &session_id,
        run,
        Progress::Note {
            text: format!("escalating to {}", peer.name()),
        },
    );

    let attempts = inner.policy.peer_retries + 1;
    let mut forwarded = Vec::new();
    let mut last_error = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(inner.policy.retry_backoff * attempt) => {}
            }
        }
        if cancel.is_cancelled() {
            return;
        }

        let mut events = match peer.request(&message).await {
            Ok(events) => events,
            Err(e) => {
                warn!(%session_id, peer = %peer.name(), attempt, "escalation not delivered: {e}");
                last_error = Some(e);
                continue;
            }
        };
        info!(%session_id, peer = %peer.name(), attempt, "escalation delivered");

        match inner
            .relay(&session_id, run, &mut events, &mut forwarded, &cancel)
            .await
        {
            RelayEnd::Finished => {
                peer.unsubscribe(&session_id);
                return;
            }
            RelayEnd::Cancelled => {
                peer.unsubscribe(&session_id);
                if let Err(e) = peer.send(&AgentMessage::cancel(session_id.clone())).await {
                    warn!(%session_id, peer = %peer.name(), "could not forward cancel: {e}");
                }
                return;
            }
            RelayEnd::Lost(e) => {
                peer.unsubscribe(&session_id);
                warn!(%session_id, peer = %peer.name(), attempt, "lost peer mid-escalation: {e}");
                last_error = Some(e);
            }
        }
    }

    let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
    inner.fail(
        &session_id,
        run,
        AgentError::PeerUnreachable(format!("{}: {detail}", peer.name())),
    );
}
