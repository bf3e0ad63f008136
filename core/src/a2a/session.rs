use crate::a2a::AgentMessage;
use crate::agent::ConversationContext;
use crate::error::{AgentError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SHARDS: usize = 16;

pub type Outbox = mpsc::UnboundedSender<AgentMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Escalated,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub requester: String,
    pub status: SessionStatus,
    pub hops: u32,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<String>, requester: impl Into<String>, hops: u32) -> Self {
        Self {
            id: id.into(),
            requester: requester.into(),
            status: SessionStatus::Active,
            hops,
            created_at: Utc::now(),
            closed_at: None,
        }
    }
}

/// Live state of one session: its metadata, the requester's outbox and the
/// token that cancels whatever is running on its behalf.
///
/// Every run on the session gets a number; only the current run may write to
/// it. Once a terminal message has been delivered the entry is closed and
/// every later message is dropped. A completed session keeps its context so
/// a follow-up request continues the conversation.
pub struct SessionEntry {
    session: Session,
    outbox: Outbox,
    cancel: CancellationToken,
    run: u64,
    context: Option<ConversationContext>,
}

impl SessionEntry {
    pub fn new(session: Session, outbox: Outbox, cancel: CancellationToken) -> Self {
        Self {
            session,
            outbox,
            cancel,
            run: 0,
            context: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn run(&self) -> u64 {
        self.run
    }

    /// True while `run` is the session's live run.
    pub fn is_current(&self, run: u64) -> bool {
        !self.is_closed() && self.run == run
    }

    pub fn is_closed(&self) -> bool {
        self.session.closed_at.is_some()
    }

    fn is_resumable(&self) -> bool {
        self.is_closed()
            && self.session.status == SessionStatus::Completed
            && self.context.is_some()
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.session.status = status;
    }

    pub fn keep_context(&mut self, context: ConversationContext) {
        self.context = Some(context);
    }

    /// Stops the current run and starts a new one on the same session.
    pub fn take_over(&mut self) -> u64 {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.run += 1;
        self.run
    }

    /// Sends `message` to the requester unless the session is already closed.
    pub fn deliver(&mut self, message: AgentMessage) -> bool {
        if self.is_closed() {
            debug!(session_id = %self.session.id, kind = ?message.kind, "dropping message for closed session");
            return false;
        }
        if message.is_terminal() {
            self.session.closed_at = Some(Utc::now());
        }
        self.outbox.send(message).is_ok()
    }
}

type Shard = RwLock<HashMap<String, Arc<Mutex<SessionEntry>>>>;

/// Session index sharded by id; each entry carries its own lock so sessions
/// never contend with each other.
pub struct SessionTable {
    shards: Vec<Shard>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, session_id: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    /// Starts a run for `session.id` and returns its number.
    ///
    /// Fails with `SessionBusy` while an open session holds the id. With
    /// `resume`, a completed session is reopened in place and its kept
    /// context is returned. Any other closed session is replaced.
    pub fn open(
        &self,
        session: Session,
        outbox: Outbox,
        cancel: CancellationToken,
        resume: bool,
    ) -> Result<(u64, Option<ConversationContext>)> {
        let id = session.id.clone();
        let mut shard = self.shard(&id).write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = shard.get(&id) {
            let mut entry = existing.lock().unwrap_or_else(PoisonError::into_inner);
            if !entry.is_closed() {
                return Err(AgentError::SessionBusy(id));
            }
            if resume && entry.is_resumable() {
                entry.run += 1;
                entry.session.requester = session.requester;
                entry.session.status = SessionStatus::Active;
                entry.session.closed_at = None;
                entry.outbox = outbox;
                entry.cancel = cancel;
                return Ok((entry.run, entry.context.take()));
            }
        }
        shard.insert(id, Arc::new(Mutex::new(SessionEntry::new(session, outbox, cancel))));
        Ok((0, None))
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<SessionEntry>>> {
        self.shard(session_id)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn with_entry<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionEntry) -> R,
    ) -> Result<R> {
        let entry = self
            .get(session_id)
            .ok_or_else(|| AgentError::UnknownSession(session_id.to_string()))?;
        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut guard))
    }

    pub fn snapshot(&self, session_id: &str) -> Option<Session> {
        self.with_entry(session_id, |e| e.session.clone()).ok()
    }

    /// Drops closed sessions older than `retention`. Returns how many went.
    pub fn prune(&self, retention: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(retention) {
            Ok(retention) => Utc::now() - retention,
            Err(_) => return 0,
        };
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.write().unwrap_or_else(PoisonError::into_inner);
            let before = shard.len();
            shard.retain(|_, entry| {
                let entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
                !matches!(entry.session.closed_at, Some(closed) if closed <= cutoff)
            });
            removed += before - shard.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn open_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                s.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .filter(|e| !e.lock().unwrap_or_else(PoisonError::into_inner).is_closed())
                    .count()
            })
            .sum()
    }
}
