use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// Failures surfaced by the orchestration core.
///
/// Contract faults (`DuplicateTool`, `UnknownTool`, `SchemaValidation`) and loop
/// guards (`MalformedQuery`, `ToolCallLimitExceeded`) are never retried.
/// Infrastructure faults (`Transport`, `PeerUnreachable`) are retried with
/// backoff by the routing and transport layers before being surfaced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),
    #[error("Tool '{0}' not found")]
    UnknownTool(String),
    #[error("Schema validation failed for '{tool}': {detail}")]
    SchemaValidation { tool: String, detail: String },
    #[error("Malformed query: {0}")]
    MalformedQuery(String),
    #[error("Tool call limit of {0} exceeded")]
    ToolCallLimitExceeded(usize),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("Session cancelled")]
    Cancelled,
    #[error("Reasoning engine error: {0}")]
    Engine(String),
    #[error("Escalation hop limit of {0} reached")]
    HopLimitExceeded(u32),
    #[error("Unknown session: {0}")]
    UnknownSession(String),
    #[error("Session '{0}' already has an active run")]
    SessionBusy(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Wire-level error code carried in `error` message payloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    DuplicateTool,
    UnknownTool,
    SchemaValidation,
    MalformedQuery,
    ToolCallLimitExceeded,
    Transport,
    PeerUnreachable,
    Cancelled,
    Engine,
    HopLimitExceeded,
    UnknownSession,
    SessionBusy,
    Protocol,
}

impl AgentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateTool(_) => ErrorCode::DuplicateTool,
            Self::UnknownTool(_) => ErrorCode::UnknownTool,
            Self::SchemaValidation { .. } => ErrorCode::SchemaValidation,
            Self::MalformedQuery(_) => ErrorCode::MalformedQuery,
            Self::ToolCallLimitExceeded(_) => ErrorCode::ToolCallLimitExceeded,
            Self::Transport(_) => ErrorCode::Transport,
            Self::PeerUnreachable(_) => ErrorCode::PeerUnreachable,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Engine(_) => ErrorCode::Engine,
            Self::HopLimitExceeded(_) => ErrorCode::HopLimitExceeded,
            Self::UnknownSession(_) => ErrorCode::UnknownSession,
            Self::SessionBusy(_) => ErrorCode::SessionBusy,
            Self::Protocol(_) => ErrorCode::Protocol,
        }
    }

    /// Infrastructure faults that a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::PeerUnreachable(_))
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}
