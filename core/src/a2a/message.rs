use crate::a2a::AgentCard;
use crate::agent::{EscalationReason, Progress, Turn};
use crate::error::{AgentError, ErrorCode, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    PartialResponse,
    FinalResponse,
    Error,
    Escalate,
    Cancel,
    /// Asks the remote agent for its card.
    Discover,
    Card,
}

impl MessageKind {
    /// Kinds that end a session's active status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::FinalResponse | Self::Error)
    }

    /// Kinds after which nothing more arrives under the same session id.
    pub fn ends_exchange(self) -> bool {
        self.is_terminal() || self == Self::Card
    }
}

/// Wire-level unit exchanged between agents.
///
/// `session_id` correlates every message of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: String,
    pub session_id: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalPayload {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalatePayload {
    pub reason: EscalationReason,
    pub query: String,
    pub origin: String,
    /// Peer capability to route to; inferred from the reason when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default)]
    pub hops: u32,
    #[serde(default)]
    pub context: Vec<Turn>,
}

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

impl AgentMessage {
    pub fn new(session_id: impl Into<String>, kind: MessageKind, payload: Value) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            kind,
            payload,
        }
    }

    /// Builds a message from any serializable payload.
    pub fn encode<T: Serialize>(
        session_id: impl Into<String>,
        kind: MessageKind,
        payload: &T,
    ) -> Result<Self> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| AgentError::Protocol(format!("cannot encode {kind:?} payload: {e}")))?;
        Ok(Self::new(session_id, kind, payload))
    }

    /// Like [`AgentMessage::encode`] for the payload types this module owns,
    /// which always serialize. A failure is logged and sent as `null`.
    fn typed<T: Serialize>(session_id: impl Into<String>, kind: MessageKind, payload: &T) -> Self {
        let session_id = session_id.into();
        match Self::encode(session_id.clone(), kind, payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(%session_id, "{e}");
                Self::new(session_id, kind, Value::Null)
            }
        }
    }

    pub fn request(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        let payload = RequestPayload {
            query: query.into(),
            requester: None,
        };
        Self::typed(session_id, MessageKind::Request, &payload)
    }

    pub fn partial(session_id: impl Into<String>, progress: &Progress) -> Self {
        Self::typed(session_id, MessageKind::PartialResponse, progress)
    }

    pub fn final_response(
        session_id: impl Into<String>,
        answer: impl Into<String>,
        agent: Option<String>,
    ) -> Self {
        let payload = FinalPayload {
            answer: answer.into(),
            agent,
        };
        Self::typed(session_id, MessageKind::FinalResponse, &payload)
    }

    pub fn error(session_id: impl Into<String>, error: &AgentError) -> Self {
        let payload = ErrorPayload {
            code: error.code(),
            message: error.to_string(),
        };
        Self::typed(session_id, MessageKind::Error, &payload)
    }

    pub fn escalate(session_id: impl Into<String>, payload: &EscalatePayload) -> Self {
        Self::typed(session_id, MessageKind::Escalate, payload)
    }

    pub fn cancel(session_id: impl Into<String>) -> Self {
        Self::new(session_id, MessageKind::Cancel, Value::Null)
    }

    pub fn discover(session_id: impl Into<String>) -> Self {
        Self::new(session_id, MessageKind::Discover, Value::Null)
    }

    pub fn card(session_id: impl Into<String>, card: &AgentCard) -> Result<Self> {
        Self::encode(session_id, MessageKind::Card, card)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            AgentError::Protocol(format!("invalid {:?} payload: {e}", self.kind))
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_uses_snake_case_kinds() {
        let msg = AgentMessage::request("s-1", "What is the weather in London?");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "request");
        assert_eq!(value["session_id"], "s-1");
        assert_eq!(value["payload"]["query"], "What is the weather in London?");
        assert!(value["message_id"].as_str().is_some());
    }

    #[test]
    fn error_payload_carries_code() {
        let msg = AgentMessage::error("s-2", &AgentError::Cancelled);
        let payload: ErrorPayload = msg.decode().unwrap();
        assert_eq!(payload.code, ErrorCode::Cancelled);
        assert!(msg.is_terminal());
    }

    #[test]
    fn decode_rejects_wrong_payload() {
        let msg = AgentMessage::new("s-3", MessageKind::Request, json!({"nope": 1}));
        let err = msg.decode::<RequestPayload>().unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
    }

    #[test]
    fn unserializable_payload_is_a_protocol_error() {
        let payload: std::collections::HashMap<(u8, u8), u8> = [((1, 2), 3)].into();
        let err = AgentMessage::encode("s-4", MessageKind::Card, &payload).unwrap_err();
        assert!(matches!(err, AgentError::Protocol(m) if m.contains("Card")));
    }

    #[test]
    fn card_ends_the_exchange_without_being_terminal() {
        let card = AgentCard::new("weather_agent", "Weather", "tcp://localhost:10000", "1.0.0");
        let msg = AgentMessage::card("d-1", &card).unwrap();
        assert_eq!(msg.decode::<AgentCard>().unwrap(), card);
        assert!(msg.kind.ends_exchange());
        assert!(!msg.is_terminal());
        assert!(!MessageKind::PartialResponse.ends_exchange());
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let msg: AgentMessage = serde_json::from_str(
            r#"{"message_id":"m","session_id":"s","kind":"cancel"}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, MessageKind::Cancel);
        assert!(msg.payload.is_null());
        assert!(!msg.is_terminal());
    }
}
