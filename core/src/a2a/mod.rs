//! Agent-to-agent layer: wire messages, sessions, routing and the TCP
//! transport that carries them between agents.

pub mod card;
pub mod message;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

pub use card::{AgentCapabilities, AgentCard, AgentSkill};
pub use message::{
    AgentMessage, ErrorPayload, EscalatePayload, FinalPayload, MessageKind, RequestPayload,
    new_session_id,
};
pub use router::{Router, RoutingPolicy};
pub use server::{AgentServer, serve_connection};
pub use session::{Outbox, Session, SessionStatus};
pub use transport::{
    BackoffPolicy, BoxedStream, Connector, LinkEvent, MessageReader, MessageWriter, PeerLink,
    TcpConnector,
};
