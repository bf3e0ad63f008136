mod common;

use async_trait::async_trait;
use common::*;
use nimbus_core::a2a::transport::{
    BackoffPolicy, BoxedStream, Connector, MessageReader, MessageWriter,
};
use nimbus_core::a2a::{
    AgentMessage, ErrorPayload, EscalatePayload, FinalPayload, MessageKind, PeerLink, Router,
    SessionStatus, serve_connection,
};
use nimbus_core::agent::{EscalationReason, Progress};
use nimbus_core::error::{AgentError, ErrorCode};
use nimbus_core::mcp::ExecutorPolicy;
use nimbus_core::traits::{Decision, ReasoningEngine, Tool};
use nimbus_core::Result;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn traffic_agent() -> (Router, Arc<FnEngine>) {
    let engine = FnEngine::new(|ctx| {
        Decision::answer(format!(
            "Traffic around {} is light.",
            if ctx.latest_query().unwrap_or_default().contains("Pune") {
                "Pune"
            } else {
                "town"
            }
        ))
    });
    let core = core_with(engine.clone(), vec![], ExecutorPolicy::default());
    (
        Router::new("traffic_agent", core, vec![], quick_routing()),
        engine,
    )
}

fn weather_agent(peers: Vec<Arc<PeerLink>>) -> Router {
    let engine: Arc<dyn ReasoningEngine> =
        FnEngine::new(|_| Decision::escalate("question is about traffic, not weather"));
    let core = core_with(engine, vec![], ExecutorPolicy::default());
    Router::new("weather_agent", core, peers, quick_routing())
}

fn link(connector: Arc<InMemoryConnector>, capabilities: &[&str]) -> Arc<PeerLink> {
    Arc::new(PeerLink::new(
        "traffic_agent",
        "memory://traffic",
        capabilities.iter().map(|c| c.to_string()).collect(),
        connector,
        BackoffPolicy {
            attempts: 1,
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
        },
    ))
}

#[tokio::test]
async fn unreachable_peer_is_retried_and_answers_once() {
    let (traffic, traffic_engine) = traffic_agent();
    let connector = InMemoryConnector::new(traffic, 1);
    let weather = weather_agent(vec![link(connector.clone(), &["traffic"])]);

    let (session_id, mut replies) = weather.open_stream("How is traffic in Pune?").unwrap();
    let messages = collect_until_terminal(&mut replies, Duration::from_secs(5)).await;

    assert!(messages.iter().all(|m| m.kind != MessageKind::Escalate));
    assert!(messages.iter().all(|m| m.session_id == session_id));
    let finals: Vec<&AgentMessage> = messages
        .iter()
        .filter(|m| m.kind == MessageKind::FinalResponse)
        .collect();
    assert_eq!(finals.len(), 1);

    let answer: FinalPayload = finals[0].decode().unwrap();
    assert_eq!(answer.answer, "Traffic around Pune is light.");
    assert_eq!(answer.agent.as_deref(), Some("traffic_agent"));

    let notes: Vec<String> = messages
        .iter()
        .filter(|m| m.kind == MessageKind::PartialResponse)
        .filter_map(|m| match m.decode::<Progress>() {
            Ok(Progress::Note { text }) => Some(text),
            _ => None,
        })
        .collect();
    assert!(notes.iter().any(|n| n == "escalating to traffic_agent"));

    assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    assert_eq!(traffic_engine.calls.load(Ordering::SeqCst), 1);
    assert_eq!(weather.status(&session_id), Some(SessionStatus::Escalated));

    // Nothing trails the terminal message.
    let trailing = tokio::time::timeout(
        Duration::from_millis(100),
        tokio_stream::StreamExt::next(&mut replies),
    )
    .await;
    assert!(trailing.is_err());
}

#[tokio::test]
async fn peer_that_never_answers_fails_the_session() {
    let (traffic, _) = traffic_agent();
    let connector = InMemoryConnector::new(traffic, usize::MAX);
    let weather = weather_agent(vec![link(connector.clone(), &["traffic"])]);

    let (session_id, mut replies) = weather.open_stream("How is traffic in Pune?").unwrap();
    let messages = collect_until_terminal(&mut replies, Duration::from_secs(5)).await;

    let last = messages.last().unwrap();
    assert_eq!(last.kind, MessageKind::Error);
    let payload: ErrorPayload = last.decode().unwrap();
    assert_eq!(payload.code, ErrorCode::PeerUnreachable);
    assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    assert_eq!(weather.status(&session_id), Some(SessionStatus::Failed));
}

#[tokio::test]
async fn escalation_without_peers_is_reported() {
    let weather = weather_agent(vec![]);
    let (_, mut replies) = weather.open_stream("How is traffic in Pune?").unwrap();
    let messages = collect_until_terminal(&mut replies, Duration::from_secs(5)).await;

    let payload: ErrorPayload = messages.last().unwrap().decode().unwrap();
    assert_eq!(payload.code, ErrorCode::PeerUnreachable);
}

#[tokio::test]
async fn wildcard_peer_catches_unmatched_escalations() {
    let (traffic, _) = traffic_agent();
    let connector = InMemoryConnector::new(traffic, 0);
    let weather = weather_agent(vec![link(connector, &["*"])]);

    let (_, mut replies) = weather.open_stream("How is traffic in Pune?").unwrap();
    let messages = collect_until_terminal(&mut replies, Duration::from_secs(5)).await;
    assert_eq!(messages.last().unwrap().kind, MessageKind::FinalResponse);
}

#[tokio::test]
async fn handoffs_beyond_the_hop_limit_are_refused() {
    let (traffic, _) = traffic_agent();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let payload = EscalatePayload {
        reason: EscalationReason::Requested {
            reason: "traffic".into(),
        },
        query: "How is traffic in Pune?".into(),
        origin: "weather_agent".into(),
        capability: None,
        hops: 4,
        context: vec![],
    };

    let err = traffic
        .accept_handoff(AgentMessage::escalate("s-hops", &payload), tx)
        .unwrap_err();
    assert_eq!(err, AgentError::HopLimitExceeded(3));
}

/// Answers traffic questions with one tool call, so relays carry partials.
fn tool_using_agent() -> Router {
    let engine = FnEngine::new(|ctx| match latest_success(ctx) {
        Some(payload) => Decision::answer(format!(
            "{} in {}, roads are clear.",
            payload["current_temperature"].as_str().unwrap_or("?"),
            payload["city"].as_str().unwrap_or("?")
        )),
        None => Decision::call_tool("get_current_weather", json!({"city": "Pune"})),
    });
    let tool: Arc<dyn Tool> = FakeWeather::new(Duration::ZERO);
    let core = core_with(engine, vec![tool], ExecutorPolicy::default());
    Router::new("traffic_agent", core, vec![], quick_routing())
}

/// First dial reaches a peer that streams one partial and hangs up; later
/// dials reach `peer`.
struct DropsAfterOnePartial {
    peer: Router,
    dials: AtomicUsize,
}

#[async_trait]
impl Connector for DropsAfterOnePartial {
    async fn connect(&self, _address: &str) -> Result<BoxedStream> {
        let (near, far) = tokio::io::duplex(64 * 1024);
        if self.dials.fetch_add(1, Ordering::SeqCst) > 0 {
            tokio::spawn(serve_connection(self.peer.clone(), far, "peer".into()));
            return Ok(Box::new(near));
        }
        tokio::spawn(async move {
            let (read, write) = tokio::io::split(far);
            let mut reader = MessageReader::new(read);
            let mut writer = MessageWriter::new(write);
            let Some(Ok(handoff)) = reader.next().await else {
                return;
            };
            let started = Progress::ToolStarted {
                call_id: "call_0".into(),
                tool_id: "get_current_weather".into(),
            };
            let _ = writer
                .send(&AgentMessage::partial(handoff.session_id, &started))
                .await;
        });
        Ok(Box::new(near))
    }
}

#[tokio::test]
async fn peer_lost_mid_relay_is_retried_without_repeating_partials() {
    let connector = Arc::new(DropsAfterOnePartial {
        peer: tool_using_agent(),
        dials: AtomicUsize::new(0),
    });
    let peer = Arc::new(PeerLink::new(
        "traffic_agent",
        "memory://traffic",
        vec!["traffic".into()],
        connector.clone(),
        BackoffPolicy {
            attempts: 1,
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
        },
    ));
    let weather = weather_agent(vec![peer]);

    let (_, mut replies) = weather.open_stream("How is traffic in Pune?").unwrap();
    let messages = collect_until_terminal(&mut replies, Duration::from_secs(5)).await;

    let partials: Vec<&serde_json::Value> = messages
        .iter()
        .filter(|m| m.kind == MessageKind::PartialResponse)
        .map(|m| &m.payload)
        .collect();
    for (i, payload) in partials.iter().enumerate() {
        assert!(
            !partials[..i].contains(payload),
            "partial relayed twice: {payload}"
        );
    }
    let started = partials
        .iter()
        .filter(|p| matches!(serde_json::from_value::<Progress>((**p).clone()), Ok(Progress::ToolStarted { .. })))
        .count();
    assert_eq!(started, 1);

    assert_eq!(messages.iter().filter(|m| m.is_terminal()).count(), 1);
    let answer: FinalPayload = messages.last().unwrap().decode().unwrap();
    assert_eq!(answer.answer, "28.0°C in Pune, roads are clear.");
    assert_eq!(connector.dials.load(Ordering::SeqCst), 2);

    let trailing = tokio::time::timeout(
        Duration::from_millis(100),
        tokio_stream::StreamExt::next(&mut replies),
    )
    .await;
    assert!(trailing.is_err());
}

#[tokio::test]
async fn discovery_returns_the_peer_card() {
    let connector = InMemoryConnector::new(tool_using_agent(), 0);
    let peer = link(connector, &["traffic"]);

    let card = peer.discover(Duration::from_secs(5)).await.unwrap();
    assert_eq!(card.name, "traffic_agent");
    let skills: Vec<&str> = card.skills.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(skills, vec!["get_current_weather"]);
}
