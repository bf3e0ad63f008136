use crate::agent::{ConversationContext, Turn};
use crate::error::AgentError;
use crate::mcp::{FailureKind, ToolExecutor, ToolInvocationResult};
use crate::traits::{Decision, ReasoningEngine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_MAX_TOOL_CALLS: usize = 5;
const DEFAULT_MAX_FAILURES: usize = 2;
const DEFAULT_MAX_QUERY_CHARS: usize = 4_000;

#[derive(Debug, Clone, Copy)]
pub struct LoopLimits {
    pub max_tool_calls: usize,
    pub max_failures: usize,
    pub max_query_chars: usize,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            max_failures: DEFAULT_MAX_FAILURES,
            max_query_chars: DEFAULT_MAX_QUERY_CHARS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Parsing,
    Deciding,
    ToolCalling,
    Answering,
    Escalating,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    ToolCallLimitExceeded { limit: usize },
    RepeatedFailure { failures: usize },
    Requested { reason: String },
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolCallLimitExceeded { limit } => {
                write!(f, "tool call limit of {limit} exceeded")
            }
            Self::RepeatedFailure { failures } => {
                write!(f, "{failures} consecutive failures")
            }
            Self::Requested { reason } => write!(f, "{reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Answered(String),
    Escalated(EscalationReason),
    Failed(AgentError),
}

/// Incremental progress of a run, delivered while it is still in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Progress {
    ToolStarted {
        call_id: String,
        tool_id: String,
    },
    ToolFinished {
        call_id: String,
        tool_id: String,
        success: bool,
    },
    Note {
        text: String,
    },
}

/// Receives progress synchronously, in the order it is produced.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: Progress);
}

impl ProgressSink for () {
    fn emit(&self, _progress: Progress) {}
}

enum Step {
    Parsing,
    Deciding,
    ToolCalling { tool_id: String, arguments: Value },
    Answering(String),
    Escalating(EscalationReason),
}

impl Step {
    fn state(&self) -> AgentState {
        match self {
            Self::Parsing => AgentState::Parsing,
            Self::Deciding => AgentState::Deciding,
            Self::ToolCalling { .. } => AgentState::ToolCalling,
            Self::Answering(_) => AgentState::Answering,
            Self::Escalating(_) => AgentState::Escalating,
        }
    }
}

/// Drives one query through decide / call-tool cycles until it is answered,
/// escalated or fails.
pub struct AgentCore {
    engine: Arc<dyn ReasoningEngine>,
    executor: Arc<ToolExecutor>,
    limits: LoopLimits,
}

impl AgentCore {
    pub fn new(engine: Arc<dyn ReasoningEngine>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            engine,
            executor,
            limits: LoopLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> LoopLimits {
        self.limits
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    pub async fn run(
        &self,
        context: &mut ConversationContext,
        query: &str,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> AgentOutcome {
        let max_failures = self.limits.max_failures.max(1);
        let mut tool_calls = 0usize;
        let mut failures = 0usize;
        let mut step = Step::Parsing;

        loop {
            if cancel.is_cancelled() {
                return self.finish(context, AgentOutcome::Failed(AgentError::Cancelled));
            }
            debug!(session_id = %context.session_id(), state = ?step.state(), "agent step");

            step = match step {
                Step::Parsing => match validate_query(query, self.limits.max_query_chars) {
                    Ok(text) => {
                        context.push(Turn::Query { text });
                        Step::Deciding
                    }
                    Err(e) => return self.finish(context, AgentOutcome::Failed(e)),
                },
                Step::Deciding => {
                    let decision = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return self.finish(context, AgentOutcome::Failed(AgentError::Cancelled));
                        }
                        decision = self.engine.decide(context) => decision,
                    };

                    match decision {
                        Ok(Decision::CallTool { tool_id, arguments }) => {
                            if tool_calls >= self.limits.max_tool_calls {
                                Step::Escalating(EscalationReason::ToolCallLimitExceeded {
                                    limit: self.limits.max_tool_calls,
                                })
                            } else {
                                Step::ToolCalling { tool_id, arguments }
                            }
                        }
                        Ok(Decision::Answer { text }) => Step::Answering(text),
                        Ok(Decision::Escalate { reason }) => {
                            Step::Escalating(EscalationReason::Requested { reason })
                        }
                        Err(e) => {
                            failures += 1;
                            warn!(session_id = %context.session_id(), failures, "reasoning engine error: {e:#}");
                            context.push(Turn::Note {
                                text: format!("reasoning engine error: {e}"),
                            });
                            if failures >= max_failures {
                                Step::Escalating(EscalationReason::RepeatedFailure { failures })
                            } else {
                                Step::Deciding
                            }
                        }
                    }
                }
                Step::ToolCalling { tool_id, arguments } => {
                    tool_calls += 1;
                    let call_id = format!("call_{}", context.tool_call_count());
                    context.push(Turn::ToolCall {
                        call_id: call_id.clone(),
                        tool_id: tool_id.clone(),
                        arguments: arguments.clone(),
                    });
                    progress.emit(Progress::ToolStarted {
                        call_id: call_id.clone(),
                        tool_id: tool_id.clone(),
                    });

                    let executed = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return self.finish(context, AgentOutcome::Failed(AgentError::Cancelled));
                        }
                        executed = self.executor.execute(&tool_id, &arguments) => executed,
                    };
                    let result = executed.unwrap_or_else(|e| {
                        ToolInvocationResult::failure(FailureKind::Rejected, e.to_string())
                    });
                    let success = result.is_success();

                    context.push(Turn::ToolResult {
                        call_id: call_id.clone(),
                        tool_id: tool_id.clone(),
                        result,
                    });
                    progress.emit(Progress::ToolFinished {
                        call_id,
                        tool_id,
                        success,
                    });

                    if success {
                        failures = 0;
                        Step::Deciding
                    } else {
                        failures += 1;
                        if failures >= max_failures {
                            Step::Escalating(EscalationReason::RepeatedFailure { failures })
                        } else {
                            Step::Deciding
                        }
                    }
                }
                Step::Answering(text) => {
                    let answer = format_answer(&text, context);
                    context.push(Turn::Answer {
                        text: answer.clone(),
                    });
                    return self.finish(context, AgentOutcome::Answered(answer));
                }
                Step::Escalating(reason) => {
                    context.push(Turn::Note {
                        text: format!("escalating: {reason}"),
                    });
                    progress.emit(Progress::Note {
                        text: format!("escalating: {reason}"),
                    });
                    return self.finish(context, AgentOutcome::Escalated(reason));
                }
            };
        }
    }

    fn finish(&self, context: &ConversationContext, outcome: AgentOutcome) -> AgentOutcome {
        let summary = match &outcome {
            AgentOutcome::Answered(_) => "answered",
            AgentOutcome::Escalated(_) => "escalated",
            AgentOutcome::Failed(_) => "failed",
        };
        info!(
            session_id = %context.session_id(),
            state = ?AgentState::Done,
            outcome = summary,
            turns = context.len(),
            "agent run finished"
        );
        outcome
    }
}

fn validate_query(query: &str, max_chars: usize) -> Result<String, AgentError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(AgentError::MalformedQuery("query is empty".into()));
    }
    if trimmed.chars().count() > max_chars {
        return Err(AgentError::MalformedQuery(format!(
            "query exceeds {max_chars} characters"
        )));
    }
    if trimmed.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return Err(AgentError::MalformedQuery(
            "query contains control characters".into(),
        ));
    }
    Ok(trimmed.to_string())
}

fn format_answer(text: &str, context: &ConversationContext) -> String {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    let latest = context.current_exchange().iter().rev().find_map(|t| match t {
        Turn::ToolResult {
            tool_id,
            result: ToolInvocationResult::Success { payload },
            ..
        } => Some((tool_id, payload)),
        _ => None,
    });
    match latest {
        Some((tool_id, payload)) => format!("Result from {tool_id}: {payload}"),
        None => "I could not find an answer to that.".to_string(),
    }
}
