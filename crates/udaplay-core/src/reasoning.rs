//! Reasoning State Machine
//!
//! Drives one turn from the user's question to an attached [`Answer`]:
//!
//! ```text
//!   Deciding ──tool──▶ ToolCalling ──▶ Observing ──┐
//!      ▲                    │ retry once            │
//!      └────────────────────┴───────────────────────┘
//!      │
//!      └──answer / step limit / loop / malformed / cancel──▶ Finalizing ──▶ Terminal
//! ```
//!
//! Every ToolCall recorded on the turn gets exactly one ToolResult before
//! the machine moves on, including calls interrupted by cancellation.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::context::{Message, WorkingContext};
use crate::decision::{parse_decision, Decision, ProposedAnswer, CORRECTIVE_INSTRUCTION, DECISION_FORMAT};
use crate::error::{AgentError, Result};
use crate::memory::{MemoryRecord, RecalledMemory};
use crate::provider::{Completion, LlmProvider};
use crate::retrieval::Evidence;
use crate::tool::{FailureKind, ToolCall, ToolRegistry, ToolResult};
use crate::turn::{
    ActionKind, Answer, AnswerStatus, DecisionOutcome, TerminationReason, Turn, ValidationStatus,
};

/// Evidence items carried by a forced (best-effort) answer
const BEST_EFFORT_EVIDENCE: usize = 3;

const NO_EVIDENCE_HINT: &str =
    "No evidence was found. Answer from the context you already have, or say that the answer is unknown.";

/// Why the loop stopped deciding
#[derive(Debug)]
enum Finalization {
    Proposed(ProposedAnswer),
    /// Step limit or loop: best effort from accumulated evidence
    Forced(TerminationReason),
    Failed {
        termination: TerminationReason,
        message: String,
    },
    Cancelled,
}

#[derive(Debug)]
enum TurnState {
    Deciding,
    ToolCalling { call: ToolCall, attempt: u8 },
    Observing(ToolResult),
    Finalizing(Finalization),
}

/// Per-turn bookkeeping that is not part of the transcript
#[derive(Default)]
struct LoopGuard {
    /// Last call the model asked for
    last_request: Option<ToolCall>,
    /// Whether that call brought evidence not seen before in the turn
    last_gained: bool,
    /// A corrective instruction is pending for the last malformed reply
    corrective_sent: bool,
}

impl LoopGuard {
    fn is_repeat(&self, call: &ToolCall) -> bool {
        !self.last_gained && self.last_request.as_ref().is_some_and(|prev| prev.same_request(call))
    }
}

/// The reasoning engine: one model, one tool registry, fixed limits
pub struct ReasoningEngine {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: EngineConfig,
}

impl ReasoningEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: EngineConfig) -> Self {
        Self { provider, tools, config }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// System prompt with tool descriptions and the decision format
    pub fn system_prompt(&self) -> String {
        let mut prompt = self.config.system_prompt.clone();
        if !self.tools.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(self.tools.prompt_section().trim_end());
        }
        prompt.push_str("\n\n");
        prompt.push_str(DECISION_FORMAT);
        prompt
    }

    /// Initial `Deciding` context: prompt, recalled memory, question
    pub fn initial_context(
        &self,
        question: &str,
        short_term: &[MemoryRecord],
        long_term: &[RecalledMemory],
    ) -> WorkingContext {
        let mut context = WorkingContext::new(self.system_prompt()).with_max_tokens(self.config.max_context_tokens);
        context.push_memory(short_term, long_term);
        context.push(Message::user(question));
        context
    }

    /// Run `turn` to Terminal and return the attached answer.
    ///
    /// Tool and model failures end in an answer; an `Err` means the turn
    /// was already terminal.
    pub async fn run(&self, turn: &mut Turn, mut context: WorkingContext, cancel: &CancellationToken) -> Result<Answer> {
        let mut guard = LoopGuard::default();
        let mut state = TurnState::Deciding;

        loop {
            if cancel.is_cancelled() && !matches!(state, TurnState::Finalizing(_)) {
                state = TurnState::Finalizing(Finalization::Cancelled);
            }

            state = match state {
                TurnState::Deciding => self.decide(turn, &mut context, &mut guard, cancel).await?,
                TurnState::ToolCalling { call, attempt } => self.call_tool(turn, call, attempt, cancel).await?,
                TurnState::Observing(result) => {
                    let gained = gained_new_evidence(turn, &result);
                    let mut observation = result.observation();
                    if result.failure_kind() == Some(FailureKind::NoEvidenceAvailable) {
                        observation.push_str("\n\n");
                        observation.push_str(NO_EVIDENCE_HINT);
                    }
                    context.push(Message::tool(observation, result.call_id.clone()));
                    guard.last_gained = gained;
                    TurnState::Deciding
                }
                TurnState::Finalizing(finalization) => {
                    let answer = self.finalize(turn, finalization);
                    turn.attach_answer(answer.clone())?;
                    tracing::info!(
                        session = %turn.session_id,
                        turn = %turn.id,
                        status = ?answer.status,
                        termination = %answer.termination,
                        tool_calls = turn.tool_call_count(),
                        "turn finished"
                    );
                    return Ok(answer);
                }
            };
        }
    }

    async fn decide(
        &self,
        turn: &mut Turn,
        context: &mut WorkingContext,
        guard: &mut LoopGuard,
        cancel: &CancellationToken,
    ) -> Result<TurnState> {
        context.truncate_to_fit();
        let completion = match self.complete(context, cancel).await {
            Ok(completion) => completion,
            Err(AgentError::Cancelled) => return Ok(TurnState::Finalizing(Finalization::Cancelled)),
            Err(e) => {
                tracing::warn!(turn = %turn.id, error = %e, "model call failed");
                return Ok(TurnState::Finalizing(Finalization::Failed {
                    termination: TerminationReason::Error,
                    message: e.user_message(),
                }));
            }
        };
        context.push(Message::assistant(completion.content.clone()));

        let decision = parse_decision(&completion.content);
        if decision.is_ok() {
            // the correction budget covers one malformed reply at a time
            guard.corrective_sent = false;
        }
        match decision {
            Ok(Decision::CallTool { call, rationale }) => {
                turn.record(ActionKind::ModelDecision {
                    rationale,
                    outcome: DecisionOutcome::CallTool {
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })?;

                if turn.tool_call_count() >= self.config.max_tool_calls {
                    tracing::warn!(turn = %turn.id, limit = self.config.max_tool_calls, "step limit reached");
                    return Ok(TurnState::Finalizing(Finalization::Forced(TerminationReason::StepLimit)));
                }
                if guard.is_repeat(&call) {
                    tracing::warn!(turn = %turn.id, tool = %call.name, "repeated tool call without new evidence");
                    return Ok(TurnState::Finalizing(Finalization::Forced(TerminationReason::LoopDetected)));
                }
                guard.last_request = Some(call.clone());
                Ok(TurnState::ToolCalling { call, attempt: 1 })
            }
            Ok(Decision::Answer(proposed)) => {
                turn.record(ActionKind::ModelDecision {
                    rationale: proposed.rationale.clone(),
                    outcome: DecisionOutcome::Answer {
                        text: proposed.text.clone(),
                        citations: proposed.citations.clone(),
                    },
                })?;
                Ok(TurnState::Finalizing(Finalization::Proposed(proposed)))
            }
            Err(e) => {
                tracing::warn!(turn = %turn.id, error = %e, "malformed model output");
                turn.record(ActionKind::ModelDecision {
                    rationale: None,
                    outcome: DecisionOutcome::Malformed { error: e.to_string() },
                })?;
                if guard.corrective_sent {
                    return Ok(TurnState::Finalizing(Finalization::Failed {
                        termination: TerminationReason::MalformedModelOutput,
                        message: e.user_message(),
                    }));
                }
                guard.corrective_sent = true;
                context.push(Message::user(CORRECTIVE_INSTRUCTION));
                Ok(TurnState::Deciding)
            }
        }
    }

    /// Model call raced against cancellation; one retry on retryable errors
    async fn complete(&self, context: &WorkingContext, cancel: &CancellationToken) -> Result<Completion> {
        let mut retried = false;
        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AgentError::Cancelled),
                outcome = self.complete_once(context) => outcome,
            };
            match outcome {
                Err(e) if e.is_retryable() && !retried => {
                    tracing::warn!(error = %e, "retrying model call");
                    retried = true;
                }
                other => return other,
            }
        }
    }

    async fn complete_once(&self, context: &WorkingContext) -> Result<Completion> {
        let request = self.provider.complete(context.messages(), &self.config.generation);
        match self.config.model_timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| AgentError::Timeout {
                operation: "model call".into(),
                millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })?,
            None => request.await,
        }
    }

    async fn call_tool(
        &self,
        turn: &mut Turn,
        call: ToolCall,
        attempt: u8,
        cancel: &CancellationToken,
    ) -> Result<TurnState> {
        let validation = match self.tools.check(&call) {
            Ok(()) => ValidationStatus::Valid,
            Err(AgentError::ToolNotFound(_)) => ValidationStatus::UnknownTool,
            Err(e) => ValidationStatus::Invalid { reason: e.to_string() },
        };
        tracing::debug!(turn = %turn.id, tool = %call.name, attempt, "dispatching tool");
        turn.record(ActionKind::ToolCall {
            call: call.clone(),
            validation,
            attempt,
        })?;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => ToolResult::failure(&call, FailureKind::Cancelled, "turn cancelled"),
            result = self.tools.dispatch(&call, self.config.tool_timeout) => result,
        };
        turn.record(ActionKind::ToolResult { result: result.clone() })?;

        if result.failure_kind() == Some(FailureKind::Cancelled) {
            return Ok(TurnState::Finalizing(Finalization::Cancelled));
        }
        if self.should_retry(turn, &call, &result, attempt) {
            tracing::warn!(turn = %turn.id, tool = %call.name, kind = ?result.failure_kind(), "retrying tool call");
            return Ok(TurnState::ToolCalling {
                call: call.retry(),
                attempt: attempt + 1,
            });
        }
        Ok(TurnState::Observing(result))
    }

    fn should_retry(&self, turn: &Turn, call: &ToolCall, result: &ToolResult, attempt: u8) -> bool {
        self.config.retry_failed_tools
            && attempt == 1
            && result.failure_kind().is_some_and(FailureKind::is_transient)
            && self.tools.spec(&call.name).is_some_and(|spec| spec.idempotent)
            && turn.tool_call_count() < self.config.max_tool_calls
    }

    fn finalize(&self, turn: &Turn, finalization: Finalization) -> Answer {
        let turn_id = turn.id.clone();
        match finalization {
            Finalization::Proposed(proposed) => {
                let (status, evidence) = bind_citations(turn, &proposed);
                Answer::new(turn_id, proposed.text, status, TerminationReason::Answered, evidence)
            }
            Finalization::Forced(termination) => {
                let mut evidence = turn.evidence_pool();
                evidence.truncate(BEST_EFFORT_EVIDENCE);
                let status = if evidence.is_empty() {
                    AnswerStatus::Unsupported
                } else {
                    AnswerStatus::StepLimited
                };
                Answer::new(turn_id, best_effort_text(&evidence), status, termination, evidence)
            }
            Finalization::Failed { termination, message } => {
                Answer::new(turn_id, message, AnswerStatus::Unsupported, termination, Vec::new())
            }
            Finalization::Cancelled => Answer::new(
                turn_id,
                AgentError::Cancelled.user_message(),
                AnswerStatus::Cancelled,
                TerminationReason::Cancelled,
                Vec::new(),
            ),
        }
    }
}

/// Bind a proposed answer to evidence retrieved in this turn
fn bind_citations(turn: &Turn, proposed: &ProposedAnswer) -> (AnswerStatus, Vec<Evidence>) {
    let pool = turn.evidence_pool();
    if proposed.citations.is_empty() {
        return (AnswerStatus::Final, pool);
    }

    let mut bound = Vec::new();
    let mut unknown = Vec::new();
    for citation in &proposed.citations {
        match pool.iter().find(|e| &e.source_id == citation) {
            Some(evidence) if !bound.iter().any(|b: &Evidence| &b.source_id == citation) => bound.push(evidence.clone()),
            Some(_) => {}
            None => unknown.push(citation.as_str()),
        }
    }

    if unknown.is_empty() {
        (AnswerStatus::Final, bound)
    } else {
        tracing::warn!(turn = %turn.id, citations = ?unknown, "answer cites evidence not retrieved in this turn");
        (AnswerStatus::Unsupported, bound)
    }
}

/// Whether `result` carries a source no earlier result in the turn had
fn gained_new_evidence(turn: &Turn, result: &ToolResult) -> bool {
    let known: HashSet<&str> = turn
        .actions()
        .iter()
        .filter_map(|action| match &action.kind {
            ActionKind::ToolResult { result: earlier } if earlier.call_id != result.call_id => Some(earlier.evidence()),
            _ => None,
        })
        .flatten()
        .map(|e| e.source_id.as_str())
        .collect();
    result.evidence().iter().any(|e| !known.contains(e.source_id.as_str()))
}

fn best_effort_text(evidence: &[Evidence]) -> String {
    if evidence.is_empty() {
        return "I could not find evidence to answer this question.".into();
    }
    let mut text = String::from("I could not finish researching this question. The strongest evidence found:\n");
    for e in evidence {
        text.push_str(&format!("- [{}] {}\n", e.source_id, e.snippet));
    }
    text.trim_end().to_string()
}
