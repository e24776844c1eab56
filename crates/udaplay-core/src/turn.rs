//! Turns, Actions and Answers
//!
//! A [`Turn`] is the append-only record of one question: every model
//! decision, tool call and tool result in chronological order, and finally
//! the [`Answer`].

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::retrieval::{rank_evidence, Evidence};
use crate::session::SessionId;
use crate::tool::{FailureKind, ToolArguments, ToolCall, ToolResult};

/// Unique turn identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of validating a call before dispatch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid { reason: String },
    UnknownTool,
}

/// What the model decided at a `Deciding` step
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "next", rename_all = "snake_case")]
pub enum DecisionOutcome {
    CallTool { tool: String, arguments: ToolArguments },
    Answer { text: String, citations: Vec<String> },
    /// Reply that failed to parse
    Malformed { error: String },
}

/// One step in a turn
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    ToolCall {
        call: ToolCall,
        validation: ValidationStatus,
        /// 1 for the first attempt, 2 for the retry
        attempt: u8,
    },
    ToolResult {
        result: ToolResult,
    },
    ModelDecision {
        #[serde(skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
        outcome: DecisionOutcome,
    },
}

/// A timestamped step belonging to a turn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    pub turn_id: TurnId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ActionKind,
}

/// Final classification of an answer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// Model answer bound to evidence retrieved in this turn
    Final,
    /// No valid evidence backs the answer
    Unsupported,
    /// Forced out of the loop; best effort from accumulated evidence
    StepLimited,
    Cancelled,
}

/// Why the turn stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Answered,
    StepLimit,
    LoopDetected,
    MalformedModelOutput,
    Error,
    Cancelled,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Answered => "answered",
            Self::StepLimit => "step-limit",
            Self::LoopDetected => "loop-detected",
            Self::MalformedModelOutput => "malformed-model-output",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The caller-facing result of a turn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Answer {
    pub turn_id: TurnId,
    pub text: String,
    pub status: AnswerStatus,
    pub termination: TerminationReason,
    /// Evidence backing the answer, best first
    pub evidence: Vec<Evidence>,
    pub answered_at: DateTime<Utc>,
}

impl Answer {
    pub fn new(
        turn_id: TurnId,
        text: impl Into<String>,
        status: AnswerStatus,
        termination: TerminationReason,
        evidence: Vec<Evidence>,
    ) -> Self {
        // an answer without evidence can never be final
        let status = if status == AnswerStatus::Final && evidence.is_empty() {
            AnswerStatus::Unsupported
        } else {
            status
        };
        Self {
            turn_id,
            text: text.into(),
            status,
            termination,
            evidence,
            answered_at: Utc::now(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.status == AnswerStatus::Final
    }
}

/// One question/answer exchange
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub session_id: SessionId,
    pub input: String,
    pub started_at: DateTime<Utc>,
    actions: Vec<Action>,
    answer: Option<Answer>,
}

impl Turn {
    pub fn new(session_id: SessionId, input: impl Into<String>) -> Self {
        Self {
            id: TurnId::new(),
            session_id,
            input: input.into(),
            started_at: Utc::now(),
            actions: Vec::new(),
            answer: None,
        }
    }

    /// Append an action; timestamps never go backwards within a turn
    pub fn record(&mut self, kind: ActionKind) -> Result<()> {
        if self.answer.is_some() {
            return Err(AgentError::Session(format!("turn {} is already terminal", self.id)));
        }
        let floor = self.actions.last().map_or(self.started_at, |a| a.timestamp);
        let timestamp = Utc::now().max(floor);
        self.actions.push(Action {
            turn_id: self.id.clone(),
            timestamp,
            kind,
        });
        Ok(())
    }

    /// Attach the answer, making the turn terminal
    pub fn attach_answer(&mut self, answer: Answer) -> Result<()> {
        if self.answer.is_some() {
            return Err(AgentError::Session(format!("turn {} already has an answer", self.id)));
        }
        let pending = self.pending_calls();
        if !pending.is_empty() {
            return Err(AgentError::Session(format!(
                "turn {} has tool calls without results: {}",
                self.id,
                pending.join(", ")
            )));
        }
        self.answer = Some(answer);
        Ok(())
    }

    /// End a turn its caller walked away from.
    ///
    /// Calls still in flight get a `cancelled` result and the turn gets a
    /// cancelled answer. A terminal turn is left untouched.
    pub fn abandon(&mut self) -> Result<()> {
        if self.is_terminal() {
            return Ok(());
        }
        let pending: Vec<ToolCall> = self
            .pending_calls()
            .iter()
            .filter_map(|id| {
                self.actions.iter().find_map(|a| match &a.kind {
                    ActionKind::ToolCall { call, .. } if &call.id == id => Some(call.clone()),
                    _ => None,
                })
            })
            .collect();
        for call in &pending {
            self.record(ActionKind::ToolResult {
                result: ToolResult::failure(call, FailureKind::Cancelled, "turn abandoned"),
            })?;
        }
        self.attach_answer(Answer::new(
            self.id.clone(),
            AgentError::Cancelled.user_message(),
            AnswerStatus::Cancelled,
            TerminationReason::Cancelled,
            Vec::new(),
        ))
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub const fn answer(&self) -> Option<&Answer> {
        self.answer.as_ref()
    }

    pub const fn is_terminal(&self) -> bool {
        self.answer.is_some()
    }

    pub fn tool_call_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a.kind, ActionKind::ToolCall { .. }))
            .count()
    }

    /// Ids of calls that have no result yet
    pub fn pending_calls(&self) -> Vec<String> {
        let answered: HashSet<&str> = self
            .actions
            .iter()
            .filter_map(|a| match &a.kind {
                ActionKind::ToolResult { result } => Some(result.call_id.as_str()),
                _ => None,
            })
            .collect();
        self.actions
            .iter()
            .filter_map(|a| match &a.kind {
                ActionKind::ToolCall { call, .. } if !answered.contains(call.id.as_str()) => Some(call.id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every call has exactly one result
    pub fn is_balanced(&self) -> bool {
        let mut results: HashMap<&str, usize> = HashMap::new();
        let mut calls = 0usize;
        for action in &self.actions {
            match &action.kind {
                ActionKind::ToolCall { .. } => calls += 1,
                ActionKind::ToolResult { result } => *results.entry(result.call_id.as_str()).or_default() += 1,
                ActionKind::ModelDecision { .. } => {}
            }
        }
        self.pending_calls().is_empty() && results.len() == calls && results.values().all(|n| *n == 1)
    }

    /// Evidence recorded in this turn's tool results, de-duplicated by
    /// source (highest score kept), best first
    pub fn evidence_pool(&self) -> Vec<Evidence> {
        let mut best: HashMap<&str, &Evidence> = HashMap::new();
        for action in &self.actions {
            if let ActionKind::ToolResult { result } = &action.kind {
                for evidence in result.evidence() {
                    best.entry(evidence.source_id.as_str())
                        .and_modify(|current| {
                            if evidence.score > current.score {
                                *current = evidence;
                            }
                        })
                        .or_insert(evidence);
                }
            }
        }
        let mut pool: Vec<Evidence> = best.into_values().cloned().collect();
        rank_evidence(&mut pool);
        pool
    }
}
