//! Session Management
//!
//! A session is the ordered list of turns asked under one id. It is owned
//! by the [`SessionController`](crate::controller::SessionController).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::turn::{TerminationReason, Turn};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    /// Ended by the caller or reaped after idling
    Closed,
}

/// A complete agent session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    /// Completed turns, oldest first
    pub turns: Vec<Turn>,

    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,

    pub status: SessionStatus,

    /// Termination reason of the most recent turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationReason>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
            status: SessionStatus::Active,
            termination: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }

    /// Append a terminal turn
    pub fn push_turn(&mut self, turn: Turn) -> Result<()> {
        if !self.is_active() {
            return Err(AgentError::Session(format!("session {} is closed", self.id)));
        }
        let Some(answer) = turn.answer() else {
            return Err(AgentError::Session(format!("turn {} has no answer", turn.id)));
        };
        self.termination = Some(answer.termination);
        self.turns.push(turn);
        self.touch();
        Ok(())
    }

    /// End the session
    pub fn close(&mut self) {
        self.status = SessionStatus::Closed;
        self.touch();
    }

    /// Idle for longer than `timeout` as of `now`
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now - self.updated_at > timeout
    }

    /// Short title from the first question
    pub fn title(&self) -> String {
        self.turns.first().map_or_else(
            || format!("Session {}", self.id.as_str().chars().take(8).collect::<String>()),
            |turn| {
                let preview: String = turn.input.chars().take(50).collect();
                if turn.input.chars().count() > 50 {
                    format!("{preview}...")
                } else {
                    preview
                }
            },
        )
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::{Answer, AnswerStatus};

    fn answered_turn(session: &SessionId, input: &str) -> Turn {
        let mut turn = Turn::new(session.clone(), input);
        let answer = Answer::new(turn.id.clone(), "n/a", AnswerStatus::Unsupported, TerminationReason::Error, vec![]);
        turn.attach_answer(answer).unwrap();
        turn
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new(SessionId::from_string("abc"));
        assert!(session.is_active());
        assert_eq!(session.turn_count(), 0);
        assert_eq!(session.title(), "Session abc");
    }

    #[test]
    fn test_push_turn_records_termination() {
        let id = SessionId::new();
        let mut session = Session::new(id.clone());
        session.push_turn(answered_turn(&id, "When was Doom released?")).unwrap();
        assert_eq!(session.termination, Some(TerminationReason::Error));
        assert_eq!(session.title(), "When was Doom released?");

        assert!(session.push_turn(Turn::new(id.clone(), "no answer")).is_err());

        session.close();
        assert!(session.push_turn(answered_turn(&id, "late")).is_err());
    }

    #[test]
    fn test_idle_detection() {
        let session = Session::new(SessionId::new());
        let later = session.updated_at + chrono::Duration::seconds(120);
        assert!(session.is_idle(later, chrono::Duration::seconds(60)));
        assert!(!session.is_idle(later, chrono::Duration::seconds(600)));
    }
}
