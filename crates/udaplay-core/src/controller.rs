//! Session Controller
//!
//! Owns session lifecycles and wires the reasoning engine to memory:
//!
//! 1. recall the session's short-term buffer and relevant long-term records
//! 2. run the engine to Terminal
//! 3. write the exchange to short-term memory, and promote final answers
//!    to long-term memory
//!
//! Capabilities are passed in explicitly; nothing here reaches for a global
//! client.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, MemoryConfig, SessionConfig};
use crate::embedding::embed_within;
use crate::error::{AgentError, Result};
use crate::memory::{LongTermQuery, MemoryDraft, MemoryStore, RecalledMemory, RecordKind};
use crate::provider::LlmProvider;
use crate::reasoning::ReasoningEngine;
use crate::session::{Session, SessionId};
use crate::tool::ToolRegistry;
use crate::turn::{Answer, AnswerStatus, Turn};

/// External capabilities the controller is built from
pub struct Capabilities {
    pub provider: Arc<dyn LlmProvider>,
    pub tools: Arc<ToolRegistry>,
    pub memory: Arc<MemoryStore>,
}

type SessionSlot = Arc<Mutex<Session>>;

/// Request/response entry point for callers
pub struct SessionController {
    engine: ReasoningEngine,
    memory: Arc<MemoryStore>,
    memory_config: MemoryConfig,
    session_config: SessionConfig,
    sessions: RwLock<HashMap<SessionId, SessionSlot>>,
}

impl SessionController {
    pub fn new(capabilities: Capabilities, config: AgentConfig) -> Self {
        let Capabilities { provider, tools, memory } = capabilities;
        Self {
            engine: ReasoningEngine::new(provider, tools, config.engine),
            memory,
            memory_config: config.memory,
            session_config: config.session,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub const fn engine(&self) -> &ReasoningEngine {
        &self.engine
    }

    pub const fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Ask a question; the session is created on first use
    pub async fn ask(&self, session_id: &SessionId, question: &str) -> Result<Answer> {
        self.ask_with_cancel(session_id, question, CancellationToken::new()).await
    }

    /// Ask a question that the caller may cancel.
    ///
    /// Turns within one session run one at a time.
    pub async fn ask_with_cancel(
        &self,
        session_id: &SessionId,
        question: &str,
        cancel: CancellationToken,
    ) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AgentError::Session("question must not be empty".into()));
        }

        let slot = self.session_slot(session_id).await;
        let session = slot.lock_owned().await;
        if !session.is_active() {
            return Err(AgentError::Session(format!("session {session_id} was closed")));
        }
        let mut in_flight = TurnInFlight {
            session,
            turn: Turn::new(session_id.clone(), question),
            committed: false,
        };

        let short_term = self.memory.recall_short_term(session_id).await;
        let long_term = tokio::select! {
            biased;
            () = cancel.cancelled() => Vec::new(),
            recalled = self.recall_long_term(question) => recalled,
        };
        tracing::debug!(
            session = %session_id,
            short_term = short_term.len(),
            long_term = long_term.len(),
            "memory loaded"
        );

        let context = self.engine.initial_context(question, &short_term, &long_term);
        let answer = self.engine.run(&mut in_flight.turn, context, &cancel).await?;

        if answer.status != AnswerStatus::Cancelled {
            self.persist_exchange(session_id, question, &answer).await;
        }
        in_flight.commit()?;
        Ok(answer)
    }

    /// Close a session and discard its short-term memory.
    ///
    /// Returns the closed session, or `None` if it did not exist.
    pub async fn end_session(&self, session_id: &SessionId) -> Option<Session> {
        let slot = self.sessions.write().await.remove(session_id)?;
        let mut session = slot.lock().await;
        session.close();
        let flushed = self.memory.flush_session(session_id).await;
        tracing::info!(session = %session_id, turns = session.turn_count(), flushed, "session ended");
        Some(session.clone())
    }

    /// Snapshot of a live session
    pub async fn transcript(&self, session_id: &SessionId) -> Option<Session> {
        let slot = self.sessions.read().await.get(session_id).cloned()?;
        let session = slot.lock().await;
        Some(session.clone())
    }

    /// Close every session idle longer than the configured timeout.
    ///
    /// Sessions with a turn in flight are busy, not idle, and are skipped.
    pub async fn reap_idle(&self) -> usize {
        let timeout = match chrono::Duration::from_std(self.session_config.idle_timeout) {
            Ok(timeout) => timeout,
            Err(e) => {
                tracing::error!(error = %e, "idle timeout out of range");
                return 0;
            }
        };
        let now = Utc::now();

        let candidates: Vec<(SessionId, SessionSlot)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut reaped = 0;
        for (id, slot) in candidates {
            let idle = match slot.try_lock() {
                Ok(session) => session.is_idle(now, timeout),
                Err(_) => false,
            };
            if idle && self.end_session(&id).await.is_some() {
                reaped += 1;
            }
        }
        if reaped > 0 {
            tracing::info!(reaped, "idle sessions closed");
        }
        reaped
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn session_slot(&self, session_id: &SessionId) -> SessionSlot {
        if let Some(slot) = self.sessions.read().await.get(session_id) {
            return slot.clone();
        }
        self.sessions
            .write()
            .await
            .entry(session_id.clone())
            .or_insert_with(|| {
                tracing::info!(session = %session_id, "session created");
                Arc::new(Mutex::new(Session::new(session_id.clone())))
            })
            .clone()
    }

    /// Relevant long-term records; an embedding failure means no long-term context
    async fn recall_long_term(&self, question: &str) -> Vec<RecalledMemory> {
        if self.memory_config.long_term_recall_k == 0 {
            return Vec::new();
        }
        let embedder = self.memory.long_term().embedder();
        let embedding = match embed_within(embedder.as_ref(), question, self.memory_config.embedding_timeout).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "long-term recall skipped");
                return Vec::new();
            }
        };
        let query = LongTermQuery::new(embedding, self.memory_config.long_term_recall_k)
            .namespace(self.memory_config.namespace.clone());
        let mut recalled = self.memory.recall_long_term_filtered(&query).await;
        recalled.retain(|r| r.similarity >= self.memory_config.long_term_min_similarity);
        recalled
    }

    async fn persist_exchange(&self, session_id: &SessionId, question: &str, answer: &Answer) {
        let exchange = format!("Q: {question}\nA: {}", answer.text);
        if let Err(e) = self.memory.remember(session_id, MemoryDraft::short_term(exchange.clone())).await {
            tracing::warn!(session = %session_id, error = %e, "short-term write failed");
        }

        if !answer.is_final() {
            return;
        }
        let sources: Vec<&str> = answer.evidence.iter().map(|e| e.source_id.as_str()).collect();
        let draft = MemoryDraft::long_term(exchange, RecordKind::Exchange)
            .with_namespace(self.memory_config.namespace.clone())
            .with_extra("sources", sources.join(","));
        match self.memory.remember(session_id, draft).await {
            Ok(id) => tracing::debug!(session = %session_id, record = %id, "answer promoted to long-term memory"),
            Err(e) => tracing::warn!(session = %session_id, error = %e, "long-term promotion failed"),
        }
    }
}

/// A turn holding its session's lock.
///
/// Dropped before [`TurnInFlight::commit`], the turn is closed as cancelled
/// and still lands in the session transcript.
struct TurnInFlight {
    session: OwnedMutexGuard<Session>,
    turn: Turn,
    committed: bool,
}

impl TurnInFlight {
    fn commit(&mut self) -> Result<()> {
        self.committed = true;
        self.session.push_turn(self.turn.clone())
    }
}

impl Drop for TurnInFlight {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        tracing::warn!(session = %self.turn.session_id, turn = %self.turn.id, "turn abandoned before completion");
        let recorded = self
            .turn
            .abandon()
            .and_then(|()| self.session.push_turn(self.turn.clone()));
        if let Err(e) = recorded {
            tracing::error!(turn = %self.turn.id, error = %e, "abandoned turn not recorded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::memory::{InMemoryBackend, LongTermMemory, ShortTermMemory};
    use crate::mock::{EvidenceTool, ScriptedProvider, SlowTool, StalledEmbedder};
    use crate::tool::FailureKind;
    use crate::turn::ActionKind;
    use crate::retrieval::{Evidence, EvidenceOrigin};
    use crate::turn::TerminationReason;
    use std::time::Duration;

    const RETRIEVE: &str = r#"{"tool": "retrieve", "arguments": {"query": "halo"}}"#;
    const ANSWER: &str = r#"{"answer": "Halo was released in 2001.", "citations": ["game-002"]}"#;

    fn controller_with(provider: ScriptedProvider, config: AgentConfig) -> SessionController {
        let mut tools = ToolRegistry::new();
        tools
            .register(EvidenceTool::new(
                "retrieve",
                vec![Evidence::new("Halo: Combat Evolved (Xbox, 2001)", "game-002", 0.9, EvidenceOrigin::Local)],
            ))
            .unwrap();
        let memory = MemoryStore::in_memory(config.memory.short_term_capacity, Arc::new(MockEmbedder::default()));
        SessionController::new(
            Capabilities {
                provider: Arc::new(provider),
                tools: Arc::new(tools),
                memory: Arc::new(memory),
            },
            config,
        )
    }

    fn controller(provider: ScriptedProvider) -> SessionController {
        controller_with(provider, AgentConfig::default())
    }

    #[tokio::test]
    async fn test_final_answer_is_persisted_and_promoted() {
        let controller = controller(ScriptedProvider::from_replies([RETRIEVE, ANSWER]));
        let id = SessionId::from_string("s1");
        let answer = controller.ask(&id, "When was Halo released?").await.unwrap();

        assert!(answer.is_final());
        assert_eq!(controller.memory().recall_short_term(&id).await.len(), 1);
        assert_eq!(controller.memory().long_term().len().await, 1);

        let transcript = controller.transcript(&id).await.unwrap();
        assert_eq!(transcript.turn_count(), 1);
        assert_eq!(transcript.termination, Some(TerminationReason::Answered));
    }

    #[tokio::test]
    async fn test_unsupported_answer_is_not_promoted() {
        let controller = controller(ScriptedProvider::repeating(r#"{"answer": "No idea."}"#));
        let id = SessionId::new();
        let answer = controller.ask(&id, "When was Halo released?").await.unwrap();

        assert_eq!(answer.status, AnswerStatus::Unsupported);
        assert_eq!(controller.memory().recall_short_term(&id).await.len(), 1);
        assert!(controller.memory().long_term().is_empty().await);
    }

    #[tokio::test]
    async fn test_prior_exchanges_reach_the_context() {
        let provider = Arc::new(ScriptedProvider::from_replies([RETRIEVE, ANSWER, r#"{"answer": "Bungie."}"#]));
        let mut tools = ToolRegistry::new();
        tools
            .register(EvidenceTool::new(
                "retrieve",
                vec![Evidence::new("Halo (2001)", "game-002", 0.9, EvidenceOrigin::Local)],
            ))
            .unwrap();
        let controller = SessionController::new(
            Capabilities {
                provider: provider.clone(),
                tools: Arc::new(tools),
                memory: Arc::new(MemoryStore::in_memory(5, Arc::new(MockEmbedder::default()))),
            },
            AgentConfig::default(),
        );
        let id = SessionId::new();
        controller.ask(&id, "When was Halo released?").await.unwrap();
        controller.ask(&id, "Who developed it?").await.unwrap();

        let seen = provider.seen().await;
        let last = seen.last().unwrap();
        assert!(last.iter().any(|m| m.content.contains("Earlier in this conversation")
            && m.content.contains("Halo was released in 2001.")));
    }

    #[tokio::test]
    async fn test_end_session_flushes_short_term_only() {
        let controller = controller(ScriptedProvider::from_replies([RETRIEVE, ANSWER]));
        let id = SessionId::new();
        controller.ask(&id, "When was Halo released?").await.unwrap();

        let closed = controller.end_session(&id).await.unwrap();
        assert!(!closed.is_active());
        assert!(controller.memory().recall_short_term(&id).await.is_empty());
        assert_eq!(controller.memory().long_term().len().await, 1);
        assert!(controller.transcript(&id).await.is_none());
        assert!(controller.end_session(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_turn_is_recorded_but_not_remembered() {
        let provider = ScriptedProvider::repeating(RETRIEVE).with_delay(Duration::from_secs(10));
        let controller = controller(provider);
        let id = SessionId::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let answer = controller.ask_with_cancel(&id, "When was Halo released?", cancel).await.unwrap();
        assert_eq!(answer.status, AnswerStatus::Cancelled);
        assert!(controller.memory().recall_short_term(&id).await.is_empty());
        assert_eq!(controller.transcript(&id).await.unwrap().turn_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_ask_is_recorded_as_cancelled() {
        let provider = ScriptedProvider::repeating(RETRIEVE).with_delay(Duration::from_secs(10));
        let controller = controller(provider);
        let id = SessionId::new();

        let outcome = tokio::time::timeout(Duration::from_millis(50), controller.ask(&id, "When was Halo released?")).await;
        assert!(outcome.is_err());

        let transcript = controller.transcript(&id).await.unwrap();
        assert_eq!(transcript.turn_count(), 1);
        assert_eq!(transcript.termination, Some(TerminationReason::Cancelled));
        assert_eq!(transcript.turns[0].answer().map(|a| a.status), Some(AnswerStatus::Cancelled));
        assert!(controller.memory().recall_short_term(&id).await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_ask_mid_dispatch_leaves_balanced_turn() {
        let mut tools = ToolRegistry::new();
        tools.register(SlowTool::new(Duration::from_secs(10))).unwrap();
        let controller = SessionController::new(
            Capabilities {
                provider: Arc::new(ScriptedProvider::repeating(r#"{"tool": "slow", "arguments": {}}"#)),
                tools: Arc::new(tools),
                memory: Arc::new(MemoryStore::in_memory(5, Arc::new(MockEmbedder::default()))),
            },
            AgentConfig::default(),
        );
        let id = SessionId::new();

        let outcome = tokio::time::timeout(Duration::from_millis(200), controller.ask(&id, "q")).await;
        assert!(outcome.is_err());

        let transcript = controller.transcript(&id).await.unwrap();
        let turn = &transcript.turns[0];
        assert_eq!(turn.tool_call_count(), 1);
        assert!(turn.is_balanced());
        let failure = turn.actions().iter().find_map(|action| match &action.kind {
            ActionKind::ToolResult { result } => result.failure_kind(),
            _ => None,
        });
        assert_eq!(failure, Some(FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn test_stalled_embedder_does_not_block_ask() {
        let limit = Some(Duration::from_millis(50));
        let mut config = AgentConfig::default();
        config.memory.embedding_timeout = limit;
        let mut tools = ToolRegistry::new();
        tools
            .register(EvidenceTool::new(
                "retrieve",
                vec![Evidence::new("Halo (2001)", "game-002", 0.9, EvidenceOrigin::Local)],
            ))
            .unwrap();
        let long_term = LongTermMemory::new(Arc::new(InMemoryBackend::new()), Arc::new(StalledEmbedder))
            .with_embedding_timeout(limit);
        let controller = SessionController::new(
            Capabilities {
                provider: Arc::new(ScriptedProvider::from_replies([RETRIEVE, ANSWER])),
                tools: Arc::new(tools),
                memory: Arc::new(MemoryStore::new(ShortTermMemory::new(5), long_term)),
            },
            config,
        );
        let id = SessionId::new();

        let answer = tokio::time::timeout(Duration::from_secs(2), controller.ask(&id, "When was Halo released?"))
            .await
            .expect("ask should not hang on the embedder")
            .unwrap();
        assert!(answer.is_final());
        // promotion timed out; the exchange still reached short-term memory
        assert!(controller.memory().long_term().is_empty().await);
        assert_eq!(controller.memory().recall_short_term(&id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_recall() {
        let mut config = AgentConfig::default();
        config.memory.embedding_timeout = None;
        let long_term = LongTermMemory::new(Arc::new(InMemoryBackend::new()), Arc::new(StalledEmbedder))
            .with_embedding_timeout(None);
        let controller = SessionController::new(
            Capabilities {
                provider: Arc::new(ScriptedProvider::repeating(ANSWER)),
                tools: Arc::new(ToolRegistry::new()),
                memory: Arc::new(MemoryStore::new(ShortTermMemory::new(5), long_term)),
            },
            config,
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let answer = tokio::time::timeout(
            Duration::from_secs(2),
            controller.ask_with_cancel(&SessionId::new(), "When was Halo released?", cancel),
        )
        .await
        .expect("cancellation should end the turn")
        .unwrap();
        assert_eq!(answer.status, AnswerStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let controller = Arc::new(controller(ScriptedProvider::from_fn(|index, _| {
            Ok(if index % 2 == 0 { RETRIEVE.to_string() } else { ANSWER.to_string() })
        })));
        let a = SessionId::from_string("a");
        let b = SessionId::from_string("b");
        // sequential so the scripted replies alternate per turn
        controller.ask(&a, "When was Halo released?").await.unwrap();
        controller.ask(&b, "When was Halo released?").await.unwrap();

        assert_eq!(controller.session_count().await, 2);
        assert_eq!(controller.memory().recall_short_term(&a).await.len(), 1);
        assert_eq!(controller.memory().recall_short_term(&b).await.len(), 1);
    }

    #[tokio::test]
    async fn test_reap_idle_closes_stale_sessions() {
        let mut config = AgentConfig::default();
        config.session.idle_timeout = Duration::from_millis(10);
        let controller = controller_with(ScriptedProvider::repeating(r#"{"answer": "No idea."}"#), config);
        let id = SessionId::new();
        controller.ask(&id, "q").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(controller.reap_idle().await, 1);
        assert_eq!(controller.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let controller = controller(ScriptedProvider::repeating(ANSWER));
        assert!(controller.ask(&SessionId::new(), "   ").await.is_err());
    }
}
