//! End-to-end research turns over the sample catalog with a scripted model

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use udaplay_core::{
    mock::{ScriptedProvider, StaticWebSearch},
    retrieval::{InMemoryVectorIndex, SearchSnippet},
    tool::FailureKind,
    turn::ActionKind,
    AgentConfig, AnswerStatus, Capabilities, Embedder, EvidenceOrigin, MemoryStore, MockEmbedder, RetrievalGateway,
    SessionController, SessionId, TerminationReason, VectorIndex,
};

use crate::{catalog::ingest, game_tools, Catalog, KeywordOverlapEvaluator, GAME_AGENT_PROMPT};

const POKEMON_QUERY: &str = r#"{"tool": "retrieve_game", "arguments": {"query": "What year was Pokemon Gold and Silver released?"}, "rationale": "look it up"}"#;
const POKEMON_ANSWER: &str = r#"{"answer": "Pokemon Gold and Silver was released in 1999.", "citations": ["game-003"]}"#;

struct Harness {
    controller: SessionController,
    provider: Arc<ScriptedProvider>,
}

async fn harness(provider: ScriptedProvider, web: Option<Vec<SearchSnippet>>, config: AgentConfig) -> Harness {
    let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::default());
    let index: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
    ingest(&Catalog::sample().unwrap(), &embedder, &index).await.unwrap();

    let mut gateway = RetrievalGateway::new(embedder.clone(), index, config.retrieval.clone());
    if let Some(snippets) = web {
        gateway = gateway.with_web_search(Arc::new(StaticWebSearch::new(snippets)));
    }
    let tools = game_tools(&Arc::new(gateway), Arc::new(KeywordOverlapEvaluator::default())).unwrap();

    let provider = Arc::new(provider);
    let memory = MemoryStore::in_memory(config.memory.short_term_capacity, embedder);
    let controller = SessionController::new(
        Capabilities {
            provider: provider.clone(),
            tools: Arc::new(tools),
            memory: Arc::new(memory),
        },
        config,
    );
    Harness { controller, provider }
}

fn game_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.engine.system_prompt = GAME_AGENT_PROMPT.into();
    config
}

#[tokio::test]
async fn test_release_year_answered_from_catalog() {
    let h = harness(
        ScriptedProvider::from_replies([POKEMON_QUERY, POKEMON_ANSWER]),
        None,
        game_config(),
    )
    .await;
    let session = SessionId::new();

    let answer = h
        .controller
        .ask(&session, "What year was Pokemon Gold and Silver released?")
        .await
        .unwrap();

    assert_eq!(answer.status, AnswerStatus::Final);
    assert_eq!(answer.termination, TerminationReason::Answered);
    assert!(answer.text.contains("1999"));
    assert_eq!(answer.evidence.len(), 1);
    assert_eq!(answer.evidence[0].source_id, "game-003");
    assert_eq!(answer.evidence[0].origin, EvidenceOrigin::Local);
    assert_eq!(answer.evidence[0].tool.as_deref(), Some("retrieve_game"));

    let transcript = h.controller.transcript(&session).await.unwrap();
    let turn = &transcript.turns[0];
    assert_eq!(turn.tool_call_count(), 1);
    assert!(turn.is_balanced());

    let system = &h.provider.seen().await[0][0].content;
    assert!(system.starts_with("You are UdaPlay"));
    assert!(system.contains("### retrieve_game"));
}

#[tokio::test]
async fn test_unindexed_game_without_web_is_unsupported() {
    let h = harness(
        ScriptedProvider::from_replies([
            r#"{"tool": "retrieve_game", "arguments": {"query": "When was Chrono Trigger released?", "allow_web": true}}"#,
            r#"{"answer": "I could not find when Chrono Trigger was released.", "citations": []}"#,
        ]),
        None,
        game_config(),
    )
    .await;
    let session = SessionId::new();

    let answer = h.controller.ask(&session, "When was Chrono Trigger released?").await.unwrap();
    assert_eq!(answer.status, AnswerStatus::Unsupported);
    assert!(answer.evidence.is_empty());

    let transcript = h.controller.transcript(&session).await.unwrap();
    let failure = transcript.turns[0].actions().iter().find_map(|action| match &action.kind {
        ActionKind::ToolResult { result } => result.failure_kind(),
        _ => None,
    });
    assert_eq!(failure, Some(FailureKind::NoEvidenceAvailable));

    // nothing promoted from an unsupported answer
    assert!(h.controller.memory().long_term().is_empty().await);
}

#[tokio::test]
async fn test_web_fallback_answers_unindexed_game() {
    let web = vec![SearchSnippet {
        title: "Chrono Trigger - Wikipedia".into(),
        url: "https://en.wikipedia.org/wiki/Chrono_Trigger".into(),
        content: "Chrono Trigger is a role-playing game released by Square in 1995 for the Super Famicom.".into(),
    }];
    let h = harness(
        ScriptedProvider::from_replies([
            r#"{"tool": "retrieve_game", "arguments": {"query": "When was Chrono Trigger released?"}}"#,
            r#"{"tool": "search_web", "arguments": {"query": "Chrono Trigger release date"}}"#,
            r#"{"answer": "Chrono Trigger was released in 1995.", "citations": ["https://en.wikipedia.org/wiki/Chrono_Trigger"]}"#,
        ]),
        Some(web),
        game_config(),
    )
    .await;

    let answer = h
        .controller
        .ask(&SessionId::new(), "When was Chrono Trigger released?")
        .await
        .unwrap();
    assert_eq!(answer.status, AnswerStatus::Final);
    assert_eq!(answer.evidence.len(), 1);
    assert_eq!(answer.evidence[0].origin, EvidenceOrigin::Web);
}

#[tokio::test]
async fn test_step_limit_gives_best_effort_answer() {
    let queries = [
        "Pokemon Gold and Silver release year",
        "Super Mario 64",
        "Final Fantasy VII Square",
        "Gran Turismo racing",
    ];
    let provider = ScriptedProvider::from_fn(move |index, _| {
        let query = queries[index % queries.len()];
        Ok(json!({"tool": "retrieve_game", "arguments": {"query": query}}).to_string())
    });
    let mut config = game_config();
    config.engine.max_tool_calls = 3;
    let h = harness(provider, None, config).await;
    let session = SessionId::new();

    let answer = h.controller.ask(&session, "Tell me about classic games").await.unwrap();
    assert_eq!(answer.status, AnswerStatus::StepLimited);
    assert_eq!(answer.termination, TerminationReason::StepLimit);
    assert!(!answer.text.is_empty());

    let transcript = h.controller.transcript(&session).await.unwrap();
    assert_eq!(transcript.turns[0].tool_call_count(), 3);
}

#[tokio::test]
async fn test_repeated_identical_call_is_stopped() {
    let h = harness(
        ScriptedProvider::repeating(
            r#"{"tool": "retrieve_game", "arguments": {"query": "What year was Pokemon Gold and Silver released?"}}"#,
        ),
        None,
        game_config(),
    )
    .await;
    let session = SessionId::new();

    let answer = h
        .controller
        .ask(&session, "What year was Pokemon Gold and Silver released?")
        .await
        .unwrap();
    assert_eq!(answer.termination, TerminationReason::LoopDetected);
    assert_ne!(answer.status, AnswerStatus::Final);

    let transcript = h.controller.transcript(&session).await.unwrap();
    assert!(transcript.turns[0].tool_call_count() <= 2);
}

#[tokio::test]
async fn test_fabricated_citation_is_unsupported() {
    let h = harness(
        ScriptedProvider::from_replies([
            POKEMON_QUERY,
            r#"{"answer": "Pokemon Gold and Silver was released in 1998.", "citations": ["game-999"]}"#,
        ]),
        None,
        game_config(),
    )
    .await;

    let answer = h
        .controller
        .ask(&SessionId::new(), "What year was Pokemon Gold and Silver released?")
        .await
        .unwrap();
    assert_eq!(answer.status, AnswerStatus::Unsupported);
    assert!(answer.evidence.iter().all(|e| e.source_id != "game-999"));
}

#[tokio::test]
async fn test_final_answer_is_recalled_in_a_later_session() {
    let h = harness(
        ScriptedProvider::from_replies([
            POKEMON_QUERY,
            POKEMON_ANSWER,
            r#"{"answer": "It was released on the Game Boy Color.", "citations": []}"#,
        ]),
        None,
        game_config(),
    )
    .await;

    let first = SessionId::new();
    h.controller
        .ask(&first, "What year was Pokemon Gold and Silver released?")
        .await
        .unwrap();
    assert_eq!(h.controller.memory().long_term().len().await, 1);
    h.controller.end_session(&first).await.unwrap();

    let second = SessionId::new();
    h.controller
        .ask(&second, "Which platform was Pokemon Gold and Silver on?")
        .await
        .unwrap();

    let seen = h.provider.seen().await;
    let prompt: String = seen[2].iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
    assert!(prompt.contains("## Remembered from previous sessions"));
    assert!(prompt.contains("released in 1999"));
    // short-term memory of the ended session is gone
    assert!(!prompt.contains("## Earlier in this conversation"));
}

#[tokio::test]
async fn test_cancelled_turn_is_not_remembered() {
    let h = harness(ScriptedProvider::repeating(POKEMON_QUERY), None, game_config()).await;
    let session = SessionId::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let answer = h
        .controller
        .ask_with_cancel(&session, "What year was Pokemon Gold and Silver released?", cancel)
        .await
        .unwrap();
    assert_eq!(answer.status, AnswerStatus::Cancelled);
    assert!(h.controller.memory().recall_short_term(&session).await.is_empty());
}
