//! udaplay HTTP Server
//!
//! Axum server exposing the game research agent over a small REST API.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use game_knowledge::{game_tools, ingest, Catalog, KnowledgeError, LlmJudgeEvaluator, GAME_AGENT_PROMPT};
use udaplay_core::{
    memory::{InMemoryBackend, LongTermMemory, ShortTermMemory},
    retrieval::InMemoryVectorIndex,
    AgentConfig, Capabilities, Embedder, LlmProvider, MemoryStore, RetrievalGateway, SessionController, VectorIndex,
};
use udaplay_runtime::{JsonlMemoryBackend, OllamaConfig, OllamaEmbedder, OllamaProvider, TavilyConfig, TavilySearch};

use crate::state::AppState;

const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment before reading RUST_LOG
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AgentConfig::from_env().context("invalid agent configuration")?;
    config.engine.system_prompt = GAME_AGENT_PROMPT.into();

    // Model and embeddings
    let ollama = OllamaConfig::from_env();
    let provider: Arc<dyn LlmProvider> = Arc::new(OllamaProvider::from_config(ollama.clone()));
    let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::from_config(&ollama));
    match provider.health_check().await {
        Ok(true) => tracing::info!(host = %ollama.host, port = ollama.port, model = %ollama.model, "connected to Ollama"),
        Ok(false) | Err(_) => {
            tracing::warn!("Ollama not available; make sure it is running with `ollama serve`");
        }
    }

    // Knowledge index
    let catalog = match std::env::var("GAMES_DIR") {
        Ok(dir) => Catalog::load_dir(&dir).await.with_context(|| format!("failed to load games from {dir}"))?,
        Err(_) => {
            tracing::info!("GAMES_DIR not set; using the bundled sample catalog");
            Catalog::sample()?
        }
    };
    let index: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
    let games_indexed = match ingest(&catalog, &embedder, &index).await {
        Ok(count) => count,
        // a model outage is survivable: local retrieval reports an unpopulated index
        Err(KnowledgeError::Agent(e)) if !e.is_startup_fatal() => {
            tracing::error!(error = %e, "catalog ingestion failed; serving without the local catalog");
            index.len().await.unwrap_or(0)
        }
        Err(e) => return Err(anyhow::Error::new(e).context("catalog ingestion failed")),
    };

    // Retrieval
    let mut gateway = RetrievalGateway::new(embedder.clone(), index, config.retrieval.clone());
    let web_search_enabled = match TavilyConfig::from_env() {
        Some(tavily) => {
            gateway = gateway.with_web_search(Arc::new(TavilySearch::new(tavily)?));
            tracing::info!("web search enabled (Tavily)");
            true
        }
        None => {
            tracing::warn!("TAVILY_API_KEY not set; web search disabled");
            false
        }
    };
    let gateway = Arc::new(gateway);

    // Tools
    let evaluator = Arc::new(LlmJudgeEvaluator::new(provider.clone(), config.engine.generation.clone()));
    let tools = game_tools(&gateway, evaluator)?;
    tracing::info!(tools = ?tools.names(), "tools registered");

    // Memory
    let long_term = match std::env::var("MEMORY_LOG_PATH") {
        Ok(path) => {
            let backend = Arc::new(JsonlMemoryBackend::open(&path).await?);
            LongTermMemory::open(backend, embedder.clone()).await?
        }
        Err(_) => {
            tracing::warn!("MEMORY_LOG_PATH not set; long-term memory will not survive a restart");
            LongTermMemory::new(Arc::new(InMemoryBackend::new()), embedder.clone())
        }
    };
    let long_term = long_term.with_embedding_timeout(config.memory.embedding_timeout);
    let memory = MemoryStore::new(ShortTermMemory::new(config.memory.short_term_capacity), long_term);

    let controller = Arc::new(SessionController::new(
        Capabilities {
            provider: provider.clone(),
            tools: Arc::new(tools),
            memory: Arc::new(memory),
        },
        config,
    ));

    // Idle session reaper
    let reaper = controller.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        loop {
            ticker.tick().await;
            reaper.reap_idle().await;
        }
    });

    let state = AppState {
        controller,
        provider,
        web_search_enabled,
        games_indexed,
    };

    // CORS configuration
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = handlers::router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors));

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%addr, games = games_indexed, "udaplay server listening");
    tracing::info!("  GET    /health");
    tracing::info!("  POST   /api/ask");
    tracing::info!("  GET    /api/sessions/{{id}}");
    tracing::info!("  DELETE /api/sessions/{{id}}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
