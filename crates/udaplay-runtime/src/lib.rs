//! # udaplay-runtime
//!
//! Concrete backends for the udaplay agent.
//!
//! ## Adapters
//!
//! - **Ollama** (default feature): chat completions and embeddings
//! - **Tavily**: web search, enabled when `TAVILY_API_KEY` is set
//! - **JSONL log**: durable long-term memory in one append-only file
//!
//! ## Usage
//!
//! ```rust,ignore
//! use udaplay_runtime::{JsonlMemoryBackend, OllamaConfig, OllamaEmbedder, OllamaProvider};
//!
//! let ollama = OllamaConfig::from_env();
//! let provider = Arc::new(OllamaProvider::from_config(ollama.clone()));
//! let embedder = Arc::new(OllamaEmbedder::from_config(&ollama));
//! let backend = Arc::new(JsonlMemoryBackend::open("data/memory.jsonl").await?);
//! ```

pub mod jsonl;
#[cfg(feature = "ollama")]
pub mod ollama;
pub mod tavily;

pub use jsonl::JsonlMemoryBackend;
#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaEmbedder, OllamaProvider};
pub use tavily::{TavilyConfig, TavilySearch};

// Re-export core types for convenience
pub use udaplay_core::{AgentError, Embedder, LlmProvider, MemoryStore, Result, SessionController, WebSearch};
