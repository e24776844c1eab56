//! # udaplay-core
//!
//! Agent orchestration engine: a reasoning state machine that lets a
//! language model call retrieval tools, backed by two-tier memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       SessionController                          │
//! │  ┌──────────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ ReasoningEngine  │──│ ToolRegistry │──│ RetrievalGateway   │  │
//! │  │ (state machine)  │  │  (ToolSpec)  │  │ (index + web)      │  │
//! │  └──────────────────┘  └──────────────┘  └────────────────────┘  │
//! │           │                                                      │
//! │  ┌──────────────────┐  ┌──────────────────────────────────────┐  │
//! │  │   LlmProvider    │  │ MemoryStore (short-term, long-term)  │  │
//! │  │   (Strategy)     │  │   Embedder · MemoryBackend           │  │
//! │  └──────────────────┘  └──────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! External collaborators (model, embeddings, vector index, web search,
//! durable storage) are traits; concrete adapters live in `udaplay-runtime`
//! and test doubles in [`mock`].

pub mod config;
pub mod context;
pub mod controller;
pub mod decision;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod mock;
pub mod provider;
pub mod reasoning;
pub mod retrieval;
pub mod session;
pub mod tool;
pub mod turn;

pub use config::{AgentConfig, EngineConfig, MemoryConfig, RetrievalConfig, SessionConfig};
pub use context::{Message, Role, WorkingContext};
pub use controller::{Capabilities, SessionController};
pub use embedding::{Embedder, MockEmbedder};
pub use error::{AgentError, Result};
pub use memory::{MemoryDraft, MemoryRecord, MemoryStore, RecordId, RecordKind};
pub use provider::{GenerationOptions, LlmProvider};
pub use reasoning::ReasoningEngine;
pub use retrieval::{Evidence, EvidenceOrigin, RetrievalGateway, SourceSet, VectorIndex, WebSearch};
pub use session::{Session, SessionId};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult, ToolSpec};
pub use turn::{Answer, AnswerStatus, TerminationReason, Turn};
