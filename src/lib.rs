//! # tamalebot
//!
//! A security-mediated runtime for LLM-driven agents. The model proposes;
//! this crate decides and records. Every side effect an agent wants (a
//! shell command, a file touch, an outbound fetch, a credential use, a
//! remote command, a version-control operation, a scheduled task) passes
//! a policy decision point and lands on an append-only audit journal before
//! it reaches the outside world.
//!
//! ## Architecture
//!
//! Dependencies flow leaves-first:
//!
//! - **audit**: append-only JSONL decision journal with filtered read-back
//! - **policy**: stateless decision function over (action kind, target)
//! - **storage**: uniform key→bytes store (in-memory, filesystem)
//! - **vault**: AES-256-GCM credential store, keys derived per agent
//! - **provider**: canonical messages ↔ provider wire dialects
//! - **tools**: tool catalog, every invocation mediated and audited
//! - **agent**: the think/act loop over all of the above
//!
//! Around the core: **conversation** (per-chat serialized history),
//! **context** (token estimation and history truncation), **config** (the
//! explicit runtime record and its environment boundary), **server** (a
//! hosted HTTP surface), **hooks** (turn observers) and **retry**
//! (backoff for provider transients).
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tamalebot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> tamalebot::Result<()> {
//!     let config = RuntimeConfig::from_env()?;
//!
//!     let audit = Arc::new(AuditLog::new("./audit")?);
//!     let policy = Arc::new(PolicyEngine::new(config.policy.clone()));
//!     let executor = Arc::new(ToolExecutor::new(
//!         config.agent_id.clone(),
//!         config.working_dir.clone(),
//!         policy,
//!         audit.clone(),
//!     )?);
//!
//!     let provider = provider_for(
//!         config.provider,
//!         ProviderConfig::new(config.api_key.clone(), config.model.clone()),
//!     )?;
//!     let agent = Agent::new(provider, executor);
//!
//!     let mut history = Vec::new();
//!     let result = agent.run_turn("What's in the current directory?", &mut history).await?;
//!     println!("{}", result.text);
//!     audit.close()?;
//!     Ok(())
//! }
//! ```

/// The think/act loop: provider exchanges, mediated tool batches,
/// termination on text-only responses or the iteration bound.
pub mod agent;

/// Append-only audit journal, one JSONL file per agent id.
pub mod audit;

/// Explicit runtime configuration and the environment boundary.
pub mod config;

/// Conversation state with per-chat serialized access and optional
/// persistence.
pub mod conversation;

/// Token estimation and history truncation helpers.
pub mod context;

/// Error types and the crate-wide `Result` alias.
mod error;

/// Observer hooks fired as a turn unfolds.
pub mod hooks;

/// The policy decision point every mediated action passes through.
pub mod policy;

/// Canonical-message ↔ provider wire protocol adapters.
pub mod provider;

/// Exponential backoff for provider transients.
pub mod retry;

/// Hosted HTTP surface (axum router, graceful shutdown).
pub mod server;

/// Scheduled task store over a storage backend.
pub mod schedule;

/// Uniform key→bytes storage backends.
pub mod storage;

/// Tool catalog and the uniform mediation pipeline.
pub mod tools;

/// Canonical message types.
pub mod types;

/// Encrypted credential vault with per-agent key derivation.
pub mod vault;

pub use error::{Error, Result};

/// The most commonly used types and functions in one import.
pub mod prelude {
    pub use crate::agent::{Agent, TurnResult};
    pub use crate::audit::{AuditDecision, AuditEntry, AuditLog, AuditQuery};
    pub use crate::config::RuntimeConfig;
    pub use crate::conversation::ConversationStore;
    pub use crate::error::{Error, Result};
    pub use crate::hooks::Hooks;
    pub use crate::policy::{ActionKind, PolicyConfig, PolicyDecision, PolicyEngine};
    pub use crate::provider::{
        LlmProvider, LlmResponse, ProviderConfig, ProviderKind, ToolCall, ToolSchema,
        provider_for,
    };
    pub use crate::schedule::ScheduleStore;
    pub use crate::storage::{FileStorage, MemoryStorage, Storage};
    pub use crate::tools::{ToolExecutor, ToolOutput};
    pub use crate::types::{ContentBlock, Message, MessageContent, MessageRole};
    pub use crate::vault::{CredentialKind, Vault};
}
