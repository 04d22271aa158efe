//! The think/act loop.
//!
//! One turn: append the user text to the canonical history, exchange the
//! history for an assistant response, run any requested tools through the
//! mediated executor, feed the results back, and repeat until the model
//! answers with text only or the iteration bound is hit.
//!
//! Two properties the rest of the system leans on:
//!
//! - Tool calls execute **sequentially, in response order**. The canonical
//!   history pairs every tool-use block with a result block in the next
//!   message, and that invariant depends on ordering.
//! - Provider errors propagate out of the turn; tool failures and policy
//!   denials do not; they become error-flagged result blocks the model can
//!   react to.

use crate::audit::AuditLog;
use crate::config::RuntimeConfig;
use crate::hooks::{Hooks, TextEvent, TokenUsageEvent, ToolCallEvent, ToolResultEvent};
use crate::policy::PolicyEngine;
use crate::provider::{LlmProvider, ProviderConfig, provider_for};
use crate::schedule::ScheduleStore;
use crate::storage::Storage;
use crate::tools::ToolExecutor;
use crate::types::{ContentBlock, Message, TextBlock, ToolResultBlock, ToolUseBlock};
use crate::vault::Vault;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Default bound on provider exchanges per turn.
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// Summary of one completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    /// The assistant's final text (the most recent text seen if the
    /// iteration bound cut the turn short).
    pub text: String,
    /// Tools executed during the turn.
    pub tool_call_count: u32,
    /// Prompt tokens across all provider calls.
    pub input_tokens: u64,
    /// Completion tokens across all provider calls.
    pub output_tokens: u64,
    /// Provider exchanges performed.
    pub iterations: u32,
}

/// Drives turns against a provider and a mediated tool executor.
pub struct Agent {
    provider: Box<dyn LlmProvider>,
    executor: Arc<ToolExecutor>,
    hooks: Hooks,
    max_iterations: u32,
}

impl Agent {
    /// Builds an agent with the default iteration bound and no hooks.
    pub fn new(provider: Box<dyn LlmProvider>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            provider,
            executor,
            hooks: Hooks::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Wires a full agent from a configuration record: policy engine,
    /// mediated executor, vault and schedule store (when a backend and a
    /// vault key are configured) and the matching provider adapter.
    pub fn from_config(
        config: &RuntimeConfig,
        audit: Arc<AuditLog>,
        storage: Option<Arc<dyn Storage>>,
    ) -> Result<Self> {
        let policy = Arc::new(PolicyEngine::new(config.policy.clone()));
        let mut executor = ToolExecutor::new(
            config.agent_id.clone(),
            config.working_dir.clone(),
            policy,
            audit.clone(),
        )?;
        if let Some(storage) = &storage {
            if let Some(vault_key) = &config.vault_key {
                executor = executor.with_vault(Arc::new(Vault::new(
                    storage.clone(),
                    audit.clone(),
                    config.agent_id.clone(),
                    vault_key,
                )));
            }
            executor = executor.with_schedules(Arc::new(ScheduleStore::new(storage.clone())));
        }

        let mut provider_config =
            ProviderConfig::new(config.api_key.clone(), config.model.clone());
        if let Some(prompt) = &config.system_prompt {
            provider_config = provider_config.with_system_prompt(prompt.clone());
        }
        let provider = provider_for(config.provider, provider_config)?;

        Ok(Agent::new(provider, Arc::new(executor)).with_max_iterations(config.max_iterations))
    }

    /// Installs observer hooks.
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Overrides the iteration bound.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// The tool executor this agent mediates through.
    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// Runs one turn, mutating `history` in place.
    pub async fn run_turn(&self, user_text: &str, history: &mut Vec<Message>) -> Result<TurnResult> {
        history.push(Message::user(user_text));

        let catalog = self.executor.catalog();
        let mut tool_call_count = 0u32;
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;
        let mut iterations = 0u32;
        let mut last_text = String::new();

        while iterations < self.max_iterations {
            iterations += 1;
            let response = self.provider.send(history, &catalog).await?;

            input_tokens += response.input_tokens;
            output_tokens += response.output_tokens;
            self.hooks
                .fire_token_usage(TokenUsageEvent {
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                })
                .await;

            if !response.text.is_empty() {
                last_text = response.text.clone();
                self.hooks
                    .fire_text(TextEvent {
                        text: response.text.clone(),
                    })
                    .await;
            }

            if response.tool_calls.is_empty() {
                history.push(Message::assistant(response.text));
                debug!(iterations, tool_call_count, "turn complete");
                return Ok(TurnResult {
                    text: last_text,
                    tool_call_count,
                    input_tokens,
                    output_tokens,
                    iterations,
                });
            }

            // Assistant message: optional text block, then the tool uses in
            // response order.
            let mut blocks = Vec::with_capacity(response.tool_calls.len() + 1);
            if !response.text.is_empty() {
                blocks.push(ContentBlock::Text(TextBlock::new(response.text.clone())));
            }
            for call in &response.tool_calls {
                blocks.push(ContentBlock::ToolUse(ToolUseBlock::new(
                    call.id.clone(),
                    call.name.clone(),
                    call.input.clone(),
                )));
            }
            history.push(Message::assistant_blocks(blocks));

            // Sequential execution; the pairing invariant depends on it.
            let mut results = Vec::with_capacity(response.tool_calls.len());
            for call in response.tool_calls {
                self.hooks
                    .fire_tool_call(ToolCallEvent {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.input.clone(),
                    })
                    .await;

                let output = match self.executor.execute(&call.name, &call.input).await {
                    Ok(output) => output,
                    Err(err) => crate::tools::ToolOutput::error(err.external_message()),
                };
                tool_call_count += 1;

                self.hooks
                    .fire_tool_result(ToolResultEvent {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        output: output.output.clone(),
                        is_error: output.is_error,
                    })
                    .await;

                results.push(ContentBlock::ToolResult(if output.is_error {
                    ToolResultBlock::error(call.id, output.output)
                } else {
                    ToolResultBlock::new(call.id, output.output)
                }));
            }
            history.push(Message::user_blocks(results));
        }

        info!(
            iterations,
            tool_call_count, "iteration bound reached without a text-only response"
        );
        Ok(TurnResult {
            text: last_text,
            tool_call_count,
            input_tokens,
            output_tokens,
            iterations,
        })
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("max_iterations", &self.max_iterations)
            .field("hooks", &self.hooks)
            .finish()
    }
}
