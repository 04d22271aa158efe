//! Observer hooks for the agent loop.
//!
//! Hooks watch a turn as it unfolds: token usage after each provider call,
//! response text, each tool call before it runs and each result after.
//! They cannot veto anything (mediation is the policy engine's job), so
//! they suit logging, metrics and UI relays.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tamalebot::hooks::Hooks;
//!
//! let hooks = Hooks::new()
//!     .on_text(|event| async move {
//!         println!("assistant: {}", event.text);
//!     })
//!     .on_tool_call(|event| async move {
//!         println!("tool {} -> {}", event.name, event.input);
//!     });
//! ```

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// Fired after every provider exchange with that call's token counts.
#[derive(Debug, Clone)]
pub struct TokenUsageEvent {
    /// Prompt tokens for this provider call.
    pub input_tokens: u64,
    /// Completion tokens for this provider call.
    pub output_tokens: u64,
}

/// Fired when a provider response carries text.
#[derive(Debug, Clone)]
pub struct TextEvent {
    /// The response text.
    pub text: String,
}

/// Fired before a tool executes.
#[derive(Debug, Clone)]
pub struct ToolCallEvent {
    /// Call identifier.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Structured input.
    pub input: Value,
}

/// Fired after a tool executes.
#[derive(Debug, Clone)]
pub struct ToolResultEvent {
    /// Call identifier.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Capped output string.
    pub output: String,
    /// Whether the tool reported failure (including policy denials).
    pub is_error: bool,
}

type Handler<E> = Arc<dyn Fn(E) -> BoxFuture<'static, ()> + Send + Sync>;

/// Container for all hook types.
#[derive(Clone, Default)]
pub struct Hooks {
    token_usage: Vec<Handler<TokenUsageEvent>>,
    text: Vec<Handler<TextEvent>>,
    tool_call: Vec<Handler<ToolCallEvent>>,
    tool_result: Vec<Handler<ToolResultEvent>>,
}

impl Hooks {
    /// An empty hook set; every fire is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token-usage observer.
    pub fn on_token_usage<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(TokenUsageEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.token_usage
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Adds a response-text observer.
    pub fn on_text<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(TextEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.text
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Adds a tool-call observer.
    pub fn on_tool_call<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ToolCallEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tool_call
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Adds a tool-result observer.
    pub fn on_tool_result<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ToolResultEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tool_result
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Fires all token-usage observers in registration order.
    pub async fn fire_token_usage(&self, event: TokenUsageEvent) {
        for handler in &self.token_usage {
            handler(event.clone()).await;
        }
    }

    /// Fires all text observers in registration order.
    pub async fn fire_text(&self, event: TextEvent) {
        for handler in &self.text {
            handler(event.clone()).await;
        }
    }

    /// Fires all tool-call observers in registration order.
    pub async fn fire_tool_call(&self, event: ToolCallEvent) {
        for handler in &self.tool_call {
            handler(event.clone()).await;
        }
    }

    /// Fires all tool-result observers in registration order.
    pub async fn fire_tool_result(&self, event: ToolResultEvent) {
        for handler in &self.tool_result {
            handler(event.clone()).await;
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("token_usage", &format!("{} handlers", self.token_usage.len()))
            .field("text", &format!("{} handlers", self.text.len()))
            .field("tool_call", &format!("{} handlers", self.tool_call.len()))
            .field(
                "tool_result",
                &format!("{} handlers", self.tool_result.len()),
            )
            .finish()
    }
}
