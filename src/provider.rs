//! Provider adapters.
//!
//! The agent loop speaks one canonical format ([`crate::types`]); this
//! module owns the translation to and from each provider's wire protocol.
//! Two dialects are supported:
//!
//! - **Native blocks** ([`AnthropicProvider`]): canonical history is sent
//!   as-is; the response is a list of typed blocks.
//! - **Function calls** ([`OpenAiProvider`]): assistant tool-use blocks
//!   become `tool_calls` with JSON-encoded arguments, tool results become
//!   one `role: "tool"` message each, and the system prompt rides as a
//!   synthetic first message.
//!
//! Responses are delivered whole; streaming is not part of this interface.
//! Transient failures (transport errors, 429, 5xx) are retried with backoff
//! before a provider error is allowed to escape; provider errors are fatal
//! to the turn once they do.

use crate::retry::{RetryConfig, retry_with_backoff};
use crate::types::{ContentBlock, Message, MessageContent, MessageRole};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

/// Tool description forwarded to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name as invoked by the model.
    pub name: String,
    /// Human-readable description; the model leans on this heavily.
    pub description: String,
    /// JSON-schema-shaped input description.
    pub input_schema: Value,
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Call identifier, unique within the turn.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Structured input.
    pub input: Value,
}

/// A whole model response in canonical form.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Concatenated response text (may be empty).
    pub text: String,
    /// Tool invocations in response order.
    pub tool_calls: Vec<ToolCall>,
    /// Provider-reported stop reason, if any.
    pub stop_reason: Option<String>,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
}

/// The exchange surface the agent loop depends on.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Exchanges the canonical history (plus the tool catalog) for one whole
    /// assistant response.
    async fn send(&self, history: &[Message], tools: &[ToolSchema]) -> Result<LlmResponse>;
}

/// Which wire dialect a model speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Native tool-use blocks (dialect A).
    Anthropic,
    /// Function-call style (dialect B).
    OpenAi,
}

impl ProviderKind {
    /// Infers the dialect from the model identifier prefix. Unknown
    /// prefixes default to native blocks.
    pub fn detect(model: &str) -> Self {
        let model = model.to_lowercase();
        if model.starts_with("claude") {
            return ProviderKind::Anthropic;
        }
        const FUNCTION_CALL_PREFIXES: [&str; 6] = ["gpt", "o1", "o3", "kimi", "gemini", "minimax"];
        if FUNCTION_CALL_PREFIXES.iter().any(|p| model.starts_with(p)) {
            return ProviderKind::OpenAi;
        }
        ProviderKind::Anthropic
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openai" | "openai-compatible" => Ok(ProviderKind::OpenAi),
            other => Err(Error::config(format!("unknown provider: {}", other))),
        }
    }
}

/// Connection settings shared by both adapters.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API key for the provider.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Endpoint override; each adapter has its own default.
    pub base_url: Option<String>,
    /// Maximum output tokens per response.
    pub max_tokens: u32,
    /// System prompt, if any.
    pub system_prompt: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
}

impl ProviderConfig {
    /// Settings with the common defaults: 4096 output tokens, 120 s timeout.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            max_tokens: 4096,
            system_prompt: None,
            timeout: 120,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the endpoint base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Builds the adapter matching an explicit kind, or the one detected from
/// the model identifier.
pub fn provider_for(kind: Option<ProviderKind>, config: ProviderConfig) -> Result<Box<dyn LlmProvider>> {
    match kind.unwrap_or_else(|| ProviderKind::detect(&config.model)) {
        ProviderKind::Anthropic => Ok(Box::new(AnthropicProvider::new(config)?)),
        ProviderKind::OpenAi => Ok(Box::new(OpenAiProvider::new(config)?)),
    }
}

// ============================================================================
// DIALECT A: NATIVE BLOCKS
// ============================================================================

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Dialect A: canonical history on the wire, typed blocks back.
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Builds the HTTP client with the configured timeout.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(Error::Http)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com");
        format!("{}/v1/messages", base.trim_end_matches('/'))
    }

    async fn attempt(&self, history: &[Message], tools: &[ToolSchema]) -> Result<LlmResponse> {
        let request = AnthropicRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: self.config.system_prompt.as_deref(),
            messages: history,
            tools: tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::provider(format!("API error {}: {}", status, body)));
        }

        let parsed: AnthropicResponse = response.json().await.map_err(Error::Http)?;
        Ok(collect_blocks(parsed))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn send(&self, history: &[Message], tools: &[ToolSchema]) -> Result<LlmResponse> {
        retry_with_backoff(self.config.retry.clone(), || self.attempt(history, tools)).await
    }
}

/// Text blocks concatenated with newlines; tool-use blocks become calls.
fn collect_blocks(response: AnthropicResponse) -> LlmResponse {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            ContentBlock::Text(t) => texts.push(t.text),
            ContentBlock::ToolUse(u) => tool_calls.push(ToolCall {
                id: u.id,
                name: u.name,
                input: u.input,
            }),
            ContentBlock::ToolResult(_) => {}
        }
    }
    LlmResponse {
        text: texts.join("\n"),
        tool_calls,
        stop_reason: response.stop_reason,
        input_tokens: response.usage.input_tokens,
        output_tokens: response.usage.output_tokens,
    }
}

// ============================================================================
// DIALECT B: FUNCTION CALLS
// ============================================================================

#[derive(Debug, Serialize, PartialEq)]
struct OpenAiMessage {
    role: &'static str,
    // `null` content is meaningful on assistant tool-call messages.
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: OpenAiUsage,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Dialect B: canonical history translated to function-call messages.
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Builds the HTTP client with the configured timeout.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(Error::Http)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    async fn attempt(&self, history: &[Message], tools: &[ToolSchema]) -> Result<LlmResponse> {
        let request = OpenAiRequest {
            model: &self.config.model,
            messages: to_openai_messages(self.config.system_prompt.as_deref(), history),
            max_tokens: self.config.max_tokens,
            tools: tools.iter().map(to_openai_tool).collect(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::provider(format!("API error {}: {}", status, body)));
        }

        let parsed: OpenAiResponse = response.json().await.map_err(Error::Http)?;
        from_openai_response(parsed)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn send(&self, history: &[Message], tools: &[ToolSchema]) -> Result<LlmResponse> {
        retry_with_backoff(self.config.retry.clone(), || self.attempt(history, tools)).await
    }
}

/// Rewrites a tool schema as a function declaration.
fn to_openai_tool(schema: &ToolSchema) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": schema.name,
            "description": schema.description,
            "parameters": schema.input_schema,
        }
    })
}

/// Translates canonical history into the function-call dialect.
///
/// The system prompt becomes a synthetic first message. Assistant messages
/// with tool-use blocks collapse to one message with `tool_calls` and
/// nullable text. User messages holding tool results expand to one
/// `role: "tool"` message per result, errors prefixed with `ERROR: `.
fn to_openai_messages(system: Option<&str>, history: &[Message]) -> Vec<OpenAiMessage> {
    let mut out = Vec::with_capacity(history.len() + 1);
    if let Some(prompt) = system {
        out.push(OpenAiMessage {
            role: "system",
            content: Some(prompt.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for message in history {
        match (&message.role, &message.content) {
            (MessageRole::User, MessageContent::Text(text)) => out.push(OpenAiMessage {
                role: "user",
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            (MessageRole::User, content @ MessageContent::Blocks(_)) => {
                let results = content.tool_results();
                if results.is_empty() {
                    out.push(OpenAiMessage {
                        role: "user",
                        content: Some(content.text()),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                    continue;
                }
                for result in results {
                    let body = if result.is_error {
                        format!("ERROR: {}", result.content)
                    } else {
                        result.content.clone()
                    };
                    out.push(OpenAiMessage {
                        role: "tool",
                        content: Some(body),
                        tool_calls: None,
                        tool_call_id: Some(result.tool_use_id.clone()),
                    });
                }
            }
            (MessageRole::Assistant, content) => {
                let uses = content.tool_uses();
                let text = content.text();
                if uses.is_empty() {
                    out.push(OpenAiMessage {
                        role: "assistant",
                        content: Some(text),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                    continue;
                }
                let tool_calls = uses
                    .iter()
                    .map(|u| {
                        json!({
                            "id": u.id,
                            "type": "function",
                            "function": {
                                "name": u.name,
                                "arguments": u.input.to_string(),
                            }
                        })
                    })
                    .collect();
                out.push(OpenAiMessage {
                    role: "assistant",
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: Some(tool_calls),
                    tool_call_id: None,
                });
            }
        }
    }
    out
}

/// Extracts text, tool calls and usage from `choices[0]`.
fn from_openai_response(response: OpenAiResponse) -> Result<LlmResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::provider("response carried no choices"))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .filter(|c| c.kind == "function" || c.kind.is_empty())
        .map(|c| {
            let arguments = if c.function.arguments.is_empty() {
                "{}".to_string()
            } else {
                c.function.arguments
            };
            let input = serde_json::from_str(&arguments).unwrap_or_else(|_| json!({}));
            ToolCall {
                id: c.id,
                name: c.function.name,
                input,
            }
        })
        .collect();

    Ok(LlmResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        stop_reason: choice.finish_reason,
        input_tokens: response.usage.prompt_tokens,
        output_tokens: response.usage.completion_tokens,
    })
}
