//! Canonical message types for the tamalebot core.
//!
//! Conversation history is stored in one internal format regardless of which
//! provider dialect is on the wire. The provider adapters in
//! [`crate::provider`] are the only code that translates these types to and
//! from a wire protocol.
//!
//! # Message System
//!
//! - [`Message`]: role plus content
//! - [`MessageRole`]: who sent the message (`user` or `assistant`)
//! - [`MessageContent`]: a plain string or an ordered sequence of blocks
//! - [`ContentBlock`]: closed sum of text, tool-use, and tool-result blocks
//!
//! # Invariants
//!
//! Every tool-use block an assistant message emits is answered by a
//! tool-result block with the same call id in the immediately following user
//! message. The agent loop in [`crate::agent`] maintains this; nothing in
//! this module enforces it.

use serde::{Deserialize, Serialize};

/// Identifies the sender of a canonical message.
///
/// Serializes to lowercase (`"user"`, `"assistant"`). The wire-only roles
/// some providers use (`system`, `tool`) never appear in canonical history;
/// the adapters synthesize them at the boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Input from the human or the integration layer, including synthetic
    /// tool-result messages.
    User,
    /// Response from the model, possibly carrying tool-use blocks.
    Assistant,
}

/// Content blocks that can appear in messages.
///
/// Serde's internally tagged format with a `"type"` field:
/// ```json
/// {"type": "text", "text": "Hello"}
/// {"type": "tool_use", "id": "tool_1", "name": "shell", "input": {...}}
/// {"type": "tool_result", "tool_use_id": "tool_1", "content": "hello"}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Opaque UTF-8 text.
    Text(TextBlock),
    /// Request from the model to execute a tool.
    ToolUse(ToolUseBlock),
    /// Result of a tool execution, sent back to the model.
    ToolResult(ToolResultBlock),
}

/// Simple text content in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBlock {
    /// The text content.
    pub text: String,
}

impl TextBlock {
    /// Creates a text block, normalizing CRLF line endings to LF so
    /// canonical history is stable no matter which wire the text came in
    /// on.
    pub fn new(text: impl Into<String>) -> Self {
        let mut text = text.into();
        if text.contains('\r') {
            text = text.replace("\r\n", "\n");
        }
        Self { text }
    }
}

/// Tool use request emitted by the model.
///
/// The call id is opaque and unique within the turn; it correlates the
/// request with its [`ToolResultBlock`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseBlock {
    /// Unique identifier for this tool call.
    pub id: String,
    /// Name of the tool to execute.
    pub name: String,
    /// Structured input: a string-keyed map of JSON-compatible values.
    pub input: serde_json::Value,
}

impl ToolUseBlock {
    /// Creates a tool use block, coercing the input to a string-keyed map.
    ///
    /// The structured-input contract is an object; a provider that hands
    /// back a bare string or `null` for arguments would otherwise poison
    /// every later translation of the history, so anything that is not an
    /// object becomes an empty one here.
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        let input = if input.is_object() {
            input
        } else {
            serde_json::Value::Object(serde_json::Map::new())
        };
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Tool execution result sent back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultBlock {
    /// Call id of the originating [`ToolUseBlock`].
    pub tool_use_id: String,
    /// Output of the execution, already capped by the executor.
    pub content: String,
    /// Error flag. Omitted from the wire when false so the native-blocks
    /// dialect accepts the message unchanged.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(v: &bool) -> bool {
    !v
}

impl ToolResultBlock {
    /// Creates a successful tool result.
    pub fn new(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Creates a tool result carrying an error.
    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// Message content: a plain string or an ordered block sequence.
///
/// Untagged so plain-string messages round-trip as JSON strings, which is
/// what both provider dialects and the persistence format expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Ordered sequence of typed blocks.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// All text carried by this content, block texts joined by newlines.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text(t) => Some(t.text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// The block sequence, or an empty slice for plain-string content.
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    /// Tool-use blocks in order, if any.
    pub fn tool_uses(&self) -> Vec<&ToolUseBlock> {
        self.blocks()
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse(u) => Some(u),
                _ => None,
            })
            .collect()
    }

    /// Tool-result blocks in order, if any.
    pub fn tool_results(&self) -> Vec<&ToolResultBlock> {
        self.blocks()
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        MessageContent::Blocks(blocks)
    }
}

/// A complete message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// The role/sender of this message.
    pub role: MessageRole,
    /// The content of this message.
    pub content: MessageContent,
}

impl Message {
    /// Creates a message with the given role and content.
    pub fn new(role: MessageRole, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text.into())
    }

    /// Creates a plain-text assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text.into())
    }

    /// Creates a user message from content blocks (tool results).
    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::User, blocks)
    }

    /// Creates an assistant message from content blocks (text + tool uses).
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::Assistant, blocks)
    }
}
