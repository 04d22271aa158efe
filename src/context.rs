//! Context window helpers.
//!
//! History grows with every turn and the loop never summarizes. Hosts that
//! need bounded context can estimate usage and truncate between turns with
//! these helpers; truncation never separates a tool-use block from its
//! result, and the truncated history always starts with a plain user
//! message.

use crate::types::{Message, MessageContent, MessageRole};

/// Rough token estimate: one token per four characters of content, plus a
/// small per-message overhead for role framing.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| {
            let content_len = match &m.content {
                MessageContent::Text(text) => text.len(),
                MessageContent::Blocks(blocks) => blocks
                    .iter()
                    .map(|b| serde_json::to_string(b).map(|s| s.len()).unwrap_or(0))
                    .sum(),
            };
            content_len / 4 + 4
        })
        .sum()
}

/// True when estimated usage crosses `threshold` (0.0–1.0) of the limit.
pub fn is_approaching_limit(messages: &[Message], context_limit: usize, threshold: f64) -> bool {
    if context_limit == 0 {
        return true;
    }
    let used = estimate_tokens(messages) as f64;
    used >= context_limit as f64 * threshold.clamp(0.0, 1.0)
}

/// Keeps at most `max_messages` of the most recent history.
///
/// The cut is then advanced to the next plain user text message, so the
/// result never opens mid tool-exchange and the first-message-is-user
/// invariant holds.
pub fn truncate_messages(messages: &[Message], max_messages: usize) -> Vec<Message> {
    if messages.len() <= max_messages {
        return messages.to_vec();
    }
    let mut start = messages.len() - max_messages;
    while start < messages.len() && !is_plain_user_text(&messages[start]) {
        start += 1;
    }
    messages[start..].to_vec()
}

fn is_plain_user_text(message: &Message) -> bool {
    message.role == MessageRole::User && message.content.tool_results().is_empty()
}
