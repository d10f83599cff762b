//! Conversation repair and base64 redaction.
//!
//! [`sanitize`] is the structural safety net applied before every outbound
//! request and after every truncation step. It is pure and idempotent:
//!
//! - **Redaction** replaces base64 payloads in text positions with
//!   [`IMAGE_BASE64_PLACEHOLDER`], keeping block type and position.
//! - **Repair** appends a synthetic tool result for every tool use that has
//!   no matching result anywhere in the conversation.

use crate::{ContentBlock, Message, MessageContent, ToolResultContent};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use std::collections::HashSet;
use tracing::debug;

/// Replacement text for redacted base64 payloads.
pub const IMAGE_BASE64_PLACEHOLDER: &str =
    "[Base64 encoded content - image was pruned to save context tokens]";

/// Text of the synthetic result appended for an orphaned tool use.
pub const MISSING_TOOL_RESULT_TEXT: &str =
    "[Tool use without result - reason unknown, most likely tool failed]";

/// Shortest payload considered for redaction. Below this, ordinary words
/// like `"test"` or `"abcd"` would decode as base64.
pub const MIN_BASE64_LEN: usize = 100;

/// Whether `s` looks like a base64 payload worth redacting.
pub fn is_base64(s: &str) -> bool {
    let s = s.trim();
    if s.len() < MIN_BASE64_LEN || s.chars().any(char::is_whitespace) {
        return false;
    }
    STANDARD.decode(s).is_ok() || URL_SAFE.decode(s).is_ok()
}

fn redact_text(text: &str) -> Option<String> {
    if text != IMAGE_BASE64_PLACEHOLDER && is_base64(text) {
        Some(IMAGE_BASE64_PLACEHOLDER.to_string())
    } else {
        None
    }
}

fn redact_block(block: &ContentBlock) -> ContentBlock {
    match block {
        ContentBlock::Text { text } => match redact_text(text) {
            Some(redacted) => ContentBlock::Text { text: redacted },
            None => block.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let content = match content {
                ToolResultContent::Text(text) => {
                    ToolResultContent::Text(redact_text(text).unwrap_or_else(|| text.clone()))
                }
                ToolResultContent::Blocks(blocks) => ToolResultContent::Blocks(
                    blocks
                        .iter()
                        .map(|nested| match nested {
                            ContentBlock::Text { text } => ContentBlock::Text {
                                text: redact_text(text).unwrap_or_else(|| text.clone()),
                            },
                            other => other.clone(),
                        })
                        .collect(),
                ),
            };
            ContentBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content,
                is_error: *is_error,
            }
        }
        other => other.clone(),
    }
}

fn redact_message(message: &Message) -> Message {
    let content = match &message.content {
        MessageContent::Text(text) => {
            MessageContent::Text(redact_text(text).unwrap_or_else(|| text.clone()))
        }
        MessageContent::Blocks(blocks) => {
            MessageContent::Blocks(blocks.iter().map(redact_block).collect())
        }
    };
    Message {
        role: message.role,
        content,
    }
}

/// Tool use ids with no matching tool result, in first-seen order.
pub fn orphaned_tool_uses(messages: &[Message]) -> Vec<String> {
    let mut uses: Vec<&str> = Vec::new();
    let mut results: HashSet<&str> = HashSet::new();
    for block in messages.iter().flat_map(|m| m.blocks()) {
        match block {
            ContentBlock::ToolUse { id, .. } => uses.push(id),
            ContentBlock::ToolResult { tool_use_id, .. } => {
                results.insert(tool_use_id);
            }
            _ => {}
        }
    }
    let mut seen = HashSet::new();
    uses.into_iter()
        .filter(|id| !results.contains(id) && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Redact base64 payloads and repair orphaned tool uses.
///
/// Never removes or reorders existing messages. Every synthetic result is
/// appended as its own user message at the end.
pub fn sanitize(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = messages.iter().map(redact_message).collect();
    for id in orphaned_tool_uses(&out) {
        debug!("Adding synthetic tool_result for orphaned tool_use {id}");
        out.push(Message::user_blocks(vec![ContentBlock::ToolResult {
            tool_use_id: id,
            content: ToolResultContent::Text(MISSING_TOOL_RESULT_TEXT.to_string()),
            is_error: None,
        }]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use serde_json::json;

    fn b64_payload() -> String {
        STANDARD.encode([0x89u8, 0x50, 0x4E, 0x47].repeat(40))
    }

    #[test]
    fn base64_detection() {
        assert!(is_base64(&b64_payload()));
        assert!(!is_base64("hello"));
        assert!(!is_base64("abcd"));
        assert!(!is_base64(&"The quick brown fox jumps over the lazy dog. ".repeat(5)));
        assert!(!is_base64(IMAGE_BASE64_PLACEHOLDER));
    }

    #[test]
    fn redacts_text_blocks_only_when_base64() {
        let messages = vec![
            Message::user(b64_payload()),
            Message::assistant_blocks(vec![
                ContentBlock::text("Plain prose stays."),
                ContentBlock::text(b64_payload()),
            ]),
        ];
        let out = sanitize(&messages);
        assert_eq!(out[0].content, MessageContent::Text(IMAGE_BASE64_PLACEHOLDER.into()));
        assert_eq!(out[1].blocks()[0], ContentBlock::text("Plain prose stays."));
        assert_eq!(out[1].blocks()[1], ContentBlock::text(IMAGE_BASE64_PLACEHOLDER));
    }

    #[test]
    fn redacts_inside_tool_results() {
        let messages = vec![
            Message::assistant_blocks(vec![ContentBlock::tool_use("t1", "shot", json!({}))]),
            Message::user_blocks(vec![
                ContentBlock::tool_result(
                    "t1",
                    vec![ContentBlock::text("ok"), ContentBlock::text(b64_payload())],
                    false,
                ),
                ContentBlock::ToolResult {
                    tool_use_id: "t1".into(),
                    content: ToolResultContent::Text(b64_payload()),
                    is_error: None,
                },
            ]),
        ];
        let out = sanitize(&messages);
        assert_eq!(out.len(), 2);
        match &out[1].blocks()[0] {
            ContentBlock::ToolResult {
                content: ToolResultContent::Blocks(blocks),
                is_error,
                ..
            } => {
                assert_eq!(blocks[0], ContentBlock::text("ok"));
                assert_eq!(blocks[1], ContentBlock::text(IMAGE_BASE64_PLACEHOLDER));
                assert_eq!(*is_error, Some(false));
            }
            other => panic!("unexpected block: {other:?}"),
        }
        match &out[1].blocks()[1] {
            ContentBlock::ToolResult {
                content: ToolResultContent::Text(text),
                ..
            } => assert_eq!(text, IMAGE_BASE64_PLACEHOLDER),
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn repairs_orphaned_tool_use_at_end() {
        let messages = vec![
            Message::user("hi"),
            Message::assistant_blocks(vec![
                ContentBlock::tool_use("t1", "search", json!({"q": "x"})),
                ContentBlock::tool_use("t2", "search", json!({"q": "y"})),
            ]),
            Message::user_blocks(vec![ContentBlock::tool_result("t2", vec![], false)]),
        ];
        let out = sanitize(&messages);
        assert_eq!(out.len(), 4);
        assert_eq!(&out[..3], &messages[..]);
        let last = &out[3];
        assert_eq!(last.role, Role::User);
        assert_eq!(
            last.blocks(),
            &[ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: ToolResultContent::Text(MISSING_TOOL_RESULT_TEXT.into()),
                is_error: None,
            }]
        );
    }

    #[test]
    fn result_before_use_is_not_orphaned() {
        let messages = vec![
            Message::user_blocks(vec![ContentBlock::tool_result("t1", vec![], false)]),
            Message::assistant_blocks(vec![ContentBlock::tool_use("t1", "search", json!({}))]),
        ];
        assert!(orphaned_tool_uses(&messages).is_empty());
        assert_eq!(sanitize(&messages), messages);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let messages = vec![
            Message::user(b64_payload()),
            Message::assistant_blocks(vec![
                ContentBlock::text("calling"),
                ContentBlock::tool_use("a", "x", json!({})),
                ContentBlock::tool_use("b", "y", json!({})),
            ]),
            Message::user_blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "zzz".into(),
                content: ToolResultContent::Text(b64_payload()),
                is_error: Some(true),
            }]),
        ];
        let once = sanitize(&messages);
        let twice = sanitize(&once);
        assert_eq!(once, twice);
        assert!(orphaned_tool_uses(&once).is_empty());
    }

    #[test]
    fn empty_conversation_is_unchanged() {
        assert!(sanitize(&[]).is_empty());
    }
}
