//! Capability traits for the completion provider and the token counter.
//!
//! Both traits return boxed futures so they stay dyn-compatible and can be
//! shared as `Arc<dyn CompletionProvider>` across sessions.

use crate::error::{ProviderError, TokenCountError};
use crate::{ContentBlock, Message, ToolDescriptor, Usage};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the capability traits in this module.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

fn is_empty_slice<T>(s: &&[T]) -> bool {
    s.is_empty()
}

// ── Requests ───────────────────────────────────────────────────────

/// Body of a completion request.
#[derive(Serialize, Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<&'a str>,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub tools: &'a [ToolDescriptor],
}

impl<'a> CompletionRequest<'a> {
    /// The matching token-count request (same model, system, messages, tools).
    pub fn count_request(&self) -> TokenCountRequest<'a> {
        TokenCountRequest {
            model: self.model,
            system: self.system,
            messages: self.messages,
            tools: self.tools,
        }
    }
}

/// Body of a token-count request.
#[derive(Serialize, Debug, Clone, Copy)]
pub struct TokenCountRequest<'a> {
    pub model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<&'a str>,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub tools: &'a [ToolDescriptor],
}

// ── Responses ──────────────────────────────────────────────────────

/// A completed assistant turn.
#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl CompletionResponse {
    /// Concatenated text of the response's text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ── Traits ─────────────────────────────────────────────────────────

/// Produces assistant messages from a conversation.
pub trait CompletionProvider: Send + Sync {
    fn create_message<'a>(
        &'a self,
        request: &'a CompletionRequest<'a>,
    ) -> ProviderFuture<'a, CompletionResponse, ProviderError>;
}

/// Counts the tokens a request would consume.
pub trait TokenCounter: Send + Sync {
    fn count_tokens<'a>(
        &'a self,
        request: &'a TokenCountRequest<'a>,
    ) -> ProviderFuture<'a, u64, TokenCountError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_skips_empty_fields() {
        let messages = vec![Message::user("hi")];
        let req = CompletionRequest {
            model: "claude-sonnet-4-5-20250929",
            max_tokens: 128,
            system: None,
            messages: &messages,
            tools: &[],
        };
        let json = serde_json::to_value(req).unwrap();
        assert!(json.get("system").is_none());
        assert!(json.get("tools").is_none());
        assert_eq!(json["messages"][0]["content"], "hi");

        let count = serde_json::to_value(req.count_request()).unwrap();
        assert!(count.get("max_tokens").is_none());
        assert_eq!(count["model"], "claude-sonnet-4-5-20250929");
    }

    #[test]
    fn response_text_joins_text_blocks() {
        let resp: CompletionResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "a"},
                {"type": "tool_use", "id": "t1", "name": "x", "input": {}},
                {"type": "text", "text": "b"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 2}
        }))
        .unwrap();
        assert_eq!(resp.text(), "a\nb");
        assert_eq!(resp.usage.total(), 12);
    }
}
