//! Context budget enforcement: keeps the conversation under a token ceiling
//! by dropping the oldest user/assistant pairs.
//!
//! The ceiling is `floor(max_context_tokens * safety_margin)`. Token counts
//! come from a [`TokenCounter`]; a counting failure is treated as an
//! unbounded count so the conversation shrinks to the floor instead of
//! being sent oversized. Each removal is followed by a [`sanitize`] pass so
//! a dropped tool result never leaves its tool use unanswered.

use crate::agent::config::SessionSettings;
use crate::agent::events::{EventHandler, SessionEvent};
use crate::api::provider::{ProviderFuture, TokenCountRequest, TokenCounter};
use crate::context::sanitizer::sanitize;
use crate::error::TokenCountError;
use crate::{Message, ToolDescriptor};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Conversations at or below this length are never truncated.
pub const MIN_CONVERSATION_LENGTH: usize = 2;

/// Pause between consecutive counting calls while truncating.
pub const TRUNCATION_DELAY: Duration = Duration::from_millis(5);

/// Token ceiling for a conversation.
///
/// # Example
///
/// ```ignore
/// let budget = ContextBudget::new(200_000).with_safety_margin(0.95);
/// let messages = budget
///     .enforce(messages, &settings, &tools, counter.as_ref(), &NoopHandler)
///     .await;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ContextBudget {
    max_tokens: u64,
    safety_margin: f64,
}

impl ContextBudget {
    pub fn new(max_tokens: u64) -> Self {
        Self {
            max_tokens,
            safety_margin: crate::DEFAULT_SAFETY_MARGIN,
        }
    }

    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::new(settings.max_context_tokens).with_safety_margin(settings.safety_margin)
    }

    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    /// The effective ceiling after the safety margin.
    pub fn limit(&self) -> u64 {
        (self.max_tokens as f64 * self.safety_margin).floor() as u64
    }

    /// Truncate `messages` until they fit the ceiling or reach the floor.
    ///
    /// Always returns a sanitized conversation, even when nothing was removed.
    pub async fn enforce(
        &self,
        mut messages: Vec<Message>,
        settings: &SessionSettings,
        tools: &[ToolDescriptor],
        counter: &dyn TokenCounter,
        events: &dyn EventHandler,
    ) -> Vec<Message> {
        if messages.len() <= MIN_CONVERSATION_LENGTH {
            return messages;
        }

        let limit = self.limit();
        let mut tokens = count_or_unbounded(counter, settings, &messages, tools).await;
        let mut removed = 0usize;

        // Pairs only, and never below the floor.
        while tokens > limit && messages.len() >= MIN_CONVERSATION_LENGTH + 2 {
            messages.drain(..2);
            removed += 2;
            messages = sanitize(&messages);
            tokens = count_or_unbounded(counter, settings, &messages, tools).await;
            debug!(
                "Truncated conversation to {} messages ({})",
                messages.len(),
                ContextUsage::new(tokens, limit).to_log_string()
            );
            tokio::time::sleep(TRUNCATION_DELAY).await;
        }

        if removed > 0 {
            info!(
                "Removed {removed} oldest messages to fit context budget ({} remaining)",
                messages.len()
            );
            events.on_event(&SessionEvent::ContextTruncated {
                removed,
                remaining: messages.len(),
                usage: &ContextUsage::new(tokens, limit),
            });
        }

        sanitize(&messages)
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_CONTEXT_TOKENS)
    }
}

/// Enforce the budget described by `settings`.
pub async fn enforce(
    messages: Vec<Message>,
    settings: &SessionSettings,
    tools: &[ToolDescriptor],
    counter: &dyn TokenCounter,
    events: &dyn EventHandler,
) -> Vec<Message> {
    ContextBudget::from_settings(settings)
        .enforce(messages, settings, tools, counter, events)
        .await
}

async fn count_or_unbounded(
    counter: &dyn TokenCounter,
    settings: &SessionSettings,
    messages: &[Message],
    tools: &[ToolDescriptor],
) -> u64 {
    if messages.is_empty() {
        return 0;
    }
    let request = TokenCountRequest {
        model: &settings.model,
        system: settings.system_prompt(),
        messages,
        tools,
    };
    match counter.count_tokens(&request).await {
        Ok(n) => n,
        Err(e) => {
            warn!("{e}; treating the conversation as over budget");
            u64::MAX
        }
    }
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct ContextUsage {
    /// Tokens counted (`u64::MAX` when counting failed).
    pub tokens: u64,
    /// Effective ceiling.
    pub limit: u64,
}

impl ContextUsage {
    pub fn new(tokens: u64, limit: u64) -> Self {
        Self { tokens, limit }
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        if self.tokens == u64::MAX {
            return format!("context: unknown tokens (limit {})", self.limit);
        }
        let pct = if self.limit > 0 {
            self.tokens as f64 / self.limit as f64 * 100.0
        } else {
            100.0
        };
        format!(
            "context: {} tokens ({pct:.0}% of {})",
            self.tokens, self.limit
        )
    }
}

// ── Offline counter ────────────────────────────────────────────────

/// Character-ratio token estimate. Useful offline and in tests.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenCounter {
    chars_per_token: f64,
}

impl HeuristicTokenCounter {
    pub fn new() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        self.chars_per_token = cpt;
        self
    }

    pub fn estimate(&self, request: &TokenCountRequest<'_>) -> u64 {
        let mut chars = request.system.map_or(0, str::len);
        chars += request.messages.iter().map(Message::char_len).sum::<usize>();
        chars += request
            .tools
            .iter()
            .map(|t| serde_json::to_string(t).map_or(0, |s| s.len()))
            .sum::<usize>();
        (chars as f64 / self.chars_per_token).ceil() as u64
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count_tokens<'a>(
        &'a self,
        request: &'a TokenCountRequest<'a>,
    ) -> ProviderFuture<'a, u64, TokenCountError> {
        let n = self.estimate(request);
        Box::pin(async move { Ok(n) })
    }
}
