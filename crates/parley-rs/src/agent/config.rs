//! Runtime settings for a [`Session`](super::session::Session).
//!
//! Settings are read at the start of every completion call, so a
//! [`SettingsUpdate`] applied between queries (or between rounds by a host
//! holding the session) takes effect on the next request.
//!
//! # Examples
//!
//! ```ignore
//! let settings = SessionSettings::new("claude-sonnet-4-5-20250929", "You are helpful.")
//!     .with_max_output_tokens(4096)
//!     .with_max_tool_calls_per_query(20)
//!     .with_tool_call_timeout_secs(60);
//! ```

use crate::api::retry::RetryConfig;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;
pub const DEFAULT_MAX_TOOL_CALLS_PER_QUERY: u32 = 10;
pub const DEFAULT_TOOL_CALL_TIMEOUT_SECS: u64 = 300;

/// Settings consulted by the completion client and the orchestrator.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// System prompt. Empty means none is sent.
    pub system_prompt: String,
    /// Model identifier (e.g. `"claude-sonnet-4-5-20250929"`).
    pub model: String,
    /// Maximum tokens per response.
    pub max_output_tokens: u32,
    /// Tool rounds per query, and ToolUse blocks accepted from a single
    /// response, before the loop is cut off.
    pub max_tool_calls_per_query: u32,
    /// Per-call tool timeout.
    pub tool_call_timeout_secs: u64,
    /// Context window of the model, in tokens.
    pub max_context_tokens: u64,
    /// Fraction of the window the conversation may fill.
    pub safety_margin: f64,
    /// Report usage to the billing hook after each completion.
    pub charge_for_tokens: bool,
    /// Retry policy for rate-limit and overload failures.
    pub retry: RetryConfig,
}

impl SessionSettings {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    /// The system prompt, or `None` when empty.
    pub fn system_prompt(&self) -> Option<&str> {
        Some(self.system_prompt.as_str()).filter(|s| !s.is_empty())
    }

    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_call_timeout_secs)
    }

    // ── Builder methods ───────────────────────────────────────────

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_max_tool_calls_per_query(mut self, max: u32) -> Self {
        self.max_tool_calls_per_query = max;
        self
    }

    pub fn with_tool_call_timeout_secs(mut self, secs: u64) -> Self {
        self.tool_call_timeout_secs = secs;
        self
    }

    pub fn with_max_context_tokens(mut self, max_context_tokens: u64) -> Self {
        self.max_context_tokens = max_context_tokens;
        self
    }

    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_charge_for_tokens(mut self, charge: bool) -> Self {
        self.charge_for_tokens = charge;
        self
    }

    /// Set the retry policy for transient provider failures.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            model: crate::DEFAULT_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            max_tool_calls_per_query: DEFAULT_MAX_TOOL_CALLS_PER_QUERY,
            tool_call_timeout_secs: DEFAULT_TOOL_CALL_TIMEOUT_SECS,
            max_context_tokens: crate::DEFAULT_MAX_CONTEXT_TOKENS,
            safety_margin: crate::DEFAULT_SAFETY_MARGIN,
            charge_for_tokens: false,
            retry: RetryConfig::default(),
        }
    }
}

/// A partial settings change. `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub max_tool_calls_per_query: Option<u32>,
    pub tool_call_timeout_secs: Option<u64>,
}

impl SettingsUpdate {
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Default::default()
        }
    }

    /// Merge into `settings`.
    pub fn apply(self, settings: &mut SessionSettings) {
        if let Some(v) = self.system_prompt {
            settings.system_prompt = v;
        }
        if let Some(v) = self.model {
            settings.model = v;
        }
        if let Some(v) = self.max_output_tokens {
            settings.max_output_tokens = v;
        }
        if let Some(v) = self.max_tool_calls_per_query {
            settings.max_tool_calls_per_query = v;
        }
        if let Some(v) = self.tool_call_timeout_secs {
            settings.tool_call_timeout_secs = v;
        }
    }

    /// Combine with a later update. Fields set in `newer` win.
    pub fn merge(self, newer: SettingsUpdate) -> Self {
        Self {
            system_prompt: newer.system_prompt.or(self.system_prompt),
            model: newer.model.or(self.model),
            max_output_tokens: newer.max_output_tokens.or(self.max_output_tokens),
            max_tool_calls_per_query: newer
                .max_tool_calls_per_query
                .or(self.max_tool_calls_per_query),
            tool_call_timeout_secs: newer.tool_call_timeout_secs.or(self.tool_call_timeout_secs),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = SessionSettings::new("m", "");
        assert_eq!(s.max_output_tokens, 2048);
        assert_eq!(s.max_tool_calls_per_query, 10);
        assert_eq!(s.tool_call_timeout(), Duration::from_secs(300));
        assert_eq!(s.max_context_tokens, 200_000);
        assert!(!s.charge_for_tokens);
        assert_eq!(s.system_prompt(), None);
    }

    #[test]
    fn update_merges_only_present_fields() {
        let mut s = SessionSettings::new("old", "sys").with_max_output_tokens(100);
        SettingsUpdate {
            model: Some("new".into()),
            max_tool_calls_per_query: Some(3),
            ..Default::default()
        }
        .apply(&mut s);
        assert_eq!(s.model, "new");
        assert_eq!(s.max_tool_calls_per_query, 3);
        assert_eq!(s.max_output_tokens, 100);
        assert_eq!(s.system_prompt(), Some("sys"));
    }

    #[test]
    fn merge_prefers_newer() {
        let merged = SettingsUpdate::model("a").merge(SettingsUpdate {
            model: Some("b".into()),
            max_output_tokens: Some(7),
            ..Default::default()
        });
        assert_eq!(merged.model.as_deref(), Some("b"));
        assert_eq!(merged.max_output_tokens, Some(7));
    }

    #[test]
    fn update_deserializes_camel_case() {
        let u: SettingsUpdate =
            serde_json::from_str(r#"{"maxToolCallsPerQuery": 4, "model": "x"}"#).unwrap();
        assert_eq!(u.max_tool_calls_per_query, Some(4));
        assert_eq!(u.model.as_deref(), Some("x"));
        assert!(!u.is_empty());
        assert!(SettingsUpdate::default().is_empty());
    }
}
