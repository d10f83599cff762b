//! Provider interaction layer.
//!
//! - [`provider`]: the [`CompletionProvider`] and [`TokenCounter`]
//!   capabilities plus their request/response types.
//! - [`anthropic`]: the HTTP implementation of both.
//! - [`retry`]: backoff for rate-limit and overload failures.
//! - [`completion`]: the retrying completion client every request goes through.
//! - [`billing`]: the optional per-completion billing hook.
//! - [`tracing`]: correlation IDs, span hooks, and cost tracking.

pub mod anthropic;
pub mod billing;
pub mod completion;
pub mod provider;
pub mod retry;
pub mod tracing;

// Re-export commonly used items at the module level.
pub use anthropic::AnthropicClient;
pub use billing::{BillingHook, UsageMeter};
pub use completion::{Completion, CompletionDeps, complete};
pub use provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, TokenCountRequest, TokenCounter,
};
pub use retry::{Backoff, RetryConfig};
pub use tracing::{CostTracker, LogTracer, NoopTracer, Tracer, generate_span_id, generate_trace_id};
