//! Convenience re-exports for common `parley-rs` types.
//!
//! Meant to be glob-imported when building agents:
//!
//! ```ignore
//! use parley_rs::prelude::*;
//! ```
//!
//! This pulls in the content model, the [`Session`] and its settings, the
//! capability traits with the Anthropic client, event handlers, and the
//! [`Tool`] trait with [`ToolSet`]. Lower-level pieces (sanitizer helpers,
//! retry internals, span types) are left out. Import those from their
//! modules directly when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ContentBlock, Conversation, Message, Role, ToolDescriptor, Usage, json_schema_for,
};
pub use crate::error::{SessionError, ToolError};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    BroadcastSink, CompositeEventHandler, EventContent, EventHandler, FnEventHandler,
    LoggingHandler, NoopHandler, QueryOutcome, Session, SessionEvent, SessionHandle,
    SessionSettings, SettingsUpdate,
};

// ── Providers ───────────────────────────────────────────────────────
pub use crate::api::{
    AnthropicClient, BillingHook, CompletionProvider, RetryConfig, TokenCounter, UsageMeter,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{ContextBudget, HeuristicTokenCounter};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{FnTool, Tool, ToolContent, ToolFuture, ToolInvoker, ToolSet};
