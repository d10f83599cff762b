//! Conversation preparation before every request.
//!
//! 1. **[`sanitizer`]**: redacts base64 payloads and closes unanswered tool
//!    uses with a synthetic error result.
//! 2. **[`budget`]**: counts tokens and drops the oldest message pairs until
//!    the request fits the model's context window.

pub mod budget;
pub mod sanitizer;

pub use budget::{ContextBudget, ContextUsage, HeuristicTokenCounter, enforce};
pub use sanitizer::{orphaned_tool_uses, sanitize};
