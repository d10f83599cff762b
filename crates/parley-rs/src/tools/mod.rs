//! Tool abstractions for LLM tool-use agents.
//!
//! A session reaches its tools only through the [`ToolInvoker`] trait.
//! [`ToolSet`] is the in-process implementation:
//!
//! - **[`FnTool`]**: closure-based, deserializes typed arguments. Best for simple tools.
//! - **`impl Tool`**: full struct with [`Tool::descriptor()`] and
//!   [`Tool::execute()`]. Best for tools that hold state.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`], [`ToolInvoker`], [`ToolSet`], [`FnTool`], and validation helpers.
//! - [`content`]: [`ToolContent`] and its conversion into tool-result blocks.

pub mod content;
pub mod core;

// Re-export commonly used items at the module level.
pub use content::{ToolContent, detect_image_format, into_result_blocks, parse_tool_output};
pub use core::{
    DEFAULT_MAX_RESULT_BYTES, FnTool, InvokerFuture, Tool, ToolFuture, ToolInvoker, ToolSet,
    truncate_result, validate_tool_arguments,
};
