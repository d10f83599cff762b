//! Tool execution for one round.
//!
//! Queued tool uses run strictly in order. Each call is bounded by the
//! session's tool timeout, and a panicking tool is caught. Whatever happens,
//! every call produces exactly one `ToolResult` block, which is emitted as
//! soon as it exists.

use super::events::{EventContent, EventHandler, SessionEvent};
use crate::api::tracing::Tracer;
use crate::error::ToolError;
use crate::tools::content::{error_result_text, into_result_blocks};
use crate::tools::core::ToolInvoker;
use crate::{ContentBlock, Role};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A tool use accepted for execution this round.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    /// The call described by a `ToolUse` block.
    pub fn from_block(block: &ContentBlock) -> Option<Self> {
        match block {
            ContentBlock::ToolUse { id, name, input } => Some(Self {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            _ => None,
        }
    }
}

/// Run `calls` one after another and return their result blocks in order.
pub async fn execute_tool_calls(
    calls: &[ToolCall],
    invoker: &dyn ToolInvoker,
    timeout: Duration,
    tracer: &dyn Tracer,
    events: &dyn EventHandler,
) -> Vec<ContentBlock> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        events.on_event(&SessionEvent::ToolExecuting {
            name: &call.name,
            input: &call.input,
        });
        let block = execute_tool_call(call, invoker, timeout, tracer).await;
        events.on_event(&SessionEvent::Message {
            role: Role::User,
            content: EventContent::Blocks(std::slice::from_ref(&block)),
        });
        results.push(block);
    }
    results
}

/// Run one call inside a `toolCall` span and convert the outcome to a
/// `ToolResult` block. Emitting is left to the caller.
pub async fn execute_tool_call(
    call: &ToolCall,
    invoker: &dyn ToolInvoker,
    timeout: Duration,
    tracer: &dyn Tracer,
) -> ContentBlock {
    let mut span = tracer.start_span(
        "toolCall",
        &[
            ("tool", call.name.clone()),
            ("tool_use_id", call.id.clone()),
        ],
    );
    let start = Instant::now();

    let outcome = tokio::time::timeout(
        timeout,
        AssertUnwindSafe(invoker.call_tool(&call.name, &call.input, timeout)).catch_unwind(),
    )
    .await;

    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(_panic)) => Err(ToolError::Panicked(call.name.clone())),
        Err(_elapsed) => Err(ToolError::Timeout {
            name: call.name.clone(),
            timeout,
        }),
    };

    let block = match result {
        Ok(items) => {
            debug!(
                "Tool {} returned {} item(s) in {:.0}ms",
                call.name,
                items.len(),
                start.elapsed().as_secs_f64() * 1000.0
            );
            ContentBlock::tool_result(&call.id, into_result_blocks(&call.name, items), false)
        }
        Err(e) => {
            warn!("Tool {} failed: {e}", call.name);
            span.record_error(&e.to_string());
            ContentBlock::tool_result(
                &call.id,
                vec![ContentBlock::text(error_result_text(&call.name, &e))],
                true,
            )
        }
    };
    span.end();
    block
}
