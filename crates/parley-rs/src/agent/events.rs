//! Events and handlers for a [`Session`](super::session::Session).
//!
//! The session reports progress through [`SessionEvent`] variants: every
//! assistant text, tool use, and tool result as it happens, plus lifecycle
//! markers (round start, retries, truncation, finish). Callers implement
//! [`EventHandler`] to render them, log them, or forward them elsewhere.
//!
//! Handlers run inline on the query task and must not block.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`BroadcastSink`] | Fan out owned [`EventRecord`]s over a `tokio` broadcast channel |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::context::ContextUsage;
use crate::error::ErrorKind;
use crate::{ContentBlock, Message, MessageContent, Role};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Message payload carried by [`SessionEvent::Message`].
#[derive(Debug, Clone, Copy)]
pub enum EventContent<'a> {
    Text(&'a str),
    Blocks(&'a [ContentBlock]),
}

/// Events emitted by a session during a query.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// A piece of conversation: assistant text, a tool use, a tool result,
    /// or the error message that ends a failed query.
    Message {
        role: Role,
        content: EventContent<'a>,
    },
    /// A completion round is starting (0 for the first request).
    RoundStart { round: u32 },
    /// Token usage reported by the provider for one completion.
    TokenUsage {
        input_tokens: u64,
        output_tokens: u64,
    },
    /// The oldest messages were dropped to fit the context budget.
    ContextTruncated {
        removed: usize,
        remaining: usize,
        usage: &'a ContextUsage,
    },
    /// A transient provider failure; another attempt follows after `delay`.
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        kind: ErrorKind,
    },
    /// A tool is about to be called.
    ToolExecuting { name: &'a str, input: &'a Value },
    /// The per-query tool-call cap was hit.
    ToolLimitReached { limit: u32 },
    /// The query finished without further tool requests.
    Finished { rounds: u32 },
}

impl SessionEvent<'_> {
    /// Owned copy of the event, for sending across tasks.
    pub fn to_record(&self) -> EventRecord {
        match self {
            SessionEvent::Message { role, content } => EventRecord::Message {
                message: Message {
                    role: *role,
                    content: match content {
                        EventContent::Text(t) => MessageContent::Text((*t).to_string()),
                        EventContent::Blocks(b) => MessageContent::Blocks(b.to_vec()),
                    },
                },
            },
            SessionEvent::RoundStart { round } => EventRecord::RoundStart { round: *round },
            SessionEvent::TokenUsage {
                input_tokens,
                output_tokens,
            } => EventRecord::TokenUsage {
                input_tokens: *input_tokens,
                output_tokens: *output_tokens,
            },
            SessionEvent::ContextTruncated {
                removed,
                remaining,
                usage,
            } => EventRecord::ContextTruncated {
                removed: *removed,
                remaining: *remaining,
                tokens: usage.tokens,
                limit: usage.limit,
            },
            SessionEvent::RetryScheduled {
                attempt,
                delay,
                kind,
            } => EventRecord::RetryScheduled {
                attempt: *attempt,
                delay_ms: delay.as_millis() as u64,
                kind: kind.to_string(),
            },
            SessionEvent::ToolExecuting { name, input } => EventRecord::ToolExecuting {
                name: (*name).to_string(),
                input: (*input).clone(),
            },
            SessionEvent::ToolLimitReached { limit } => {
                EventRecord::ToolLimitReached { limit: *limit }
            }
            SessionEvent::Finished { rounds } => EventRecord::Finished { rounds: *rounds },
        }
    }
}

/// Owned, serializable form of a [`SessionEvent`].
///
/// Discriminated on the `type` field when serialized to JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventRecord {
    Message { message: Message },
    RoundStart { round: u32 },
    TokenUsage { input_tokens: u64, output_tokens: u64 },
    ContextTruncated {
        removed: usize,
        remaining: usize,
        tokens: u64,
        limit: u64,
    },
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
        kind: String,
    },
    ToolExecuting { name: String, input: Value },
    ToolLimitReached { limit: u32 },
    Finished { rounds: u32 },
}

// ── Handlers ───────────────────────────────────────────────────────

/// Observer of session events.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl EventHandler for Printer {
///     fn on_event(&self, event: &SessionEvent<'_>) {
///         if let SessionEvent::Message { role: Role::Assistant, content: EventContent::Text(t) } = event {
///             println!("{t}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &SessionEvent<'_>) {
        let _ = event;
    }
}

impl<T: EventHandler + ?Sized> EventHandler for Arc<T> {
    fn on_event(&self, event: &SessionEvent<'_>) {
        (**self).on_event(event);
    }
}

/// A handler that ignores everything.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let SessionEvent::ToolExecuting { name, .. } = event {
///         println!("-> {name}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&SessionEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&SessionEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&SessionEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(web_enabled, sink.clone());
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain. Handlers are called in registration order.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &SessionEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Broadcasts every event as an [`EventRecord`] to all subscribers.
///
/// Sending never blocks. With no subscribers the event is dropped, and a
/// lagging subscriber loses the oldest records.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<EventRecord>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventHandler for BroadcastSink {
    fn on_event(&self, event: &SessionEvent<'_>) {
        let _ = self.sender.send(event.to_record());
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &SessionEvent<'_>) {
        match event {
            SessionEvent::Message { role, content } => match content {
                EventContent::Text(text) => {
                    let preview: String = text.chars().take(200).collect();
                    debug!(
                        "{role} text: {preview}{}",
                        if text.len() > preview.len() { "..." } else { "" }
                    );
                }
                EventContent::Blocks(blocks) => {
                    let types: Vec<_> = blocks.iter().map(ContentBlock::type_name).collect();
                    debug!("{role} blocks: {}", types.join(", "));
                }
            },
            SessionEvent::RoundStart { round } => {
                info!("[round {round}] requesting completion");
            }
            SessionEvent::TokenUsage {
                input_tokens,
                output_tokens,
            } => {
                debug!("Tokens: input={input_tokens}, output={output_tokens}");
            }
            SessionEvent::ContextTruncated {
                removed,
                remaining,
                usage,
            } => {
                info!(
                    "Dropped {removed} message(s), {remaining} remaining, {}",
                    usage.to_log_string()
                );
            }
            SessionEvent::RetryScheduled {
                attempt,
                delay,
                kind,
            } => {
                warn!("Provider {kind} on attempt {attempt}, retrying in {delay:?}");
            }
            SessionEvent::ToolExecuting { name, .. } => {
                debug!("Executing tool: {name}");
            }
            SessionEvent::ToolLimitReached { limit } => {
                warn!("Tool-call limit reached ({limit})");
            }
            SessionEvent::Finished { rounds } => {
                info!("Query finished after {rounds} round(s)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn composite_dispatches_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (seen.clone(), seen.clone());
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| a.lock().unwrap().push("a")))
            .with_if(false, NoopHandler)
            .with_opt(None::<NoopHandler>)
            .with(FnEventHandler::new(move |_| b.lock().unwrap().push("b")));
        handler.on_event(&SessionEvent::RoundStart { round: 0 });
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn record_owns_message_content() {
        let blocks = [ContentBlock::tool_use("t1", "search", json!({"q": "x"}))];
        let record = SessionEvent::Message {
            role: Role::Assistant,
            content: EventContent::Blocks(&blocks),
        }
        .to_record();
        assert_eq!(
            record,
            EventRecord::Message {
                message: Message::assistant_blocks(blocks.to_vec())
            }
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "message");
    }

    #[tokio::test]
    async fn broadcast_sink_delivers_and_tolerates_no_subscribers() {
        let sink = BroadcastSink::new(8);
        // No subscribers: must not fail.
        sink.on_event(&SessionEvent::Finished { rounds: 1 });

        let mut rx = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 1);
        sink.on_event(&SessionEvent::ToolLimitReached { limit: 2 });
        assert_eq!(
            rx.recv().await.unwrap(),
            EventRecord::ToolLimitReached { limit: 2 }
        );
    }

    #[test]
    fn logging_handler_accepts_every_variant() {
        let usage = ContextUsage::new(10, 100);
        let input = json!({});
        let events = [
            SessionEvent::Message {
                role: Role::Assistant,
                content: EventContent::Text("hello"),
            },
            SessionEvent::RoundStart { round: 1 },
            SessionEvent::TokenUsage {
                input_tokens: 1,
                output_tokens: 2,
            },
            SessionEvent::ContextTruncated {
                removed: 2,
                remaining: 2,
                usage: &usage,
            },
            SessionEvent::RetryScheduled {
                attempt: 1,
                delay: Duration::from_secs(2),
                kind: ErrorKind::RateLimited,
            },
            SessionEvent::ToolExecuting {
                name: "search",
                input: &input,
            },
            SessionEvent::ToolLimitReached { limit: 3 },
            SessionEvent::Finished { rounds: 2 },
        ];
        for event in &events {
            LoggingHandler.on_event(event);
        }
    }
}
