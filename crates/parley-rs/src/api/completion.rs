//! The retrying completion client.
//!
//! [`complete`] is the single choke point for outbound requests. It:
//!
//! 1. sanitizes the conversation and enforces the context budget;
//! 2. calls the provider, retrying rate-limit and overload failures;
//! 3. logs a redacted conversation summary when the provider rejects the
//!    request as structurally invalid;
//! 4. reports usage to the billing hook when charging is enabled.

use crate::agent::config::SessionSettings;
use crate::agent::events::{EventHandler, SessionEvent};
use crate::api::billing::BillingHook;
use crate::api::provider::{CompletionProvider, CompletionRequest, TokenCounter};
use crate::api::retry::retry_api_call;
use crate::api::tracing::Tracer;
use crate::context::budget;
use crate::context::sanitizer::sanitize;
use crate::error::{ProviderError, SessionError};
use crate::{Message, MessageContent, Role, ToolDescriptor, Usage};
use tracing::{debug, error};

/// Capabilities a completion needs.
#[derive(Clone, Copy)]
pub struct CompletionDeps<'a> {
    pub provider: &'a dyn CompletionProvider,
    pub counter: &'a dyn TokenCounter,
    pub billing: Option<&'a dyn BillingHook>,
    pub tracer: &'a dyn Tracer,
    pub events: &'a dyn EventHandler,
    pub session_id: &'a str,
}

/// A successful completion.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The assistant message, blocks in provider order.
    pub message: Message,
    pub usage: Usage,
    /// The conversation that was actually sent (sanitized and truncated).
    pub sent: Vec<Message>,
}

/// Request one assistant turn for `messages`.
pub async fn complete(
    messages: &[Message],
    settings: &SessionSettings,
    tools: &[ToolDescriptor],
    deps: CompletionDeps<'_>,
) -> Result<Completion, SessionError> {
    let sent = sanitize(messages);
    let sent = budget::enforce(sent, settings, tools, deps.counter, deps.events).await;

    let request = CompletionRequest {
        model: &settings.model,
        max_tokens: settings.max_output_tokens,
        system: settings.system_prompt(),
        messages: &sent,
        tools,
    };

    let mut span = deps.tracer.start_span(
        "createMessage",
        &[
            ("model", settings.model.clone()),
            ("session_id", deps.session_id.to_string()),
            ("messages", sent.len().to_string()),
        ],
    );

    let result = retry_api_call(
        &settings.retry,
        |attempt, delay, kind| {
            deps.events.on_event(&SessionEvent::RetryScheduled {
                attempt,
                delay,
                kind,
            })
        },
        |attempt| {
            debug!("createMessage attempt {attempt}");
            deps.provider.create_message(&request)
        },
    )
    .await;

    let response = match result {
        Ok(r) => r,
        Err(e) => {
            if let SessionError::Provider(ref provider_err) = e {
                log_structural_error(provider_err, &sent);
            }
            span.record_error(&e.to_string());
            span.end();
            return Err(e);
        }
    };

    let usage = response.usage;
    span.set_attribute("input_tokens", usage.input_tokens.to_string());
    span.set_attribute("output_tokens", usage.output_tokens.to_string());
    deps.events.on_event(&SessionEvent::TokenUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
    });

    if settings.charge_for_tokens
        && let Some(hook) = deps.billing
        && let Err(e) = hook
            .charge(usage.input_tokens, usage.output_tokens, &settings.model)
            .await
    {
        span.record_error(&e.to_string());
        span.end();
        return Err(e.into());
    }
    span.end();

    Ok(Completion {
        message: Message::assistant_blocks(response.content),
        usage,
        sent,
    })
}

// ── Diagnostics ────────────────────────────────────────────────────

/// Redacted view of one message: no payload text, only shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub index: usize,
    pub role: Role,
    pub content_types: Vec<&'static str>,
    pub content_length: usize,
}

/// Shape of every message, for diagnosing provider rejections.
pub fn summarize_conversation(messages: &[Message]) -> Vec<MessageSummary> {
    messages
        .iter()
        .enumerate()
        .map(|(index, m)| MessageSummary {
            index,
            role: m.role,
            content_types: match &m.content {
                MessageContent::Text(_) => vec!["string"],
                MessageContent::Blocks(blocks) => blocks.iter().map(|b| b.type_name()).collect(),
            },
            content_length: match &m.content {
                MessageContent::Text(s) => s.len(),
                MessageContent::Blocks(blocks) => blocks.len(),
            },
        })
        .collect()
}

/// Log the conversation shape if `err` looks like a structural rejection.
pub fn log_structural_error(err: &ProviderError, messages: &[Message]) {
    if !err.is_structural() {
        return;
    }
    error!("Conversation structure error: {err}");
    for s in summarize_conversation(messages) {
        error!(
            "  [{}] role={} types={:?} length={}",
            s.index, s.role, s.content_types, s.content_length
        );
    }
}
