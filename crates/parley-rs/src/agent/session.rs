//! The tool-call orchestrator.
//!
//! A [`Session`] owns one conversation and runs queries against it:
//!
//! 1. the user's query is appended;
//! 2. a completion is requested through [`complete`];
//! 3. the response blocks are walked in order: text is emitted at once,
//!    tool uses are queued until the round cap is reached;
//! 4. queued tools run one at a time and their results are appended as a
//!    single user message;
//! 5. the loop repeats until a response requests no tools.
//!
//! A failed query leaves the conversation valid and ends with one
//! assistant message carrying the error text.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::builder(client.clone(), client, Arc::new(tools))
//!     .settings(SessionSettings::new(DEFAULT_MODEL, "You are helpful."))
//!     .event_handler(Arc::new(LoggingHandler))
//!     .build()
//!     .await?;
//!
//! let outcome = session.process_query("What's the weather in Oslo?").await?;
//! println!("{}", outcome.text);
//! ```

use super::config::{SessionSettings, SettingsUpdate};
use super::events::{EventContent, EventHandler, NoopHandler, SessionEvent};
use super::execution::{ToolCall, execute_tool_calls};
use crate::api::billing::BillingHook;
use crate::api::completion::{CompletionDeps, complete};
use crate::api::provider::{CompletionProvider, TokenCounter};
use crate::api::tracing::{
    CostTracker, NoopTracer, Tracer, generate_span_id, generate_trace_id, pricing_for_model,
};
use crate::context::sanitizer::sanitize;
use crate::error::SessionError;
use crate::tools::core::ToolInvoker;
use crate::{ContentBlock, Conversation, Message, Role, ToolDescriptor, Usage};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Warning appended when a response asks for more tools than the cap allows.
pub fn tool_limit_warning(limit: u32) -> String {
    format!(
        "Too many tool calls in a single turn! This has been implemented to prevent infinite loops.\n\
         Limit is {limit}.\n\
         You can increase the limit by setting the \"maxNumberOfToolCallsPerQuery\" parameter."
    )
}

/// Whether a tool use in round `round` must be refused.
///
/// Tool rounds are capped at `limit`, and so is the number of tool uses
/// accepted from a single response.
pub fn tool_cap_reached(round: u32, accepted_this_round: usize, limit: u32) -> bool {
    round >= limit || accepted_this_round >= limit as usize
}

/// Summary of a finished query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    /// Completion requests made (1 when no tool was used).
    pub rounds: u32,
    /// Tool uses accepted and executed.
    pub tool_calls: u32,
    /// Whether the tool round cap cut a response short.
    pub hit_tool_limit: bool,
    /// Assistant text across all rounds, joined by blank lines.
    pub text: String,
    /// Token usage summed over all rounds.
    pub usage: Usage,
}

// ── Builder ────────────────────────────────────────────────────────

/// Builder for a [`Session`]. Created by [`Session::builder`].
pub struct SessionBuilder {
    provider: Arc<dyn CompletionProvider>,
    counter: Arc<dyn TokenCounter>,
    invoker: Arc<dyn ToolInvoker>,
    settings: SessionSettings,
    history: Vec<Message>,
    billing: Option<Arc<dyn BillingHook>>,
    tracer: Arc<dyn Tracer>,
    events: Arc<dyn EventHandler>,
    session_id: Option<String>,
}

impl SessionBuilder {
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Seed the conversation with earlier messages.
    pub fn history(mut self, messages: Vec<Message>) -> Self {
        self.history = messages;
        self
    }

    pub fn billing(mut self, hook: Arc<dyn BillingHook>) -> Self {
        self.billing = Some(hook);
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = handler;
        self
    }

    /// Use a caller-chosen id instead of a generated trace id.
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Build the session, listing the available tools once.
    pub async fn build(self) -> Result<Session, SessionError> {
        let tools = self.invoker.list_tools().await?;
        let id = self.session_id.unwrap_or_else(generate_trace_id);
        info!(
            "Session {id} ready: model={}, {} tool(s), {} message(s) of history",
            self.settings.model,
            tools.len(),
            self.history.len()
        );
        Ok(Session {
            id,
            initial_settings: self.settings.clone(),
            settings: self.settings,
            pending: Arc::new(Mutex::new(None)),
            conversation: Conversation::from_messages(self.history),
            tools,
            provider: self.provider,
            counter: self.counter,
            invoker: self.invoker,
            billing: self.billing,
            tracer: self.tracer,
            events: self.events,
            costs: CostTracker::new(),
        })
    }
}

// ── Session ────────────────────────────────────────────────────────

/// A conversation plus the capabilities needed to continue it.
pub struct Session {
    id: String,
    /// Settings the session was built with, restored by `reset_settings`.
    initial_settings: SessionSettings,
    settings: SessionSettings,
    /// Updates queued from outside, applied before the next completion.
    pending: Arc<Mutex<Option<SettingsUpdate>>>,
    conversation: Conversation,
    tools: Vec<ToolDescriptor>,
    provider: Arc<dyn CompletionProvider>,
    counter: Arc<dyn TokenCounter>,
    invoker: Arc<dyn ToolInvoker>,
    billing: Option<Arc<dyn BillingHook>>,
    tracer: Arc<dyn Tracer>,
    events: Arc<dyn EventHandler>,
    costs: CostTracker,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("model", &self.settings.model)
            .field("messages", &self.conversation.len())
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl Session {
    pub fn builder(
        provider: Arc<dyn CompletionProvider>,
        counter: Arc<dyn TokenCounter>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> SessionBuilder {
        SessionBuilder {
            provider,
            counter,
            invoker,
            settings: SessionSettings::default(),
            history: Vec::new(),
            billing: None,
            tracer: Arc::new(NoopTracer),
            events: Arc::new(NoopHandler),
            session_id: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// One message per content block, for hosts that render blocks individually.
    pub fn flattened_conversation(&self) -> Vec<Message> {
        self.conversation.flattened()
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Token and cost totals for the session so far.
    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    pub fn reset_conversation(&mut self) {
        info!("Session {}: conversation reset", self.id);
        self.conversation.clear();
    }

    /// Merge `update` into the settings. Applies to the next completion.
    pub fn update_settings(&mut self, update: SettingsUpdate) {
        update.apply(&mut self.settings);
    }

    /// Restore the settings the session was built with. Queued updates
    /// are dropped.
    pub fn reset_settings(&mut self) {
        info!("Session {}: settings reset", self.id);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.settings = self.initial_settings.clone();
    }

    /// A handle for queueing settings updates while a query is running.
    pub fn settings_updater(&self) -> SettingsUpdater {
        SettingsUpdater {
            pending: self.pending.clone(),
        }
    }

    /// Re-list tools from the invoker.
    pub async fn refresh_tools(&mut self) -> Result<(), SessionError> {
        self.tools = self.invoker.list_tools().await?;
        debug!("Session {}: {} tool(s) available", self.id, self.tools.len());
        Ok(())
    }

    /// Run one user query to completion.
    pub async fn process_query(
        &mut self,
        query: impl Into<String>,
    ) -> Result<QueryOutcome, SessionError> {
        let mut span = self.tracer.start_span(
            "processUserQuery",
            &[
                ("session_id", self.id.clone()),
                ("model", self.settings.model.clone()),
            ],
        );
        self.conversation.push(Message::user(query.into()));

        match self.run_rounds().await {
            Ok(outcome) => {
                span.set_attribute("rounds", outcome.rounds.to_string());
                span.set_attribute("tool_calls", outcome.tool_calls.to_string());
                span.end();
                Ok(outcome)
            }
            Err(e) => {
                error!("Session {}: query failed: {e}", self.id);
                span.record_error(&e.to_string());
                span.end();
                self.conversation = sanitize(self.conversation.messages()).into();
                let text = e.to_string();
                self.events.on_event(&SessionEvent::Message {
                    role: Role::Assistant,
                    content: EventContent::Text(&text),
                });
                self.conversation.push(Message::assistant(text));
                Err(e)
            }
        }
    }

    fn apply_pending_settings(&mut self) {
        let update = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(update) = update {
            debug!("Session {}: applying settings update {update:?}", self.id);
            update.apply(&mut self.settings);
        }
    }

    async fn run_rounds(&mut self) -> Result<QueryOutcome, SessionError> {
        let mut outcome = QueryOutcome::default();
        let mut texts: Vec<String> = Vec::new();
        let mut round = 0u32;

        loop {
            self.apply_pending_settings();
            debug!(
                "Session {}: round {round} ({})",
                self.id,
                generate_span_id(&self.id, round)
            );
            self.events.on_event(&SessionEvent::RoundStart { round });

            let deps = CompletionDeps {
                provider: self.provider.as_ref(),
                counter: self.counter.as_ref(),
                billing: self.billing.as_deref(),
                tracer: self.tracer.as_ref(),
                events: self.events.as_ref(),
                session_id: &self.id,
            };
            let completion = complete(
                self.conversation.messages(),
                &self.settings,
                &self.tools,
                deps,
            )
            .await?;

            self.conversation = Conversation::from_messages(completion.sent);
            outcome.rounds += 1;
            outcome.usage.input_tokens += completion.usage.input_tokens;
            outcome.usage.output_tokens += completion.usage.output_tokens;
            self.costs.record(
                completion.usage.input_tokens,
                completion.usage.output_tokens,
                &pricing_for_model(&self.settings.model),
            );

            let limit = self.settings.max_tool_calls_per_query;
            let mut assistant_blocks = Vec::new();
            let mut queued: Vec<ToolCall> = Vec::new();

            for block in completion.message.into_blocks() {
                match &block {
                    ContentBlock::Text { text } => {
                        self.events.on_event(&SessionEvent::Message {
                            role: Role::Assistant,
                            content: EventContent::Text(text),
                        });
                        texts.push(text.clone());
                    }
                    ContentBlock::ToolUse { .. } => {
                        if tool_cap_reached(round, queued.len(), limit) {
                            warn!("Session {}: tool-call limit of {limit} reached", self.id);
                            let warning = tool_limit_warning(limit);
                            self.events
                                .on_event(&SessionEvent::ToolLimitReached { limit });
                            self.events.on_event(&SessionEvent::Message {
                                role: Role::Assistant,
                                content: EventContent::Text(&warning),
                            });
                            assistant_blocks.push(ContentBlock::text(warning));
                            outcome.hit_tool_limit = true;
                            break;
                        }
                        outcome.tool_calls += 1;
                        self.events.on_event(&SessionEvent::Message {
                            role: Role::Assistant,
                            content: EventContent::Blocks(std::slice::from_ref(&block)),
                        });
                        queued.extend(ToolCall::from_block(&block));
                    }
                    _ => {}
                }
                assistant_blocks.push(block);
            }

            if !assistant_blocks.is_empty() {
                self.conversation
                    .push(Message::assistant_blocks(assistant_blocks));
            }

            if queued.is_empty() {
                self.events.on_event(&SessionEvent::Finished {
                    rounds: outcome.rounds,
                });
                outcome.text = texts.join("\n\n");
                return Ok(outcome);
            }

            let results = execute_tool_calls(
                &queued,
                self.invoker.as_ref(),
                self.settings.tool_call_timeout(),
                self.tracer.as_ref(),
                self.events.as_ref(),
            )
            .await;
            self.conversation.push(Message::user_blocks(results));
            round += 1;
        }
    }
}

/// Queues settings updates for a session from another task.
///
/// Updates merge until the session applies them at the start of its next
/// completion round.
#[derive(Debug, Clone)]
pub struct SettingsUpdater {
    pending: Arc<Mutex<Option<SettingsUpdate>>>,
}

impl SettingsUpdater {
    pub fn update(&self, update: SettingsUpdate) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = Some(match pending.take() {
            Some(earlier) => earlier.merge(update),
            None => update,
        });
    }
}

// ── Shared handle ──────────────────────────────────────────────────

/// A cloneable handle that serializes queries on one session.
///
/// A second query while one is running is rejected with
/// [`SessionError::Busy`] instead of queueing.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<tokio::sync::Mutex<Session>>,
    updater: SettingsUpdater,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        let updater = session.settings_updater();
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(session)),
            updater,
        }
    }

    /// Run a query unless another one is in flight.
    pub async fn try_process(&self, query: impl Into<String>) -> Result<QueryOutcome, SessionError> {
        let mut session = self.inner.try_lock().map_err(|_| SessionError::Busy)?;
        session.process_query(query).await
    }

    /// Queue a settings update. Never waits for a running query.
    pub fn update_settings(&self, update: SettingsUpdate) {
        self.updater.update(update);
    }

    /// Exclusive access to the session, waiting for any running query.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Session> {
        self.inner.lock().await
    }
}
