//! Conversational tool-use agent loop for the Anthropic Messages API.
//!
//! `parley-rs` runs a multi-round conversation between a user, an LLM
//! completion provider, and a set of callable tools. The core abstraction is
//! the [`Session`](agent::session::Session): it appends the user's query,
//! asks the provider for a response, executes any requested tools one at a
//! time, appends their results, and repeats until the model answers without
//! requesting a tool.
//!
//! Every outbound request passes through a single choke point
//! ([`complete`](api::completion::complete)) that repairs the conversation,
//! trims it to the context budget, and retries rate-limit and overload
//! failures with linear backoff.
//!
//! # Getting started
//!
//! ```ignore
//! use parley_rs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let client = Arc::new(AnthropicClient::new(std::env::var("ANTHROPIC_API_KEY").unwrap())?);
//!
//!     let tools = ToolSet::new().with(FnTool::new(
//!         ToolDescriptor::new("echo", "Echo the input back", json_schema_for::<EchoArgs>()),
//!         |args: EchoArgs| async move { Ok(vec![ToolContent::text(args.text)]) },
//!     ));
//!
//!     let settings = SessionSettings::new("claude-sonnet-4-5-20250929", "You are helpful.")
//!         .with_max_tool_calls_per_query(10);
//!
//!     let mut session = Session::builder(client.clone(), client, Arc::new(tools))
//!         .settings(settings)
//!         .event_handler(Arc::new(LoggingHandler))
//!         .build()
//!         .await?;
//!
//!     session.process_query("Say hi through the echo tool").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | [`Session`](agent::session::Session) orchestration loop, settings, events, tool execution |
//! | [`api`] | Capability traits, Anthropic client, retrying completion, billing, tracing |
//! | [`context`] | Conversation sanitizer and context budget enforcement |
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, [`ToolSet`](tools::core::ToolSet), tool result content |
//! | [`config`] | Layered configuration for the `parley` binary |
//! | [`error`] | Error taxonomy |

pub mod agent;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod prelude;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";

/// Value of the `anthropic-version` header sent with every request.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model for completions.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Default context window size in tokens.
pub const DEFAULT_MAX_CONTEXT_TOKENS: u64 = 200_000;

/// Fraction of the context window the conversation may occupy.
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.99;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. Used for [`ToolDescriptor::input_schema`].
///
/// # Example
///
/// ```
/// use parley_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     q: String,
///     #[serde(default)]
///     limit: Option<u32>,
/// }
///
/// let schema = json_schema_for::<SearchArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"q".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Base64 image payload carried by an [`ContentBlock::Image`] block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

impl ImageSource {
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source_type: "base64".into(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// One typed unit of message content, in the Anthropic wire format.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        /// `None` is treated as a successful result.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Image {
        source: ImageSource,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// A tool result with block content and an explicit error flag.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: Vec<ContentBlock>,
        is_error: bool,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: ToolResultContent::Blocks(content),
            is_error: Some(is_error),
        }
    }

    /// The text of a `Text` block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Wire name of the block type (`"text"`, `"tool_use"`, ...).
    pub fn type_name(&self) -> &'static str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::ToolUse { .. } => "tool_use",
            ContentBlock::ToolResult { .. } => "tool_result",
            ContentBlock::Image { .. } => "image",
        }
    }

    /// Approximate payload size in characters.
    pub fn char_len(&self) -> usize {
        match self {
            ContentBlock::Text { text } => text.len(),
            ContentBlock::ToolUse { name, input, .. } => name.len() + input.to_string().len(),
            ContentBlock::ToolResult { content, .. } => match content {
                ToolResultContent::Text(s) => s.len(),
                ToolResultContent::Blocks(blocks) => blocks.iter().map(|b| b.char_len()).sum(),
            },
            ContentBlock::Image { source } => source.data.len(),
        }
    }
}

/// Content of a tool result: a bare string or nested blocks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// Message content: shorthand text or an ordered sequence of blocks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Content blocks of this message. Empty for plain-text content.
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    /// Content as blocks. Plain text becomes a single `Text` block.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self.content {
            MessageContent::Text(s) => vec![ContentBlock::text(s)],
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    /// Concatenated text of all `Text` blocks (or the plain-text content).
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Approximate payload size in characters.
    pub fn char_len(&self) -> usize {
        match &self.content {
            MessageContent::Text(s) => s.len(),
            MessageContent::Blocks(blocks) => blocks.iter().map(|b| b.char_len()).sum(),
        }
    }
}

// ── Conversation ───────────────────────────────────────────────────

/// Ordered message history owned by a session.
///
/// Append-only apart from truncation, which removes whole leading pairs.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Remove up to `n` messages from the front.
    pub fn remove_oldest(&mut self, n: usize) {
        let n = n.min(self.messages.len());
        self.messages.drain(..n);
    }

    /// One message per content block, for hosts that render blocks
    /// individually. Plain-text messages are kept as they are.
    pub fn flattened(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            match &message.content {
                MessageContent::Text(_) => out.push(message.clone()),
                MessageContent::Blocks(blocks) => {
                    out.extend(blocks.iter().map(|block| Message {
                        role: message.role,
                        content: MessageContent::Blocks(vec![block.clone()]),
                    }));
                }
            }
        }
        out
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self::from_messages(messages)
    }
}

// ── Tool descriptors ───────────────────────────────────────────────

/// Tool metadata passed to the completion provider.
///
/// The schema is opaque here. Validation happens at the tool-invoker boundary.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

// ── Usage ──────────────────────────────────────────────────────────

/// Token usage reported by the provider for a single completion.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
