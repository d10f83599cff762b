//! Tool abstraction for LLM tool-use agents.
//!
//! The [`Tool`] trait defines the interface every local tool implements:
//! a descriptor (name, description, JSON schema) and an async `execute`
//! method. Tools are collected into a [`ToolSet`], which is the crate's
//! local [`ToolInvoker`]: it handles dispatch, argument validation,
//! timeouts, and result truncation.
//!
//! The session only ever talks to a [`ToolInvoker`], so tools served from
//! another process can be plugged in by implementing that trait directly.

use crate::ToolDescriptor;
use crate::error::ToolError;
use crate::tools::content::ToolContent;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Maximum size (in bytes) of a text item before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<ToolContent>, ToolError>> + Send + 'a>>;

/// Boxed future returned by [`ToolInvoker`] methods.
pub type InvokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ToolError>> + Send + 'a>>;

// ── Tool invoker ───────────────────────────────────────────────────

/// Lists and calls tools on behalf of a session.
pub trait ToolInvoker: Send + Sync {
    /// Descriptors of every callable tool.
    fn list_tools(&self) -> InvokerFuture<'_, Vec<ToolDescriptor>>;

    /// Call `name` with `input`. Implementations should give up after `timeout`.
    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        input: &'a Value,
        timeout: Duration,
    ) -> InvokerFuture<'a, Vec<ToolContent>>;
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool that an LLM agent can invoke.
///
/// # Example
///
/// ```ignore
/// struct Clock;
///
/// impl Tool for Clock {
///     fn descriptor(&self) -> ToolDescriptor {
///         ToolDescriptor::new("clock", "Current UTC time", json!({"type": "object"}))
///     }
///
///     fn execute(&self, _input: &Value) -> ToolFuture<'_> {
///         Box::pin(async { Ok(vec![ToolContent::text(chrono::Utc::now().to_rfc3339())]) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The descriptor sent to the provider.
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with already-parsed JSON input.
    ///
    /// Errors become `is_error` tool results; they never abort the query.
    fn execute(&self, input: &Value) -> ToolFuture<'_>;

    /// The tool's name (delegates to the descriptor).
    fn name(&self) -> String {
        self.descriptor().name
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of local tools dispatched by name.
///
/// # Example
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_max_result_bytes(15_000)
///     .with(Clock)
///     .with_if(enable_search, SearchTool::new(index));
///
/// let descriptors = tools.descriptors();
/// ```
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    /// Validate input against the tool's JSON schema before execution.
    validate_args: bool,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("max_result_bytes", &self.max_result_bytes)
            .finish()
    }
}

impl ToolSet {
    /// Create an empty tool set. Argument validation is on.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: true,
        }
    }

    /// Set the maximum text item size in bytes before truncation.
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Toggle JSON Schema argument validation.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Register a tool only when `condition` is `true`.
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.descriptor()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name with validation, timing, timeout, and truncation.
    pub async fn execute(
        &self,
        name: &str,
        input: &Value,
        timeout: Duration,
    ) -> Result<Vec<ToolContent>, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if self.validate_args {
            validate_tool_arguments(tool.as_ref(), input)?;
        }

        log_tool_call(name, input);
        let start = Instant::now();

        let items = match tokio::time::timeout(timeout, tool.execute(input)).await {
            Ok(result) => result?,
            Err(_) => {
                info!(
                    "Tool {name} timed out after {:.1}s (limit: {:.0}s)",
                    start.elapsed().as_secs_f64(),
                    timeout.as_secs_f64(),
                );
                return Err(ToolError::Timeout {
                    name: name.to_string(),
                    timeout,
                });
            }
        };

        debug!(
            "Tool {name} completed in {:.0}ms ({} item(s))",
            start.elapsed().as_secs_f64() * 1000.0,
            items.len()
        );

        Ok(items
            .into_iter()
            .map(|item| match item {
                ToolContent::Text(s) => ToolContent::Text(truncate_result(s, self.max_result_bytes)),
                other => other,
            })
            .collect())
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolInvoker for ToolSet {
    fn list_tools(&self) -> InvokerFuture<'_, Vec<ToolDescriptor>> {
        let defs = self.descriptors();
        Box::pin(async move { Ok(defs) })
    }

    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        input: &'a Value,
        timeout: Duration,
    ) -> InvokerFuture<'a, Vec<ToolContent>> {
        Box::pin(self.execute(name, input, timeout))
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Vec<ToolContent>, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A closure-based tool that deserializes its input and delegates to a handler.
///
/// Use it for stateless tools. Tools that hold shared state (clients,
/// indexes) are clearer as a struct implementing [`Tool`].
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     /// The search query.
///     query: String,
/// }
///
/// let tool = FnTool::new(
///     ToolDescriptor::new("search", "Search the knowledge base", json_schema_for::<SearchArgs>()),
///     |args: SearchArgs| async move {
///         Ok(vec![ToolContent::text(format!("results for {}", args.query))])
///     },
/// );
/// ```
pub struct FnTool {
    descriptor: ToolDescriptor,
    handler: ErasedToolHandler,
}

impl FnTool {
    pub fn new<A, F, Fut>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ToolContent>, ToolError>> + Send + 'static,
    {
        let name = descriptor.name.clone();
        let erased = move |raw: Value| -> Pin<
            Box<dyn Future<Output = Result<Vec<ToolContent>, ToolError>> + Send>,
        > {
            match serde_json::from_value::<A>(raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => {
                    let err = ToolError::InvalidArguments {
                        name: name.clone(),
                        reason: e.to_string(),
                    };
                    Box::pin(async move { Err(err) })
                }
            }
        };

        Self {
            descriptor,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        (self.handler)(input.clone())
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.descriptor.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate tool input against the tool's declared JSON Schema.
///
/// An invalid schema skips validation rather than blocking the tool.
pub fn validate_tool_arguments(tool: &dyn Tool, input: &Value) -> Result<(), ToolError> {
    let descriptor = tool.descriptor();
    let Ok(validator) = jsonschema::validator_for(&descriptor.input_schema) else {
        return Ok(());
    };

    let errors: Vec<String> = validator
        .iter_errors(input)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments {
            name: descriptor.name,
            reason: errors.join("; "),
        })
    }
}

/// Log a tool call at INFO level with a truncated preview of its input.
pub fn log_tool_call(name: &str, input: &Value) {
    let raw = input.to_string();
    let preview: String = raw.chars().take(120).collect();
    info!(
        "[tool] {name}({preview}{})",
        if raw.len() > preview.len() { "..." } else { "" }
    );
    trace!("[tool] {name} input: {raw}");
}

/// Truncate a string to at most `max` bytes, appending a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let cut = s.floor_char_boundary(max);
    format!(
        "{}...\n[truncated: {} bytes total]",
        s.get(..cut).unwrap_or_default(),
        s.len()
    )
}
