//! Interactive tool-use chat against the Anthropic Messages API.
//!
//! Reads the API key from `ANTHROPIC_API_KEY` (user key) or
//! `LLM_PROVIDER_API_KEY` (platform key, token usage is charged).
//!
//! # Examples
//!
//! ```sh
//! # Interactive session
//! parley --system "You are a terse assistant."
//!
//! # One-shot query
//! parley --query "What is the capital of France?"
//!
//! # Pipe content from stdin
//! cat notes.md | parley --system "Summarize." --stdin
//!
//! # Shell-backed tools with a tighter cap
//! parley --tools tools.json --max-tool-calls 5 --tool-timeout 30
//! ```
//!
//! Inside the REPL, `/reset` clears the conversation, `/model <name>`
//! switches models for the next request, `/reset-settings` restores the
//! startup settings, `/cost` prints token usage, and `/quit` exits.

use clap::Parser;
use parley_rs::agent::{
    CompositeEventHandler, EventContent, FnEventHandler, LoggingHandler, Session, SessionEvent,
    SettingsUpdate,
};
use parley_rs::api::{AnthropicClient, LogTracer, UsageMeter};
use parley_rs::config::{AgentConfig, ConfigLayer};
use parley_rs::error::ToolError;
use parley_rs::tools::{Tool, ToolContent, ToolFuture, ToolSet};
use parley_rs::{Role, ToolDescriptor};
use serde::Deserialize;
use serde_json::Value;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Chat with a tool-using model from the terminal.
///
/// Reads the API key from ANTHROPIC_API_KEY or LLM_PROVIDER_API_KEY.
#[derive(Parser)]
#[command(name = "parley")]
struct Cli {
    // ── Configuration ──────────────────────────────────────────
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// API key (overrides the environment; disables token charging)
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL of the Messages API
    #[arg(long)]
    base_url: Option<String>,

    // ── Model ──────────────────────────────────────────────────
    /// Model to use
    #[arg(long)]
    model: Option<String>,

    /// System prompt to set the assistant's behavior
    #[arg(long)]
    system: Option<String>,

    /// Maximum tokens per response
    #[arg(long)]
    max_output_tokens: Option<u32>,

    /// Total attempts for rate-limited or overloaded requests
    #[arg(long)]
    max_retries: Option<u32>,

    // ── Tool use ───────────────────────────────────────────────
    /// Path to a JSON file defining shell-command tools
    #[arg(long)]
    tools: Option<PathBuf>,

    /// Maximum tool rounds per query (also caps tool calls per response)
    #[arg(long)]
    max_tool_calls: Option<u32>,

    /// Per-call tool timeout in seconds
    #[arg(long)]
    tool_timeout: Option<u64>,

    // ── Input / output ─────────────────────────────────────────
    /// Send a single query and exit
    #[arg(long)]
    query: Option<String>,

    /// Read a single query from stdin and exit
    #[arg(long)]
    stdin: bool,

    /// Print every session event as a JSON line instead of plain text
    #[arg(long)]
    json_events: bool,
}

impl Cli {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            model: self.model.clone(),
            system_prompt: self.system.clone(),
            max_output_tokens: self.max_output_tokens,
            max_tool_calls_per_query: self.max_tool_calls,
            tool_call_timeout_secs: self.tool_timeout,
            max_retries: self.max_retries,
            base_url: self.base_url.clone(),
            tools_file: self.tools.clone(),
            api_key: self.api_key.clone(),
            ..Default::default()
        }
    }

    fn one_shot_query(&self) -> Result<Option<String>, String> {
        let piped = if self.stdin {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Some(buf)
        } else {
            None
        };
        Ok(match (&self.query, piped) {
            (Some(q), Some(p)) => Some(format!("{q}\n\n{p}")),
            (Some(q), None) => Some(q.clone()),
            (None, Some(p)) => Some(p),
            (None, None) => None,
        })
    }
}

// ── Tool file types ────────────────────────────────────────────────

/// Tool definition loaded from the tools JSON file.
#[derive(Deserialize)]
struct ToolFileEntry {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "empty_object_schema", alias = "inputSchema")]
    input_schema: Value,
    /// Shell command template. Use {{param_name}} for argument substitution.
    execute: String,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A tool that runs a shell command built from its arguments.
struct ShellCommandTool {
    descriptor: ToolDescriptor,
    template: String,
}

impl Tool for ShellCommandTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        let cmd = render_command(&self.template, input);
        let name = self.descriptor.name.as_str();
        Box::pin(async move {
            eprintln!("  [tool] {name}: {cmd}");

            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&cmd)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| ToolError::Execution(format!("failed to spawn '{cmd}': {e}")))?;

            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();

            if !output.status.success() {
                Err(ToolError::Execution(format!(
                    "exited with {}.\nstdout:\n{stdout}\nstderr:\n{stderr}",
                    output.status
                )))
            } else if stderr.is_empty() {
                Ok(vec![ToolContent::text(stdout)])
            } else {
                Ok(vec![
                    ToolContent::text(stdout),
                    ToolContent::text(format!("[stderr]\n{stderr}")),
                ])
            }
        })
    }
}

/// Load shell-command tools from a JSON file into a [`ToolSet`].
fn load_tools(path: &Path) -> Result<ToolSet, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read tools file '{}': {e}", path.display()))?;
    let entries: Vec<ToolFileEntry> = serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse tools file '{}': {e}", path.display()))?;

    let mut set = ToolSet::new();
    for entry in entries {
        set.register(ShellCommandTool {
            descriptor: ToolDescriptor::new(entry.name, entry.description, entry.input_schema),
            template: entry.execute,
        });
    }
    Ok(set)
}

/// Substitute {{param}} placeholders in a command template. Placeholders
/// with no matching argument are dropped.
fn render_command(template: &str, input: &Value) -> String {
    let mut cmd = template.to_string();
    if let Some(obj) = input.as_object() {
        for (key, value) in obj {
            let replacement = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            cmd = cmd.replace(&format!("{{{{{key}}}}}"), &replacement);
        }
    }

    let mut cleaned = String::with_capacity(cmd.len());
    let mut rest = cmd.as_str();
    while let Some((before, after)) = rest.split_once("{{") {
        cleaned.push_str(before);
        match after.split_once("}}") {
            Some((_, tail)) => rest = tail,
            None => {
                cleaned.push_str("{{");
                rest = after;
                break;
            }
        }
    }
    cleaned.push_str(rest);

    cleaned
        .split(' ')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Event printing ─────────────────────────────────────────────────

fn print_event(event: &SessionEvent<'_>) {
    match event {
        SessionEvent::Message {
            role: Role::Assistant,
            content: EventContent::Text(text),
        } => println!("{text}"),
        SessionEvent::ToolExecuting { name, input } => {
            eprintln!("  -> {name} {input}");
        }
        SessionEvent::RetryScheduled {
            attempt,
            delay,
            kind,
        } => {
            eprintln!(
                "  ({kind}, retrying in {:.1}s, attempt {attempt})",
                delay.as_secs_f64()
            );
        }
        SessionEvent::ContextTruncated {
            removed, remaining, ..
        } => {
            eprintln!("  (dropped {removed} old message(s), {remaining} remain)");
        }
        SessionEvent::ToolLimitReached { limit } => {
            eprintln!("  (tool call limit of {limit} reached)");
        }
        _ => {}
    }
}

fn print_event_json(event: &SessionEvent<'_>) {
    match serde_json::to_string(&event.to_record()) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("  (failed to serialize event: {e})"),
    }
}

// ── Main ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match AgentConfig::load(cli.config.as_deref(), cli.layer()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(&cli, config).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(cli: &Cli, config: AgentConfig) -> Result<(), String> {
    let mut client = AnthropicClient::new(config.api_key.clone()).map_err(|e| e.to_string())?;
    if let Some(url) = &config.base_url {
        client = client.with_base_url(url);
    }
    let client = Arc::new(client);

    let tools = match &config.tools_file {
        Some(path) => load_tools(path)?,
        None => ToolSet::new(),
    };
    if !tools.is_empty() {
        eprintln!("Loaded {} tool(s)", tools.len());
    }

    let json_events = cli.json_events;
    let events = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with_if(json_events, FnEventHandler::new(print_event_json))
        .with_if(!json_events, FnEventHandler::new(print_event));

    let meter = Arc::new(UsageMeter::new());
    let mut session = Session::builder(client.clone(), client, Arc::new(tools))
        .settings(config.settings)
        .billing(meter.clone())
        .tracer(Arc::new(LogTracer))
        .event_handler(Arc::new(events))
        .build()
        .await
        .map_err(|e| e.to_string())?;

    if let Some(query) = cli.one_shot_query()? {
        return session
            .process_query(query)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string());
    }

    eprintln!(
        "parley ({}). /reset clears, /model <name> switches, /reset-settings restores, \
         /cost shows usage, /quit exits.",
        session.settings().model
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(format!("failed to read stdin: {e}")),
        };
        let line = line.trim();

        match line.split_once(' ').map_or((line, ""), |(c, a)| (c, a.trim())) {
            ("", _) => continue,
            ("/quit" | "/exit", _) => break,
            ("/reset", _) => {
                session.reset_conversation();
                eprintln!("  (conversation cleared)");
            }
            ("/model", "") => eprintln!("  model: {}", session.settings().model),
            ("/model", name) => {
                session.update_settings(SettingsUpdate::model(name));
                eprintln!("  (model set to {})", session.settings().model);
            }
            ("/reset-settings", _) => {
                session.reset_settings();
                eprintln!("  (settings restored, model {})", session.settings().model);
            }
            ("/cost", _) => {
                eprintln!("  {}", session.costs().summary());
                if session.settings().charge_for_tokens {
                    eprintln!("  {} charge record(s)", meter.records().len());
                }
            }
            _ => {
                // Failures are already appended to the conversation and printed.
                if let Err(e) = session.process_query(line).await {
                    tracing::debug!("Query failed: {e}");
                }
            }
        }
    }

    eprintln!("{}", session.costs().summary());
    Ok(())
}
