//! Correlation IDs, span hooks, and cost tracking.
//!
//! Each session gets a `trace_id`; each query round gets a span id derived
//! from it. The [`Tracer`] trait is the optional tracing hook: the session
//! opens `processUserQuery`, `createMessage`, and `toolCall` spans through
//! it. [`NoopTracer`] can be substituted with no behavior change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};
use tracing::{debug, warn};

/// Generate a unique trace ID for a session.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Use a counter to handle sub-nanosecond calls.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Generate a span ID for a round within a session.
pub fn generate_span_id(trace_id: &str, round: u32) -> String {
    format!("{trace_id}:r{round}")
}

// ── Tracing hook ───────────────────────────────────────────────────

/// An open span. Dropping without [`end`](Span::end) is allowed.
pub trait Span: Send {
    fn set_attribute(&mut self, key: &str, value: String);
    fn record_error(&mut self, message: &str);
    fn end(self: Box<Self>);
}

/// Factory for spans.
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, attributes: &[(&str, String)]) -> Box<dyn Span>;
}

/// A tracer whose spans do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

struct NoopSpan;

impl Span for NoopSpan {
    fn set_attribute(&mut self, _key: &str, _value: String) {}
    fn record_error(&mut self, _message: &str) {}
    fn end(self: Box<Self>) {}
}

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str, _attributes: &[(&str, String)]) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

/// A tracer that reports span lifecycles through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

struct LogSpan {
    name: String,
    started: Instant,
    attributes: Vec<(String, String)>,
    error: Option<String>,
}

impl Span for LogSpan {
    fn set_attribute(&mut self, key: &str, value: String) {
        self.attributes.push((key.to_string(), value));
    }

    fn record_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }

    fn end(self: Box<Self>) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let attrs: Vec<String> = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        match &self.error {
            Some(err) => warn!(
                "[span] {} failed after {elapsed_ms:.0}ms: {err} [{}]",
                self.name,
                attrs.join(", ")
            ),
            None => debug!(
                "[span] {} ok in {elapsed_ms:.0}ms [{}]",
                self.name,
                attrs.join(", ")
            ),
        }
    }
}

impl Tracer for LogTracer {
    fn start_span(&self, name: &str, attributes: &[(&str, String)]) -> Box<dyn Span> {
        debug!("[span] {name} started");
        Box::new(LogSpan {
            name: name.to_string(),
            started: Instant::now(),
            attributes: attributes
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            error: None,
        })
    }
}

// ── Pricing ────────────────────────────────────────────────────────

/// Per-model pricing for cost estimation (USD per 1M tokens).
#[derive(Debug, Clone)]
pub struct ModelPricing {
    /// Price per 1M input tokens.
    pub input_per_million: f64,
    /// Price per 1M output tokens.
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Estimate cost for given token counts.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        // Sonnet-class pricing.
        Self {
            input_per_million: 3.0,
            output_per_million: 15.0,
        }
    }
}

/// Approximate pricing for an Anthropic model id.
///
/// Matches on family and generation, so dated ids such as
/// `claude-haiku-4-5-20251001` resolve like their aliases. Unknown models
/// are priced as Sonnet. Used for the running estimate only; charges go
/// through the billing hook.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.to_lowercase();
    let (input_per_million, output_per_million) = if name.contains("opus-4-5") {
        (5.0, 25.0)
    } else if name.contains("opus") {
        (15.0, 75.0)
    } else if name.contains("haiku-4") {
        (1.0, 5.0)
    } else if name.contains("haiku") {
        (0.80, 4.0)
    } else {
        return ModelPricing::default();
    };
    ModelPricing {
        input_per_million,
        output_per_million,
    }
}

/// Cumulative token and cost tracker.
#[derive(Debug, Default, Clone)]
pub struct CostTracker {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record token usage for one completion.
    pub fn record(&mut self, input_tokens: u64, output_tokens: u64, pricing: &ModelPricing) {
        self.total_input_tokens += input_tokens;
        self.total_output_tokens += output_tokens;
        self.estimated_cost_usd += pricing.estimate_cost(input_tokens, output_tokens);
    }

    /// Total tokens consumed.
    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "tokens: {} input + {} output = {} total, est. cost: ${:.4}",
            self.total_input_tokens,
            self.total_output_tokens,
            self.total_tokens(),
            self.estimated_cost_usd,
        )
    }
}
