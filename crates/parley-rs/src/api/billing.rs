//! Token billing hook.
//!
//! After each successful completion the client reports usage to an optional
//! [`BillingHook`], but only when the session's `charge_for_tokens` flag is
//! set. [`UsageMeter`] is the built-in hook: it converts usage into
//! per-model charge events (one unit per started 100 tokens) and keeps a
//! running cost estimate.

use crate::api::tracing::{CostTracker, pricing_for_model};
use crate::error::BillingError;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tracing::info;

/// Boxed future returned by [`BillingHook::charge`].
pub type BillingFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BillingError>> + Send + 'a>>;

/// Receives token usage after each successful completion.
///
/// Errors propagate to the caller of the completion.
pub trait BillingHook: Send + Sync {
    fn charge<'a>(&'a self, input_tokens: u64, output_tokens: u64, model: &'a str)
    -> BillingFuture<'a>;
}

pub const INPUT_TOKENS_HAIKU: &str = "input-tokens-haiku";
pub const OUTPUT_TOKENS_HAIKU: &str = "output-tokens-haiku";
pub const INPUT_TOKENS_SONNET: &str = "input-tokens-sonnet";
pub const OUTPUT_TOKENS_SONNET: &str = "output-tokens-sonnet";

/// A single chargeable event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeEvent {
    pub name: &'static str,
    pub count: u64,
}

/// Charge events for one completion: input first, then output.
pub fn charge_events(input_tokens: u64, output_tokens: u64, model: &str) -> [ChargeEvent; 2] {
    let (input, output) = if model.to_lowercase().contains("haiku") {
        (INPUT_TOKENS_HAIKU, OUTPUT_TOKENS_HAIKU)
    } else {
        (INPUT_TOKENS_SONNET, OUTPUT_TOKENS_SONNET)
    };
    [
        ChargeEvent {
            name: input,
            count: input_tokens.div_ceil(100),
        },
        ChargeEvent {
            name: output,
            count: output_tokens.div_ceil(100),
        },
    ]
}

/// One recorded charge.
#[derive(Debug, Clone)]
pub struct ChargeRecord {
    pub at: DateTime<Utc>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub events: [ChargeEvent; 2],
}

/// In-process [`BillingHook`] that records charge events and cost.
#[derive(Debug, Default)]
pub struct UsageMeter {
    records: Mutex<Vec<ChargeRecord>>,
    costs: Mutex<CostTracker>,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ChargeRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn costs(&self) -> CostTracker {
        self.costs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl BillingHook for UsageMeter {
    fn charge<'a>(
        &'a self,
        input_tokens: u64,
        output_tokens: u64,
        model: &'a str,
    ) -> BillingFuture<'a> {
        Box::pin(async move {
            let events = charge_events(input_tokens, output_tokens, model);
            self.costs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .record(input_tokens, output_tokens, &pricing_for_model(model));
            self.records
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(ChargeRecord {
                    at: Utc::now(),
                    model: model.to_string(),
                    input_tokens,
                    output_tokens,
                    events,
                });
            info!("Charged {input_tokens} input tokens (query+tools) and {output_tokens} output tokens");
            Ok(())
        })
    }
}
