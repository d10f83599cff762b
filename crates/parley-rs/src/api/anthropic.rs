//! Async HTTP client for the Anthropic Messages API.
//!
//! Implements both [`CompletionProvider`] (`POST /v1/messages`) and
//! [`TokenCounter`] (`POST /v1/messages/count_tokens`). Non-2xx responses
//! become [`ProviderError::Http`] with the raw body so the retry policy can
//! classify them by status code.

use crate::api::provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, ProviderFuture, TokenCountRequest,
    TokenCounter,
};
use crate::error::{ProviderError, TokenCountError};
use crate::{ANTHROPIC_API_URL, ANTHROPIC_VERSION};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Deserialize)]
struct RawCountResponse {
    input_tokens: u64,
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("parley-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    /// Override the API base URL (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );
        let start = Instant::now();

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::Request(format!("failed to read response: {e}")))?;

        debug!(
            "{path}: HTTP {status} in {:.1}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

impl CompletionProvider for AnthropicClient {
    fn create_message<'a>(
        &'a self,
        request: &'a CompletionRequest<'a>,
    ) -> ProviderFuture<'a, CompletionResponse, ProviderError> {
        Box::pin(async move {
            debug!(
                "LLM request: model={}, messages={}, tools={}, max_tokens={}",
                request.model,
                request.messages.len(),
                request.tools.len(),
                request.max_tokens,
            );
            let text = self.post("/messages", request).await?;
            let parsed: CompletionResponse =
                serde_json::from_str(&text).map_err(|e| ProviderError::Decode(e.to_string()))?;
            debug!(
                "LLM output: {} block(s), usage input={} output={}",
                parsed.content.len(),
                parsed.usage.input_tokens,
                parsed.usage.output_tokens,
            );
            Ok(parsed)
        })
    }
}

impl TokenCounter for AnthropicClient {
    fn count_tokens<'a>(
        &'a self,
        request: &'a TokenCountRequest<'a>,
    ) -> ProviderFuture<'a, u64, TokenCountError> {
        Box::pin(async move {
            let text = self
                .post("/messages/count_tokens", request)
                .await
                .map_err(|e| TokenCountError(e.to_string()))?;
            let parsed: RawCountResponse =
                serde_json::from_str(&text).map_err(|e| TokenCountError(e.to_string()))?;
            Ok(parsed.input_tokens)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trims_trailing_slash() {
        let client = AnthropicClient::new("key")
            .unwrap()
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn debug_hides_api_key() {
        let client = AnthropicClient::new("sk-secret").unwrap();
        assert!(!format!("{client:?}").contains("sk-secret"));
    }

    #[test]
    fn count_response_parses() {
        let parsed: RawCountResponse = serde_json::from_str(r#"{"input_tokens": 42}"#).unwrap();
        assert_eq!(parsed.input_tokens, 42);
    }
}
