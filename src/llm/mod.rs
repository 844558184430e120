// =============================================================================
// LLM Client (C4)
// =============================================================================
//
// Provider-agnostic chat call with retry and response normalization, shaped
// like `binance::BinanceClient`: a thin reqwest wrapper with `#[instrument]`
// spans and `anyhow::Context` on every fallible step. The provider seam is a
// `ChatTransport` trait (same pattern as `MarketDataProvider`/`ExchangeAdapter`)
// so the retry/normalization logic is testable without a live HTTP endpoint.
// =============================================================================

pub mod mock;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// Maximum call attempts before giving up.
const MAX_ATTEMPTS: u32 = 3;
/// Linear backoff base: attempt N waits N * this duration before retrying.
const BACKOFF_STEP: Duration = Duration::from_secs(2);

/// Substrings that mark a transport error as retryable — transient network
/// conditions rather than a malformed request or an auth failure.
const RETRYABLE_MARKERS: &[&str] = &[
    "eof",
    "timeout",
    "connection reset",
    "connection refused",
    "temporary failure",
    "no such host",
];

/// A chat completion transport: one provider endpoint, one model. Kept
/// minimal so a mock can stand in for it in tests.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// HTTP-backed [`ChatTransport`] for an OpenAI-compatible `/chat/completions`
/// endpoint (covers local inference servers and hosted providers alike).
pub struct HttpChatTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

/// Default request timeout (spec.md §4.5/§5: 120s for the LLM client).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

impl HttpChatTransport {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    #[instrument(skip(self, system, user), name = "llm::complete", fields(model = %self.model))]
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.context("chat completion request failed")?;
        let status = resp.status();
        let payload: serde_json::Value = resp.json().await.context("failed to parse chat completion response")?;

        if !status.is_success() {
            anyhow::bail!("chat completion endpoint returned {status}: {payload}");
        }

        // This transport speaks the OpenAI-compatible `choices[].message`
        // shape only; a truncated (non-2xx, or content present but cut short)
        // response is passed through as-is rather than treated as an error —
        // the caller's blank-text fallback in `normalize` handles an empty
        // `content` either way.
        let content = payload["choices"][0]["message"]["content"].as_str().unwrap_or_default();
        let reasoning = payload["choices"][0]["message"]["reasoning"].as_str().unwrap_or_default();

        // Some providers (e.g. reasoning-model dialects) leave `content`
        // blank and put the actual text in `reasoning` instead.
        let text = if content.trim().is_empty() && !reasoning.trim().is_empty() {
            reasoning.to_string()
        } else {
            content.to_string()
        };

        debug!(len = text.len(), "chat completion received");
        Ok(text)
    }
}

/// Call `transport` with retry on transient failures, returning normalized
/// text. Never returns an error for a reachable-but-degenerate response —
/// only for exhausted retries against a transport that keeps failing.
pub async fn call(transport: &dyn ChatTransport, system: &str, user: &str) -> Result<String> {
    let mut last_err = None;

    for attempt in 1..=MAX_ATTEMPTS {
        match transport.complete(system, user).await {
            Ok(text) => return Ok(normalize(&text)),
            Err(err) if attempt < MAX_ATTEMPTS && is_retryable(&err) => {
                let wait = BACKOFF_STEP * attempt;
                warn!(attempt, ?wait, error = %err, "retryable llm call failure, backing off");
                tokio::time::sleep(wait).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("llm call exhausted retries")))
}

fn is_retryable(err: &anyhow::Error) -> bool {
    let text = err.to_string().to_lowercase();
    RETRYABLE_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Strip chat-template artifacts a misconfigured local model sometimes
/// leaks into its output, and guarantee a non-empty, decision-parseable
/// result even when the model returns nothing.
fn normalize(raw: &str) -> String {
    const MARKERS: &[&str] = &["<s>", "</s>", "[INST]", "[/INST]", "<|im_start|>", "<|im_end|>"];

    let mut text = raw.to_string();
    for marker in MARKERS {
        text = text.replace(marker, "");
    }
    let trimmed = text.trim();

    if trimmed.is_empty() {
        warn!("llm returned blank content after normalization, synthesizing a hold decision");
        return r#"{"decision":"hold","reasoning":"empty"}"#.to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        failures_then_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChatTransport for FlakyTransport {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_then_success {
                anyhow::bail!("connection reset by peer");
            }
            Ok("final answer".to_string())
        }
    }

    struct AlwaysFailTransport;

    #[async_trait]
    impl ChatTransport for AlwaysFailTransport {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            anyhow::bail!("timeout waiting for response")
        }
    }

    struct NonRetryableTransport;

    #[async_trait]
    impl ChatTransport for NonRetryableTransport {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            anyhow::bail!("401 unauthorized")
        }
    }

    struct BlankTransport;

    #[async_trait]
    impl ChatTransport for BlankTransport {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok("   ".to_string())
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let transport = FlakyTransport {
            failures_then_success: 2,
            calls: AtomicU32::new(0),
        };
        let result = call(&transport, "sys", "usr").await.unwrap();
        assert_eq!(result, "final answer");
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_error() {
        let result = call(&AlwaysFailTransport, "sys", "usr").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let result = call(&NonRetryableTransport, "sys", "usr").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn blank_response_normalizes_to_synthetic_hold() {
        let result = call(&BlankTransport, "sys", "usr").await.unwrap();
        assert!(result.contains("\"decision\":\"hold\""));
    }

    #[test]
    fn strips_chat_template_markers() {
        let raw = "<s>[INST] hi [/INST] decision here</s>";
        assert_eq!(normalize(raw), "hi  decision here");
    }
}
