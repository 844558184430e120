// =============================================================================
// Mock Chat Transport
// =============================================================================
//
// Test double for [`super::ChatTransport`], shaped like
// `market_data::mock::MockMarketDataProvider`: a queue of canned responses
// plus optional injected failures, so the agent cycle engine's retry and
// decision-parsing paths can be exercised without a live LLM endpoint.
// =============================================================================

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::ChatTransport;

pub struct MockChatTransport {
    responses: Mutex<Vec<Result<String, String>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockChatTransport {
    /// Queue responses; each call to `complete` pops the next one.
    /// `Err` entries fail that call with the given message.
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_single_response(text: impl Into<String>) -> Self {
        Self::new(vec![Ok(text.into())])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<(String, String)> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatTransport for MockChatTransport {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.calls.lock().unwrap().push((system.to_string(), user.to_string()));
        match self.responses.lock().unwrap().pop() {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => anyhow::bail!(msg),
            None => anyhow::bail!("mock transport exhausted its queued responses"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_and_returns_queued_response() {
        let transport = MockChatTransport::with_single_response("hello");
        let out = transport.complete("sys", "usr").await.unwrap();
        assert_eq!(out, "hello");
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.last_call(), Some(("sys".to_string(), "usr".to_string())));
    }

    #[tokio::test]
    async fn exhausted_queue_errors() {
        let transport = MockChatTransport::new(vec![]);
        assert!(transport.complete("sys", "usr").await.is_err());
    }

    #[tokio::test]
    async fn queued_failure_surfaces_message() {
        let transport = MockChatTransport::new(vec![Err("connection reset".to_string())]);
        let err = transport.complete("sys", "usr").await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
