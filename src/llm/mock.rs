//! Mock LLM Clients
//!
//! Deterministic [`LlmClient`] implementations for tests and offline dry
//! runs. `MockLlmClient` replays a scripted response list; `EquivalenceMockClient`
//! acts as a discriminator that answers YES exactly when the two fenced
//! candidates in the prompt are identical after whitespace collapsing.

use crate::llm::{LlmClient, LlmError, LlmResponse, TokenCost, TokenUsage};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scripted mock client, cycling through a fixed response list.
#[derive(Debug, Clone)]
pub struct MockLlmClient {
    responses: Vec<String>,
    index: Arc<AtomicUsize>,
    tokens_per_response: usize,
    failures_before_success: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockLlmClient {
    /// Create a mock cycling through `responses`.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            index: Arc::new(AtomicUsize::new(0)),
            tokens_per_response: 50,
            failures_before_success: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Create a mock that always returns the same response.
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Create a mock with `p` probability mass of `correct` over a cycle
    /// of `total` responses.
    pub fn biased(correct: &str, incorrect: &str, p: f64, total: usize) -> Self {
        let correct_count = (total as f64 * p).round() as usize;
        let mut responses = vec![correct.to_string(); correct_count];
        responses.extend(vec![incorrect.to_string(); total - correct_count]);
        Self::new(responses)
    }

    /// Fail the first `count` calls with a timeout before succeeding.
    pub fn with_leading_failures(self, count: usize) -> Self {
        self.failures_before_success.store(count, Ordering::SeqCst);
        self
    }

    /// Add simulated latency to each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Override the simulated output token count.
    pub fn with_tokens_per_response(mut self, tokens: usize) -> Self {
        self.tokens_per_response = tokens;
        self
    }

    /// Number of calls served so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

impl LlmClient for MockLlmClient {
    fn complete(
        &self,
        _prompt: &str,
        _temperature: f64,
        _max_tokens: usize,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + '_>> {
        let delay = self.delay;
        let remaining = &self.failures_before_success;
        let fail = remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let idx = self.index.fetch_add(1, Ordering::SeqCst);
        let response = self.responses[idx % self.responses.len()].clone();
        let tokens = self.tokens_per_response;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            if fail {
                return Err(LlmError::Timeout);
            }
            Ok(LlmResponse {
                content: response,
                tokens: TokenUsage::new(100, tokens),
            })
        })
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }

    fn price(&self) -> TokenCost {
        TokenCost::new(0.001, 0.002)
    }
}

/// Discriminator mock: extracts the two fenced candidates from the
/// discrimination prompt and answers YES iff they match after whitespace
/// collapsing. This gives tests exact-match equivalence semantics.
#[derive(Debug, Clone, Default)]
pub struct EquivalenceMockClient {
    queries: Arc<AtomicUsize>,
}

impl EquivalenceMockClient {
    /// Create the mock discriminator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of equivalence queries answered.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn collapse(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Pull the two fenced blocks out of a discrimination prompt.
    fn extract_pair(prompt: &str) -> Option<(String, String)> {
        let mut blocks = Vec::new();
        let mut rest = prompt;
        while let Some(open) = rest.find("```") {
            let after = &rest[open + 3..];
            // skip a language tag on the fence line
            let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
            let body = &after[body_start..];
            let close = body.find("```")?;
            blocks.push(body[..close].to_string());
            rest = &body[close + 3..];
        }
        if blocks.len() >= 2 {
            Some((blocks[0].clone(), blocks[1].clone()))
        } else {
            None
        }
    }
}

impl LlmClient for EquivalenceMockClient {
    fn complete(
        &self,
        prompt: &str,
        _temperature: f64,
        _max_tokens: usize,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + '_>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let verdict = match Self::extract_pair(prompt) {
            Some((a, b)) if Self::collapse(&a) == Self::collapse(&b) => "YES",
            Some(_) => "NO",
            None => "NO",
        };
        let content = verdict.to_string();
        Box::pin(async move {
            Ok(LlmResponse {
                content,
                tokens: TokenUsage::new(60, 1),
            })
        })
    }

    fn model_id(&self) -> &str {
        "mock-discriminator"
    }

    fn price(&self) -> TokenCost {
        TokenCost::new(0.001, 0.002)
    }
}
