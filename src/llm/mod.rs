//! LLM Client Boundary
//!
//! A thin, provider-agnostic contract for completions. The voting engine
//! only ever sees this trait, so the discriminator and all phase
//! generators work identically against the real Anthropic client or the
//! mock clients used in tests.
//!
//! Retries are the caller's responsibility; [`retry::call_with_retry`]
//! implements the backoff policy used throughout the pipeline.

pub mod anthropic;
pub mod mock;
pub mod retry;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Token usage for a single completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input: usize,
    /// Completion tokens
    pub output: usize,
}

impl TokenUsage {
    /// Create a new usage record
    pub fn new(input: usize, output: usize) -> Self {
        Self { input, output }
    }

    /// Total tokens consumed
    pub fn total(&self) -> usize {
        self.input + self.output
    }

    /// Accumulate another usage record into this one
    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// Successful completion
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// Generated text
    pub content: String,
    /// Token usage reported by the provider (zeroes when unknown)
    pub tokens: TokenUsage,
}

/// Failure modes of an LLM call
#[derive(Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Provider returned 429
    RateLimited {
        /// Delay suggested by a Retry-After header, when present
        retry_after: Option<Duration>,
    },
    /// The request exceeded its per-call timeout
    Timeout,
    /// Connectivity failure before a response arrived
    NetworkError(String),
    /// Provider returned a non-success status
    ApiError {
        /// HTTP status code
        status: u16,
        /// Message from the provider error body
        message: String,
    },
    /// Response body could not be interpreted
    InvalidResponse(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::RateLimited { retry_after: Some(d) } => {
                write!(f, "rate limited, retry after {:?}", d)
            }
            LlmError::RateLimited { retry_after: None } => write!(f, "rate limited"),
            LlmError::Timeout => write!(f, "request timed out"),
            LlmError::NetworkError(msg) => write!(f, "network error: {}", msg),
            LlmError::ApiError { status, message } => write!(f, "api error {}: {}", status, message),
            LlmError::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Rate limits, timeouts, network failures, and 5xx responses are
    /// retryable; other 4xx responses and unparseable bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Timeout | LlmError::NetworkError(_) => true,
            LlmError::ApiError { status, .. } => *status >= 500 || *status == 429,
            LlmError::InvalidResponse(_) => false,
        }
    }
}

/// Price per 1K tokens in USD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenCost {
    /// USD per 1K input tokens
    pub input_per_1k: f64,
    /// USD per 1K output tokens
    pub output_per_1k: f64,
}

impl TokenCost {
    /// Create a price entry
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self { input_per_1k, output_per_1k }
    }

    /// Estimated cost of the given usage
    pub fn calculate(&self, usage: TokenUsage) -> f64 {
        (usage.input as f64 * self.input_per_1k / 1000.0)
            + (usage.output as f64 * self.output_per_1k / 1000.0)
    }
}

/// Provider-agnostic completion client.
///
/// The model is bound at construction; `complete` takes only the
/// per-request parameters. Object-safe through explicit boxing of the
/// returned future.
pub trait LlmClient: Send + Sync {
    /// Request one completion.
    fn complete(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: usize,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + '_>>;

    /// Identifier of the bound model
    fn model_id(&self) -> &str;

    /// Price table entry for the bound model
    fn price(&self) -> TokenCost;
}
