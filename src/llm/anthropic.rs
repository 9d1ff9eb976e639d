//! Anthropic Messages API Client
//!
//! Implements [`LlmClient`] over the Anthropic `/v1/messages` endpoint.
//! The model is bound at construction and priced from a static table
//! keyed by model id.

use crate::llm::{LlmClient, LlmError, LlmResponse, TokenCost, TokenUsage};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default API endpoint
pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1";

/// Pinned API version header value
pub const API_VERSION: &str = "2023-06-01";

/// Anthropic completion client
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    base_url: String,
    model: String,
    timeout: Duration,
    client: Client,
    cost: TokenCost,
}

/// Static price table, USD per 1K tokens, keyed by model id substring.
pub fn price_for_model(model: &str) -> TokenCost {
    match model {
        m if m.contains("haiku") => TokenCost::new(0.00025, 0.00125),
        m if m.contains("sonnet") => TokenCost::new(0.003, 0.015),
        m if m.contains("opus") => TokenCost::new(0.015, 0.075),
        _ => TokenCost::new(0.003, 0.015),
    }
}

impl AnthropicClient {
    /// Create a client reading the key from `ANTHROPIC_API_KEY`.
    pub fn new(model: &str) -> Result<Self, LlmError> {
        let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| LlmError::ApiError {
            status: 401,
            message: "ANTHROPIC_API_KEY environment variable not set".to_string(),
        })?;
        Self::with_api_key(model, &api_key)
    }

    /// Create a client with an explicit API key.
    pub fn with_api_key(model: &str, api_key: &str) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| LlmError::InvalidResponse(format!("invalid api key: {}", e)))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| LlmError::NetworkError(format!("failed to build client: {}", e)))?;

        Ok(Self {
            base_url: DEFAULT_API_URL.to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(60),
            client,
            cost: price_for_model(model),
        })
    }

    /// Override the endpoint (tests, proxies).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: usize,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl LlmClient for AnthropicClient {
    fn complete(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: usize,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + '_>> {
        let prompt = prompt.to_string();

        Box::pin(async move {
            let request = MessagesRequest {
                model: self.model.clone(),
                messages: vec![Message { role: "user".to_string(), content: prompt }],
                max_tokens,
                temperature,
            };

            let url = format!("{}/messages", self.base_url);

            let response = self
                .client
                .post(&url)
                .json(&request)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        LlmError::Timeout
                    } else if e.is_connect() {
                        LlmError::NetworkError(format!("connection failed: {}", e))
                    } else {
                        LlmError::NetworkError(e.to_string())
                    }
                })?;

            let status = response.status();

            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(LlmError::RateLimited { retry_after });
            }

            if !status.is_success() {
                let body: Result<ErrorResponse, _> = response.json().await;
                let message = body
                    .map(|e| e.error.message)
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(LlmError::ApiError { status: status.as_u16(), message });
            }

            let parsed: MessagesResponse = response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse(format!("failed to parse body: {}", e)))?;

            let content = parsed.content.first().map(|c| c.text.clone()).unwrap_or_default();

            Ok(LlmResponse {
                content,
                tokens: TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
            })
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn price(&self) -> TokenCost {
        self.cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================
    // Configuration Tests
    // ==========================================

    #[test]
    fn test_with_api_key() {
        let client = AnthropicClient::with_api_key("claude-3-haiku-20240307", "test-key").unwrap();
        assert_eq!(client.model_id(), "claude-3-haiku-20240307");
        assert_eq!(client.base_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = AnthropicClient::with_api_key("claude-3-haiku-20240307", "key")
            .unwrap()
            .with_base_url("https://proxy.example/v1/");
        assert_eq!(client.base_url, "https://proxy.example/v1");
    }

    // ==========================================
    // Price Table Tests
    // ==========================================

    #[test]
    fn test_price_tiers() {
        assert!((price_for_model("claude-3-haiku-20240307").input_per_1k - 0.00025).abs() < 1e-10);
        assert!((price_for_model("claude-3-5-sonnet-20241022").output_per_1k - 0.015).abs() < 1e-10);
        assert!((price_for_model("claude-3-opus-20240229").input_per_1k - 0.015).abs() < 1e-10);
    }

    #[test]
    fn test_unknown_model_uses_default_tier() {
        let cost = price_for_model("some-future-model");
        assert!((cost.input_per_1k - 0.003).abs() < 1e-10);
    }

    // ==========================================
    // Wire Format Tests
    // ==========================================

    #[test]
    fn test_request_serialization() {
        let request = MessagesRequest {
            model: "claude-3-haiku-20240307".to_string(),
            messages: vec![Message { role: "user".to_string(), content: "hi".to_string() }],
            max_tokens: 500,
            temperature: 0.1,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"max_tokens\":500"));
        assert!(json.contains("\"role\":\"user\""));
    }

    #[test]
    fn test_response_deserialization() {
        let json = r#"{
            "content": [{"type": "text", "text": "YES"}],
            "usage": {"input_tokens": 12, "output_tokens": 1},
            "stop_reason": "end_turn"
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.content[0].text, "YES");
        assert_eq!(parsed.usage.input_tokens, 12);
    }

    // ==========================================
    // Mock HTTP Server Tests
    // ==========================================

    #[tokio::test]
    async fn test_complete_success() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/messages"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "def f():\n    pass"}],
                "usage": {"input_tokens": 20, "output_tokens": 8},
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key("claude-3-haiku-20240307", "key")
            .unwrap()
            .with_base_url(&server.uri());

        let response = client.complete("implement f", 0.1, 500).await.unwrap();
        assert!(response.content.starts_with("def f"));
        assert_eq!(response.tokens.total(), 28);
    }

    #[tokio::test]
    async fn test_complete_rate_limited() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(429).append_header("retry-after", "9"))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key("claude-3-haiku-20240307", "key")
            .unwrap()
            .with_base_url(&server.uri());

        match client.complete("x", 0.0, 10).await {
            Err(LlmError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(9)));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_api_error_body() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(400).set_body_json(
                serde_json::json!({"error": {"type": "invalid_request_error", "message": "too long"}}),
            ))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key("claude-3-haiku-20240307", "key")
            .unwrap()
            .with_base_url(&server.uri());

        match client.complete("x", 0.0, 10).await {
            Err(LlmError::ApiError { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "too long");
            }
            other => panic!("expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_unparseable_body() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key("claude-3-haiku-20240307", "key")
            .unwrap()
            .with_base_url(&server.uri());

        assert!(matches!(
            client.complete("x", 0.0, 10).await,
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_timeout() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key("claude-3-haiku-20240307", "key")
            .unwrap()
            .with_base_url(&server.uri())
            .with_timeout(Duration::from_millis(50));

        assert!(matches!(client.complete("x", 0.0, 10).await, Err(LlmError::Timeout)));
    }

    #[tokio::test]
    async fn test_complete_empty_content() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [],
                "usage": {"input_tokens": 4, "output_tokens": 0},
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key("claude-3-haiku-20240307", "key")
            .unwrap()
            .with_base_url(&server.uri());

        let response = client.complete("x", 0.0, 10).await.unwrap();
        assert!(response.content.is_empty());
    }
}
