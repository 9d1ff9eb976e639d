//! Semantic Discriminator
//!
//! Asks the model whether two candidates are behaviorally equivalent and
//! groups follow from the answers. The protocol is deliberately
//! conservative: the response is matched case-insensitively by prefix,
//! and anything that is not YES (including transport failure after
//! retries) counts as NO, keeping uncertain candidates in separate
//! groups.
//!
//! Equivalence is not assumed transitive and `equiv(A, B)` may disagree
//! with `equiv(B, A)`; the voter only ever compares a new candidate
//! against group representatives in ascending group order, so grouping
//! stays deterministic. Verdicts are cached bidirectionally for the
//! lifetime of one vote.

use crate::core::config::MdapConfig;
use crate::llm::retry::{call_with_retry, RetryConfig};
use crate::llm::{LlmClient, LlmError, TokenUsage};
use crate::pipeline::resources::ResourceManager;
use crate::prompts;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Maximum completion tokens for a YES/NO verdict
const VERDICT_MAX_TOKENS: usize = 8;

/// Pairwise equivalence judge over an LLM client
pub struct Discriminator {
    client: Arc<dyn LlmClient>,
    retry: RetryConfig,
    request_timeout: Duration,
    resources: Arc<ResourceManager>,
    cache: Mutex<HashMap<(String, String), bool>>,
}

impl Discriminator {
    /// Create a judge for one vote
    pub fn new(
        client: Arc<dyn LlmClient>,
        config: &MdapConfig,
        resources: Arc<ResourceManager>,
    ) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
            request_timeout: config.request_timeout(),
            resources,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `a` and `b` are semantically equivalent under `context`.
    pub async fn equivalent(&self, context: &str, a: &str, b: &str) -> bool {
        let key = (a.trim().to_string(), b.trim().to_string());
        if let Some(&cached) = self.cache.lock().expect("verdict cache poisoned").get(&key) {
            debug!("discrimination cache hit");
            return cached;
        }

        let prompt = prompts::discriminate(context, a, b);
        let verdict = match self.query(&prompt).await {
            Ok(content) => parse_verdict(&content),
            Err(err) => {
                // Keep groups separate under uncertainty.
                warn!(error = %err, "discrimination failed, treating as NO");
                self.resources.record(TokenUsage::default());
                false
            }
        };

        let mut cache = self.cache.lock().expect("verdict cache poisoned");
        cache.insert(key.clone(), verdict);
        cache.insert((key.1, key.0), verdict);
        verdict
    }

    async fn query(&self, prompt: &str) -> Result<String, LlmError> {
        let response = call_with_retry(
            || async {
                match timeout(self.request_timeout, self.client.complete(prompt, 0.0, VERDICT_MAX_TOKENS))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout),
                }
            },
            &self.retry,
        )
        .await?;

        self.resources.record(response.tokens);
        Ok(response.content)
    }

    /// Number of cached verdicts (both directions counted)
    pub fn cached_verdicts(&self) -> usize {
        self.cache.lock().expect("verdict cache poisoned").len()
    }
}

/// Case-insensitive prefix match: YES wins, everything else is NO.
fn parse_verdict(content: &str) -> bool {
    content.trim().to_uppercase().starts_with("YES")
}
