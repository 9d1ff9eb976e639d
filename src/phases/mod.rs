//! Phase Executors
//!
//! The four pipeline phases share one machinery: render a prompt from
//! the step and the snapshot, hand it to the voter, parse the winning
//! candidate. Only the prompt, the parser, and the expected output shape
//! differ between phases.

pub mod decompose;
pub mod expand;
pub mod generate;
pub mod validate;

pub use decompose::DecomposePhase;
pub use expand::ExpandPhase;
pub use generate::GeneratePhase;
pub use validate::ValidatePhase;

use crate::core::config::MdapConfig;
use crate::core::context::ContextSnapshot;
use crate::core::step::{Step, StepType};
use crate::core::voter::CandidateGenerator;
use crate::llm::retry::{call_with_retry, RetryConfig};
use crate::llm::{LlmClient, LlmError, LlmResponse};
use crate::prompts;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::timeout;

/// Completion budget per step type. Planning steps get room to answer;
/// generation is held to the red-flag threshold.
fn max_tokens_for(step: &Step, config: &MdapConfig) -> usize {
    match step.step_type {
        StepType::Expand => 1000,
        StepType::Decompose => 2000,
        StepType::Generate => config.max_tokens_response,
        StepType::Validate => 500,
        _ => 500,
    }
}

/// Render the prompt for a step against a snapshot.
fn build_prompt(step: &Step, snapshot: &ContextSnapshot) -> String {
    match step.step_type {
        StepType::Expand => prompts::expand(&snapshot.task, &snapshot.to_prompt_context()),
        StepType::Decompose => prompts::decompose(&snapshot.requirements, snapshot.language),
        StepType::Generate => prompts::generate(
            step.target.as_deref().unwrap_or(""),
            &step.description,
            snapshot.language,
            &snapshot.to_prompt_context(),
        ),
        StepType::Validate => {
            let code: Vec<&str> = snapshot.code.iter().map(|(_, src)| src.as_str()).collect();
            prompts::validate(
                &code.join("\n\n"),
                step.specification.as_deref().unwrap_or(&snapshot.task),
                &snapshot.to_prompt_context(),
            )
        }
        StepType::Decide => prompts::decide_next(
            &snapshot.to_prompt_context(),
            snapshot.requirements.len(),
            snapshot.functions.len(),
            snapshot.code.len(),
        ),
        _ => step.description.clone(),
    }
}

/// [`CandidateGenerator`] that samples the LLM with per-call timeout and
/// the standard retry policy. Persistent failure after retries surfaces
/// as an `Err`, which the voter books as a lost sample.
pub struct LlmGenerator {
    client: Arc<dyn LlmClient>,
    config: MdapConfig,
    retry: RetryConfig,
}

impl LlmGenerator {
    /// Create a generator over `client`
    pub fn new(client: Arc<dyn LlmClient>, config: MdapConfig) -> Self {
        Self { client, config, retry: RetryConfig::default() }
    }
}

impl CandidateGenerator for LlmGenerator {
    fn next_candidate<'a>(
        &'a self,
        step: &'a Step,
        snapshot: &'a ContextSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            let prompt = build_prompt(step, snapshot);
            let max_tokens = max_tokens_for(step, &self.config);
            call_with_retry(
                || async {
                    match timeout(
                        self.config.request_timeout(),
                        self.client.complete(&prompt, self.config.temperature, max_tokens),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(LlmError::Timeout),
                    }
                },
                &self.retry,
            )
            .await
        })
    }
}
