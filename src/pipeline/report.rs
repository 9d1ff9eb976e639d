//! Persisted Run Report
//!
//! The structured document written when a pipeline completes. Field
//! names and nesting are a contract for downstream tooling; change them
//! and you break consumers.

use crate::core::config::MdapConfig;
use crate::core::context::Context;
use crate::core::step::FunctionRecord;
use crate::llm::anthropic::price_for_model;
use crate::llm::TokenUsage;
use crate::pipeline::resources::ResourceManager;
use crate::pipeline::tracker::DecisionTracker;
use serde::Serialize;
use std::io;
use std::path::Path;

/// One generated function in the report
#[derive(Debug, Clone, Serialize)]
pub struct CodeUnit {
    /// The signature the code implements
    pub signature: String,
    /// The winning source text
    pub source: String,
}

/// Token totals in the report
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TokenTotals {
    /// Prompt tokens
    pub input: usize,
    /// Completion tokens
    pub output: usize,
    /// Sum of both
    pub total: usize,
}

/// Run metrics in the report
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    /// Number of votes the run decided
    pub iterations: usize,
    /// LLM calls issued (generation and discrimination)
    pub api_calls: usize,
    /// Wall-clock seconds
    pub total_time: f64,
    /// Token totals
    pub tokens: TokenTotals,
    /// Estimated cost in USD
    pub cost_usd: f64,
}

/// The persisted result document
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// The task as given
    pub task: String,
    /// Configuration the run used
    pub config: MdapConfig,
    /// Final requirement list
    pub requirements: Vec<String>,
    /// Final function plan (helpers included)
    pub functions: Vec<FunctionRecord>,
    /// Generated code, in generation order
    pub code: Vec<CodeUnit>,
    /// Usage metrics
    pub metrics: RunMetrics,
}

impl RunReport {
    /// Assemble the report from the run's final state.
    pub fn assemble(
        context: &Context,
        config: &MdapConfig,
        tracker: &DecisionTracker,
        resources: &ResourceManager,
    ) -> Self {
        let usage = resources.usage();
        let tokens = TokenUsage::new(usage.input_tokens, usage.output_tokens);
        Self {
            task: context.task.clone(),
            config: config.clone(),
            requirements: context.requirements.clone(),
            functions: context.functions.clone(),
            code: context
                .code
                .iter()
                .map(|(signature, source)| CodeUnit {
                    signature: signature.clone(),
                    source: source.clone(),
                })
                .collect(),
            metrics: RunMetrics {
                iterations: tracker.vote_count(),
                api_calls: usage.api_calls,
                total_time: usage.elapsed.as_secs_f64(),
                tokens: TokenTotals {
                    input: tokens.input,
                    output: tokens.output,
                    total: tokens.total(),
                },
                cost_usd: price_for_model(&config.model_id).calculate(tokens),
            },
        }
    }

    /// Pretty JSON rendering
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Write the report to a file
    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.to_json_pretty())
    }
}
