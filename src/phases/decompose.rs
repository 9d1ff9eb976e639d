//! DECOMPOSE Phase
//!
//! Top-down structuring: organize the expanded requirements into an
//! ordered list of function records. The red-flag filter already
//! enforces topological validity per candidate (dependencies must name
//! earlier functions), so a winning candidate parses into a
//! dependency-ordered plan.

use crate::core::config::MdapConfig;
use crate::core::context::ContextSnapshot;
use crate::core::redflag::extract_json_array;
use crate::core::step::{FunctionRecord, Step, StepType};
use crate::core::voter::{VoteResult, Voter};
use crate::llm::LlmClient;
use crate::phases::LlmGenerator;
use std::sync::Arc;

/// Result of the decompose phase
#[derive(Debug)]
pub struct DecomposeOutcome {
    /// The step that was voted on
    pub step: Step,
    /// The full vote
    pub vote: VoteResult,
    /// Parsed function plan from the winning candidate
    pub functions: Vec<FunctionRecord>,
}

/// Executor for function planning
pub struct DecomposePhase {
    generator: LlmGenerator,
}

impl DecomposePhase {
    /// Create the executor
    pub fn new(client: Arc<dyn LlmClient>, config: MdapConfig) -> Self {
        Self { generator: LlmGenerator::new(client, config) }
    }

    /// Vote on a decomposition of the snapshot's requirements.
    pub async fn execute(&self, voter: &Voter, snapshot: &ContextSnapshot) -> DecomposeOutcome {
        let step = Step::new(
            StepType::Decompose,
            format!("decompose {} requirements into functions", snapshot.requirements.len()),
        );
        let vote = voter.vote(&step, snapshot, &self.generator).await;
        let functions = vote
            .winner
            .as_ref()
            .map(|w| parse_function_records(&w.raw_text))
            .unwrap_or_default();
        DecomposeOutcome { step, vote, functions }
    }
}

/// Parse a decomposition candidate: JSON records first, signature-line
/// fallback second.
pub fn parse_function_records(text: &str) -> Vec<FunctionRecord> {
    if let Some(serde_json::Value::Array(items)) = extract_json_array(text) {
        let records: Vec<FunctionRecord> = items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect();
        if !records.is_empty() {
            return records;
        }
    }

    // Fallback: bare signature lines.
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim().trim_end_matches(':');
            if trimmed.starts_with("def ")
                || trimmed.starts_with("async def ")
                || trimmed.starts_with("function ")
            {
                Some(FunctionRecord {
                    signature: trimmed.to_string(),
                    description: format!("implement {}", trimmed),
                    dependencies: Vec::new(),
                    requirement_ids: Vec::new(),
                })
            } else {
                None
            }
        })
        .collect()
}
