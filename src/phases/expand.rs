//! EXPAND Phase
//!
//! Bottom-up discovery: turn free task text into atomic requirements the
//! task never stated explicitly. The winning candidate is parsed as a
//! JSON array with a line-based fallback; duplicates collapse later, at
//! the context's insertion point.

use crate::core::config::MdapConfig;
use crate::core::context::ContextSnapshot;
use crate::core::redflag::extract_json_array;
use crate::core::step::{Step, StepType};
use crate::core::voter::{VoteResult, Voter};
use crate::llm::LlmClient;
use crate::phases::LlmGenerator;
use std::sync::Arc;

/// Result of the expand phase
#[derive(Debug)]
pub struct ExpandOutcome {
    /// The step that was voted on
    pub step: Step,
    /// The full vote
    pub vote: VoteResult,
    /// Parsed requirements from the winning candidate (empty when the
    /// vote produced no winner)
    pub requirements: Vec<String>,
}

/// Executor for requirement expansion
pub struct ExpandPhase {
    generator: LlmGenerator,
}

impl ExpandPhase {
    /// Create the executor
    pub fn new(client: Arc<dyn LlmClient>, config: MdapConfig) -> Self {
        Self { generator: LlmGenerator::new(client, config) }
    }

    /// Vote on an expansion of the snapshot's task.
    pub async fn execute(&self, voter: &Voter, snapshot: &ContextSnapshot) -> ExpandOutcome {
        let step = Step::new(
            StepType::Expand,
            format!("expand requirements for: {}", snapshot.task),
        );
        let vote = voter.vote(&step, snapshot, &self.generator).await;
        let requirements = vote
            .winner
            .as_ref()
            .map(|w| parse_requirements(&w.raw_text))
            .unwrap_or_default();
        ExpandOutcome { step, vote, requirements }
    }
}

/// Parse a requirements candidate: JSON array first, then line by line.
pub fn parse_requirements(text: &str) -> Vec<String> {
    if let Some(serde_json::Value::Array(items)) = extract_json_array(text) {
        let parsed: Vec<String> = items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !parsed.is_empty() {
            return parsed;
        }
    }

    // Fallback: bullet or numbered lines.
    text.lines()
        .map(strip_list_markers)
        .filter(|line| line.len() > 5)
        .map(str::to_string)
        .collect()
}

fn strip_list_markers(line: &str) -> &str {
    let mut rest = line.trim();
    rest = rest.trim_start_matches(['-', '*', '•']).trim_start();
    // "3. a requirement" -> "a requirement"
    if let Some(dot) = rest.find('.') {
        if dot > 0 && rest[..dot].chars().all(|c| c.is_ascii_digit()) {
            rest = rest[dot + 1..].trim_start();
        }
    }
    rest.trim_matches('"')
}
