//! VALIDATE Phase
//!
//! Reviews the assembled code body against the task specification and
//! parses the winning review into a structured report. Validation is
//! advisory: the orchestrator only gates on it when configured to.

use crate::core::config::MdapConfig;
use crate::core::context::ContextSnapshot;
use crate::core::step::{Step, StepType};
use crate::core::voter::{VoteResult, Voter};
use crate::llm::LlmClient;
use crate::phases::LlmGenerator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Structured review of the generated code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the reviewer judged the code correct
    pub valid: bool,
    /// Concrete defects found
    pub errors: Vec<String>,
    /// Non-blocking findings
    pub warnings: Vec<String>,
}

/// Result of the validate phase
#[derive(Debug)]
pub struct ValidateOutcome {
    /// The step that was voted on
    pub step: Step,
    /// The full vote
    pub vote: VoteResult,
    /// Parsed report from the winning candidate
    pub report: ValidationReport,
}

/// Executor for code review
pub struct ValidatePhase {
    generator: LlmGenerator,
}

impl ValidatePhase {
    /// Create the executor
    pub fn new(client: Arc<dyn LlmClient>, config: MdapConfig) -> Self {
        Self { generator: LlmGenerator::new(client, config) }
    }

    /// Vote on a review of the snapshot's code body.
    pub async fn execute(&self, voter: &Voter, snapshot: &ContextSnapshot) -> ValidateOutcome {
        let step = Step::new(
            StepType::Validate,
            format!("validate {} generated functions", snapshot.code.len()),
        )
        .with_specification(snapshot.requirements.join("\n"));
        let vote = voter.vote(&step, snapshot, &self.generator).await;
        let report = vote
            .winner
            .as_ref()
            .map(|w| parse_report(&w.raw_text))
            .unwrap_or_default();
        ValidateOutcome { step, vote, report }
    }
}

/// Parse a `VALID:/ERRORS:/WARNINGS:` review into a report.
pub fn parse_report(text: &str) -> ValidationReport {
    let mut report = ValidationReport { valid: true, ..Default::default() };
    let mut section: Option<&str> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        let upper = line.to_uppercase();

        if let Some(rest) = upper.strip_prefix("VALID:") {
            report.valid = matches!(rest.trim(), "YES" | "TRUE" | "1");
            section = None;
        } else if upper.starts_with("ERRORS:") {
            section = Some("errors");
            push_inline_items(&mut report.errors, &line["ERRORS:".len()..]);
        } else if upper.starts_with("WARNINGS:") {
            section = Some("warnings");
            push_inline_items(&mut report.warnings, &line["WARNINGS:".len()..]);
        } else if let Some(item) = line.strip_prefix('-') {
            let item = item.trim();
            if !item.is_empty() {
                match section {
                    Some("errors") => report.errors.push(item.to_string()),
                    Some("warnings") => report.warnings.push(item.to_string()),
                    _ => {}
                }
            }
        }
    }

    if !report.errors.is_empty() {
        report.valid = false;
    }
    report
}

/// Items written inline after the section header, as `[a, b]` or free
/// text.
fn push_inline_items(into: &mut Vec<String>, rest: &str) {
    let rest = rest.trim().trim_start_matches('[').trim_end_matches(']').trim();
    if rest.is_empty() {
        return;
    }
    for item in rest.split(',') {
        let item = item.trim().trim_matches(['"', '\'']);
        if !item.is_empty() {
            into.push(item.to_string());
        }
    }
}
