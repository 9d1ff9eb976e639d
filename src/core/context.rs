//! Pipeline Context
//!
//! [`Context`] is the mutable accumulator for one pipeline run. Only the
//! orchestrator mutates it, through the explicit mutation points below.
//! [`ContextSnapshot`] is the deep immutable copy handed to every
//! generator and discriminator invocation within a vote: all candidates
//! in one vote see exactly the same inputs.

use crate::core::step::{FunctionRecord, Step};
use serde::{Deserialize, Serialize};

/// Target language of the generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// Python 3
    Python,
    /// TypeScript
    Typescript,
}

impl Language {
    /// Lowercase name used in prompts and config files
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Typescript => "typescript",
        }
    }

    /// Parse a user-supplied hint
    pub fn from_hint(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Some(Language::Python),
            "typescript" | "ts" => Some(Language::Typescript),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collapse whitespace runs; the normal form used for requirement
/// deduplication and candidate comparison keys.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Mutable state of one pipeline run
#[derive(Debug, Clone)]
pub struct Context {
    /// The task being worked on
    pub task: String,
    /// Target language
    pub language: Language,
    /// Ordered, deduplicated atomic requirements
    pub requirements: Vec<String>,
    /// Planned functions, in dependency order
    pub functions: Vec<FunctionRecord>,
    /// signature → winning code, in generation order
    pub code: Vec<(String, String)>,
    /// Steps executed so far
    pub history: Vec<Step>,
    /// Recursion depth of the nested sub-function pass
    pub depth: usize,
}

impl Context {
    /// Create an empty context for a task
    pub fn new(task: impl Into<String>, language: Language) -> Self {
        Self {
            task: task.into(),
            language,
            requirements: Vec::new(),
            functions: Vec::new(),
            code: Vec::new(),
            history: Vec::new(),
            depth: 0,
        }
    }

    /// Append a requirement unless an equivalent one (by normalized
    /// string equality) is already present.
    pub fn push_requirement(&mut self, requirement: &str) {
        let normalized = normalize_text(requirement);
        if normalized.is_empty() {
            return;
        }
        if !self.requirements.iter().any(|r| normalize_text(r) == normalized) {
            self.requirements.push(requirement.trim().to_string());
        }
    }

    /// Append a planned function
    pub fn push_function(&mut self, record: FunctionRecord) {
        self.functions.push(record);
    }

    /// Store (or replace) the winning code for a signature
    pub fn set_code(&mut self, signature: &str, source: &str) {
        if let Some(entry) = self.code.iter_mut().find(|(sig, _)| sig == signature) {
            entry.1 = source.to_string();
        } else {
            self.code.push((signature.to_string(), source.to_string()));
        }
    }

    /// Code stored for a signature, if any
    pub fn code_for(&self, signature: &str) -> Option<&str> {
        self.code
            .iter()
            .find(|(sig, _)| sig == signature)
            .map(|(_, src)| src.as_str())
    }

    /// Whether a function with the given bare name is planned
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name() == name)
    }

    /// Append an executed step to the history
    pub fn record_step(&mut self, step: Step) {
        self.history.push(step);
    }

    /// Take the deep immutable snapshot used for one vote
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            task: self.task.clone(),
            language: self.language,
            requirements: self.requirements.clone(),
            functions: self.functions.clone(),
            code: self.code.clone(),
        }
    }
}

/// Deep, immutable copy of a [`Context`] taken at the start of a vote.
///
/// Every candidate and every discriminator query within that vote sees
/// the same snapshot; concurrent readers never observe mid-vote mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// The task being worked on
    pub task: String,
    /// Target language
    pub language: Language,
    /// Requirements at snapshot time
    pub requirements: Vec<String>,
    /// Planned functions at snapshot time
    pub functions: Vec<FunctionRecord>,
    /// Generated code at snapshot time
    pub code: Vec<(String, String)>,
}

impl ContextSnapshot {
    /// Render the snapshot as prompt context text
    pub fn to_prompt_context(&self) -> String {
        let mut lines = vec![format!("# Task: {}", self.task), String::new()];

        if !self.requirements.is_empty() {
            lines.push("## Requirements:".to_string());
            for (i, req) in self.requirements.iter().enumerate() {
                lines.push(format!("{}. {}", i + 1, req));
            }
            lines.push(String::new());
        }

        if !self.functions.is_empty() {
            lines.push("## Functions to implement:".to_string());
            for func in &self.functions {
                lines.push(format!("- {}: {}", func.signature, func.description));
            }
            lines.push(String::new());
        }

        if !self.code.is_empty() {
            lines.push("## Generated code so far:".to_string());
            for (signature, source) in &self.code {
                lines.push(format!("### {}", signature));
                lines.push(format!("```{}\n{}\n```", self.language.as_str(), source));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::StepType;

    fn record(signature: &str) -> FunctionRecord {
        FunctionRecord {
            signature: signature.into(),
            description: "does something".into(),
            dependencies: vec![],
            requirement_ids: vec![],
        }
    }

    // ==========================================
    // Requirement Deduplication Tests
    // ==========================================

    #[test]
    fn test_requirements_deduplicate_by_normalized_equality() {
        let mut ctx = Context::new("task", Language::Python);
        ctx.push_requirement("users can log in");
        ctx.push_requirement("  users   can log in ");
        ctx.push_requirement("users can log out");
        assert_eq!(ctx.requirements.len(), 2);
    }

    #[test]
    fn test_requirements_preserve_insertion_order() {
        let mut ctx = Context::new("task", Language::Python);
        ctx.push_requirement("b second");
        ctx.push_requirement("a first");
        assert_eq!(ctx.requirements, vec!["b second", "a first"]);
    }

    #[test]
    fn test_blank_requirement_ignored() {
        let mut ctx = Context::new("task", Language::Python);
        ctx.push_requirement("   ");
        assert!(ctx.requirements.is_empty());
    }

    // ==========================================
    // Code Mapping Tests
    // ==========================================

    #[test]
    fn test_set_code_inserts_and_replaces() {
        let mut ctx = Context::new("task", Language::Python);
        ctx.set_code("def f()", "pass");
        ctx.set_code("def g()", "return 1");
        ctx.set_code("def f()", "return 2");

        assert_eq!(ctx.code_for("def f()"), Some("return 2"));
        assert_eq!(ctx.code.len(), 2);
        // insertion order kept across replacement
        assert_eq!(ctx.code[0].0, "def f()");
    }

    #[test]
    fn test_has_function_matches_bare_name() {
        let mut ctx = Context::new("task", Language::Python);
        ctx.push_function(record("def parse_header(raw: bytes) -> dict"));
        assert!(ctx.has_function("parse_header"));
        assert!(!ctx.has_function("parse"));
    }

    // ==========================================
    // Snapshot Tests
    // ==========================================

    #[test]
    fn test_snapshot_is_deep_and_stable_under_mutation() {
        let mut ctx = Context::new("task", Language::Python);
        ctx.push_requirement("first");
        let snapshot = ctx.snapshot();

        ctx.push_requirement("second");
        ctx.set_code("def f()", "pass");

        assert_eq!(snapshot.requirements, vec!["first"]);
        assert!(snapshot.code.is_empty());
    }

    #[test]
    fn test_snapshots_of_unchanged_context_are_equal() {
        let mut ctx = Context::new("task", Language::Typescript);
        ctx.push_requirement("r1");
        ctx.push_function(record("function f(): void"));
        assert_eq!(ctx.snapshot(), ctx.snapshot());
    }

    #[test]
    fn test_prompt_context_sections() {
        let mut ctx = Context::new("build a parser", Language::Python);
        ctx.push_requirement("parse headers");
        ctx.push_function(record("def parse(raw: str) -> dict"));
        ctx.set_code("def parse(raw: str) -> dict", "return {}");

        let text = ctx.snapshot().to_prompt_context();
        assert!(text.contains("# Task: build a parser"));
        assert!(text.contains("1. parse headers"));
        assert!(text.contains("- def parse(raw: str) -> dict"));
        assert!(text.contains("```python"));
    }

    #[test]
    fn test_history_records_steps() {
        let mut ctx = Context::new("task", Language::Python);
        ctx.record_step(Step::new(StepType::Expand, "expand"));
        ctx.record_step(Step::new(StepType::Decompose, "decompose"));
        assert_eq!(ctx.history.len(), 2);
        assert_eq!(ctx.history[0].step_type, StepType::Expand);
    }

    // ==========================================
    // Language Tests
    // ==========================================

    #[test]
    fn test_language_hints() {
        assert_eq!(Language::from_hint("py"), Some(Language::Python));
        assert_eq!(Language::from_hint("TypeScript"), Some(Language::Typescript));
        assert_eq!(Language::from_hint("cobol"), None);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  a \n b\t c "), "a b c");
        assert_eq!(normalize_text(""), "");
    }
}
