//! Units of Work
//!
//! A [`Step`] is one schedulable unit: a decision step resolved by voting
//! (expand, decompose, generate, validate, decide) or an execution step
//! handled outside the voting engine (read, search, test, apply). Steps
//! are immutable once created; ids are monotonic within the process.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STEP_ID: AtomicU64 = AtomicU64::new(1);

fn next_step_id() -> String {
    format!("step-{:04}", NEXT_STEP_ID.fetch_add(1, Ordering::Relaxed))
}

/// Kind of work a step describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Expand a task into atomic requirements
    Expand,
    /// Organize requirements into functions
    Decompose,
    /// Implement one function
    Generate,
    /// Review generated code
    Validate,
    /// Choose the next unit of work
    Decide,
    /// Read a file
    Read,
    /// Search the workspace
    Search,
    /// Run tests
    Test,
    /// Apply an edit
    Apply,
    /// Task complete
    Done,
}

impl StepType {
    /// Snake-case name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Expand => "expand",
            StepType::Decompose => "decompose",
            StepType::Generate => "generate",
            StepType::Validate => "validate",
            StepType::Decide => "decide",
            StepType::Read => "read",
            StepType::Search => "search",
            StepType::Test => "test",
            StepType::Apply => "apply",
            StepType::Done => "done",
        }
    }

    /// Whether this step type is resolved through voting
    pub fn is_decision(&self) -> bool {
        matches!(
            self,
            StepType::Expand
                | StepType::Decompose
                | StepType::Generate
                | StepType::Validate
                | StepType::Decide
        )
    }

    /// Output shape the red-flag filter should enforce for this step type
    pub fn default_shape(&self) -> OutputShape {
        match self {
            StepType::Expand => OutputShape::JsonArray,
            StepType::Decompose => OutputShape::FunctionList,
            StepType::Generate => OutputShape::SourceCode,
            StepType::Validate => OutputShape::Report,
            StepType::Decide => OutputShape::FreeText,
            _ => OutputShape::FreeText,
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected shape of a candidate response, used by the red-flag filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    /// A JSON array of strings
    JsonArray,
    /// A JSON array of function records
    FunctionList,
    /// Source code in the pipeline language
    SourceCode,
    /// A YES or NO verdict
    YesNo,
    /// A VALID/ERRORS/WARNINGS review report
    Report,
    /// No shape enforcement
    FreeText,
}

/// One immutable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Stable identifier, monotonic per process
    pub id: String,
    /// Kind of work
    pub step_type: StepType,
    /// Human-readable description
    pub description: String,
    /// The signature or requirement under work, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Free-text prompt material
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specification: Option<String>,
    /// Expected response shape
    pub shape: OutputShape,
}

impl Step {
    /// Create a step with the default shape for its type
    pub fn new(step_type: StepType, description: impl Into<String>) -> Self {
        Self {
            id: next_step_id(),
            step_type,
            description: description.into(),
            target: None,
            specification: None,
            shape: step_type.default_shape(),
        }
    }

    /// Attach a target (function signature or requirement)
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attach free-text prompt material
    pub fn with_specification(mut self, spec: impl Into<String>) -> Self {
        self.specification = Some(spec.into());
        self
    }

    /// Override the expected response shape
    pub fn with_shape(mut self, shape: OutputShape) -> Self {
        self.shape = shape;
        self
    }
}

/// A planned function: the unit DECOMPOSE produces and GENERATE consumes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    /// Full signature, e.g. `def validate_email(email: str) -> bool`
    pub signature: String,
    /// What the function does
    pub description: String,
    /// Names of functions this one calls
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Indices into the requirement list this function implements
    #[serde(default, alias = "requirements")]
    pub requirement_ids: Vec<usize>,
}

impl FunctionRecord {
    /// Bare function name extracted from the signature.
    ///
    /// Works for `def name(...)`, `async def name(...)`,
    /// `function name(...)`, and bare `name(...)` forms.
    pub fn name(&self) -> &str {
        let head = self.signature.split('(').next().unwrap_or("");
        head.rsplit(|c: char| c.is_whitespace())
            .next()
            .unwrap_or("")
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
    }
}
