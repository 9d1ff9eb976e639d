//! GENERATE Phase
//!
//! Implements one function record per vote. After a win, the caller
//! scans the winning code for identifiers that are called but defined
//! nowhere (not in the plan, not in the code itself, not a builtin) and
//! recursively synthesizes them, bounded by `max_depth` and guarded by a
//! per-generation frontier set.

use crate::core::config::MdapConfig;
use crate::core::context::{ContextSnapshot, Language};
use crate::core::redflag::strip_code_fences;
use crate::core::step::{FunctionRecord, Step, StepType};
use crate::core::voter::{VoteResult, Voter};
use crate::llm::LlmClient;
use crate::phases::LlmGenerator;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of generating one function
#[derive(Debug)]
pub struct GenerateOutcome {
    /// The step that was voted on
    pub step: Step,
    /// The full vote
    pub vote: VoteResult,
    /// Cleaned winning source (empty when the vote produced no winner)
    pub code: String,
}

/// Executor for code generation
pub struct GeneratePhase {
    generator: LlmGenerator,
}

impl GeneratePhase {
    /// Create the executor
    pub fn new(client: Arc<dyn LlmClient>, config: MdapConfig) -> Self {
        Self { generator: LlmGenerator::new(client, config) }
    }

    /// Vote on an implementation of `record`.
    pub async fn execute(
        &self,
        voter: &Voter,
        snapshot: &ContextSnapshot,
        record: &FunctionRecord,
    ) -> GenerateOutcome {
        let step = Step::new(StepType::Generate, record.description.clone())
            .with_target(record.signature.clone());
        let vote = voter.vote(&step, snapshot, &self.generator).await;
        let code = vote
            .winner
            .as_ref()
            .map(|w| clean_code(&w.raw_text))
            .unwrap_or_default();
        GenerateOutcome { step, vote, code }
    }
}

/// Strip fences and any leading prose lines before the code starts.
pub fn clean_code(text: &str) -> String {
    let unfenced = strip_code_fences(text);
    let start = unfenced
        .lines()
        .position(|line| is_code_start(line.trim_start()))
        .unwrap_or(0);
    unfenced
        .lines()
        .skip(start)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn is_code_start(line: &str) -> bool {
    const STARTERS: &[&str] = &[
        "def ", "async def ", "class ", "import ", "from ", "@",
        "function ", "const ", "let ", "var ", "export ", "interface ", "type ",
    ];
    STARTERS.iter().any(|s| line.starts_with(s))
}

/// Identifiers callable without definition, per language. Calls to
/// these never trigger sub-function generation.
pub fn builtins(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &[
            "print", "len", "range", "int", "str", "float", "bool", "list", "dict",
            "set", "tuple", "enumerate", "zip", "map", "filter", "sorted", "reversed",
            "sum", "min", "max", "abs", "round", "any", "all", "isinstance", "type",
            "super", "open", "repr", "hash", "id", "iter", "next", "getattr", "setattr",
            "hasattr", "format", "input", "bytes", "frozenset", "ord", "chr", "divmod",
            "Exception", "ValueError", "TypeError", "KeyError", "IndexError",
            "RuntimeError", "StopIteration", "NotImplementedError",
            // keywords that read like calls in source scans
            "if", "elif", "while", "for", "return", "yield", "raise", "assert",
            "lambda", "not", "and", "or", "in",
        ],
        Language::Typescript => &[
            "parseInt", "parseFloat", "String", "Number", "Boolean", "Array", "Object",
            "JSON", "Math", "Date", "Promise", "Set", "Map", "Symbol", "RegExp",
            "Error", "TypeError", "RangeError", "isNaN", "isFinite", "require",
            "structuredClone", "encodeURIComponent", "decodeURIComponent", "fetch",
            "setTimeout", "setInterval", "clearTimeout", "clearInterval",
            "if", "while", "for", "switch", "return", "catch", "typeof", "new",
            "await", "function", "constructor",
        ],
    }
}

/// Names defined inside `code` itself (functions, classes).
pub fn defined_names(code: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    for line in code.lines() {
        let trimmed = line.trim_start();
        for prefix in ["def ", "async def ", "function ", "class ", "export function "] {
            if let Some(rest) = trimmed.strip_prefix(prefix) {
                let name: String = rest
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if !name.is_empty() {
                    names.insert(name);
                }
            }
        }
    }
    names
}

/// Identifiers followed by `(` in first-occurrence order, excluding
/// method calls (`obj.method(...)`).
pub fn called_identifiers(code: &str) -> Vec<String> {
    let bytes = code.as_bytes();
    let mut calls = Vec::new();
    let mut seen = HashSet::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_alphabetic() || bytes[i] == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            // skip whitespace between name and a possible open paren
            let mut j = i;
            while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
                j += 1;
            }
            let is_call = j < bytes.len() && bytes[j] == b'(';
            let is_method = start > 0 && bytes[start - 1] == b'.';
            if is_call && !is_method {
                let name = &code[start..i];
                if seen.insert(name.to_string()) {
                    calls.push(name.to_string());
                }
            }
        } else {
            i += 1;
        }
    }
    calls
}

/// Called-but-undefined identifiers in `code`: not defined locally, not
/// in `known` (the plan plus already-generated functions), and not a
/// builtin of `language`.
pub fn missing_functions(code: &str, language: Language, known: &HashSet<String>) -> Vec<String> {
    let local = defined_names(code);
    let allowlist = builtins(language);
    called_identifiers(code)
        .into_iter()
        .filter(|name| {
            !local.contains(name) && !known.contains(name) && !allowlist.contains(&name.as_str())
        })
        .collect()
}
