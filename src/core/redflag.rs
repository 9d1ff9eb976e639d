//! Red-Flag Filter
//!
//! Cheap, purely local rejection of malformed candidates before any
//! discriminator call is spent on them. Discarding a bad sample beats
//! repairing it: repaired outputs mask the instability the vote is
//! supposed to measure.
//!
//! Checks, in order: empty response, length, then a shape check chosen
//! by the step's declared [`OutputShape`]. For source shapes the filter
//! parses the candidate with tree-sitter in the pipeline language; a
//! grammar being unavailable disables only that sub-check.

use crate::core::context::Language;
use crate::core::step::OutputShape;
use tracing::debug;

/// Why a candidate was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum RedFlag {
    /// Response exceeded the token limit
    TokenLengthExceeded {
        /// Measured (or estimated) token count
        actual: usize,
        /// Configured limit
        limit: usize,
    },
    /// Response was empty or whitespace-only
    EmptyResponse,
    /// Response did not match the expected output shape
    FormatViolation {
        /// What was wrong
        message: String,
    },
    /// Response failed to parse as source in the pipeline language
    SyntaxError {
        /// Parser diagnostic
        message: String,
    },
    /// The sample was lost to a transport failure after retries
    TransportFailure {
        /// Underlying error text
        message: String,
    },
}

impl std::fmt::Display for RedFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedFlag::TokenLengthExceeded { actual, limit } => {
                write!(f, "response too long: {} tokens > {} limit", actual, limit)
            }
            RedFlag::EmptyResponse => write!(f, "empty response"),
            RedFlag::FormatViolation { message } => write!(f, "format violation: {}", message),
            RedFlag::SyntaxError { message } => write!(f, "syntax error: {}", message),
            RedFlag::TransportFailure { message } => write!(f, "transport failure: {}", message),
        }
    }
}

impl std::error::Error for RedFlag {}

/// Candidate screening with a configurable token limit
#[derive(Debug, Clone)]
pub struct RedFlagFilter {
    max_tokens_response: usize,
}

impl RedFlagFilter {
    /// Create a filter with the given token limit
    pub fn new(max_tokens_response: usize) -> Self {
        Self { max_tokens_response }
    }

    /// Screen one candidate.
    ///
    /// `reported_output_tokens` is the provider's usage figure; when the
    /// provider reports nothing (zero) the length check falls back to a
    /// chars/4 estimate.
    pub fn check(
        &self,
        text: &str,
        reported_output_tokens: usize,
        shape: OutputShape,
        language: Language,
    ) -> Result<(), RedFlag> {
        if text.trim().is_empty() {
            return Err(RedFlag::EmptyResponse);
        }

        let tokens = if reported_output_tokens > 0 {
            reported_output_tokens
        } else {
            text.len() / 4
        };
        if tokens > self.max_tokens_response {
            return Err(RedFlag::TokenLengthExceeded { actual: tokens, limit: self.max_tokens_response });
        }

        match shape {
            OutputShape::JsonArray => check_json_array(text),
            OutputShape::FunctionList => check_function_list(text),
            OutputShape::YesNo => check_yes_no(text),
            OutputShape::Report => check_report(text),
            OutputShape::SourceCode => check_source(text, language),
            OutputShape::FreeText => Ok(()),
        }
    }
}

/// Strip a surrounding markdown code fence, if present, and return the
/// inner text. Candidates often arrive wrapped despite instructions.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(open) = trimmed.find("```") {
        let after = &trimmed[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(close) = body.rfind("```") {
            return body[..close].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Extract the first top-level JSON array embedded in `text`.
pub fn extract_json_array(text: &str) -> Option<serde_json::Value> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn check_json_array(text: &str) -> Result<(), RedFlag> {
    match extract_json_array(text) {
        Some(serde_json::Value::Array(items)) if !items.is_empty() => Ok(()),
        Some(serde_json::Value::Array(_)) => Err(RedFlag::FormatViolation {
            message: "expected a non-empty JSON array".to_string(),
        }),
        _ => Err(RedFlag::FormatViolation {
            message: "expected a JSON array".to_string(),
        }),
    }
}

fn check_function_list(text: &str) -> Result<(), RedFlag> {
    let items = match extract_json_array(text) {
        Some(serde_json::Value::Array(items)) if !items.is_empty() => items,
        _ => {
            return Err(RedFlag::FormatViolation {
                message: "expected a JSON array of function records".to_string(),
            })
        }
    };

    let mut seen = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let record = item.as_object().ok_or_else(|| RedFlag::FormatViolation {
            message: format!("element {} is not an object", i),
        })?;
        let signature = record
            .get("signature")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| RedFlag::FormatViolation {
                message: format!("element {} is missing a signature", i),
            })?;

        // Dependencies must name functions declared earlier: the list is
        // only usable when it is topologically ordered.
        if let Some(deps) = record.get("dependencies").and_then(|v| v.as_array()) {
            for dep in deps {
                let dep_name = dep.as_str().unwrap_or_default();
                if !dep_name.is_empty() && !seen.contains(&dep_name.to_string()) {
                    return Err(RedFlag::FormatViolation {
                        message: format!(
                            "element {} depends on '{}' which is not declared earlier",
                            i, dep_name
                        ),
                    });
                }
            }
        }
        seen.push(function_name(signature));
    }
    Ok(())
}

/// Bare function name from a signature string.
fn function_name(signature: &str) -> String {
    signature
        .split('(')
        .next()
        .unwrap_or("")
        .rsplit(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
        .to_string()
}

fn check_yes_no(text: &str) -> Result<(), RedFlag> {
    let upper = text.trim().to_uppercase();
    if upper.starts_with("YES") || upper.starts_with("NO") {
        Ok(())
    } else {
        Err(RedFlag::FormatViolation {
            message: "expected a YES or NO verdict".to_string(),
        })
    }
}

fn check_report(text: &str) -> Result<(), RedFlag> {
    if text.to_uppercase().contains("VALID:") {
        Ok(())
    } else {
        Err(RedFlag::FormatViolation {
            message: "expected a VALID:/ERRORS:/WARNINGS: report".to_string(),
        })
    }
}

/// Opening phrases that mark prose instead of code.
const PROSE_OPENERS: &[&str] = &[
    "here's",
    "here is",
    "i'll",
    "i will",
    "this function",
    "this code",
    "the following",
    "sure,",
];

fn check_source(text: &str, language: Language) -> Result<(), RedFlag> {
    let code = strip_code_fences(text);

    if code.len() < 10 {
        return Err(RedFlag::FormatViolation {
            message: "too short to be a function definition".to_string(),
        });
    }

    let lowered = code.to_lowercase();
    for opener in PROSE_OPENERS {
        if lowered.starts_with(opener) {
            return Err(RedFlag::FormatViolation {
                message: "explanation instead of code".to_string(),
            });
        }
    }

    match grammar_for(language) {
        Some(grammar) => parse_source(&code, grammar),
        None => {
            // No grammar: the parse sub-check is disabled, others stand.
            debug!(language = language.as_str(), "no grammar available, skipping parse check");
            Ok(())
        }
    }
}

/// Grammar for the pipeline language, when compiled in.
fn grammar_for(language: Language) -> Option<tree_sitter::Language> {
    match language {
        Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Language::Typescript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
    }
}

fn parse_source(code: &str, grammar: tree_sitter::Language) -> Result<(), RedFlag> {
    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&grammar).is_err() {
        debug!("grammar rejected by parser, skipping parse check");
        return Ok(());
    }

    match parser.parse(code, None) {
        Some(tree) if !tree.root_node().has_error() => Ok(()),
        Some(_) => Err(RedFlag::SyntaxError {
            message: "candidate does not parse".to_string(),
        }),
        None => Err(RedFlag::SyntaxError {
            message: "parser produced no tree".to_string(),
        }),
    }
}
