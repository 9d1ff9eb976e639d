//! Prompt Templates
//!
//! The six prompt surfaces the pipeline fills. Template texts are
//! internal; the variables each one consumes are the contract:
//!
//! | template      | variables                                        |
//! |---------------|--------------------------------------------------|
//! | expand        | task, context                                    |
//! | decompose     | requirements, language                           |
//! | generate      | signature, description, language, context        |
//! | validate      | code, specification, context                     |
//! | discriminate  | context, code_a, code_b (answer must be YES|NO)  |
//! | decide_next   | context, progress counters                       |

use crate::core::Language;

/// Expand a task into atomic requirements.
pub fn expand(task: &str, context: &str) -> String {
    format!(
        "You are a requirements analyst. Expand the task below into atomic \
requirements. Each requirement must be a single testable statement, \
independent of the others, describing WHAT is needed and never HOW.\n\n\
Task: {task}\n\n{context}\n\
List ALL atomic requirements needed to complete this task. Missing \
requirements cause bugs later.\n\n\
Output a JSON array of strings and nothing else:"
    )
}

/// Organize requirements into function records.
pub fn decompose(requirements: &[String], language: Language) -> String {
    let numbered: Vec<String> = requirements
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}", i, r))
        .collect();
    format!(
        "You are a software architect. Decompose the requirements below into \
{language} functions. Each function has one responsibility, a complete \
typed signature, and comes after every function it depends on.\n\n\
Requirements:\n{reqs}\n\n\
Output a JSON array of objects and nothing else. Each object has:\n\
- \"signature\": full function signature with types\n\
- \"description\": one sentence, what the function does\n\
- \"dependencies\": names of earlier functions it calls\n\
- \"requirements\": indices of the requirements it implements",
        language = language.as_str(),
        reqs = numbered.join("\n"),
    )
}

/// Implement one function.
pub fn generate(signature: &str, description: &str, language: Language, context: &str) -> String {
    format!(
        "You are an expert {language} developer. Implement exactly the \
function below. Output ONLY the code: no explanations, no markdown \
fences. Handle edge cases, keep it simple.\n\n\
Function to implement:\n{signature}\n\n\
Description:\n{description}\n\n\
Context:\n{context}\n\n\
Implement this function:",
        language = language.as_str(),
    )
}

/// Review a code body against its specification.
pub fn validate(code: &str, specification: &str, context: &str) -> String {
    format!(
        "You are a code reviewer. Review the code against its specification \
for logic errors, unhandled edge cases, and type mismatches. Flag only \
real issues.\n\n\
Code to review:\n```\n{code}\n```\n\n\
Specification:\n{specification}\n\n\
Context:\n{context}\n\n\
Respond in exactly this layout:\n\
VALID: yes|no\n\
ERRORS: [each error on its own '- ' line, or []]\n\
WARNINGS: [each warning on its own '- ' line, or []]"
    )
}

/// Ask whether two candidates are behaviorally equivalent.
///
/// The response MUST be parseable as YES|NO; the discriminator treats
/// anything else as NO.
pub fn discriminate(context: &str, code_a: &str, code_b: &str) -> String {
    format!(
        "You are judging semantic equivalence. Two outputs are equivalent \
when they produce the same result for all valid inputs. Ignore \
formatting, variable naming, and comments entirely; only behavior \
matters.\n\n\
Task context: {context}\n\n\
Candidate A:\n```\n{code_a}\n```\n\n\
Candidate B:\n```\n{code_b}\n```\n\n\
Are these two candidates semantically equivalent? Answer ONLY YES or NO."
    )
}

/// Ask which unit of work should run next.
pub fn decide_next(
    context: &str,
    requirements_done: usize,
    functions_planned: usize,
    functions_implemented: usize,
) -> String {
    format!(
        "You are planning the next unit of work for a code-generation \
pipeline.\n\n\
Current context:\n{context}\n\n\
Progress: {requirements_done} requirements expanded, \
{functions_implemented}/{functions_planned} functions implemented.\n\n\
Which step should run next? Answer with one of: expand, decompose, \
generate, validate, done."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_carries_task_and_context() {
        let p = expand("build a cache", "prior answers");
        assert!(p.contains("build a cache"));
        assert!(p.contains("prior answers"));
        assert!(p.contains("JSON array"));
    }

    #[test]
    fn test_decompose_numbers_requirements() {
        let reqs = vec!["store items".to_string(), "evict oldest".to_string()];
        let p = decompose(&reqs, Language::Python);
        assert!(p.contains("0. store items"));
        assert!(p.contains("1. evict oldest"));
        assert!(p.contains("python"));
    }

    #[test]
    fn test_generate_includes_signature_and_language() {
        let p = generate("def get(key: str) -> str", "look up a key", Language::Typescript, "");
        assert!(p.contains("def get(key: str) -> str"));
        assert!(p.contains("typescript"));
    }

    #[test]
    fn test_validate_layout_markers() {
        let p = validate("def f(): pass", "f does nothing", "");
        assert!(p.contains("VALID: yes|no"));
        assert!(p.contains("ERRORS:"));
        assert!(p.contains("WARNINGS:"));
    }

    #[test]
    fn test_discriminate_has_two_fenced_blocks() {
        let p = discriminate("ctx", "return 1", "return 2");
        assert_eq!(p.matches("```").count(), 4);
        assert!(p.contains("YES or NO"));
    }

    #[test]
    fn test_decide_next_reports_counters() {
        let p = decide_next("ctx", 4, 3, 1);
        assert!(p.contains("4 requirements"));
        assert!(p.contains("1/3 functions"));
    }
}
