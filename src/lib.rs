//! MDAP - Massively Decomposed Agentic Processes
//!
//! A code-generation framework that drives a language model through a
//! multi-phase pipeline (expand requirements → decompose into functions →
//! generate code → validate) in which every non-deterministic decision is
//! resolved by voting:
//!
//! - **Red-flagging**: cheap local rejection of malformed candidates
//! - **Discrimination**: pairwise semantic-equivalence queries against the
//!   same model, grouping candidates into semantic groups
//! - **First-to-ahead-by-k**: a vote ends when one group leads all others
//!   by a margin of `k`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mdap::core::{MdapConfig, Language};
//! use mdap::llm::mock::MockLlmClient;
//! use mdap::pipeline::Orchestrator;
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let client = Arc::new(MockLlmClient::constant("[\"store items\"]"));
//! let orchestrator = Orchestrator::new(client, MdapConfig::default());
//! let outcome = orchestrator.run("build a todo list", Language::Python).await;
//! println!("exit code {}", outcome.exit_code());
//! # }
//! ```

pub mod core;
pub mod events;
pub mod llm;
pub mod phases;
pub mod pipeline;
pub mod prompts;

// Re-export commonly used items at crate root
pub use core::{Candidate, Group, Language, MdapConfig, Step, StepType, Termination, VoteResult};
pub use events::{EventBus, PipelineEvent};
pub use pipeline::{Orchestrator, PipelineOutcome, PipelineState};
