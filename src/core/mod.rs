//! Voting Engine Core
//!
//! The data model and the three cooperating pieces of every decision:
//! the red-flag filter (cheap local rejection), the discriminator
//! (LLM-judged semantic equivalence), and the voter (first-to-ahead-by-k
//! over semantic groups).

pub mod config;
pub mod context;
pub mod discriminator;
pub mod redflag;
pub mod step;
pub mod voter;

pub use config::{BudgetConfig, ConfigError, MdapConfig};
pub use context::{Context, ContextSnapshot, Language};
pub use discriminator::Discriminator;
pub use redflag::{RedFlag, RedFlagFilter};
pub use step::{FunctionRecord, OutputShape, Step, StepType};
pub use voter::{
    Candidate, CandidateGenerator, Group, ScriptedGenerator, Termination, VoteResult, Voter,
};
