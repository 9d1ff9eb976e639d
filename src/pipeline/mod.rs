//! Pipeline Layer
//!
//! The state machine, the orchestrator that drives phases across it,
//! and the run-wide shared services: decision tracking, resource
//! accounting, and cooperative interrupts.

pub mod interrupts;
pub mod orchestrator;
pub mod report;
pub mod resources;
pub mod state;
pub mod tracker;

pub use interrupts::{CancelSource, InterruptHandler};
pub use orchestrator::{FailureKind, Orchestrator, PipelineFailure, PipelineOutcome};
pub use report::RunReport;
pub use resources::{BudgetStatus, ResourceManager, ResourceUsage};
pub use state::{PipelineState, StateEvent, StateMachine, TransitionError};
pub use tracker::{Decision, DecisionKind, DecisionPhase, DecisionTracker};
