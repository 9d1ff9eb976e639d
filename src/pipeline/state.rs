//! Pipeline State Machine
//!
//! Nine states, event-driven transitions. `Completed` and `Error` are
//! terminal. `Paused` and `AwaitingDecision` remember the phase they
//! interrupted so `resume`/`decision_made` can return to it. Illegal
//! transitions are rejected with an error value and logged; they never
//! panic.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tracing::warn;

/// Where the pipeline is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Waiting for a task
    Idle,
    /// Expanding the task into requirements
    Expanding,
    /// Organizing requirements into functions
    Decomposing,
    /// Implementing functions
    Generating,
    /// Reviewing generated code
    Validating,
    /// Parked by the user; remembers its predecessor
    Paused,
    /// Waiting for a user decision at a checkpoint
    AwaitingDecision,
    /// Finished successfully (terminal)
    Completed,
    /// Failed (terminal)
    Error,
}

impl PipelineState {
    /// Snake-case name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Expanding => "expanding",
            PipelineState::Decomposing => "decomposing",
            PipelineState::Generating => "generating",
            PipelineState::Validating => "validating",
            PipelineState::Paused => "paused",
            PipelineState::AwaitingDecision => "awaiting_decision",
            PipelineState::Completed => "completed",
            PipelineState::Error => "error",
        }
    }

    /// Whether this is one of the four actively-executing phases
    pub fn is_active_phase(&self) -> bool {
        matches!(
            self,
            PipelineState::Expanding
                | PipelineState::Decomposing
                | PipelineState::Generating
                | PipelineState::Validating
        )
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Error)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// `start(task)`: Idle → Expanding
    Start,
    /// Expanding → Decomposing
    ExpandDone,
    /// Decomposing → Generating
    DecomposeDone,
    /// Generating → Validating
    GenerateDoneAll,
    /// Validating → Completed
    ValidateDone,
    /// Any active phase → Paused
    Pause,
    /// Paused → its predecessor
    Resume,
    /// Any non-terminal state → Idle
    Cancel,
    /// Any active phase → AwaitingDecision
    AwaitDecision,
    /// AwaitingDecision → its predecessor
    DecisionMade,
    /// Any non-terminal state → Error
    Fail,
}

impl StateEvent {
    /// Event name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            StateEvent::Start => "start",
            StateEvent::ExpandDone => "expand_done",
            StateEvent::DecomposeDone => "decompose_done",
            StateEvent::GenerateDoneAll => "generate_done_all",
            StateEvent::ValidateDone => "validate_done",
            StateEvent::Pause => "pause",
            StateEvent::Resume => "resume",
            StateEvent::Cancel => "cancel",
            StateEvent::AwaitDecision => "await_decision",
            StateEvent::DecisionMade => "decision_made",
            StateEvent::Fail => "error",
        }
    }
}

/// Rejected transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    /// State the machine was in
    pub state: PipelineState,
    /// Event that was not accepted there
    pub event: StateEvent,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event '{}' not accepted in state '{}'", self.event.as_str(), self.state)
    }
}

impl std::error::Error for TransitionError {}

/// One accepted transition, recorded for the history
#[derive(Debug, Clone)]
pub struct StateTransition {
    /// State before
    pub from: PipelineState,
    /// State after
    pub to: PipelineState,
    /// Event that caused it
    pub event: StateEvent,
    /// Free-text reason
    pub reason: String,
    /// When it happened
    pub at: SystemTime,
}

/// The machine itself
#[derive(Debug)]
pub struct StateMachine {
    current: PipelineState,
    /// Phase interrupted by Paused/AwaitingDecision
    previous: Option<PipelineState>,
    history: Vec<StateTransition>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a machine in Idle
    pub fn new() -> Self {
        Self { current: PipelineState::Idle, previous: None, history: Vec::new() }
    }

    /// Current state
    pub fn current(&self) -> PipelineState {
        self.current
    }

    /// The phase a resume would return to, when parked
    pub fn resume_target(&self) -> Option<PipelineState> {
        match self.current {
            PipelineState::Paused | PipelineState::AwaitingDecision => self.previous,
            _ => None,
        }
    }

    /// Accepted transitions so far
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// The state `event` would lead to from the current state, or the
    /// rejection.
    pub fn peek(&self, event: StateEvent) -> Result<PipelineState, TransitionError> {
        use PipelineState as S;
        use StateEvent as E;

        let next = match (self.current, event) {
            (S::Idle, E::Start) => S::Expanding,
            (S::Expanding, E::ExpandDone) => S::Decomposing,
            (S::Decomposing, E::DecomposeDone) => S::Generating,
            (S::Generating, E::GenerateDoneAll) => S::Validating,
            (S::Validating, E::ValidateDone) => S::Completed,
            (state, E::Pause) if state.is_active_phase() => S::Paused,
            (S::Paused, E::Resume) => {
                self.previous.ok_or(TransitionError { state: self.current, event })?
            }
            (state, E::AwaitDecision) if state.is_active_phase() => S::AwaitingDecision,
            (S::AwaitingDecision, E::DecisionMade) => {
                self.previous.ok_or(TransitionError { state: self.current, event })?
            }
            (state, E::Cancel) if !state.is_terminal() => S::Idle,
            (state, E::Fail) if !state.is_terminal() => S::Error,
            (state, event) => return Err(TransitionError { state, event }),
        };
        Ok(next)
    }

    /// Apply `event`. On acceptance the transition is recorded and the
    /// new state returned; on rejection the machine is unchanged.
    pub fn apply(&mut self, event: StateEvent, reason: &str) -> Result<PipelineState, TransitionError> {
        let next = match self.peek(event) {
            Ok(next) => next,
            Err(err) => {
                warn!(state = %err.state, event = err.event.as_str(), "illegal transition rejected");
                return Err(err);
            }
        };

        if matches!(event, StateEvent::Pause | StateEvent::AwaitDecision) {
            self.previous = Some(self.current);
        } else if matches!(event, StateEvent::Resume | StateEvent::DecisionMade) {
            self.previous = None;
        }

        self.history.push(StateTransition {
            from: self.current,
            to: next,
            event,
            reason: reason.to_string(),
            at: SystemTime::now(),
        });
        self.current = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(state: PipelineState) -> StateMachine {
        let mut machine = StateMachine::new();
        let path: &[StateEvent] = match state {
            PipelineState::Idle => &[],
            PipelineState::Expanding => &[StateEvent::Start],
            PipelineState::Decomposing => &[StateEvent::Start, StateEvent::ExpandDone],
            PipelineState::Generating => {
                &[StateEvent::Start, StateEvent::ExpandDone, StateEvent::DecomposeDone]
            }
            PipelineState::Validating => &[
                StateEvent::Start,
                StateEvent::ExpandDone,
                StateEvent::DecomposeDone,
                StateEvent::GenerateDoneAll,
            ],
            PipelineState::Paused => &[StateEvent::Start, StateEvent::Pause],
            PipelineState::AwaitingDecision => &[StateEvent::Start, StateEvent::AwaitDecision],
            PipelineState::Completed => &[
                StateEvent::Start,
                StateEvent::ExpandDone,
                StateEvent::DecomposeDone,
                StateEvent::GenerateDoneAll,
                StateEvent::ValidateDone,
            ],
            PipelineState::Error => &[StateEvent::Start, StateEvent::Fail],
        };
        for event in path {
            machine.apply(*event, "setup").unwrap();
        }
        assert_eq!(machine.current(), state);
        machine
    }

    // ==========================================
    // Happy Path Tests
    // ==========================================

    #[test]
    fn test_full_pipeline_walk() {
        let mut machine = StateMachine::new();
        machine.apply(StateEvent::Start, "task").unwrap();
        machine.apply(StateEvent::ExpandDone, "").unwrap();
        machine.apply(StateEvent::DecomposeDone, "").unwrap();
        machine.apply(StateEvent::GenerateDoneAll, "").unwrap();
        machine.apply(StateEvent::ValidateDone, "").unwrap();
        assert_eq!(machine.current(), PipelineState::Completed);
        assert!(machine.current().is_terminal());
        assert_eq!(machine.history().len(), 5);
    }

    // ==========================================
    // Pause / Resume Tests
    // ==========================================

    #[test]
    fn test_pause_remembers_each_active_phase() {
        for state in [
            PipelineState::Expanding,
            PipelineState::Decomposing,
            PipelineState::Generating,
            PipelineState::Validating,
        ] {
            let mut machine = machine_in(state);
            machine.apply(StateEvent::Pause, "").unwrap();
            assert_eq!(machine.current(), PipelineState::Paused);
            assert_eq!(machine.resume_target(), Some(state));
            machine.apply(StateEvent::Resume, "").unwrap();
            assert_eq!(machine.current(), state);
        }
    }

    #[test]
    fn test_pause_rejected_outside_active_phases() {
        for state in [PipelineState::Idle, PipelineState::Completed, PipelineState::Error] {
            let mut machine = machine_in(state);
            assert!(machine.apply(StateEvent::Pause, "").is_err());
            assert_eq!(machine.current(), state);
        }
    }

    #[test]
    fn test_awaiting_decision_round_trip() {
        let mut machine = machine_in(PipelineState::Generating);
        machine.apply(StateEvent::AwaitDecision, "checkpoint").unwrap();
        assert_eq!(machine.current(), PipelineState::AwaitingDecision);
        machine.apply(StateEvent::DecisionMade, "answered").unwrap();
        assert_eq!(machine.current(), PipelineState::Generating);
    }

    // ==========================================
    // Cancel / Error Tests
    // ==========================================

    #[test]
    fn test_cancel_from_any_non_terminal() {
        for state in [
            PipelineState::Idle,
            PipelineState::Expanding,
            PipelineState::Decomposing,
            PipelineState::Generating,
            PipelineState::Validating,
            PipelineState::Paused,
            PipelineState::AwaitingDecision,
        ] {
            let mut machine = machine_in(state);
            machine.apply(StateEvent::Cancel, "user").unwrap();
            assert_eq!(machine.current(), PipelineState::Idle);
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for state in [PipelineState::Completed, PipelineState::Error] {
            for event in [
                StateEvent::Start,
                StateEvent::Pause,
                StateEvent::Cancel,
                StateEvent::Fail,
                StateEvent::ExpandDone,
            ] {
                let mut machine = machine_in(state);
                assert!(machine.apply(event, "").is_err(), "{:?} accepted in {:?}", event, state);
                assert_eq!(machine.current(), state);
            }
        }
    }

    #[test]
    fn test_fail_from_paused_lands_in_error() {
        let mut machine = machine_in(PipelineState::Paused);
        machine.apply(StateEvent::Fail, "budget").unwrap();
        assert_eq!(machine.current(), PipelineState::Error);
    }

    // ==========================================
    // Rejection Semantics Tests
    // ==========================================

    #[test]
    fn test_rejected_transition_does_not_touch_history() {
        let mut machine = machine_in(PipelineState::Expanding);
        let before = machine.history().len();
        assert!(machine.apply(StateEvent::DecomposeDone, "").is_err());
        assert_eq!(machine.history().len(), before);
    }

    #[test]
    fn test_phase_order_enforced() {
        let mut machine = machine_in(PipelineState::Expanding);
        // cannot skip DECOMPOSE
        assert!(machine.apply(StateEvent::GenerateDoneAll, "").is_err());
        assert!(machine.apply(StateEvent::ValidateDone, "").is_err());
    }

    #[test]
    fn test_resume_rejected_when_not_paused() {
        let mut machine = machine_in(PipelineState::Generating);
        assert!(machine.apply(StateEvent::Resume, "").is_err());
    }

    #[test]
    fn test_transition_error_display() {
        let err = TransitionError { state: PipelineState::Idle, event: StateEvent::Resume };
        assert!(err.to_string().contains("resume"));
        assert!(err.to_string().contains("idle"));
    }
}
