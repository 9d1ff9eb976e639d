//! Pipeline Observability Events
//!
//! Typed events emitted by the voter, phases, and orchestrator and
//! distributed over a broadcast [`EventBus`]. Events are serde-tagged for
//! JSON logging and carry millisecond timestamps.

pub mod bus;

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Everything the pipeline reports while running
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A candidate sample was requested from the model
    SampleRequested {
        /// Pipeline phase issuing the request
        phase: String,
        /// Sampling temperature
        temperature: f64,
        /// Request time
        #[serde(with = "millis")]
        timestamp: SystemTime,
    },

    /// A candidate arrived and was screened
    SampleCompleted {
        /// Tokens consumed by the sample
        tokens_used: usize,
        /// Rejection reason, if the red-flag filter discarded it
        #[serde(skip_serializing_if = "Option::is_none")]
        red_flag: Option<String>,
        /// Arrival time
        #[serde(with = "millis")]
        timestamp: SystemTime,
    },

    /// A candidate joined a semantic group
    CandidateGrouped {
        /// Group that absorbed the candidate
        group_id: usize,
        /// Group size after insertion
        votes: usize,
        /// Current lead of the largest group over the runner-up
        margin: usize,
        #[serde(with = "millis")]
        timestamp: SystemTime,
    },

    /// A vote terminated
    VoteDecided {
        /// Phase the vote belonged to
        phase: String,
        /// Winning group id, when any candidate was accepted
        #[serde(skip_serializing_if = "Option::is_none")]
        winner_group: Option<usize>,
        /// Accepted + red-flagged samples drawn
        total_samples: usize,
        /// Final lead of the winner
        winning_margin: usize,
        /// Termination rule that fired
        terminated_by: String,
        #[serde(with = "millis")]
        timestamp: SystemTime,
    },

    /// The state machine moved
    StateChanged {
        /// Previous state
        from: String,
        /// New state
        to: String,
        /// Why the transition happened
        reason: String,
        #[serde(with = "millis")]
        timestamp: SystemTime,
    },

    /// Resource usage crossed the warning band or a hard budget
    BudgetAlert {
        /// Human-readable description of the breach
        message: String,
        /// True when a hard limit was exceeded (not just the 80% band)
        exceeded: bool,
        #[serde(with = "millis")]
        timestamp: SystemTime,
    },
}

impl PipelineEvent {
    /// Build a SampleRequested event stamped now
    pub fn sample_requested(phase: &str, temperature: f64) -> Self {
        Self::SampleRequested {
            phase: phase.to_string(),
            temperature,
            timestamp: SystemTime::now(),
        }
    }

    /// Build a SampleCompleted event stamped now
    pub fn sample_completed(tokens_used: usize, red_flag: Option<String>) -> Self {
        Self::SampleCompleted {
            tokens_used,
            red_flag,
            timestamp: SystemTime::now(),
        }
    }

    /// Build a CandidateGrouped event stamped now
    pub fn candidate_grouped(group_id: usize, votes: usize, margin: usize) -> Self {
        Self::CandidateGrouped {
            group_id,
            votes,
            margin,
            timestamp: SystemTime::now(),
        }
    }

    /// Build a VoteDecided event stamped now
    pub fn vote_decided(
        phase: &str,
        winner_group: Option<usize>,
        total_samples: usize,
        winning_margin: usize,
        terminated_by: &str,
    ) -> Self {
        Self::VoteDecided {
            phase: phase.to_string(),
            winner_group,
            total_samples,
            winning_margin,
            terminated_by: terminated_by.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    /// Build a StateChanged event stamped now
    pub fn state_changed(from: &str, to: &str, reason: &str) -> Self {
        Self::StateChanged {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    /// Build a BudgetAlert event stamped now
    pub fn budget_alert(message: &str, exceeded: bool) -> Self {
        Self::BudgetAlert {
            message: message.to_string(),
            exceeded,
            timestamp: SystemTime::now(),
        }
    }

    /// Tag name of the event variant
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SampleRequested { .. } => "SampleRequested",
            Self::SampleCompleted { .. } => "SampleCompleted",
            Self::CandidateGrouped { .. } => "CandidateGrouped",
            Self::VoteDecided { .. } => "VoteDecided",
            Self::StateChanged { .. } => "StateChanged",
            Self::BudgetAlert { .. } => "BudgetAlert",
        }
    }

    /// When the event was created
    pub fn timestamp(&self) -> SystemTime {
        match self {
            Self::SampleRequested { timestamp, .. }
            | Self::SampleCompleted { timestamp, .. }
            | Self::CandidateGrouped { timestamp, .. }
            | Self::VoteDecided { timestamp, .. }
            | Self::StateChanged { timestamp, .. }
            | Self::BudgetAlert { timestamp, .. } => *timestamp,
        }
    }
}

/// SystemTime as epoch milliseconds
mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let ms = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        ms.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(ms))
    }
}

pub use bus::EventBus;
