//! Decision Tracker
//!
//! Append-only record of every vote and every state transition, in
//! causal order, behind one mutex. Read-only queries back the CLI's
//! `history` and `explain` commands.

use crate::core::voter::Termination;
use crate::llm::TokenUsage;
use crate::pipeline::state::PipelineState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

/// Phase a vote decision belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPhase {
    /// Requirements expansion
    Expand,
    /// Function planning
    Decompose,
    /// Code generation
    Generate,
    /// Code review
    Validate,
}

impl DecisionPhase {
    /// Lowercase phase name
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionPhase::Expand => "expand",
            DecisionPhase::Decompose => "decompose",
            DecisionPhase::Generate => "generate",
            DecisionPhase::Validate => "validate",
        }
    }
}

/// What a tracked entry records
#[derive(Debug, Clone)]
pub enum DecisionKind {
    /// A vote terminated
    Vote {
        /// Phase that ran the vote
        phase: DecisionPhase,
        /// What was being decided
        description: String,
        /// Why the vote terminated the way it did
        rationale: String,
        /// Final lead of the winning group
        winning_margin: usize,
        /// Accepted samples drawn
        samples_used: usize,
        /// Samples discarded by the red-flag filter
        rejections: usize,
        /// Semantic groups formed
        groups: usize,
        /// Termination rule that fired
        terminated_by: Termination,
        /// Tokens consumed by the vote
        tokens: TokenUsage,
        /// Estimated cost of the vote in USD
        cost_estimate: f64,
    },
    /// The state machine moved
    Transition {
        /// State before
        from: PipelineState,
        /// State after
        to: PipelineState,
        /// Why
        reason: String,
    },
    /// An illegal transition was attempted and rejected
    RejectedTransition {
        /// State the machine stayed in
        state: PipelineState,
        /// Offending event name
        event: String,
    },
}

/// One tracked entry
#[derive(Debug, Clone)]
pub struct Decision {
    /// Monotonic id, assigned at append time
    pub id: usize,
    /// When it was recorded
    pub at: SystemTime,
    /// Payload
    pub kind: DecisionKind,
}

impl Decision {
    /// One-line summary for listings
    pub fn summary(&self) -> String {
        match &self.kind {
            DecisionKind::Vote { phase, description, winning_margin, samples_used, terminated_by, .. } => {
                format!(
                    "[{}] {} vote: {} (margin {}, {} samples, {})",
                    self.id,
                    phase.as_str(),
                    truncate(description, 48),
                    winning_margin,
                    samples_used,
                    terminated_by.as_str()
                )
            }
            DecisionKind::Transition { from, to, .. } => {
                format!("[{}] state {} -> {}", self.id, from, to)
            }
            DecisionKind::RejectedTransition { state, event } => {
                format!("[{}] rejected '{}' in state {}", self.id, event, state)
            }
        }
    }

    /// Multi-line explanation for the CLI `explain` command
    pub fn explanation(&self) -> String {
        match &self.kind {
            DecisionKind::Vote {
                phase,
                description,
                rationale,
                winning_margin,
                samples_used,
                rejections,
                groups,
                terminated_by,
                tokens,
                cost_estimate,
            } => {
                let confidence = match winning_margin {
                    m if *m >= 5 => "high",
                    m if *m >= 3 => "medium",
                    _ => "low",
                };
                [
                    format!("Decision {} ({} phase)", self.id, phase.as_str()),
                    format!("  decided: {}", description),
                    format!("  rationale: {}", rationale),
                    format!("  samples: {} accepted, {} red-flagged", samples_used, rejections),
                    format!("  groups formed: {}", groups),
                    format!(
                        "  winning margin: {} ({} confidence), terminated by {}",
                        winning_margin,
                        confidence,
                        terminated_by.as_str()
                    ),
                    format!("  tokens: {} in / {} out, ~${:.4}", tokens.input, tokens.output, cost_estimate),
                ]
                .join("\n")
            }
            DecisionKind::Transition { from, to, reason } => {
                format!("Decision {}\n  state change: {} -> {}\n  reason: {}", self.id, from, to, reason)
            }
            DecisionKind::RejectedTransition { state, event } => {
                format!(
                    "Decision {}\n  rejected transition: event '{}' in state {}",
                    self.id, event, state
                )
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

/// The append-only log
#[derive(Debug, Default)]
pub struct DecisionTracker {
    entries: Mutex<Vec<Decision>>,
    next_id: AtomicUsize,
}

impl DecisionTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, kind: DecisionKind) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .expect("decision log poisoned")
            .push(Decision { id, at: SystemTime::now(), kind });
        id
    }

    /// Record a vote decision; returns its id
    #[allow(clippy::too_many_arguments)]
    pub fn record_vote(
        &self,
        phase: DecisionPhase,
        description: &str,
        rationale: &str,
        winning_margin: usize,
        samples_used: usize,
        rejections: usize,
        groups: usize,
        terminated_by: Termination,
        tokens: TokenUsage,
        cost_estimate: f64,
    ) -> usize {
        self.append(DecisionKind::Vote {
            phase,
            description: description.to_string(),
            rationale: rationale.to_string(),
            winning_margin,
            samples_used,
            rejections,
            groups,
            terminated_by,
            tokens,
            cost_estimate,
        })
    }

    /// Record an accepted state transition; returns its id
    pub fn record_transition(&self, from: PipelineState, to: PipelineState, reason: &str) -> usize {
        self.append(DecisionKind::Transition { from, to, reason: reason.to_string() })
    }

    /// Record a rejected transition attempt; returns its id
    pub fn record_rejected_transition(&self, state: PipelineState, event: &str) -> usize {
        self.append(DecisionKind::RejectedTransition { state, event: event.to_string() })
    }

    /// Entry by id
    pub fn get(&self, id: usize) -> Option<Decision> {
        self.entries
            .lock()
            .expect("decision log poisoned")
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    /// Last `n` entries, oldest first
    pub fn last(&self, n: usize) -> Vec<Decision> {
        let entries = self.entries.lock().expect("decision log poisoned");
        let skip = entries.len().saturating_sub(n);
        entries[skip..].to_vec()
    }

    /// All vote decisions for one phase
    pub fn by_phase(&self, phase: DecisionPhase) -> Vec<Decision> {
        self.entries
            .lock()
            .expect("decision log poisoned")
            .iter()
            .filter(|d| matches!(&d.kind, DecisionKind::Vote { phase: p, .. } if *p == phase))
            .cloned()
            .collect()
    }

    /// Total entries recorded
    pub fn count(&self) -> usize {
        self.entries.lock().expect("decision log poisoned").len()
    }

    /// Number of vote decisions recorded
    pub fn vote_count(&self) -> usize {
        self.entries
            .lock()
            .expect("decision log poisoned")
            .iter()
            .filter(|d| matches!(d.kind, DecisionKind::Vote { .. }))
            .count()
    }

    /// Accepted samples across all votes
    pub fn total_samples_used(&self) -> usize {
        self.entries
            .lock()
            .expect("decision log poisoned")
            .iter()
            .map(|d| match &d.kind {
                DecisionKind::Vote { samples_used, .. } => *samples_used,
                _ => 0,
            })
            .sum()
    }

    /// Red-flag rejections across all votes
    pub fn total_rejections(&self) -> usize {
        self.entries
            .lock()
            .expect("decision log poisoned")
            .iter()
            .map(|d| match &d.kind {
                DecisionKind::Vote { rejections, .. } => *rejections,
                _ => 0,
            })
            .sum()
    }

    /// Explanation for one decision, or a not-found message
    pub fn explain(&self, id: usize) -> String {
        match self.get(id) {
            Some(decision) => decision.explanation(),
            None => format!("no decision with id {}", id),
        }
    }

    /// Short overview across all decisions
    pub fn summarize(&self) -> String {
        let entries = self.entries.lock().expect("decision log poisoned");
        if entries.is_empty() {
            return "no decisions recorded yet".to_string();
        }
        let votes = entries.iter().filter(|d| matches!(d.kind, DecisionKind::Vote { .. })).count();
        let mut lines = vec![
            format!("{} entries ({} votes)", entries.len(), votes),
            String::new(),
        ];
        for decision in entries.iter().rev().take(5).rev() {
            lines.push(format!("  {}", decision.summary()));
        }
        lines.join("\n")
    }
}
