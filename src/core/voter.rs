//! First-to-ahead-by-k Voter
//!
//! Drives one vote: draw a candidate, screen it with the red-flag
//! filter, classify it into a semantic group via the discriminator, and
//! stop as soon as the largest group leads every other group by `k`.
//! Red-flagged candidates do not count against `max_samples`; they
//! trigger an immediate resample, bounded at `3 × max_samples`
//! consecutive rejections.
//!
//! Cooperative checkpoints sit at every outbound LLM call: cancellation
//! ends the vote without mutating anything outside it, and a pause parks
//! the vote after the arriving candidate has been classified.
//!
//! Given a deterministic generator and discriminator, the vote is fully
//! deterministic: candidate and group ids are assigned in arrival order
//! and ties always break toward the earliest-created group.

use crate::core::config::MdapConfig;
use crate::core::context::{normalize_text, ContextSnapshot};
use crate::core::discriminator::Discriminator;
use crate::core::redflag::{RedFlag, RedFlagFilter};
use crate::core::step::Step;
use crate::events::{EventBus, PipelineEvent};
use crate::llm::{LlmClient, LlmError, LlmResponse, TokenUsage};
use crate::pipeline::interrupts::{CancelSource, InterruptHandler};
use crate::pipeline::resources::ResourceManager;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One sampled response
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Arrival index within the vote
    pub id: usize,
    /// Verbatim model output
    pub raw_text: String,
    /// Whitespace-collapsed form
    pub normalized_text: String,
    /// Semantic group, assigned exactly once
    pub group_id: Option<usize>,
    /// Rejection reason, when the filter discarded this candidate
    pub red_flag: Option<RedFlag>,
    /// Tokens the sample cost
    pub tokens: TokenUsage,
}

impl Candidate {
    fn new(id: usize, raw_text: String, tokens: TokenUsage) -> Self {
        let normalized_text = normalize_text(&raw_text);
        Self { id, raw_text, normalized_text, group_id: None, red_flag: None, tokens }
    }
}

/// Candidates judged semantically equivalent
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Monotonic id within the vote, in creation order
    pub id: usize,
    /// First candidate placed in the group; what new arrivals are
    /// compared against and what wins the vote
    pub representative: Candidate,
    /// All members, in insertion order (representative included)
    pub members: Vec<Candidate>,
}

impl Group {
    fn new(id: usize, representative: Candidate) -> Self {
        Self { id, representative: representative.clone(), members: vec![representative] }
    }

    /// Vote count of the group
    pub fn votes(&self) -> usize {
        self.members.len()
    }
}

/// Why a vote ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// One group reached a lead of `k`
    AheadByK,
    /// The accepted-sample cap was reached; winner is the plurality
    MaxSamples,
    /// Cooperative cancellation
    Cancelled,
    /// A resource budget or the rejection bound was exhausted
    BudgetExhausted,
}

impl Termination {
    /// Snake-case name for logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::AheadByK => "ahead_by_k",
            Termination::MaxSamples => "max_samples",
            Termination::Cancelled => "cancelled",
            Termination::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Outcome of one vote
#[derive(Debug, Clone)]
pub struct VoteResult {
    /// Representative of the winning group; `None` only when the vote
    /// ended before any candidate was accepted
    pub winner: Option<Candidate>,
    /// Accepted samples drawn
    pub total_samples: usize,
    /// Candidates discarded by the red-flag filter (lost samples
    /// included)
    pub red_flagged: usize,
    /// The discarded candidates themselves, each carrying its reason
    pub rejected: Vec<Candidate>,
    /// All groups, in creation order
    pub groups: Vec<Group>,
    /// (group id, votes) in group-id order
    pub votes_per_group: Vec<(usize, usize)>,
    /// Lead of the winning group over the runner-up
    pub winning_margin: usize,
    /// Termination rule that fired
    pub terminated_by: Termination,
    /// Tokens consumed by candidate generation in this vote
    pub tokens: TokenUsage,
    /// Wall-clock duration of the vote
    pub elapsed: Duration,
}

impl VoteResult {
    /// Accepted candidates across all groups
    pub fn accepted(&self) -> usize {
        self.groups.iter().map(Group::votes).sum()
    }
}

/// Source of candidates for one step.
///
/// Implementations must be pure with respect to the snapshot: every
/// candidate in a vote sees the same one.
pub trait CandidateGenerator: Send + Sync {
    /// Draw the next candidate.
    fn next_candidate<'a>(
        &'a self,
        step: &'a Step,
        snapshot: &'a ContextSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>>;
}

/// Scripted generator replaying a fixed sequence; for tests and dry
/// runs.
#[derive(Debug)]
pub struct ScriptedGenerator {
    responses: Vec<Result<String, LlmError>>,
    index: AtomicUsize,
    tokens_per_response: usize,
}

impl ScriptedGenerator {
    /// Replay `responses` in order, cycling at the end.
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: responses.into_iter().map(|r| Ok(r.to_string())).collect(),
            index: AtomicUsize::new(0),
            tokens_per_response: 40,
        }
    }

    /// Replay a mix of successes and failures.
    pub fn with_outcomes(responses: Vec<Result<String, LlmError>>) -> Self {
        Self { responses, index: AtomicUsize::new(0), tokens_per_response: 40 }
    }

    /// Override the simulated output token count.
    pub fn with_tokens_per_response(mut self, tokens: usize) -> Self {
        self.tokens_per_response = tokens;
        self
    }

    /// Candidates drawn so far.
    pub fn drawn(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

impl CandidateGenerator for ScriptedGenerator {
    fn next_candidate<'a>(
        &'a self,
        _step: &'a Step,
        _snapshot: &'a ContextSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>> {
        let idx = self.index.fetch_add(1, Ordering::SeqCst);
        let outcome = self.responses[idx % self.responses.len()].clone();
        let tokens = self.tokens_per_response;
        Box::pin(async move {
            outcome.map(|content| LlmResponse { content, tokens: TokenUsage::new(80, tokens) })
        })
    }
}

/// The voting engine
pub struct Voter {
    discriminator_client: Arc<dyn LlmClient>,
    config: MdapConfig,
    filter: RedFlagFilter,
    controls: InterruptHandler,
    resources: Arc<ResourceManager>,
    bus: EventBus,
}

impl Voter {
    /// Create a voter. `discriminator_client` answers the equivalence
    /// queries; candidate generation comes from the per-vote generator.
    pub fn new(
        discriminator_client: Arc<dyn LlmClient>,
        config: MdapConfig,
        controls: InterruptHandler,
        resources: Arc<ResourceManager>,
        bus: EventBus,
    ) -> Self {
        let filter = RedFlagFilter::new(config.max_tokens_response);
        Self { discriminator_client, config, filter, controls, resources, bus }
    }

    /// Configured margin
    pub fn k(&self) -> usize {
        self.config.k
    }

    /// Run one vote for `step` against `snapshot`.
    pub async fn vote(
        &self,
        step: &Step,
        snapshot: &ContextSnapshot,
        generator: &dyn CandidateGenerator,
    ) -> VoteResult {
        let started = Instant::now();
        let phase = step.step_type.as_str();
        let judge = Discriminator::new(
            self.discriminator_client.clone(),
            &self.config,
            self.resources.clone(),
        );
        let context_text = snapshot.to_prompt_context();

        let mut session = Session::new(started);
        info!(step = %step.id, phase, k = self.config.k, "vote started");

        loop {
            // Checkpoint before the outbound request.
            if !self.controls.park_while_paused().await {
                return self.finish(phase, session, self.cancel_termination());
            }
            if let Some(termination) = self.halt_reason() {
                return self.finish(phase, session, termination);
            }

            self.bus.emit(PipelineEvent::sample_requested(phase, self.config.temperature));
            let outcome = generator.next_candidate(step, snapshot).await;

            // An in-flight request completes, but a cancellation issued
            // meanwhile discards its result.
            if self.controls.is_cancelled() {
                return self.finish(phase, session, self.cancel_termination());
            }

            let response = match outcome {
                Ok(response) => response,
                Err(err) => {
                    // Lost sample: the retry budget inside the generator
                    // is already spent.
                    self.resources.record(TokenUsage::default());
                    let flag = RedFlag::TransportFailure { message: err.to_string() };
                    self.bus.emit(PipelineEvent::sample_completed(0, Some(flag.to_string())));
                    let lost = Candidate::new(session.next_id(), String::new(), TokenUsage::default());
                    if session.reject(lost, flag) >= self.config.rejection_limit() {
                        return self.finish(phase, session, Termination::BudgetExhausted);
                    }
                    continue;
                }
            };

            self.resources.record(response.tokens);
            session.tokens.add(response.tokens);
            let mut candidate = Candidate::new(session.next_id(), response.content, response.tokens);

            if let Err(flag) = self.filter.check(
                &candidate.raw_text,
                candidate.tokens.output,
                step.shape,
                snapshot.language,
            ) {
                debug!(candidate = candidate.id, flag = %flag, "candidate red-flagged");
                self.bus
                    .emit(PipelineEvent::sample_completed(candidate.tokens.output, Some(flag.to_string())));
                if session.reject(candidate, flag) >= self.config.rejection_limit() {
                    return self.finish(phase, session, Termination::BudgetExhausted);
                }
                continue;
            }
            self.bus.emit(PipelineEvent::sample_completed(candidate.tokens.output, None));
            session.samples += 1;

            // Classify against representatives in ascending group order;
            // the first YES wins. Group ids equal their vector index.
            let mut joined: Option<usize> = None;
            let mut interrupted = false;
            for idx in 0..session.groups.len() {
                if self.controls.is_cancelled() {
                    interrupted = true;
                    break;
                }
                let matches = judge
                    .equivalent(
                        &context_text,
                        &candidate.raw_text,
                        &session.groups[idx].representative.raw_text,
                    )
                    .await;
                if matches {
                    joined = Some(idx);
                    break;
                }
            }
            if interrupted {
                return self.finish(phase, session, self.cancel_termination());
            }

            let group_id = match joined {
                Some(id) => {
                    candidate.group_id = Some(id);
                    session.groups[id].members.push(candidate);
                    id
                }
                None => {
                    let id = session.groups.len();
                    candidate.group_id = Some(id);
                    session.groups.push(Group::new(id, candidate));
                    id
                }
            };

            let (top, runner_up) = session.top_two();
            self.bus.emit(PipelineEvent::candidate_grouped(
                group_id,
                session.groups[group_id].votes(),
                top.saturating_sub(runner_up),
            ));

            // The arriving candidate is classified before a pause parks
            // the vote; the park itself happens at the top of the loop.

            if top - runner_up >= self.config.k {
                return self.finish(phase, session, Termination::AheadByK);
            }
            if session.samples >= self.config.max_samples {
                return self.finish(phase, session, Termination::MaxSamples);
            }
        }
    }

    fn cancel_termination(&self) -> Termination {
        match self.controls.cancel_source() {
            Some(CancelSource::Budget) => Termination::BudgetExhausted,
            _ => Termination::Cancelled,
        }
    }

    fn halt_reason(&self) -> Option<Termination> {
        if self.controls.is_cancelled() {
            return Some(self.cancel_termination());
        }
        if self.resources.breached() {
            // One termination signal unwinds every nested vote.
            self.bus.emit(PipelineEvent::budget_alert(&self.resources.check().message, true));
            self.controls.cancel_for_budget();
            return Some(Termination::BudgetExhausted);
        }
        None
    }

    fn finish(&self, phase: &str, session: Session, terminated_by: Termination) -> VoteResult {
        let winner = session.plurality_leader().map(|g| g.representative.clone());
        let (top, runner_up) = session.top_two();
        let winning_margin = top.saturating_sub(runner_up);

        let result = VoteResult {
            winner,
            total_samples: session.samples,
            red_flagged: session.rejections,
            votes_per_group: session.groups.iter().map(|g| (g.id, g.votes())).collect(),
            winning_margin,
            terminated_by,
            tokens: session.tokens,
            elapsed: session.started.elapsed(),
            rejected: session.rejected,
            groups: session.groups,
        };

        self.bus.emit(PipelineEvent::vote_decided(
            phase,
            result.winner.as_ref().and_then(|w| w.group_id),
            result.total_samples,
            result.winning_margin,
            terminated_by.as_str(),
        ));
        info!(
            phase,
            samples = result.total_samples,
            red_flagged = result.red_flagged,
            groups = result.groups.len(),
            margin = result.winning_margin,
            terminated_by = terminated_by.as_str(),
            "vote finished"
        );
        result
    }
}

/// Per-vote bookkeeping
struct Session {
    started: Instant,
    groups: Vec<Group>,
    rejected: Vec<Candidate>,
    samples: usize,
    rejections: usize,
    tokens: TokenUsage,
    next_candidate_id: usize,
}

impl Session {
    fn new(started: Instant) -> Self {
        Self {
            started,
            groups: Vec::new(),
            rejected: Vec::new(),
            samples: 0,
            rejections: 0,
            tokens: TokenUsage::default(),
            next_candidate_id: 0,
        }
    }

    fn next_id(&mut self) -> usize {
        let id = self.next_candidate_id;
        self.next_candidate_id += 1;
        id
    }

    /// Record a rejection; returns the running rejection count.
    fn reject(&mut self, mut candidate: Candidate, flag: RedFlag) -> usize {
        candidate.red_flag = Some(flag);
        self.rejected.push(candidate);
        self.rejections += 1;
        self.rejections
    }

    /// Largest group, earliest-created on ties.
    fn plurality_leader(&self) -> Option<&Group> {
        let mut best: Option<&Group> = None;
        for group in &self.groups {
            match best {
                None => best = Some(group),
                Some(current) if group.votes() > current.votes() => best = Some(group),
                _ => {}
            }
        }
        best
    }

    /// Vote counts of the largest and second-largest groups.
    fn top_two(&self) -> (usize, usize) {
        let mut counts: Vec<usize> = self.groups.iter().map(Group::votes).collect();
        counts.sort_unstable_by(|a, b| b.cmp(a));
        let top = counts.first().copied().unwrap_or(0);
        let runner_up = counts.get(1).copied().unwrap_or(0);
        (top, runner_up)
    }
}
