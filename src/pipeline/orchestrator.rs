//! Pipeline Orchestrator
//!
//! Drives the four phases over the state machine and is the only writer
//! of the [`Context`]. Phases read immutable snapshots; winning outputs
//! are folded back in here, between votes. All failures come back as a
//! [`PipelineOutcome`] value; nothing escapes the run as a panic.

use crate::core::config::MdapConfig;
use crate::core::context::{Context, ContextSnapshot, Language};
use crate::core::step::FunctionRecord;
use crate::core::voter::{Termination, VoteResult, Voter};
use crate::events::{EventBus, PipelineEvent};
use crate::llm::anthropic::price_for_model;
use crate::llm::LlmClient;
use crate::phases::generate::missing_functions;
use crate::phases::{DecomposePhase, ExpandPhase, GeneratePhase, ValidatePhase};
use crate::pipeline::interrupts::InterruptHandler;
use crate::pipeline::report::RunReport;
use crate::pipeline::resources::ResourceManager;
use crate::pipeline::state::{PipelineState, StateEvent, StateMachine, TransitionError};
use crate::pipeline::tracker::{DecisionPhase, DecisionTracker};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// What kind of failure ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A hard resource limit was exhausted
    Budget,
    /// A vote could not produce a usable winner
    Vote,
    /// Validation failed and the run was configured to gate on it
    Validation,
    /// The pipeline was driven with an illegal transition
    StateMachine,
}

impl FailureKind {
    /// Lowercase name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Budget => "budget",
            FailureKind::Vote => "vote",
            FailureKind::Validation => "validation",
            FailureKind::StateMachine => "state_machine",
        }
    }
}

/// The single user-visible failure surface
#[derive(Debug, Clone)]
pub struct PipelineFailure {
    /// Failure class
    pub kind: FailureKind,
    /// What happened
    pub message: String,
    /// Whether a retry without reconfiguration could succeed
    pub recoverable: bool,
    /// The vote that produced the failure, when there was one
    pub vote: Option<VoteResult>,
    /// Context accumulated before the failure
    pub partial: Option<ContextSnapshot>,
}

/// How a run ended
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Completed; carries the persisted report
    Completed(Box<RunReport>),
    /// Cancelled by the user; the pipeline returned to Idle
    Cancelled,
    /// Failed; the pipeline is in Error
    Failed(PipelineFailure),
}

impl PipelineOutcome {
    /// Process exit code: 0 completed, 1 error, 2 user cancel, 3 budget
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineOutcome::Completed(_) => 0,
            PipelineOutcome::Cancelled => 2,
            PipelineOutcome::Failed(failure) if failure.kind == FailureKind::Budget => 3,
            PipelineOutcome::Failed(_) => 1,
        }
    }
}

/// Shared progress counters for status queries while a run is active
#[derive(Debug, Clone, Default)]
struct Progress {
    task: String,
    requirements: usize,
    functions_planned: usize,
    functions_done: usize,
    validation_passed: Option<bool>,
    detail: String,
}

/// The pipeline driver
pub struct Orchestrator {
    client: Arc<dyn LlmClient>,
    config: MdapConfig,
    machine: Arc<Mutex<StateMachine>>,
    tracker: Arc<DecisionTracker>,
    resources: Arc<ResourceManager>,
    controls: InterruptHandler,
    bus: EventBus,
    progress: Arc<Mutex<Progress>>,
}

impl Orchestrator {
    /// Create an orchestrator over `client` with `config`.
    pub fn new(client: Arc<dyn LlmClient>, config: MdapConfig) -> Self {
        let resources = Arc::new(ResourceManager::new(&config.model_id, config.budget));
        Self {
            client,
            config,
            machine: Arc::new(Mutex::new(StateMachine::new())),
            tracker: Arc::new(DecisionTracker::new()),
            resources,
            controls: InterruptHandler::new(),
            bus: EventBus::default(),
            progress: Arc::new(Mutex::new(Progress::default())),
        }
    }

    /// Interrupt handles (pause/resume/cancel flags)
    pub fn controls(&self) -> &InterruptHandler {
        &self.controls
    }

    /// The decision log
    pub fn tracker(&self) -> &Arc<DecisionTracker> {
        &self.tracker
    }

    /// The resource counters
    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// The observability bus
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Current pipeline state
    pub fn state(&self) -> PipelineState {
        self.machine.lock().expect("state machine poisoned").current()
    }

    /// Pause at the next cooperative checkpoint. Returns whether the
    /// transition was accepted.
    pub fn pause(&self) -> bool {
        if self.transition(StateEvent::Pause, "paused by user").is_ok() {
            self.controls.pause();
            true
        } else {
            false
        }
    }

    /// Resume a paused pipeline.
    pub fn resume(&self) -> bool {
        if self.transition(StateEvent::Resume, "resumed by user").is_ok() {
            self.controls.resume();
            true
        } else {
            false
        }
    }

    /// Cancel the run. The active vote unwinds cooperatively; the state
    /// machine moves to Idle immediately.
    pub fn cancel(&self) -> bool {
        if self.transition(StateEvent::Cancel, "cancelled by user").is_ok() {
            self.controls.cancel();
            true
        } else {
            false
        }
    }

    /// One-line + detail status text for the CLI.
    pub fn status(&self) -> String {
        let state = self.state();
        let progress = self.progress.lock().expect("progress poisoned").clone();
        let usage = self.resources.usage();
        let mut lines = vec![
            format!("state: {}", state),
            format!("task: {}", if progress.task.is_empty() { "(none)" } else { progress.task.as_str() }),
            format!(
                "progress: {} requirements, {}/{} functions implemented",
                progress.requirements, progress.functions_done, progress.functions_planned
            ),
            format!("elapsed: {:.1}s, api calls: {}", usage.elapsed.as_secs_f64(), usage.api_calls),
        ];
        if let Some(passed) = progress.validation_passed {
            lines.push(format!("validation: {}", if passed { "passed" } else { "failed" }));
        }
        if !progress.detail.is_empty() {
            lines.push(format!("detail: {}", progress.detail));
        }
        lines.join("\n")
    }

    /// Explain what the pipeline is doing right now.
    pub fn explain_current(&self) -> String {
        let progress = self.progress.lock().expect("progress poisoned").clone();
        match self.state() {
            PipelineState::Idle => "waiting for a task; use 'run <task>' to start".to_string(),
            PipelineState::Expanding => format!(
                "expanding the task into atomic requirements ({} found so far)",
                progress.requirements
            ),
            PipelineState::Decomposing => format!(
                "organizing {} requirements into functions",
                progress.requirements
            ),
            PipelineState::Generating => format!(
                "implementing functions ({}/{} done); each implementation is voted on",
                progress.functions_done, progress.functions_planned
            ),
            PipelineState::Validating => "reviewing the generated code".to_string(),
            PipelineState::Paused => {
                let target = self
                    .machine
                    .lock()
                    .expect("state machine poisoned")
                    .resume_target()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                format!("paused (was {}); use 'resume' to continue or 'cancel' to stop", target)
            }
            PipelineState::AwaitingDecision => "waiting for your decision at a checkpoint".to_string(),
            PipelineState::Completed => format!(
                "completed: {} requirements, {} functions implemented",
                progress.requirements, progress.functions_done
            ),
            PipelineState::Error => "failed; see the last decisions for details".to_string(),
        }
    }

    /// Run the full pipeline for `task`.
    pub async fn run(&self, task: &str, language: Language) -> PipelineOutcome {
        if let Err(err) = self.transition(StateEvent::Start, &format!("start: {}", task)) {
            return PipelineOutcome::Failed(PipelineFailure {
                kind: FailureKind::StateMachine,
                message: err.to_string(),
                recoverable: true,
                vote: None,
                partial: None,
            });
        }

        self.controls.reset();
        self.resources.start();
        {
            let mut progress = self.progress.lock().expect("progress poisoned");
            *progress = Progress { task: task.to_string(), ..Default::default() };
        }

        let mut context = Context::new(task, language);
        let voter = Voter::new(
            self.client.clone(),
            self.config.clone(),
            self.controls.clone(),
            self.resources.clone(),
            self.bus.clone(),
        );

        // EXPAND
        let expand = ExpandPhase::new(self.client.clone(), self.config.clone());
        let outcome = expand.execute(&voter, &context.snapshot()).await;
        self.record_vote(DecisionPhase::Expand, &outcome.step.description, &outcome.vote);
        context.record_step(outcome.step);
        if let Err(stop) = self.gate(&context, &outcome.vote) {
            return stop;
        }
        if outcome.requirements.is_empty() {
            return self.fail_vote(&context, outcome.vote, "expand produced no requirements");
        }
        for requirement in &outcome.requirements {
            context.push_requirement(requirement);
        }
        self.update_progress(|p| p.requirements = context.requirements.len());
        if let Err(err) = self.transition(StateEvent::ExpandDone, "requirements expanded") {
            return self.fail_machine(&context, err);
        }

        // DECOMPOSE
        let decompose = DecomposePhase::new(self.client.clone(), self.config.clone());
        let outcome = decompose.execute(&voter, &context.snapshot()).await;
        self.record_vote(DecisionPhase::Decompose, &outcome.step.description, &outcome.vote);
        context.record_step(outcome.step);
        if let Err(stop) = self.gate(&context, &outcome.vote) {
            return stop;
        }
        if outcome.functions.is_empty() {
            return self.fail_vote(&context, outcome.vote, "decompose produced no functions");
        }
        for function in outcome.functions {
            context.push_function(function);
        }
        self.update_progress(|p| p.functions_planned = context.functions.len());
        if let Err(err) = self.transition(StateEvent::DecomposeDone, "functions planned") {
            return self.fail_machine(&context, err);
        }

        // GENERATE, with the nested sub-function pass per function
        let generate = GeneratePhase::new(self.client.clone(), self.config.clone());
        let mut known: HashSet<String> =
            context.functions.iter().map(|f| f.name().to_string()).collect();
        for record in context.functions.clone() {
            let mut frontier = HashSet::new();
            if let Err(stop) = self
                .generate_one(&voter, &generate, &mut context, record, &mut known, &mut frontier)
                .await
            {
                return stop;
            }
        }
        if let Err(err) = self.transition(StateEvent::GenerateDoneAll, "all functions implemented") {
            return self.fail_machine(&context, err);
        }

        // VALIDATE (advisory unless configured to gate)
        let validate = ValidatePhase::new(self.client.clone(), self.config.clone());
        let outcome = validate.execute(&voter, &context.snapshot()).await;
        self.record_vote(DecisionPhase::Validate, &outcome.step.description, &outcome.vote);
        context.record_step(outcome.step);
        if let Err(stop) = self.gate(&context, &outcome.vote) {
            return stop;
        }
        self.update_progress(|p| p.validation_passed = Some(outcome.report.valid));
        if !outcome.report.valid {
            warn!(errors = outcome.report.errors.len(), "validation reported problems");
            if self.config.gate_on_validation {
                let _ = self.transition(StateEvent::Fail, "validation gate failed");
                return PipelineOutcome::Failed(PipelineFailure {
                    kind: FailureKind::Validation,
                    message: format!(
                        "validation failed: {}",
                        outcome.report.errors.join("; ")
                    ),
                    recoverable: true,
                    vote: Some(outcome.vote),
                    partial: Some(context.snapshot()),
                });
            }
        }
        if let Err(err) = self.transition(StateEvent::ValidateDone, "pipeline complete") {
            return self.fail_machine(&context, err);
        }

        let report =
            RunReport::assemble(&context, &self.config, &self.tracker, &self.resources);
        info!(
            requirements = report.requirements.len(),
            functions = report.functions.len(),
            cost_usd = report.metrics.cost_usd,
            "pipeline completed"
        );
        PipelineOutcome::Completed(Box::new(report))
    }

    /// Generate `record`, then recursively synthesize any functions its
    /// winning code calls but nothing defines. `frontier` blocks
    /// re-entry on a signature within this generation stack; `depth` is
    /// bounded by `max_depth`.
    fn generate_one<'a>(
        &'a self,
        voter: &'a Voter,
        phase: &'a GeneratePhase,
        context: &'a mut Context,
        record: FunctionRecord,
        known: &'a mut HashSet<String>,
        frontier: &'a mut HashSet<String>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PipelineOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let name = record.name().to_string();
            if frontier.contains(&name) || context.code_for(&record.signature).is_some() {
                return Ok(());
            }
            frontier.insert(name.clone());
            self.update_progress(|p| p.detail = format!("generating {}", name));

            let outcome = phase.execute(voter, &context.snapshot(), &record).await;
            self.record_vote(DecisionPhase::Generate, &outcome.step.description, &outcome.vote);
            context.record_step(outcome.step);
            self.gate(context, &outcome.vote)?;
            if outcome.code.is_empty() {
                return Err(self.fail_vote(
                    context,
                    outcome.vote,
                    &format!("generate produced no code for {}", name),
                ));
            }

            context.set_code(&record.signature, &outcome.code);
            known.insert(name.clone());
            self.update_progress(|p| p.functions_done += 1);

            for missing in missing_functions(&outcome.code, context.language, known) {
                if context.depth >= self.config.max_depth {
                    warn!(function = %missing, depth = context.depth, "max depth reached, not synthesizing");
                    continue;
                }
                let helper = FunctionRecord {
                    signature: match context.language {
                        Language::Python => format!("def {}(...)", missing),
                        Language::Typescript => format!("function {}(...)", missing),
                    },
                    description: format!("helper '{}' required by '{}'", missing, name),
                    dependencies: Vec::new(),
                    requirement_ids: Vec::new(),
                };
                context.push_function(helper.clone());
                known.insert(missing.clone());
                self.update_progress(|p| p.functions_planned += 1);

                context.depth += 1;
                let result = self
                    .generate_one(voter, phase, context, helper, known, frontier)
                    .await;
                context.depth -= 1;
                result?;
            }
            Ok(())
        })
    }

    /// Map a vote termination to control flow: proceed, or stop the run.
    fn gate(&self, context: &Context, vote: &VoteResult) -> Result<(), PipelineOutcome> {
        match vote.terminated_by {
            Termination::AheadByK => Ok(()),
            Termination::MaxSamples => {
                // Plurality winner, flagged in the decision log; usable.
                if vote.winner.is_some() {
                    Ok(())
                } else {
                    Err(self.fail_vote(context, vote.clone(), "vote exhausted with no candidates"))
                }
            }
            Termination::Cancelled => {
                // The CLI path usually moved the machine to Idle already;
                // applying again from Idle is a no-op transition.
                let _ = self.transition(StateEvent::Cancel, "vote cancelled");
                info!("pipeline cancelled, context unchanged for this vote");
                Err(PipelineOutcome::Cancelled)
            }
            Termination::BudgetExhausted => {
                let message = if self.resources.breached() {
                    self.resources.check().message
                } else {
                    format!(
                        "red-flag rejection limit reached ({} rejections)",
                        vote.red_flagged
                    )
                };
                let _ = self.transition(StateEvent::Fail, &message);
                error!(%message, "budget exhausted");
                Err(PipelineOutcome::Failed(PipelineFailure {
                    kind: FailureKind::Budget,
                    message,
                    recoverable: false,
                    vote: Some(vote.clone()),
                    partial: Some(context.snapshot()),
                }))
            }
        }
    }

    fn fail_vote(&self, context: &Context, vote: VoteResult, message: &str) -> PipelineOutcome {
        let _ = self.transition(StateEvent::Fail, message);
        error!(%message, "vote failure");
        PipelineOutcome::Failed(PipelineFailure {
            kind: FailureKind::Vote,
            message: message.to_string(),
            recoverable: true,
            vote: Some(vote),
            partial: Some(context.snapshot()),
        })
    }

    fn fail_machine(&self, context: &Context, err: TransitionError) -> PipelineOutcome {
        PipelineOutcome::Failed(PipelineFailure {
            kind: FailureKind::StateMachine,
            message: err.to_string(),
            recoverable: true,
            vote: None,
            partial: Some(context.snapshot()),
        })
    }

    /// Apply a state event, recording acceptance or rejection.
    fn transition(&self, event: StateEvent, reason: &str) -> Result<PipelineState, TransitionError> {
        let mut machine = self.machine.lock().expect("state machine poisoned");
        let from = machine.current();
        match machine.apply(event, reason) {
            Ok(to) => {
                drop(machine);
                self.tracker.record_transition(from, to, reason);
                self.bus.emit(PipelineEvent::state_changed(from.as_str(), to.as_str(), reason));
                Ok(to)
            }
            Err(err) => {
                drop(machine);
                self.tracker.record_rejected_transition(from, event.as_str());
                Err(err)
            }
        }
    }

    fn record_vote(&self, phase: DecisionPhase, description: &str, vote: &VoteResult) {
        let rationale = match vote.terminated_by {
            Termination::AheadByK => format!(
                "winning group led by {} (k = {})",
                vote.winning_margin, self.config.k
            ),
            Termination::MaxSamples => format!(
                "sample cap {} reached; plurality winner with margin {}",
                self.config.max_samples, vote.winning_margin
            ),
            Termination::Cancelled => "vote cancelled before a winner emerged".to_string(),
            Termination::BudgetExhausted => "terminated by exhausted budget".to_string(),
        };
        let cost = price_for_model(&self.config.model_id).calculate(vote.tokens);
        self.tracker.record_vote(
            phase,
            description,
            &rationale,
            vote.winning_margin,
            vote.total_samples,
            vote.red_flagged,
            vote.groups.len(),
            vote.terminated_by,
            vote.tokens,
            cost,
        );
    }

    fn update_progress(&self, update: impl FnOnce(&mut Progress)) {
        update(&mut self.progress.lock().expect("progress poisoned"));
    }
}
