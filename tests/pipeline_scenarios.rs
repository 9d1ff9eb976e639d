//! Full-pipeline scenarios: completion end to end, budget breach with
//! partial context preserved, nested sub-function generation, and
//! cancellation landing back in Idle.

use mdap::core::{BudgetConfig, Language, MdapConfig};
use mdap::llm::{LlmClient, LlmError, LlmResponse, TokenCost, TokenUsage};
use mdap::pipeline::{
    DecisionKind, FailureKind, InterruptHandler, Orchestrator, PipelineOutcome, PipelineState,
};
use mdap::core::Termination;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const EXPAND_ANSWER: &str = r#"["tasks can be added", "tasks can be completed"]"#;

const DECOMPOSE_ANSWER: &str = r#"[
  {"signature": "def add_task(tasks: list, title: str) -> dict",
   "description": "append a task", "dependencies": [], "requirements": [0]},
  {"signature": "def complete_task(tasks: list, task_id: int) -> bool",
   "description": "mark a task done", "dependencies": [], "requirements": [1]}
]"#;

const ADD_TASK_CODE: &str = "def add_task(tasks: list, title: str) -> dict:\n    task = {\"id\": len(tasks), \"title\": title}\n    tasks.append(task)\n    return task";

const COMPLETE_TASK_CODE: &str = "def complete_task(tasks: list, task_id: int) -> bool:\n    for task in tasks:\n        if task[\"id\"] == task_id:\n            task[\"done\"] = True\n            return True\n    return False";

const VALIDATE_ANSWER: &str = "VALID: yes\nERRORS: []\nWARNINGS: []";

/// Routes prompts by marker so the whole pipeline runs deterministically
/// offline. Optionally cancels the pipeline at a given call number.
struct RoutedClient {
    routes: Vec<(&'static str, String)>,
    calls: AtomicUsize,
    cancel_at_call: Mutex<Option<(usize, InterruptHandler)>>,
}

impl RoutedClient {
    fn new(routes: Vec<(&'static str, String)>) -> Self {
        Self { routes, calls: AtomicUsize::new(0), cancel_at_call: Mutex::new(None) }
    }

    fn standard() -> Self {
        // Needles for generation are anchored to the "Function to
        // implement" header: the snapshot context inside a prompt
        // mentions every planned function name.
        Self::new(vec![
            ("judging semantic equivalence", "YES".to_string()),
            ("JSON array of strings", EXPAND_ANSWER.to_string()),
            ("JSON array of objects", DECOMPOSE_ANSWER.to_string()),
            ("Respond in exactly this layout", VALIDATE_ANSWER.to_string()),
            ("Function to implement:\ndef add_task", ADD_TASK_CODE.to_string()),
            ("Function to implement:\ndef complete_task", COMPLETE_TASK_CODE.to_string()),
        ])
    }

    fn cancel_at(&self, call: usize, controls: InterruptHandler) {
        *self.cancel_at_call.lock().unwrap() = Some((call, controls));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for RoutedClient {
    fn complete(
        &self,
        prompt: &str,
        _temperature: f64,
        _max_tokens: usize,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + '_>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, controls)) = &*self.cancel_at_call.lock().unwrap() {
            if call == *at {
                controls.cancel();
            }
        }
        let content = self
            .routes
            .iter()
            .find(|(needle, _)| prompt.contains(needle))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| "def noop():\n    return None".to_string());
        Box::pin(async move {
            Ok(LlmResponse { content, tokens: TokenUsage::new(120, 60) })
        })
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }

    fn price(&self) -> TokenCost {
        TokenCost::new(0.001, 0.002)
    }
}

fn fast_config() -> MdapConfig {
    MdapConfig { k: 2, max_samples: 10, ..Default::default() }
}

// ==========================================
// Happy Path
// ==========================================

#[tokio::test]
async fn pipeline_completes_and_reports() {
    let client = Arc::new(RoutedClient::standard());
    let orchestrator = Orchestrator::new(client, fast_config());

    let outcome = orchestrator.run("build a todo list", Language::Python).await;

    let report = match outcome {
        PipelineOutcome::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other.exit_code()),
    };
    assert_eq!(orchestrator.state(), PipelineState::Completed);
    assert_eq!(report.requirements.len(), 2);
    assert_eq!(report.code.len(), 2);
    assert!(report.code.iter().any(|u| u.source.contains("tasks.append")));
    assert!(report.metrics.api_calls > 0);
    assert!(report.metrics.cost_usd > 0.0);
    // one vote per phase, plus one generate vote per function
    assert_eq!(report.metrics.iterations, 5);
}

#[tokio::test]
async fn report_document_keeps_its_contract() {
    let client = Arc::new(RoutedClient::standard());
    let orchestrator = Orchestrator::new(client, fast_config());

    let outcome = orchestrator.run("build a todo list", Language::Python).await;
    let PipelineOutcome::Completed(report) = outcome else {
        panic!("expected completion");
    };

    let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty()).unwrap();
    for field in ["task", "config", "requirements", "functions", "code", "metrics"] {
        assert!(json.get(field).is_some(), "missing field '{}'", field);
    }
    assert_eq!(json["task"], "build a todo list");
    assert_eq!(json["metrics"]["iterations"], 5);
}

#[tokio::test]
async fn decision_log_is_causal_and_complete() {
    let client = Arc::new(RoutedClient::standard());
    let orchestrator = Orchestrator::new(client, fast_config());

    let _ = orchestrator.run("build a todo list", Language::Python).await;

    let tracker = orchestrator.tracker();
    assert_eq!(tracker.vote_count(), 5);
    // every vote landed ahead-by-k under the unanimous mock
    for decision in tracker.last(100) {
        if let DecisionKind::Vote { terminated_by, winning_margin, .. } = decision.kind {
            assert_eq!(terminated_by, Termination::AheadByK);
            assert_eq!(winning_margin, 2);
        }
    }
    // transitions recorded in causal order
    let transitions: Vec<(PipelineState, PipelineState)> = tracker
        .last(100)
        .into_iter()
        .filter_map(|d| match d.kind {
            DecisionKind::Transition { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(transitions.first().copied(), Some((PipelineState::Idle, PipelineState::Expanding)));
    assert_eq!(
        transitions.last().copied(),
        Some((PipelineState::Validating, PipelineState::Completed))
    );
}

// ==========================================
// S5: Budget breach mid-pipeline
// ==========================================

#[tokio::test]
async fn s5_budget_breach_preserves_partial_context() {
    // Expand completes in 3 calls (2 samples + 1 equivalence check) at
    // 180 tokens each; the budget dies during decompose.
    let config = MdapConfig {
        k: 2,
        max_samples: 10,
        budget: BudgetConfig { max_tokens: Some(600), ..Default::default() },
        ..Default::default()
    };
    let client = Arc::new(RoutedClient::standard());
    let orchestrator = Orchestrator::new(client, config);

    let outcome = orchestrator.run("build a todo list", Language::Python).await;

    let PipelineOutcome::Failed(failure) = outcome else {
        panic!("expected a budget failure");
    };
    assert_eq!(failure.kind, FailureKind::Budget);
    assert!(!failure.recoverable);
    assert_eq!(failure.vote.as_ref().unwrap().terminated_by, Termination::BudgetExhausted);
    assert_eq!(orchestrator.state(), PipelineState::Error);

    // requirements from the completed EXPAND phase survive
    let partial = failure.partial.expect("partial context");
    assert_eq!(partial.requirements, vec!["tasks can be added", "tasks can be completed"]);
    assert!(partial.code.is_empty());
}

#[tokio::test]
async fn budget_failure_maps_to_exit_code_3() {
    let config = MdapConfig {
        k: 2,
        budget: BudgetConfig { max_tokens: Some(1), ..Default::default() },
        ..Default::default()
    };
    let client = Arc::new(RoutedClient::standard());
    let orchestrator = Orchestrator::new(client, config);

    let outcome = orchestrator.run("anything", Language::Python).await;
    assert_eq!(outcome.exit_code(), 3);
}

// ==========================================
// S6: Nested sub-function generation
// ==========================================

#[tokio::test]
async fn s6_missing_callee_is_synthesized_recursively() {
    let outer = "def add_task(tasks: list, title: str) -> dict:\n    task = make_task(title)\n    tasks.append(task)\n    return task";
    let helper = "def make_task(title: str) -> dict:\n    return {\"title\": title, \"done\": False}";
    let plan = r#"[
      {"signature": "def add_task(tasks: list, title: str) -> dict",
       "description": "append a task", "dependencies": [], "requirements": [0]}
    ]"#;

    let client = Arc::new(RoutedClient::new(vec![
        ("judging semantic equivalence", "YES".to_string()),
        ("JSON array of strings", r#"["tasks can be added"]"#.to_string()),
        ("JSON array of objects", plan.to_string()),
        ("Respond in exactly this layout", VALIDATE_ANSWER.to_string()),
        ("Function to implement:\ndef make_task", helper.to_string()),
        ("Function to implement:\ndef add_task", outer.to_string()),
    ]));
    let orchestrator = Orchestrator::new(client, fast_config());

    let outcome = orchestrator.run("build a todo list", Language::Python).await;

    let PipelineOutcome::Completed(report) = outcome else {
        panic!("expected completion");
    };
    // the outer function kept its winning code, and the helper was
    // generated and stored alongside it
    assert_eq!(report.code.len(), 2);
    assert!(report.code.iter().any(|u| u.source == outer));
    assert!(report.code.iter().any(|u| u.source == helper));
    assert!(report.functions.iter().any(|f| f.name() == "make_task"));
}

// ==========================================
// Cancellation
// ==========================================

#[tokio::test]
async fn cancel_mid_pipeline_lands_in_idle() {
    let client = Arc::new(RoutedClient::standard());
    let orchestrator = Orchestrator::new(client.clone(), fast_config());
    // cancel while the decompose vote is drawing samples
    client.cancel_at(5, orchestrator.controls().clone());

    let outcome = orchestrator.run("build a todo list", Language::Python).await;

    assert!(matches!(outcome, PipelineOutcome::Cancelled));
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(orchestrator.state(), PipelineState::Idle);

    // the decision log shows the cancelled vote
    let cancelled_votes = orchestrator
        .tracker()
        .last(100)
        .into_iter()
        .filter(|d| {
            matches!(
                d.kind,
                DecisionKind::Vote { terminated_by: Termination::Cancelled, .. }
            )
        })
        .count();
    assert_eq!(cancelled_votes, 1);
}

#[tokio::test]
async fn cancelled_pipeline_accepts_a_fresh_run() {
    let client = Arc::new(RoutedClient::standard());
    let orchestrator = Orchestrator::new(client.clone(), fast_config());
    client.cancel_at(2, orchestrator.controls().clone());

    let first = orchestrator.run("build a todo list", Language::Python).await;
    assert!(matches!(first, PipelineOutcome::Cancelled));
    let calls_after_cancel = client.calls();

    // flags are reset on the next run and it completes normally
    let second = orchestrator.run("build a todo list", Language::Python).await;
    assert!(matches!(second, PipelineOutcome::Completed(_)));
    assert!(client.calls() > calls_after_cancel);
}

// ==========================================
// Validation gating
// ==========================================

#[tokio::test]
async fn failed_validation_is_advisory_by_default() {
    let mut routes = RoutedClient::standard().routes;
    routes.retain(|(needle, _)| *needle != "Respond in exactly this layout");
    routes.insert(
        0,
        (
            "Respond in exactly this layout",
            "VALID: no\nERRORS:\n- add_task ignores duplicates\nWARNINGS: []".to_string(),
        ),
    );
    let client = Arc::new(RoutedClient::new(routes));
    let orchestrator = Orchestrator::new(client, fast_config());

    let outcome = orchestrator.run("build a todo list", Language::Python).await;
    assert!(matches!(outcome, PipelineOutcome::Completed(_)));
}

#[tokio::test]
async fn failed_validation_gates_when_configured() {
    let mut routes = RoutedClient::standard().routes;
    routes.retain(|(needle, _)| *needle != "Respond in exactly this layout");
    routes.insert(
        0,
        (
            "Respond in exactly this layout",
            "VALID: no\nERRORS:\n- broken\nWARNINGS: []".to_string(),
        ),
    );
    let client = Arc::new(RoutedClient::new(routes));
    let config = MdapConfig { gate_on_validation: true, ..fast_config() };
    let orchestrator = Orchestrator::new(client, config);

    let outcome = orchestrator.run("build a todo list", Language::Python).await;

    let PipelineOutcome::Failed(failure) = outcome else {
        panic!("expected a validation failure");
    };
    assert_eq!(failure.kind, FailureKind::Validation);
    assert!(failure.recoverable);
    assert_eq!(orchestrator.state(), PipelineState::Error);
}
