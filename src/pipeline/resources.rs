//! Resource Accounting
//!
//! One mutex-guarded set of monotonic counters shared by every component
//! that talks to the model: input/output tokens, API calls, wall time,
//! and an estimated cost derived from the static price table. Budgets
//! are optional hard limits with an 80% warning band.

use crate::core::config::BudgetConfig;
use crate::llm::anthropic::price_for_model;
use crate::llm::{TokenCost, TokenUsage};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Accumulated usage for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    /// Prompt tokens
    pub input_tokens: usize,
    /// Completion tokens
    pub output_tokens: usize,
    /// Calls issued (including failed ones)
    pub api_calls: usize,
    /// Wall-clock time since tracking started
    pub elapsed: Duration,
}

impl ResourceUsage {
    /// Total tokens, input + output
    pub fn total_tokens(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// Budget standing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Under 80% on every axis
    Ok,
    /// At or above 80% on some axis
    Warning,
    /// A hard limit is breached
    Exceeded,
}

/// Result of a budget check
#[derive(Debug, Clone)]
pub struct BudgetCheck {
    /// Standing
    pub status: BudgetStatus,
    /// Human-readable summary of the binding axis
    pub message: String,
    /// Percent of the token limit consumed (0 when unlimited)
    pub tokens_pct: f64,
    /// Percent of the cost limit consumed
    pub cost_pct: f64,
    /// Percent of the time limit consumed
    pub time_pct: f64,
}

#[derive(Default)]
struct Counters {
    input_tokens: usize,
    output_tokens: usize,
    api_calls: usize,
    per_call: Vec<TokenUsage>,
}

/// Shared, mutex-guarded resource tracker
pub struct ResourceManager {
    counters: Mutex<Counters>,
    started_at: Mutex<Option<Instant>>,
    budget: Mutex<BudgetConfig>,
    price: TokenCost,
}

impl ResourceManager {
    /// Create a manager priced for `model_id` with the given budget
    pub fn new(model_id: &str, budget: BudgetConfig) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started_at: Mutex::new(None),
            budget: Mutex::new(budget),
            price: price_for_model(model_id),
        }
    }

    /// Begin (or restart) wall-clock tracking
    pub fn start(&self) {
        *self.started_at.lock().expect("resource clock poisoned") = Some(Instant::now());
    }

    /// Record one API call's token usage. Failed calls record zero
    /// tokens but still count as a call.
    pub fn record(&self, usage: TokenUsage) {
        let mut counters = self.counters.lock().expect("resource counters poisoned");
        counters.input_tokens += usage.input;
        counters.output_tokens += usage.output;
        counters.api_calls += 1;
        counters.per_call.push(usage);
    }

    /// Current usage snapshot
    pub fn usage(&self) -> ResourceUsage {
        let counters = self.counters.lock().expect("resource counters poisoned");
        let elapsed = self
            .started_at
            .lock()
            .expect("resource clock poisoned")
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        ResourceUsage {
            input_tokens: counters.input_tokens,
            output_tokens: counters.output_tokens,
            api_calls: counters.api_calls,
            elapsed,
        }
    }

    /// Estimated cost of everything recorded so far, in USD
    pub fn estimated_cost(&self) -> f64 {
        let usage = self.usage();
        self.price.calculate(TokenUsage::new(usage.input_tokens, usage.output_tokens))
    }

    /// Replace one budget axis (CLI `budget <kind> <value>`)
    pub fn set_budget(&self, update: impl FnOnce(&mut BudgetConfig)) {
        update(&mut self.budget.lock().expect("budget poisoned"));
    }

    /// Current budget
    pub fn budget(&self) -> BudgetConfig {
        *self.budget.lock().expect("budget poisoned")
    }

    /// Check standing against the budget
    pub fn check(&self) -> BudgetCheck {
        let budget = self.budget();
        if budget.is_empty() {
            return BudgetCheck {
                status: BudgetStatus::Ok,
                message: "no budget set".to_string(),
                tokens_pct: 0.0,
                cost_pct: 0.0,
                time_pct: 0.0,
            };
        }

        let usage = self.usage();
        let tokens_pct = budget
            .max_tokens
            .map(|max| usage.total_tokens() as f64 / max as f64 * 100.0)
            .unwrap_or(0.0);
        let cost_pct = budget
            .max_cost_usd
            .map(|max| self.estimated_cost() / max * 100.0)
            .unwrap_or(0.0);
        let time_pct = budget
            .max_time_secs
            .map(|max| usage.elapsed.as_secs_f64() / max as f64 * 100.0)
            .unwrap_or(0.0);

        let max_pct = tokens_pct.max(cost_pct).max(time_pct);
        let axis = if max_pct == tokens_pct && budget.max_tokens.is_some() {
            "tokens"
        } else if max_pct == cost_pct && budget.max_cost_usd.is_some() {
            "cost"
        } else {
            "time"
        };

        let (status, message) = if max_pct >= 100.0 {
            (BudgetStatus::Exceeded, format!("budget exceeded: {} at {:.0}%", axis, max_pct))
        } else if max_pct >= 80.0 {
            (BudgetStatus::Warning, format!("approaching budget: {} at {:.0}%", axis, max_pct))
        } else {
            (BudgetStatus::Ok, format!("within budget ({:.0}% of {})", max_pct, axis))
        };

        BudgetCheck { status, message, tokens_pct, cost_pct, time_pct }
    }

    /// Whether any hard limit is breached
    pub fn breached(&self) -> bool {
        self.check().status == BudgetStatus::Exceeded
    }

    /// Estimate resources for `steps_left` more votes from per-call
    /// averages. Returns zero usage before any call has completed.
    pub fn estimate_remaining(&self, steps_left: usize) -> ResourceUsage {
        let counters = self.counters.lock().expect("resource counters poisoned");
        let calls = counters.per_call.len();
        if calls == 0 || steps_left == 0 {
            return ResourceUsage::default();
        }
        let avg_input = counters.input_tokens / calls;
        let avg_output = counters.output_tokens / calls;
        drop(counters);

        let elapsed = self.usage().elapsed;
        let avg_time = elapsed.div_f64(calls as f64);

        ResourceUsage {
            input_tokens: avg_input * steps_left,
            output_tokens: avg_output * steps_left,
            api_calls: steps_left,
            elapsed: avg_time.mul_f64(steps_left as f64),
        }
    }

    /// Multi-line usage summary for the CLI `resources` command
    pub fn summary(&self) -> String {
        let usage = self.usage();
        let check = self.check();
        let mut lines = vec![
            "Resource usage:".to_string(),
            format!(
                "  tokens: {} ({} in / {} out)",
                usage.total_tokens(),
                usage.input_tokens,
                usage.output_tokens
            ),
            format!("  api calls: {}", usage.api_calls),
            format!("  elapsed: {:.1}s", usage.elapsed.as_secs_f64()),
            format!("  estimated cost: ${:.4}", self.estimated_cost()),
            format!("  budget: {}", check.message),
        ];
        let budget = self.budget();
        if let Some(max) = budget.max_tokens {
            lines.push(format!("    tokens {}/{} ({:.0}%)", usage.total_tokens(), max, check.tokens_pct));
        }
        if let Some(max) = budget.max_cost_usd {
            lines.push(format!("    cost ${:.4}/${:.4} ({:.0}%)", self.estimated_cost(), max, check.cost_pct));
        }
        if let Some(max) = budget.max_time_secs {
            lines.push(format!("    time {:.1}s/{}s ({:.0}%)", usage.elapsed.as_secs_f64(), max, check.time_pct));
        }
        lines.join("\n")
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let usage = self.usage();
        f.debug_struct("ResourceManager")
            .field("tokens", &usage.total_tokens())
            .field("api_calls", &usage.api_calls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(budget: BudgetConfig) -> ResourceManager {
        ResourceManager::new("claude-3-haiku-20240307", budget)
    }

    // ==========================================
    // Counter Tests
    // ==========================================

    #[test]
    fn test_record_accumulates() {
        let manager = manager_with(BudgetConfig::default());
        manager.record(TokenUsage::new(100, 50));
        manager.record(TokenUsage::new(20, 10));

        let usage = manager.usage();
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 60);
        assert_eq!(usage.api_calls, 2);
    }

    #[test]
    fn test_failed_call_counts_with_zero_tokens() {
        let manager = manager_with(BudgetConfig::default());
        manager.record(TokenUsage::default());
        assert_eq!(manager.usage().api_calls, 1);
        assert_eq!(manager.usage().total_tokens(), 0);
    }

    #[test]
    fn test_cost_uses_price_table() {
        let manager = manager_with(BudgetConfig::default());
        manager.record(TokenUsage::new(1000, 1000));
        // haiku: 0.00025 + 0.00125 per 1K
        assert!((manager.estimated_cost() - 0.0015).abs() < 1e-10);
    }

    // ==========================================
    // Budget Tests
    // ==========================================

    #[test]
    fn test_no_budget_is_always_ok() {
        let manager = manager_with(BudgetConfig::default());
        manager.record(TokenUsage::new(1_000_000, 1_000_000));
        assert_eq!(manager.check().status, BudgetStatus::Ok);
        assert!(!manager.breached());
    }

    #[test]
    fn test_warning_band_at_80_percent() {
        let manager = manager_with(BudgetConfig { max_tokens: Some(100), ..Default::default() });
        manager.record(TokenUsage::new(50, 30));
        let check = manager.check();
        assert_eq!(check.status, BudgetStatus::Warning);
        assert!((check.tokens_pct - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_token_budget_breach() {
        let manager = manager_with(BudgetConfig { max_tokens: Some(100), ..Default::default() });
        manager.record(TokenUsage::new(80, 30));
        assert_eq!(manager.check().status, BudgetStatus::Exceeded);
        assert!(manager.breached());
        assert!(manager.check().message.contains("tokens"));
    }

    #[test]
    fn test_cost_budget_breach() {
        let manager = manager_with(BudgetConfig { max_cost_usd: Some(0.001), ..Default::default() });
        manager.record(TokenUsage::new(4000, 4000)); // haiku: 0.006 USD
        assert!(manager.breached());
    }

    #[test]
    fn test_set_budget_mid_run() {
        let manager = manager_with(BudgetConfig::default());
        manager.record(TokenUsage::new(500, 500));
        assert!(!manager.breached());
        manager.set_budget(|b| b.max_tokens = Some(100));
        assert!(manager.breached());
    }

    // ==========================================
    // Estimation Tests
    // ==========================================

    #[test]
    fn test_estimate_remaining_from_averages() {
        let manager = manager_with(BudgetConfig::default());
        manager.start();
        manager.record(TokenUsage::new(100, 60));
        manager.record(TokenUsage::new(300, 140));

        let estimate = manager.estimate_remaining(3);
        assert_eq!(estimate.api_calls, 3);
        assert_eq!(estimate.input_tokens, 600); // avg 200 * 3
        assert_eq!(estimate.output_tokens, 300); // avg 100 * 3
    }

    #[test]
    fn test_estimate_remaining_empty_history() {
        let manager = manager_with(BudgetConfig::default());
        assert_eq!(manager.estimate_remaining(10), ResourceUsage::default());
    }

    #[test]
    fn test_summary_mentions_budget_axes() {
        let manager = manager_with(BudgetConfig {
            max_tokens: Some(1000),
            max_cost_usd: Some(1.0),
            ..Default::default()
        });
        manager.record(TokenUsage::new(100, 100));
        let summary = manager.summary();
        assert!(summary.contains("tokens 200/1000"));
        assert!(summary.contains("estimated cost"));
    }
}
