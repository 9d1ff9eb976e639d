//! Cooperative Interrupts
//!
//! `pause`, `resume`, and `cancel` set flags that the voter observes at
//! its checkpoints: before each outbound LLM call and after each
//! candidate is classified. Pause parks the vote without dropping
//! in-flight work; cancel is a single signal that unwinds every nested
//! vote. A budget breach cancels with a distinct source so the pipeline
//! can end in Error rather than Idle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Who requested the cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    /// User-initiated; the pipeline returns to Idle
    User,
    /// Budget-initiated; the pipeline moves to Error
    Budget,
}

#[derive(Default)]
struct Flags {
    paused: AtomicBool,
    cancelled: AtomicBool,
    budget: AtomicBool,
    notify: Notify,
}

/// Shared interrupt state; clones observe the same flags.
#[derive(Clone, Default)]
pub struct InterruptHandler {
    flags: Arc<Flags>,
}

impl InterruptHandler {
    /// Create a fresh handler with no flags set
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pause at the next checkpoint
    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::SeqCst);
        info!("pause requested");
    }

    /// Clear the pause flag and wake parked votes
    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
        self.flags.notify.notify_waiters();
    }

    /// Request cancellation (user-initiated)
    pub fn cancel(&self) {
        self.flags.cancelled.store(true, Ordering::SeqCst);
        self.flags.notify.notify_waiters();
        info!("cancel requested");
    }

    /// Request cancellation on behalf of a breached budget
    pub fn cancel_for_budget(&self) {
        self.flags.budget.store(true, Ordering::SeqCst);
        self.flags.cancelled.store(true, Ordering::SeqCst);
        self.flags.notify.notify_waiters();
        info!("budget cancel requested");
    }

    /// Whether a pause is in effect
    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flags.cancelled.load(Ordering::SeqCst)
    }

    /// Source of the cancellation, when one was requested
    pub fn cancel_source(&self) -> Option<CancelSource> {
        if !self.is_cancelled() {
            None
        } else if self.flags.budget.load(Ordering::SeqCst) {
            Some(CancelSource::Budget)
        } else {
            Some(CancelSource::User)
        }
    }

    /// Park until resumed or cancelled. Returns immediately when not
    /// paused. Returns `true` when execution may continue, `false` when
    /// the park ended because of cancellation.
    pub async fn park_while_paused(&self) -> bool {
        loop {
            if self.is_cancelled() {
                return false;
            }
            if !self.is_paused() {
                return true;
            }
            // Arm the waiter before re-checking so a resume between the
            // check and the await cannot be missed.
            let notified = self.flags.notify.notified();
            if !self.is_paused() || self.is_cancelled() {
                continue;
            }
            notified.await;
        }
    }

    /// Clear all flags for a new run
    pub fn reset(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
        self.flags.cancelled.store(false, Ordering::SeqCst);
        self.flags.budget.store(false, Ordering::SeqCst);
        self.flags.notify.notify_waiters();
    }
}

impl std::fmt::Debug for InterruptHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandler")
            .field("paused", &self.is_paused())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
