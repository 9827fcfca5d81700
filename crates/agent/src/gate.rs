use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use keystone_core::{Outcome, PendingAction, PipelineResult, Plan};
use tracing::{debug, info, warn};

use crate::pipeline::PlanRunner;

pub const NOTHING_PENDING: &str = "(nothing pending)";

/// What a resolution found in the slot. The slot is already empty by the
/// time a caller sees this.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    NothingPending,
    Expired(PendingAction),
    Ready(PendingAction),
}

/// Holds at most one plan awaiting a human yes/no.
///
/// Expiry is checked when the slot is touched; there is no timer. Hosts
/// that want proactive cleanup call `sweep` on their own schedule.
#[derive(Default)]
pub struct PendingActionGate {
    slot: Mutex<Option<PendingAction>>,
}

impl PendingActionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingAction>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a plan for confirmation, discarding whatever was queued before.
    pub fn open(&self, plan: Plan, reason: &str, ttl: chrono::Duration) -> PendingAction {
        self.open_at(plan, reason, ttl, Utc::now())
    }

    pub fn open_at(&self, plan: Plan, reason: &str, ttl: chrono::Duration, now: DateTime<Utc>) -> PendingAction {
        let action = PendingAction::new(plan, reason, now, ttl);
        let replaced = self.lock().replace(action.clone());
        if let Some(old) = replaced {
            debug!(discarded = %old.id, "Pending action overwritten");
        }
        info!(id = %action.id, expires_at = %action.expires_at, reason = %reason, "Pending action opened");
        action
    }

    /// Empty the slot and report what was in it.
    pub fn take_at(&self, now: DateTime<Utc>) -> Resolution {
        match self.lock().take() {
            None => Resolution::NothingPending,
            Some(action) if action.is_expired(now) => {
                info!(id = %action.id, "Pending action expired");
                Resolution::Expired(action)
            }
            Some(action) => Resolution::Ready(action),
        }
    }

    pub async fn approve(&self, runner: &PlanRunner) -> PipelineResult {
        self.approve_at(runner, Utc::now()).await
    }

    /// Execute the pending plan exactly once, unless it has expired.
    pub async fn approve_at(&self, runner: &PlanRunner, now: DateTime<Utc>) -> PipelineResult {
        match self.take_at(now) {
            Resolution::NothingPending => PipelineResult::notice(NOTHING_PENDING),
            Resolution::Expired(action) => expired(&action),
            Resolution::Ready(action) => {
                info!(id = %action.id, steps = action.plan.steps.len(), "Pending action approved");
                let outcome = runner.run(&action.plan).await;
                PipelineResult::completed(outcome)
            }
        }
    }

    pub fn deny(&self) -> PipelineResult {
        self.deny_at(Utc::now())
    }

    pub fn deny_at(&self, now: DateTime<Utc>) -> PipelineResult {
        match self.take_at(now) {
            Resolution::NothingPending => PipelineResult::notice(NOTHING_PENDING),
            Resolution::Expired(action) => expired(&action),
            Resolution::Ready(action) => {
                info!(id = %action.id, "Pending action denied");
                let what = if action.plan.goal.is_empty() {
                    action.reason.as_str()
                } else {
                    action.plan.goal.as_str()
                };
                PipelineResult::completed(Outcome::cancelled(what))
            }
        }
    }

    pub fn sweep(&self) -> bool {
        self.sweep_at(Utc::now())
    }

    /// Clear the slot if its action has expired. Idempotent.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|a| a.is_expired(now)) {
            if let Some(action) = slot.take() {
                debug!(id = %action.id, "Swept expired pending action");
            }
            true
        } else {
            false
        }
    }

    /// Snapshot of the slot, without resolving it.
    pub fn pending(&self) -> Option<PendingAction> {
        self.lock().clone()
    }
}

fn expired(action: &PendingAction) -> PipelineResult {
    warn!(id = %action.id, "Approval arrived after expiry, nothing executed");
    PipelineResult::error(format!(
        "pending action expired at {}; nothing was executed",
        action.expires_at.format("%H:%M:%S")
    ))
}
