use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured interpretation of an utterance. Opaque to the pipeline:
/// whatever the interpreter emits is handed to the planner unchanged.
pub type Intent = serde_json::Value;

/// One executable step: a target capability and its argument payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub capability: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl PlanStep {
    pub fn new(capability: &str, args: serde_json::Value) -> Self {
        Self {
            capability: capability.to_string(),
            args,
        }
    }
}

/// Ordered steps derived from an intent. Never mutated after the planner
/// produces it; policy and execution only read or wrap it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(goal: &str, steps: Vec<PlanStep>) -> Self {
        Self {
            goal: goal.to_string(),
            steps,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Policy's answer as it travels between modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum PolicyDecision {
    Approved,
    RequiresConfirmation { reason: String },
    Blocked { reason: String },
}

impl PolicyDecision {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Pair the decision with the plan it was made about.
    pub fn into_verdict(self, plan: Plan) -> Verdict {
        match self {
            PolicyDecision::Approved => Verdict::Approved(plan),
            PolicyDecision::RequiresConfirmation { reason } => Verdict::RequiresConfirmation(plan, reason),
            PolicyDecision::Blocked { reason } => Verdict::Blocked(reason),
        }
    }
}

/// Policy decision bound to a plan. `Blocked` never carries one.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Approved(Plan),
    RequiresConfirmation(Plan, String),
    Blocked(String),
}

/// A plan awaiting human approval.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub id: String,
    pub plan: Plan,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(plan: Plan, reason: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            plan,
            reason: reason.to_string(),
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// What the executor reports for a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub success: bool,
    #[serde(default)]
    pub output: String,
}

impl StepReport {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub capability: String,
    pub success: bool,
    pub output: String,
}

/// Result of a completed or cancelled pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub text: String,
    pub step_results: Vec<StepResult>,
}

impl Outcome {
    /// Build an outcome from step results with a success/fail tally.
    pub fn from_steps(goal: &str, step_results: Vec<StepResult>) -> Self {
        let succeeded = step_results.iter().filter(|s| s.success).count();
        let failed = step_results.len() - succeeded;
        let success = failed == 0;
        let mut text = if goal.is_empty() {
            format!("Executed {} step(s): {} succeeded, {} failed.", step_results.len(), succeeded, failed)
        } else {
            format!(
                "{}: executed {} step(s), {} succeeded, {} failed.",
                goal,
                step_results.len(),
                succeeded,
                failed
            )
        };
        for step in &step_results {
            let mark = if step.success { "ok" } else { "failed" };
            text.push_str(&format!("\n  {}. {} [{}] {}", step.index + 1, step.capability, mark, step.output));
        }
        Self {
            success,
            text,
            step_results,
        }
    }

    pub fn cancelled(reason: &str) -> Self {
        Self {
            success: false,
            text: format!("Action cancelled: {}", reason),
            step_results: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    AwaitingConfirmation,
    Blocked,
    Error,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Completed => write!(f, "completed"),
            PipelineStatus::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            PipelineStatus::Blocked => write!(f, "blocked"),
            PipelineStatus::Error => write!(f, "error"),
        }
    }
}

/// Caller-facing result of `submit` / `resolve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl PipelineResult {
    pub fn completed(outcome: Outcome) -> Self {
        Self {
            status: PipelineStatus::Completed,
            text: outcome.text.clone(),
            outcome: Some(outcome),
        }
    }

    pub fn awaiting(text: impl Into<String>) -> Self {
        Self {
            status: PipelineStatus::AwaitingConfirmation,
            text: text.into(),
            outcome: None,
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            status: PipelineStatus::Blocked,
            text: reason.into(),
            outcome: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            status: PipelineStatus::Error,
            text: text.into(),
            outcome: None,
        }
    }

    /// Plain informational reply with no run behind it.
    pub fn notice(text: impl Into<String>) -> Self {
        Self {
            status: PipelineStatus::Completed,
            text: text.into(),
            outcome: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.success)
    }
}
