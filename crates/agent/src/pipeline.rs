use std::fmt;
use std::sync::Arc;

use keystone_core::{
    Outcome, PendingAction, Plan, PipelineResult, PipelineStatus, PolicyDecision, StepReport, StepResult, Verdict,
};
use keystone_modules::{module_candidates, CommandDispatcher, Dispatch};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::gate::PendingActionGate;
use crate::recall::RecallStore;

pub const INTERPRETER: &str = "Interpreter";
pub const PLANNER: &str = "Planner";
pub const POLICY: &str = "Policy";
pub const EXECUTOR: &str = "Executor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Interpreting,
    Planning,
    PolicyCheck,
    Executing,
    AwaitingConfirmation,
    Blocked,
    Completed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Interpreting => "interpreting",
            PipelineStage::Planning => "planning",
            PipelineStage::PolicyCheck => "policy_check",
            PipelineStage::Executing => "executing",
            PipelineStage::AwaitingConfirmation => "awaiting_confirmation",
            PipelineStage::Blocked => "blocked",
            PipelineStage::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

/// Sends plan steps to the Executor module one at a time.
#[derive(Clone)]
pub struct PlanRunner {
    dispatcher: CommandDispatcher,
}

impl PlanRunner {
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Run every step in order. A failed step is recorded and the next one
    /// still runs.
    pub async fn run(&self, plan: &Plan) -> Outcome {
        let candidates = module_candidates(EXECUTOR);
        let mut results = Vec::with_capacity(plan.steps.len());

        for (index, step) in plan.steps.iter().enumerate() {
            let payload = serde_json::to_string(step).unwrap_or_default();
            let dispatch = self.dispatcher.dispatch_with_fallback(&candidates, &payload).await;

            let report = match dispatch {
                Dispatch::Answered(text) => serde_json::from_str::<StepReport>(&text)
                    .unwrap_or_else(|_| StepReport::ok(text)),
                Dispatch::Failed(diag) | Dispatch::TimedOut(diag) => StepReport::failed(diag),
                Dispatch::Empty => StepReport::failed("executor returned no result"),
                Dispatch::NotFound => StepReport::failed("no executor registered"),
                Dispatch::Disabled => StepReport::failed("executor is disabled"),
            };

            let output = if report.success {
                report.output
            } else {
                let err = PipelineError::StepExecution {
                    index: index + 1,
                    capability: step.capability.clone(),
                    detail: report.output,
                };
                warn!(step = index + 1, capability = %step.capability, error = %err, "Plan step failed");
                err.to_string()
            };

            debug!(step = index + 1, capability = %step.capability, success = report.success, "Plan step finished");
            results.push(StepResult {
                index,
                capability: step.capability.clone(),
                success: report.success,
                output,
            });
        }

        Outcome::from_steps(&plan.goal, results)
    }
}

/// Interpret, plan, policy-check and execute a single utterance, with a
/// confirmation gate for plans that need a human yes/no.
pub struct AgentPipeline {
    dispatcher: CommandDispatcher,
    runner: PlanRunner,
    gate: PendingActionGate,
    confirm_ttl: chrono::Duration,
    session: String,
    recall: Option<Arc<dyn RecallStore>>,
}

impl AgentPipeline {
    pub fn new(dispatcher: CommandDispatcher, confirm_ttl: chrono::Duration) -> Self {
        Self {
            runner: PlanRunner::new(dispatcher.clone()),
            dispatcher,
            gate: PendingActionGate::new(),
            confirm_ttl,
            session: "default".to_string(),
            recall: None,
        }
    }

    pub fn with_session(mut self, session: &str) -> Self {
        self.session = session.to_string();
        self
    }

    /// Remember completed outcomes under `agent/<session>/last_outcome`.
    pub fn with_recall(mut self, store: Arc<dyn RecallStore>) -> Self {
        self.recall = Some(store);
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Snapshot of the action awaiting confirmation, if any.
    pub fn pending(&self) -> Option<PendingAction> {
        self.gate.pending()
    }

    pub fn outcome_key(&self) -> String {
        format!("agent/{}/last_outcome", self.session)
    }

    fn enter(&self, stage: PipelineStage) {
        debug!(session_key = %self.session, stage = %stage, "Pipeline stage");
    }

    /// Ask one conventional module; `Err` carries why there is no answer.
    async fn ask(&self, module: &str, input: &str) -> std::result::Result<String, String> {
        match self.dispatcher.dispatch_with_fallback(&module_candidates(module), input).await {
            Dispatch::Answered(text) if !text.trim().is_empty() => Ok(text),
            Dispatch::Answered(_) | Dispatch::Empty => Err(format!("{} returned nothing", module)),
            Dispatch::NotFound => Err(format!("{} is not registered", module)),
            Dispatch::Disabled => Err(format!("{} is disabled", module)),
            Dispatch::Failed(diag) | Dispatch::TimedOut(diag) => Err(diag),
        }
    }

    fn fail(&self, err: PipelineError) -> PipelineResult {
        warn!(session_key = %self.session, error = %err, "Pipeline halted");
        PipelineResult::error(err.to_string())
    }

    pub async fn submit(&self, utterance: &str) -> PipelineResult {
        let utterance = utterance.trim();
        self.enter(PipelineStage::Idle);
        if utterance.is_empty() {
            return self.fail(PipelineError::NoIntent(String::new()));
        }

        self.enter(PipelineStage::Interpreting);
        let intent = match self.ask(INTERPRETER, utterance).await {
            Ok(intent) => intent,
            Err(detail) => {
                debug!(detail = %detail, "No intent");
                return self.fail(PipelineError::NoIntent(utterance.to_string()));
            }
        };

        self.enter(PipelineStage::Planning);
        let plan = match self.ask(PLANNER, &intent).await {
            Ok(text) => match serde_json::from_str::<Plan>(&text) {
                Ok(plan) if !plan.is_empty() => plan,
                Ok(_) => return self.fail(PipelineError::NoPlan("plan has no steps".to_string())),
                Err(e) => return self.fail(PipelineError::NoPlan(format!("unreadable plan ({})", e))),
            },
            Err(detail) => return self.fail(PipelineError::NoPlan(detail)),
        };

        self.enter(PipelineStage::PolicyCheck);
        let verdict = match self.ask(POLICY, &plan.to_json()).await {
            Ok(text) => match serde_json::from_str::<PolicyDecision>(&text) {
                Ok(decision) => decision.into_verdict(plan),
                Err(_) => {
                    warn!(session_key = %self.session, answer = %text, "Unrecognized policy verdict");
                    Verdict::Blocked(PipelineError::UnexpectedVerdict.to_string())
                }
            },
            Err(detail) => return self.fail(PipelineError::PolicyUnavailable(detail)),
        };

        match verdict {
            Verdict::Approved(plan) => {
                self.enter(PipelineStage::Executing);
                let outcome = self.runner.run(&plan).await;
                self.finish(PipelineResult::completed(outcome))
            }
            Verdict::RequiresConfirmation(plan, reason) => {
                self.enter(PipelineStage::AwaitingConfirmation);
                self.gate.open(plan, &reason, self.confirm_ttl);
                PipelineResult::awaiting(format!(
                    "Confirmation required: {}\nReply yes to proceed or no to cancel.",
                    reason
                ))
            }
            Verdict::Blocked(reason) => {
                self.enter(PipelineStage::Blocked);
                info!(session_key = %self.session, reason = %reason, "Plan blocked by policy");
                PipelineResult::blocked(reason)
            }
        }
    }

    /// Approve or deny whatever is waiting in the gate.
    pub async fn resolve(&self, approve: bool) -> PipelineResult {
        let result = if approve {
            self.gate.approve(&self.runner).await
        } else {
            self.gate.deny()
        };
        if result.outcome.is_some() {
            self.finish(result)
        } else {
            result
        }
    }

    /// Drop an expired pending action, if any.
    pub fn sweep(&self) -> bool {
        self.gate.sweep()
    }

    fn finish(&self, result: PipelineResult) -> PipelineResult {
        self.enter(PipelineStage::Completed);
        if result.status == PipelineStatus::Completed {
            if let (Some(store), Some(outcome)) = (&self.recall, &result.outcome) {
                let value = serde_json::to_string(outcome).unwrap_or_default();
                if let Err(e) = store.remember(&self.outcome_key(), &value) {
                    warn!(session_key = %self.session, error = %e, "Failed to remember outcome");
                }
            }
        }
        result
    }
}
