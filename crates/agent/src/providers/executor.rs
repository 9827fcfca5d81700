use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use keystone_core::{PlanStep, Result, SettingKind, SettingSpec, SettingValue, StepReport};
use keystone_modules::{CapabilityProvider, CapabilityRegistry, CommandDispatcher, Dispatch};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::pipeline::{EXECUTOR, INTERPRETER, PLANNER, POLICY};

/// Modules a plan step may never target.
const RESERVED: &[&str] = &[INTERPRETER, PLANNER, POLICY, EXECUTOR];

/// Runs a single plan step against the capability it names.
///
/// Input is a `PlanStep` JSON, output a `StepReport` JSON. The step's
/// `args` are handed to the capability as JSON text.
pub struct Executor {
    registry: OnceCell<Weak<CapabilityRegistry>>,
    step_timeout_ms: AtomicU64,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            registry: OnceCell::new(),
            step_timeout_ms: AtomicU64::new(30_000),
        }
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn execute(&self, step: &PlanStep) -> StepReport {
        let Some(registry) = self.registry.get().and_then(Weak::upgrade) else {
            return StepReport::failed("executor is not attached to a registry");
        };
        if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(step.capability.trim())) {
            return StepReport::failed(format!("'{}' cannot be a plan step", step.capability));
        }

        let timeout = Duration::from_millis(self.step_timeout_ms.load(Ordering::Acquire));
        let dispatcher = CommandDispatcher::new(registry, timeout);
        let args = step.args.to_string();

        debug!(capability = %step.capability, "Executing step");
        match dispatcher.dispatch(&step.capability, &args).await {
            Dispatch::Answered(output) => StepReport::ok(output),
            Dispatch::Empty => StepReport::failed(format!("{} produced no result", step.capability)),
            Dispatch::NotFound => StepReport::failed(format!("unknown capability '{}'", step.capability)),
            Dispatch::Disabled => StepReport::failed(format!("capability '{}' is disabled", step.capability)),
            Dispatch::Failed(diag) | Dispatch::TimedOut(diag) => StepReport::failed(diag),
        }
    }
}

const SETTINGS: &[SettingSpec] = &[SettingSpec::new(
    "stepTimeoutMs",
    SettingKind::Long,
    "Deadline for one capability call",
)];

#[async_trait]
impl CapabilityProvider for Executor {
    fn name(&self) -> &str {
        "Executor"
    }

    fn init(&self, registry: &Arc<CapabilityRegistry>) -> Result<()> {
        let _ = self.registry.set(Arc::downgrade(registry));
        Ok(())
    }

    async fn process(&self, input: &str) -> Result<String> {
        let report = match serde_json::from_str::<PlanStep>(input) {
            Ok(step) => self.execute(&step).await,
            Err(e) => StepReport::failed(format!("invalid step: {}", e)),
        };
        Ok(report.to_json())
    }

    fn settings(&self) -> Vec<SettingSpec> {
        SETTINGS.to_vec()
    }

    fn apply_setting(&self, name: &str, value: &SettingValue) -> Result<()> {
        match (name, value.as_i64()) {
            ("stepTimeoutMs", Some(ms)) if ms > 0 => {
                self.step_timeout_ms.store(ms as u64, Ordering::Release);
                Ok(())
            }
            ("stepTimeoutMs", _) => Err(keystone_core::Error::Validation("stepTimeoutMs must be positive".into())),
            _ => Err(keystone_core::Error::NotFound(format!("setting '{}'", name))),
        }
    }
}
