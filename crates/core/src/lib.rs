pub mod config;
pub mod error;
pub mod paths;
pub mod settings;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
pub use settings::{ApplyReport, SettingKind, SettingSpec, SettingValue, SettingsBag};
pub use types::{
    Intent, Outcome, PendingAction, PipelineResult, PipelineStatus, Plan, PlanStep,
    PolicyDecision, StepReport, StepResult, Verdict,
};
