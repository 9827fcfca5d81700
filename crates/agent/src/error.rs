use thiserror::Error;

/// Terminal pipeline failures. The display text is what the caller sees;
/// these never cross the caller API as `Err`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("could not derive intent from \"{0}\"")]
    NoIntent(String),

    #[error("could not build a plan: {0}")]
    NoPlan(String),

    #[error("policy check unavailable: {0}")]
    PolicyUnavailable(String),

    #[error("unexpected verdict from policy")]
    UnexpectedVerdict,

    #[error("step {index} ({capability}) failed: {detail}")]
    StepExecution {
        index: usize,
        capability: String,
        detail: String,
    },
}
