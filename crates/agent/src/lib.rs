pub mod error;
pub mod gate;
pub mod pipeline;
pub mod providers;
pub mod recall;
pub mod router;
pub mod runtime;

pub use error::PipelineError;
pub use gate::{PendingActionGate, Resolution, NOTHING_PENDING};
pub use pipeline::{AgentPipeline, PipelineStage, PlanRunner};
pub use providers::{register_builtins, LoadReport};
pub use recall::{InMemoryRecallStore, RecallStore};
pub use router::{route, ConversationRouter, Route};
pub use runtime::AgentRuntime;
