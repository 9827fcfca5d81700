use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::registry::{panic_message, CapabilityRegistry};

/// What happened when a named module was invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    NotFound,
    Disabled,
    /// The module answered with an empty string.
    Empty,
    Answered(String),
    /// The module returned an error or panicked; carries a diagnostic.
    Failed(String),
    TimedOut(String),
}

impl Dispatch {
    /// Text a caller of the plain `invoke` contract sees.
    pub fn into_output(self) -> Option<String> {
        match self {
            Dispatch::Answered(s) | Dispatch::Failed(s) | Dispatch::TimedOut(s) => Some(s),
            Dispatch::NotFound | Dispatch::Disabled | Dispatch::Empty => None,
        }
    }

    pub fn answer(&self) -> Option<&str> {
        match self {
            Dispatch::Answered(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, Dispatch::Answered(_))
    }
}

/// `["Foo", "FooModule"]`: the two names a conventional module may be
/// registered under.
pub fn module_candidates(name: &str) -> Vec<String> {
    if name.ends_with("Module") {
        vec![name.to_string()]
    } else {
        vec![name.to_string(), format!("{}Module", name)]
    }
}

/// Resolves names through the registry and invokes providers, turning
/// errors, panics and hangs into diagnostic text.
#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<CapabilityRegistry>,
    default_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn dispatch(&self, name: &str, input: &str) -> Dispatch {
        let Some(entry) = self.registry.entry(name) else {
            debug!(module = %name, "Dispatch target not found");
            return Dispatch::NotFound;
        };
        if !entry.is_enabled() {
            debug!(module = %entry.name(), "Dispatch target disabled");
            return Dispatch::Disabled;
        }

        let deadline = match entry.timeout_ms() {
            0 => self.default_timeout,
            ms => Duration::from_millis(ms),
        };
        let provider = entry.provider();
        let call = AssertUnwindSafe(provider.process(input)).catch_unwind();

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(Ok(output))) if output.is_empty() => Dispatch::Empty,
            Ok(Ok(Ok(output))) => Dispatch::Answered(output),
            Ok(Ok(Err(e))) => {
                warn!(module = %entry.name(), error = %e, "Module invocation failed");
                Dispatch::Failed(format!("(module {} invocation error: {})", entry.name(), e))
            }
            Ok(Err(panic)) => {
                let msg = panic_message(&panic);
                warn!(module = %entry.name(), panic = %msg, "Module invocation panicked");
                Dispatch::Failed(format!("(module {} invocation exception: {})", entry.name(), msg))
            }
            Err(_) => {
                let ms = deadline.as_millis();
                warn!(module = %entry.name(), timeout_ms = ms as u64, "Module invocation timed out");
                Dispatch::TimedOut(format!("(module {} timed out after {}ms)", entry.name(), ms))
            }
        }
    }

    /// Invoke one module. `None` when it is missing, disabled or answered
    /// with nothing; failures come back as diagnostic text.
    pub async fn invoke(&self, name: &str, input: &str) -> Option<String> {
        self.dispatch(name, input).await.into_output()
    }

    /// Try candidates in order and return the first non-empty result.
    pub async fn invoke_with_fallback<S: AsRef<str>>(&self, candidates: &[S], input: &str) -> Option<String> {
        for name in candidates {
            if let Some(output) = self.invoke(name.as_ref(), input).await {
                if !output.is_empty() {
                    return Some(output);
                }
            }
        }
        None
    }

    /// Rich variant of `invoke_with_fallback`.
    ///
    /// The first candidate that answers, fails or times out decides the
    /// result. If none does, the last candidate's status is returned.
    pub async fn dispatch_with_fallback<S: AsRef<str>>(&self, candidates: &[S], input: &str) -> Dispatch {
        let mut last = Dispatch::NotFound;
        for name in candidates {
            let result = self.dispatch(name.as_ref(), input).await;
            match result {
                Dispatch::Answered(_) | Dispatch::Failed(_) | Dispatch::TimedOut(_) => return result,
                // A registered candidate outranks a missing one in the summary.
                Dispatch::Disabled | Dispatch::Empty => last = result,
                Dispatch::NotFound => {}
            }
        }
        last
    }
}
