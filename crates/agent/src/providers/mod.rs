pub mod consent;
pub mod executor;
pub mod interpreter;
pub mod planner;
pub mod policy;
pub mod skills;

use std::sync::Arc;

use keystone_modules::{CapabilityProvider, CapabilityRegistry};
use serde::Serialize;
use tracing::{info, warn};

pub use consent::ConsentRegistry;
pub use executor::Executor;
pub use interpreter::{IntentKind, Interpreter};
pub use planner::Planner;
pub use policy::PolicyGuard;
pub use skills::{ChatAnswer, DeviceControl, SystemAdmin, SystemOpen};

/// Which built-in modules made it into the registry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Register the pipeline modules and the stock skills.
///
/// A module that fails to register is reported and skipped; the rest
/// still load.
pub fn register_builtins(registry: &Arc<CapabilityRegistry>) -> LoadReport {
    let providers: Vec<Arc<dyn CapabilityProvider>> = vec![
        Arc::new(ConsentRegistry::new()),
        Arc::new(Interpreter::new()),
        Arc::new(Planner::new()),
        Arc::new(PolicyGuard::new()),
        Arc::new(Executor::new()),
        Arc::new(DeviceControl::new()),
        Arc::new(SystemOpen::new()),
        Arc::new(SystemAdmin::new()),
        Arc::new(ChatAnswer),
    ];

    let mut report = LoadReport::default();
    for provider in providers {
        let name = provider.name().to_string();
        match registry.register_provider(provider) {
            Ok(()) => report.loaded.push(name),
            Err(e) => {
                warn!(module = %name, error = %e, "Built-in module not loaded");
                report.failed.push((name, e.to_string()));
            }
        }
    }
    info!(loaded = report.loaded.len(), failed = report.failed.len(), "Built-in modules registered");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtins_twice_reports_duplicates() {
        let registry = CapabilityRegistry::new();
        let first = register_builtins(&registry);
        assert!(first.is_complete());
        assert_eq!(first.loaded.len(), 9);
        assert!(registry.lookup("EthicsGuard").is_some());
        assert!(registry.lookup("nlu").is_some());

        let second = register_builtins(&registry);
        assert!(second.loaded.is_empty());
        assert_eq!(second.failed.len(), 9);
        assert_eq!(registry.len(), 9);
    }
}
