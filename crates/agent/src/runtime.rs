use std::sync::Arc;

use keystone_core::{ApplyReport, Config};
use keystone_modules::{CapabilityRegistry, CommandDispatcher};
use serde_json::json;
use tracing::{info, warn};

use crate::providers::interpreter::WARMUP;
use crate::providers::{register_builtins, LoadReport};
use crate::recall::{InMemoryRecallStore, RecallStore};
use crate::router::ConversationRouter;

/// Everything a host needs, wired from one `Config`: the registry with
/// the built-in modules loaded and configured, a dispatcher and a router.
pub struct AgentRuntime {
    config: Config,
    registry: Arc<CapabilityRegistry>,
    dispatcher: CommandDispatcher,
    router: ConversationRouter,
    recall: Arc<dyn RecallStore>,
    load_report: LoadReport,
    apply_reports: Vec<ApplyReport>,
}

impl AgentRuntime {
    pub fn new(config: Config) -> Self {
        let registry = CapabilityRegistry::new();
        let load_report = register_builtins(&registry);
        let apply_reports = registry.apply_config(&config);
        for report in &apply_reports {
            if !report.skipped.is_empty() {
                warn!(module = %report.module, skipped = report.skipped.len(), "Some settings were not applied");
            }
        }

        registry.raise_system_event(WARMUP, &json!({ "modules": registry.names() }));

        let dispatcher = CommandDispatcher::new(registry.clone(), config.dispatch_timeout());
        let recall: Arc<dyn RecallStore> = Arc::new(InMemoryRecallStore::new());
        let router = ConversationRouter::new(dispatcher.clone(), recall.clone(), config.confirm_ttl())
            .remember_outcomes(config.agent.remember_outcomes);

        info!(
            modules = registry.len(),
            confirm_ttl_secs = config.agent.confirm_ttl_secs,
            "Agent runtime ready"
        );

        Self {
            config,
            registry,
            dispatcher,
            router,
            recall,
            load_report,
            apply_reports,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn router(&self) -> &ConversationRouter {
        &self.router
    }

    pub fn recall(&self) -> &Arc<dyn RecallStore> {
        &self.recall
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn apply_reports(&self) -> &[ApplyReport] {
        &self.apply_reports
    }

    /// Dispose every module. The runtime is unusable afterwards.
    pub fn shutdown(&self) {
        self.registry.unregister_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_applies_module_config() {
        let raw = r#"{
  "agent": { "confirmTtlSecs": 30 },
  "modules": { "Executor": { "stepTimeoutMs": 500, "bogus": 1 }, "Chat.Answer": { "enabled": false } }
}"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        let runtime = AgentRuntime::new(config);

        assert!(runtime.load_report().is_complete());
        let executor = runtime
            .apply_reports()
            .iter()
            .find(|r| r.module == "Executor")
            .unwrap();
        assert!(executor.is_applied("stepTimeoutMs"));
        assert_eq!(executor.skipped.len(), 1);
        assert!(!runtime.registry().entry("Chat.Answer").unwrap().is_enabled());

        runtime.shutdown();
        assert!(runtime.registry().is_empty());
    }
}
