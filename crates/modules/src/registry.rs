use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use keystone_core::{ApplyReport, Config, Error, Result, SettingKind, SettingSpec, SettingValue, SettingsBag};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::provider::CapabilityProvider;

/// Runtime controls every registered module carries, independent of the
/// provider's own settings.
const ENABLED: SettingSpec = SettingSpec::new("enabled", SettingKind::Bool, "Accept dispatch calls");
const TIMEOUT_MS: SettingSpec =
    SettingSpec::new("timeoutMs", SettingKind::Long, "Dispatch deadline in ms (0 = dispatcher default)");

/// One registration: the provider plus the names it answers to.
pub struct ModuleEntry {
    name: String,
    aliases: Vec<String>,
    provider: Arc<dyn CapabilityProvider>,
    enabled: AtomicBool,
    timeout_ms: AtomicU64,
}

impl ModuleEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn provider(&self) -> Arc<dyn CapabilityProvider> {
        self.provider.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Per-module deadline; `0` defers to the dispatcher default.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::Acquire)
    }

    fn answers_to_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

/// Listing row for `modules list` and status output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: String,
    pub reported_name: String,
    pub aliases: Vec<String>,
    pub enabled: bool,
    pub timeout_ms: u64,
    pub settings: Vec<String>,
}

/// Process-wide table of named capability providers.
///
/// Built once at startup and shared as `Arc<CapabilityRegistry>`. Lookups
/// are case-insensitive and resolve by registered name, then by the name a
/// provider reports for itself, then by alias.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<Vec<Arc<ModuleEntry>>>,
}

pub type RegistryHandle = Arc<CapabilityRegistry>;

impl CapabilityRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<ModuleEntry>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<ModuleEntry>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a provider under `name` and run its `init`.
    ///
    /// `init` runs after the table lock is released so a provider may look
    /// up siblings. If it fails the registration is rolled back.
    pub fn register(
        self: &Arc<Self>,
        provider: Arc<dyn CapabilityProvider>,
        name: &str,
        aliases: &[&str],
    ) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("module name must not be empty".to_string()));
        }

        let entry = Arc::new(ModuleEntry {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            provider: provider.clone(),
            enabled: AtomicBool::new(true),
            timeout_ms: AtomicU64::new(0),
        });

        {
            let mut entries = self.write();
            if entries.iter().any(|e| e.name.eq_ignore_ascii_case(name)) {
                warn!(module = %name, "Duplicate module registration rejected");
                return Err(Error::DuplicateName(name.to_string()));
            }
            entries.push(entry.clone());
        }

        let init = std::panic::catch_unwind(AssertUnwindSafe(|| provider.init(self)))
            .unwrap_or_else(|panic| Err(Error::Provider(format!("init panicked: {}", panic_message(&panic)))));

        if let Err(e) = init {
            error!(module = %name, error = %e, "Module init failed, removing registration");
            self.write().retain(|e| !Arc::ptr_eq(e, &entry));
            return Err(e);
        }

        info!(
            module = %name,
            reported_name = %provider.name(),
            aliases = ?entry.aliases,
            "Module registered"
        );
        Ok(())
    }

    /// Register under the provider's own name and aliases.
    pub fn register_provider(self: &Arc<Self>, provider: Arc<dyn CapabilityProvider>) -> Result<()> {
        let name = provider.name().to_string();
        let aliases = provider.aliases();
        let alias_refs: Vec<&str> = aliases.iter().map(String::as_str).collect();
        self.register(provider, &name, &alias_refs)
    }

    /// Resolve the registration entry for `name`.
    pub fn entry(&self, name: &str) -> Option<Arc<ModuleEntry>> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let entries = self.read();
        entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .or_else(|| entries.iter().find(|e| e.provider.name().eq_ignore_ascii_case(name)))
            .or_else(|| entries.iter().find(|e| e.answers_to_alias(name)))
            .cloned()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.entry(name).map(|e| e.provider())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn describe(&self) -> Vec<ProviderInfo> {
        self.read()
            .iter()
            .map(|e| ProviderInfo {
                name: e.name.clone(),
                reported_name: e.provider.name().to_string(),
                aliases: e.aliases.clone(),
                enabled: e.is_enabled(),
                timeout_ms: e.timeout_ms(),
                settings: e.provider.settings().iter().map(|s| s.name.to_string()).collect(),
            })
            .collect()
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let entry = self
            .entry(name)
            .ok_or_else(|| Error::NotFound(format!("module '{}'", name)))?;
        entry.enabled.store(enabled, Ordering::Release);
        info!(module = %entry.name, enabled, "Module toggled");
        Ok(())
    }

    /// Apply a flat settings bag to one module.
    ///
    /// Never fails: values that cannot be coerced, nulls for non-nullable
    /// settings and unknown keys are skipped and reported, the rest applied.
    pub fn apply_configuration(&self, name: &str, bag: &SettingsBag) -> ApplyReport {
        let mut report = ApplyReport::new(name);
        let Some(entry) = self.entry(name) else {
            for (key, _) in bag.iter() {
                report.skip(key, format!("unknown module '{}'", name));
            }
            return report;
        };
        report.module = entry.name.clone();

        let specs = entry.provider.settings();
        for (key, value) in bag.iter() {
            if key.eq_ignore_ascii_case(ENABLED.name) {
                match ENABLED.accept(value) {
                    Ok(v) => {
                        entry.enabled.store(v.as_bool().unwrap_or(true), Ordering::Release);
                        report.applied.push(ENABLED.name.to_string());
                    }
                    Err(reason) => report.skip(key, reason),
                }
                continue;
            }

            if key.eq_ignore_ascii_case(TIMEOUT_MS.name) || key.eq_ignore_ascii_case("timeout_ms") {
                match TIMEOUT_MS.accept(value).map(|v| v.as_i64()) {
                    Ok(Some(ms)) if ms >= 0 => {
                        entry.timeout_ms.store(ms as u64, Ordering::Release);
                        report.applied.push(TIMEOUT_MS.name.to_string());
                    }
                    Ok(_) => report.skip(key, "timeoutMs must be a non-negative number"),
                    Err(reason) => report.skip(key, reason),
                }
                continue;
            }

            let Some(spec) = specs.iter().find(|s| s.name.eq_ignore_ascii_case(key)) else {
                report.skip(key, "no writable setting with that name");
                continue;
            };

            let coerced = match spec.accept(value) {
                Ok(v) => v,
                Err(reason) => {
                    report.skip(key, reason);
                    continue;
                }
            };

            let applied = std::panic::catch_unwind(AssertUnwindSafe(|| entry.provider.apply_setting(spec.name, &coerced)))
                .unwrap_or_else(|panic| Err(Error::Provider(panic_message(&panic))));
            match applied {
                Ok(()) => {
                    debug!(module = %entry.name, setting = %spec.name, value = %coerced, "Setting applied");
                    report.applied.push(spec.name.to_string());
                }
                Err(e) => report.skip(key, e.to_string()),
            }
        }

        report
    }

    /// Apply every `modules.*` bag from the config, plus the policy
    /// thresholds to the Policy module when one is registered.
    pub fn apply_config(&self, config: &Config) -> Vec<ApplyReport> {
        let mut reports = Vec::new();
        if self.contains("Policy") {
            reports.push(self.apply_configuration("Policy", &config.policy_bag()));
        }
        for name in config.modules.keys() {
            if let Some(bag) = config.module_bag(name) {
                reports.push(self.apply_configuration(name, &bag));
            }
        }
        reports
    }

    /// Deliver a lifecycle event to every provider in registration order.
    ///
    /// Failures and panics are logged per provider and do not stop the
    /// broadcast. Returns how many providers accepted the event.
    pub fn raise_system_event(&self, name: &str, payload: &serde_json::Value) -> usize {
        let entries: Vec<Arc<ModuleEntry>> = self.read().clone();
        let mut delivered = 0;
        for entry in &entries {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| entry.provider.on_system_event(name, payload)));
            match result {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(module = %entry.name, event = %name, error = %e, "System event handler failed"),
                Err(panic) => {
                    warn!(module = %entry.name, event = %name, panic = %panic_message(&panic), "System event handler panicked")
                }
            }
        }
        debug!(event = %name, delivered, total = entries.len(), "System event raised");
        delivered
    }

    /// Dispose every provider in registration order and clear the table.
    ///
    /// A provider that fails or panics while disposing is logged and
    /// skipped; the others are still disposed.
    pub fn unregister_all(&self) {
        let drained: Vec<Arc<ModuleEntry>> = std::mem::take(&mut *self.write());
        for entry in &drained {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| entry.provider.dispose()));
            match result {
                Ok(Ok(())) => debug!(module = %entry.name, "Module disposed"),
                Ok(Err(e)) => warn!(module = %entry.name, error = %e, "Module dispose failed"),
                Err(panic) => warn!(module = %entry.name, panic = %panic_message(&panic), "Module dispose panicked"),
            }
        }
        info!(count = drained.len(), "All modules unregistered");
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicI64;
    use std::sync::Mutex;

    struct Echo {
        name: &'static str,
        level: AtomicI64,
        verbose: AtomicBool,
        disposed: Arc<Mutex<Vec<String>>>,
    }

    impl Echo {
        fn new(name: &'static str) -> Arc<Self> {
            Self::with_log(name, Arc::new(Mutex::new(Vec::new())))
        }

        fn with_log(name: &'static str, disposed: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                level: AtomicI64::new(0),
                verbose: AtomicBool::new(false),
                disposed,
            })
        }
    }

    #[async_trait]
    impl CapabilityProvider for Echo {
        fn name(&self) -> &str {
            self.name
        }

        async fn process(&self, input: &str) -> Result<String> {
            Ok(format!("{}:{}", self.name, input))
        }

        fn settings(&self) -> Vec<SettingSpec> {
            vec![
                SettingSpec::new("level", SettingKind::Int, "level"),
                SettingSpec::new("verbose", SettingKind::Bool, "verbose"),
            ]
        }

        fn apply_setting(&self, name: &str, value: &SettingValue) -> Result<()> {
            match name {
                "level" => self.level.store(value.as_i64().unwrap_or_default(), Ordering::SeqCst),
                "verbose" => self.verbose.store(value.as_bool().unwrap_or_default(), Ordering::SeqCst),
                _ => return Err(Error::NotFound(name.to_string())),
            }
            Ok(())
        }

        fn on_system_event(&self, name: &str, payload: &serde_json::Value) -> Result<()> {
            if self.name == "Broken" {
                panic!("cannot handle {}", name);
            }
            self.disposed.lock().unwrap().push(format!("{}<-{}{}", self.name, name, payload));
            Ok(())
        }

        fn dispose(&self) -> Result<()> {
            self.disposed.lock().unwrap().push(self.name.to_string());
            if self.name == "Broken" {
                return Err(Error::Provider("dispose failed".into()));
            }
            Ok(())
        }
    }

    struct FailingInit;

    #[async_trait]
    impl CapabilityProvider for FailingInit {
        fn name(&self) -> &str {
            "Flaky"
        }

        fn init(&self, _registry: &Arc<CapabilityRegistry>) -> Result<()> {
            Err(Error::Provider("no backend".into()))
        }

        async fn process(&self, _input: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    struct NeedsSibling {
        found: AtomicBool,
    }

    #[async_trait]
    impl CapabilityProvider for NeedsSibling {
        fn name(&self) -> &str {
            "Needy"
        }

        fn init(&self, registry: &Arc<CapabilityRegistry>) -> Result<()> {
            self.found.store(registry.lookup("Weather").is_some(), Ordering::SeqCst);
            Ok(())
        }

        async fn process(&self, _input: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_lookup_by_name_case_and_alias() {
        let registry = CapabilityRegistry::new();
        registry.register(Echo::new("WeatherModule"), "Weather", &["Forecast"]).unwrap();

        assert!(registry.lookup("Weather").is_some());
        assert!(registry.lookup("wEaThEr").is_some());
        assert!(registry.lookup("WeatherModule").is_some());
        assert!(registry.lookup("forecast").is_some());
        assert!(registry.lookup("Clock").is_none());
        assert!(registry.lookup("").is_none());
    }

    #[test]
    fn test_registered_name_wins_over_reported_name() {
        let registry = CapabilityRegistry::new();
        registry.register(Echo::new("Alpha"), "Beta", &[]).unwrap();
        registry.register(Echo::new("Gamma"), "Alpha", &[]).unwrap();

        let hit = registry.lookup("alpha").unwrap();
        assert_eq!(hit.name(), "Gamma");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = CapabilityRegistry::new();
        registry.register(Echo::new("A"), "Weather", &[]).unwrap();
        let err = registry.register(Echo::new("B"), "WEATHER", &[]).unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_init_rolls_back() {
        let registry = CapabilityRegistry::new();
        assert!(registry.register_provider(Arc::new(FailingInit)).is_err());
        assert!(registry.lookup("Flaky").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_init_can_see_siblings() {
        let registry = CapabilityRegistry::new();
        registry.register(Echo::new("Weather"), "Weather", &[]).unwrap();
        let needy = Arc::new(NeedsSibling { found: AtomicBool::new(false) });
        registry.register_provider(needy.clone()).unwrap();
        assert!(needy.found.load(Ordering::SeqCst));
    }

    #[test]
    fn test_apply_configuration_skips_bad_values() {
        let registry = CapabilityRegistry::new();
        let echo = Echo::new("Echo");
        registry.register(echo.clone(), "Echo", &[]).unwrap();

        let bag = SettingsBag::new()
            .with("level", "not a number")
            .with("verbose", 1)
            .with("nonsense", true)
            .with("timeoutMs", "250")
            .with("enabled", SettingValue::Null);
        let report = registry.apply_configuration("echo", &bag);

        assert!(report.is_applied("verbose"));
        assert!(report.is_applied("timeoutMs"));
        assert_eq!(report.skipped.len(), 3);
        assert!(echo.verbose.load(Ordering::SeqCst));
        assert_eq!(echo.level.load(Ordering::SeqCst), 0);

        let entry = registry.entry("Echo").unwrap();
        assert_eq!(entry.timeout_ms(), 250);
        assert!(entry.is_enabled());
    }

    #[test]
    fn test_apply_configuration_empty_and_unknown_module() {
        let registry = CapabilityRegistry::new();
        registry.register(Echo::new("Echo"), "Echo", &[]).unwrap();

        let report = registry.apply_configuration("Echo", &SettingsBag::new());
        assert!(report.applied.is_empty() && report.skipped.is_empty());

        let report = registry.apply_configuration("Ghost", &SettingsBag::new().with("enabled", false));
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn test_apply_configuration_disables_module() {
        let registry = CapabilityRegistry::new();
        registry.register(Echo::new("Echo"), "Echo", &[]).unwrap();
        let report = registry.apply_configuration("Echo", &SettingsBag::new().with("enabled", "false"));
        assert!(report.is_applied("enabled"));
        assert!(!registry.entry("Echo").unwrap().is_enabled());
    }

    #[test]
    fn test_unregister_all_disposes_in_order() {
        let registry = CapabilityRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(Echo::with_log("First", log.clone()), "First", &[]).unwrap();
        registry.register(Echo::with_log("Broken", log.clone()), "Broken", &[]).unwrap();
        registry.register(Echo::with_log("Last", log.clone()), "Last", &[]).unwrap();

        registry.unregister_all();

        assert_eq!(*log.lock().unwrap(), vec!["First", "Broken", "Last"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_describe_lists_registration_order() {
        let registry = CapabilityRegistry::new();
        registry.register(Echo::new("B"), "Bravo", &["b"]).unwrap();
        registry.register(Echo::new("A"), "Alpha", &[]).unwrap();

        assert_eq!(registry.names(), vec!["Bravo", "Alpha"]);
        let info = registry.describe();
        assert_eq!(info[0].reported_name, "B");
        assert_eq!(info[0].settings, vec!["level", "verbose"]);
    }

    #[test]
    fn test_system_event_reaches_everyone_past_a_panic() {
        let registry = CapabilityRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register_provider(Echo::with_log("First", log.clone())).unwrap();
        registry.register_provider(Echo::with_log("Broken", log.clone())).unwrap();
        registry.register_provider(Echo::with_log("Last", log.clone())).unwrap();

        let delivered = registry.raise_system_event("Warmup", &serde_json::json!({"n": 1}));

        assert_eq!(delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec![r#"First<-Warmup{"n":1}"#, r#"Last<-Warmup{"n":1}"#]);
        assert_eq!(registry.len(), 3);
    }
}
