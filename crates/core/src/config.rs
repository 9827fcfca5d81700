use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::settings::SettingsBag;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    /// How long a confirmation request stays valid.
    #[serde(default = "default_confirm_ttl_secs")]
    pub confirm_ttl_secs: u64,
    /// Dispatcher deadline for providers without their own timeout.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    #[serde(default = "default_remember_outcomes")]
    pub remember_outcomes: bool,
}

fn default_confirm_ttl_secs() -> u64 {
    120
}

fn default_dispatch_timeout_ms() -> u64 {
    30_000
}

fn default_remember_outcomes() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            confirm_ttl_secs: default_confirm_ttl_secs(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            remember_outcomes: default_remember_outcomes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySettings {
    #[serde(default = "default_confirm_threshold")]
    pub confirm_threshold: f64,
    #[serde(default = "default_block_threshold")]
    pub block_threshold: f64,
    /// Skills at or above this severity need an explicit consent grant.
    #[serde(default = "default_consent_severity")]
    pub consent_severity: f64,
}

fn default_confirm_threshold() -> f64 {
    0.5
}

fn default_block_threshold() -> f64 {
    0.85
}

fn default_consent_severity() -> f64 {
    0.3
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            confirm_threshold: default_confirm_threshold(),
            block_threshold: default_block_threshold(),
            consent_severity: default_consent_severity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub policy: PolicySettings,
    /// Per-module flat settings, applied to the registry at startup.
    #[serde(default)]
    pub modules: BTreeMap<String, serde_json::Map<String, serde_json::Value>>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot represent.
    pub fn validate(&self) -> Result<()> {
        let ttl = i64::try_from(self.agent.confirm_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds);
        if ttl.is_none() {
            return Err(Error::Config(format!(
                "agent.confirmTtlSecs is too large: {}",
                self.agent.confirm_ttl_secs
            )));
        }
        Ok(())
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Confirmation TTL, saturating at the largest representable duration.
    pub fn confirm_ttl(&self) -> chrono::Duration {
        i64::try_from(self.agent.confirm_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn dispatch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.agent.dispatch_timeout_ms)
    }

    /// Settings bag for one module, matched case-insensitively.
    pub fn module_bag(&self, name: &str) -> Option<SettingsBag> {
        self.modules
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| SettingsBag::from_json(v))
    }

    /// Policy thresholds expressed as per-mille integers, the form the
    /// Policy module accepts through `apply_configuration`.
    pub fn policy_bag(&self) -> SettingsBag {
        SettingsBag::new()
            .with("confirmPermille", to_permille(self.policy.confirm_threshold))
            .with("blockPermille", to_permille(self.policy.block_threshold))
            .with("consentPermille", to_permille(self.policy.consent_severity))
    }
}

fn to_permille(v: f64) -> i32 {
    (v.clamp(0.0, 1.0) * 1000.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingValue;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.agent.confirm_ttl_secs, 120);
        assert_eq!(cfg.agent.dispatch_timeout_ms, 30_000);
        assert!(cfg.agent.remember_outcomes);
        assert_eq!(cfg.policy.block_threshold, 0.85);
        assert!(cfg.modules.is_empty());
    }

    #[test]
    fn test_camel_case_and_module_bag() {
        let raw = r#"{
  "agent": { "confirmTtlSecs": 5 },
  "modules": { "Policy": { "enabled": true, "timeoutMs": "250" } }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.agent.confirm_ttl_secs, 5);
        assert_eq!(cfg.confirm_ttl(), chrono::Duration::seconds(5));

        let bag = cfg.module_bag("policy").unwrap();
        assert_eq!(bag.len(), 2);
        assert!(cfg.module_bag("Planner").is_none());
    }

    #[test]
    fn test_policy_bag_permille() {
        let cfg = Config::default();
        let bag = cfg.policy_bag();
        let values: Vec<_> = bag.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        assert!(values.contains(&("confirmPermille".to_string(), SettingValue::Int(500))));
        assert!(values.contains(&("blockPermille".to_string(), SettingValue::Int(850))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = Config::default();
        cfg.agent.dispatch_timeout_ms = 10;
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.agent.dispatch_timeout_ms, 10);

        let paths = Paths::with_base(dir.path().join("missing"));
        let fallback = Config::load_or_default(&paths).unwrap();
        assert_eq!(fallback.agent.dispatch_timeout_ms, 30_000);
    }

    #[test]
    fn test_oversized_ttl_is_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, format!(r#"{{"agent":{{"confirmTtlSecs":{}}}}}"#, u64::MAX)).unwrap();

        match Config::load(&path) {
            Err(Error::Config(msg)) => assert!(msg.contains("confirmTtlSecs")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_confirm_ttl_saturates() {
        let mut cfg = Config::default();
        cfg.agent.confirm_ttl_secs = u64::MAX;
        assert_eq!(cfg.confirm_ttl(), chrono::Duration::MAX);

        cfg.agent.confirm_ttl_secs = 10_000_000_000_000;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.confirm_ttl(), chrono::Duration::seconds(10_000_000_000_000));
    }
}
