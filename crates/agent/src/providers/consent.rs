use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keystone_core::Result;
use keystone_modules::CapabilityProvider;
use serde::Serialize;
use tracing::info;

pub const GRANTED: &str = "granted";
pub const MISSING: &str = "missing";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub skill: String,
    pub scope: String,
    pub granted_at: DateTime<Utc>,
}

/// Standing permissions for skills that need explicit consent.
///
/// Commands: `consent grant <skill> [scope]`, `consent revoke <skill>`,
/// `consent list`, `consent check <skill> [scope]`, `help`.
#[derive(Default)]
pub struct ConsentRegistry {
    records: Mutex<BTreeMap<String, ConsentRecord>>,
}

impl ConsentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, skill: &str, scope: &str) {
        let record = ConsentRecord {
            skill: skill.to_string(),
            scope: scope.trim().to_string(),
            granted_at: Utc::now(),
        };
        info!(skill = %skill, scope = %record.scope, "Consent granted");
        self.records.lock().unwrap_or_else(|e| e.into_inner()).insert(skill.to_lowercase(), record);
    }

    pub fn revoke(&self, skill: &str) -> bool {
        let removed = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&skill.to_lowercase())
            .is_some();
        if removed {
            info!(skill = %skill, "Consent revoked");
        }
        removed
    }

    /// A grant without scope covers everything; a scoped query must appear
    /// in the granted scope.
    pub fn has_consent(&self, skill: &str, scope: Option<&str>) -> bool {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = records.get(&skill.to_lowercase()) else {
            return false;
        };
        match scope.map(str::trim).filter(|s| !s.is_empty()) {
            None => true,
            Some(scope) => record.scope.to_lowercase().contains(&scope.to_lowercase()),
        }
    }

    pub fn list(&self) -> Vec<ConsentRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).values().cloned().collect()
    }

    fn handle(&self, input: &str) -> String {
        let text = input.trim();
        if text.eq_ignore_ascii_case("help") || text.eq_ignore_ascii_case("consent help") {
            return "Consent commands:\n  consent grant <skill> [scope]\n  consent revoke <skill>\n  consent list\n  consent check <skill> [scope]".to_string();
        }

        let mut parts = text.split_whitespace();
        if !parts.next().is_some_and(|w| w.eq_ignore_ascii_case("consent")) {
            return "Unknown command. Try: help".to_string();
        }
        let verb = parts.next().unwrap_or_default().to_lowercase();
        let skill = parts.next().unwrap_or_default();
        let scope = parts.collect::<Vec<_>>().join(" ");

        match verb.as_str() {
            "grant" if !skill.is_empty() => {
                self.grant(skill, &scope);
                if scope.is_empty() {
                    format!("Granted consent for {}", skill)
                } else {
                    format!("Granted consent for {} (scope: {})", skill, scope)
                }
            }
            "grant" => "Usage: consent grant <skill> [scope]".to_string(),
            "revoke" if !skill.is_empty() => {
                self.revoke(skill);
                format!("Revoked consent for {}.", skill)
            }
            "revoke" => "Usage: consent revoke <skill>".to_string(),
            "check" => {
                if self.has_consent(skill, Some(&scope)) {
                    GRANTED.to_string()
                } else {
                    MISSING.to_string()
                }
            }
            "list" => {
                let records = self.list();
                if records.is_empty() {
                    "No consents.".to_string()
                } else {
                    serde_json::to_string_pretty(&records).unwrap_or_default()
                }
            }
            _ => "Unknown command. Try: help".to_string(),
        }
    }
}

#[async_trait]
impl CapabilityProvider for ConsentRegistry {
    fn name(&self) -> &str {
        "Consent"
    }

    async fn process(&self, input: &str) -> Result<String> {
        Ok(self.handle(input))
    }
}
