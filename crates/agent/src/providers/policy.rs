use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use keystone_core::{Error, Plan, PlanStep, PolicyDecision, Result, SettingKind, SettingSpec, SettingValue};
use keystone_modules::{CapabilityProvider, CapabilityRegistry, CommandDispatcher, Dispatch};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{debug, info};

use super::consent::GRANTED;
use super::skills::{CHAT_ANSWER, DEVICE_CONTROL, SYSTEM_ADMIN, SYSTEM_OPEN};

const CONSENT: &str = "Consent";
const CONSENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Harm {
    None,
    Privacy,
    Physical,
    Systemic,
}

#[derive(Debug, Clone, Copy)]
pub struct SkillDefault {
    pub harm: Harm,
    pub severity: f64,
}

const UNKNOWN_SKILL: SkillDefault = SkillDefault {
    harm: Harm::Systemic,
    severity: 0.5,
};

fn skill_default(skill: &str) -> SkillDefault {
    let (harm, severity) = match skill {
        s if s.eq_ignore_ascii_case(CHAT_ANSWER) => (Harm::None, 0.0),
        s if s.eq_ignore_ascii_case(SYSTEM_OPEN) => (Harm::Privacy, 0.2),
        s if s.eq_ignore_ascii_case(DEVICE_CONTROL) => (Harm::Physical, 0.25),
        s if s.eq_ignore_ascii_case(SYSTEM_ADMIN) => (Harm::Systemic, 0.6),
        _ => return UNKNOWN_SKILL,
    };
    SkillDefault { harm, severity }
}

/// Words in a step's arguments that raise its risk.
const ESCALATIONS: &[(&str, f64)] = &[
    ("all", 0.3),
    ("every", 0.3),
    ("shared", 0.3),
    ("everyone", 0.3),
    ("delete", 0.5),
    ("format", 0.5),
    ("wipe", 0.5),
    ("shutdown", 0.4),
    ("unlock", 0.3),
];

/// Risk of one step: its skill's base severity plus keyword escalation,
/// capped at 1.0.
pub fn score_step(step: &PlanStep, default: SkillDefault) -> f64 {
    let args = step.args.to_string().to_lowercase();
    let words: Vec<&str> = args
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let bump: f64 = ESCALATIONS
        .iter()
        .filter(|(kw, _)| words.contains(kw))
        .map(|(_, b)| *b)
        .sum();
    (default.severity + bump).min(1.0)
}

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    confirm: f64,
    block: f64,
    consent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confirm: 0.5,
            block: 0.85,
            consent: 0.3,
        }
    }
}

#[derive(Debug, Serialize)]
struct StepAnalysis<'a> {
    skill: &'a str,
    risk: f64,
    harm: Harm,
    severity: f64,
}

/// Risk and consent gate for plans.
///
/// Answers a `PolicyDecision` JSON. Consent is asked of the `Consent`
/// module through the registry with `consent check <skill>`.
#[derive(Default)]
pub struct PolicyGuard {
    thresholds: RwLock<Thresholds>,
    registry: OnceCell<Weak<CapabilityRegistry>>,
}

impl PolicyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn thresholds(&self) -> Thresholds {
        *self.thresholds.read().unwrap_or_else(|e| e.into_inner())
    }

    async fn has_consent(&self, skill: &str) -> bool {
        let Some(registry) = self.registry.get().and_then(Weak::upgrade) else {
            return false;
        };
        let dispatcher = CommandDispatcher::new(registry, CONSENT_TIMEOUT);
        match dispatcher.dispatch(CONSENT, &format!("consent check {}", skill)).await {
            Dispatch::Answered(answer) => answer == GRANTED,
            other => {
                debug!(skill = %skill, result = ?other, "Consent unavailable, treating as missing");
                false
            }
        }
    }

    pub async fn evaluate(&self, plan: &Plan) -> PolicyDecision {
        if plan.steps.is_empty() {
            return PolicyDecision::Blocked {
                reason: "empty plan".to_string(),
            };
        }
        let t = self.thresholds();

        let mut max_risk = 0.0_f64;
        let mut analyses = Vec::with_capacity(plan.steps.len());
        let mut missing_consent = false;
        for step in &plan.steps {
            let default = skill_default(&step.capability);
            let risk = score_step(step, default);
            max_risk = max_risk.max(risk);
            if default.severity >= t.consent && !self.has_consent(&step.capability).await {
                missing_consent = true;
            }
            analyses.push(StepAnalysis {
                skill: &step.capability,
                risk,
                harm: default.harm,
                severity: default.severity,
            });
        }
        debug!(max_risk, missing_consent, steps = plan.steps.len(), "Plan evaluated");

        if max_risk >= t.block {
            let steps = serde_json::to_string(&analyses).unwrap_or_default();
            info!(max_risk, "Plan blocked");
            return PolicyDecision::Blocked {
                reason: format!("violates 'harm none' (risk={:.2}). Steps={}", max_risk, steps),
            };
        }
        if max_risk >= t.confirm || missing_consent {
            return PolicyDecision::RequiresConfirmation {
                reason: format!(
                    "action requires human approval (risk={:.2}, consent={})",
                    max_risk,
                    if missing_consent { "missing" } else { "ok" }
                ),
            };
        }
        PolicyDecision::Approved
    }
}

const SETTINGS: &[SettingSpec] = &[
    SettingSpec::new("confirmPermille", SettingKind::Int, "Risk (0-1000) at which a plan needs confirmation"),
    SettingSpec::new("blockPermille", SettingKind::Int, "Risk (0-1000) at which a plan is blocked"),
    SettingSpec::new("consentPermille", SettingKind::Int, "Skill severity (0-1000) that needs a consent grant"),
];

#[async_trait]
impl CapabilityProvider for PolicyGuard {
    fn name(&self) -> &str {
        "Policy"
    }

    fn aliases(&self) -> Vec<String> {
        vec!["EthicsGuard".to_string()]
    }

    fn init(&self, registry: &Arc<CapabilityRegistry>) -> Result<()> {
        let _ = self.registry.set(Arc::downgrade(registry));
        Ok(())
    }

    async fn process(&self, input: &str) -> Result<String> {
        let decision = match serde_json::from_str::<Plan>(input) {
            Ok(plan) => self.evaluate(&plan).await,
            Err(_) => PolicyDecision::Blocked {
                reason: "invalid plan json".to_string(),
            },
        };
        Ok(decision.to_json())
    }

    fn settings(&self) -> Vec<SettingSpec> {
        SETTINGS.to_vec()
    }

    fn apply_setting(&self, name: &str, value: &SettingValue) -> Result<()> {
        let permille = value
            .as_i64()
            .filter(|v| (0..=1000).contains(v))
            .ok_or_else(|| Error::Validation(format!("{} must be between 0 and 1000", name)))?;
        let fraction = permille as f64 / 1000.0;

        let mut t = self.thresholds.write().unwrap_or_else(|e| e.into_inner());
        match name {
            "confirmPermille" => t.confirm = fraction,
            "blockPermille" => t.block = fraction,
            "consentPermille" => t.consent = fraction,
            _ => return Err(Error::NotFound(format!("setting '{}'", name))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::consent::ConsentRegistry;
    use keystone_core::SettingsBag;
    use serde_json::json;

    fn plan(skill: &str, args: serde_json::Value) -> Plan {
        Plan::new("g", vec![PlanStep::new(skill, args)])
    }

    #[test]
    fn test_keyword_escalation() {
        let step = PlanStep::new("Device.Control", json!({"action": "lights_off", "target": "all_lights"}));
        // "all_lights" splits into "all" and "lights"
        let risk = score_step(&step, skill_default("Device.Control"));
        assert!((risk - 0.55).abs() < 1e-9);

        let step = PlanStep::new("Device.Control", json!({"target": "ball"}));
        assert!((score_step(&step, skill_default("Device.Control")) - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_low_risk_is_approved() {
        let guard = PolicyGuard::new();
        let decision = guard.evaluate(&plan("Chat.Answer", json!({"utterance": "hello"}))).await;
        assert_eq!(decision, PolicyDecision::Approved);
    }

    #[tokio::test]
    async fn test_shared_needs_confirmation_and_wipe_blocks() {
        let guard = PolicyGuard::new();
        let decision = guard.evaluate(&plan("Device.Control", json!({"target": "shared_printer"}))).await;
        assert!(matches!(decision, PolicyDecision::RequiresConfirmation { .. }));

        let decision = guard
            .evaluate(&plan("System.Admin", json!({"action": "format", "target": "shared_drive"})))
            .await;
        match decision {
            PolicyDecision::Blocked { reason } => assert!(reason.starts_with("violates 'harm none'")),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_consent_is_checked_through_registry() {
        let registry = CapabilityRegistry::new();
        let consent = Arc::new(ConsentRegistry::new());
        let guard = Arc::new(PolicyGuard::new());
        registry.register_provider(consent.clone()).unwrap();
        registry.register_provider(guard.clone()).unwrap();
        registry.apply_configuration("Policy", &SettingsBag::new().with("consentPermille", 100));

        let p = plan("System.Open", json!({"target": "notepad"}));
        assert!(matches!(guard.evaluate(&p).await, PolicyDecision::RequiresConfirmation { .. }));

        consent.grant("System.Open", "");
        assert_eq!(guard.evaluate(&p).await, PolicyDecision::Approved);
    }

    #[tokio::test]
    async fn test_disabled_consent_module_means_missing_consent() {
        let registry = CapabilityRegistry::new();
        let consent = Arc::new(ConsentRegistry::new());
        let guard = Arc::new(PolicyGuard::new());
        registry.register_provider(consent.clone()).unwrap();
        registry.register_provider(guard.clone()).unwrap();
        registry.apply_configuration("Policy", &SettingsBag::new().with("consentPermille", 100));
        consent.grant("System.Open", "");

        let p = plan("System.Open", json!({"target": "notepad"}));
        assert_eq!(guard.evaluate(&p).await, PolicyDecision::Approved);

        registry.apply_configuration("Consent", &SettingsBag::new().with("enabled", false));
        match guard.evaluate(&p).await {
            PolicyDecision::RequiresConfirmation { reason } => assert!(reason.contains("consent=missing")),
            other => panic!("expected confirmation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_input_blocks() {
        let out = PolicyGuard::new().process("garbage").await.unwrap();
        assert_eq!(out, r#"{"verdict":"blocked","reason":"invalid plan json"}"#);
        let out = PolicyGuard::new().process(r#"{"goal":"g","steps":[]}"#).await.unwrap();
        assert_eq!(out, r#"{"verdict":"blocked","reason":"empty plan"}"#);
    }

    #[test]
    fn test_threshold_settings_range() {
        let guard = PolicyGuard::new();
        assert!(guard.apply_setting("blockPermille", &SettingValue::Int(900)).is_ok());
        assert!(guard.apply_setting("blockPermille", &SettingValue::Int(1500)).is_err());
        assert!((guard.thresholds().block - 0.9).abs() < 1e-9);
    }
}
