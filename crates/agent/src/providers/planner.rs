use async_trait::async_trait;
use keystone_core::{Intent, Plan, PlanStep, Result};
use keystone_modules::CapabilityProvider;
use tracing::debug;

use super::skills::{CHAT_ANSWER, DEVICE_CONTROL, SYSTEM_ADMIN, SYSTEM_OPEN};

/// Skill that carries out an intent category.
fn skill_for(intent: &str) -> &'static str {
    match intent {
        "device.control" => DEVICE_CONTROL,
        "system.open" => SYSTEM_OPEN,
        "system.admin" => SYSTEM_ADMIN,
        _ => CHAT_ANSWER,
    }
}

/// Turns an interpreted intent into a one-step plan.
#[derive(Default)]
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(&self, intent: &Intent) -> Option<Plan> {
        let obj = intent.as_object()?;
        let kind = obj.get("intent").and_then(|v| v.as_str()).unwrap_or_default();
        let skill = skill_for(kind);

        let goal = obj
            .get("utterance")
            .and_then(|v| v.as_str())
            .or_else(|| obj.get("action").and_then(|v| v.as_str()))
            .unwrap_or(kind)
            .to_string();

        debug!(intent = %kind, skill = %skill, "Plan derived");
        Some(Plan::new(&goal, vec![PlanStep::new(skill, intent.clone())]))
    }
}

#[async_trait]
impl CapabilityProvider for Planner {
    fn name(&self) -> &str {
        "Planner"
    }

    async fn process(&self, input: &str) -> Result<String> {
        let Ok(intent) = serde_json::from_str::<Intent>(input) else {
            return Ok(String::new());
        };
        Ok(self.plan(&intent).map(|p| p.to_json()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_device_intent_plans_device_step() {
        let intent = json!({"intent": "device.control", "action": "lights_off", "utterance": "turn off the lights"});
        let out = Planner::new().process(&intent.to_string()).await.unwrap();
        let plan: Plan = serde_json::from_str(&out).unwrap();
        assert_eq!(plan.goal, "turn off the lights");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].capability, "Device.Control");
        assert_eq!(plan.steps[0].args["action"], "lights_off");
    }

    #[test]
    fn test_unknown_intent_falls_back_to_chat() {
        let plan = Planner::new().plan(&json!({"intent": "weather.ask"})).unwrap();
        assert_eq!(plan.steps[0].capability, "Chat.Answer");
    }

    #[tokio::test]
    async fn test_invalid_input_answers_nothing() {
        assert_eq!(Planner::new().process("not json").await.unwrap(), "");
        assert_eq!(Planner::new().process("[1,2]").await.unwrap(), "");
    }
}
