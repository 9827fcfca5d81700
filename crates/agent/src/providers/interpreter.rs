use async_trait::async_trait;
use keystone_core::{Intent, Result};
use keystone_modules::CapabilityProvider;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::debug;

/// Lifecycle event raised once all built-ins are registered and configured.
pub const WARMUP: &str = "Warmup";

/// Intent categories the interpreter can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    DeviceControl,
    SystemOpen,
    SystemAdmin,
    ChatAnswer,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::DeviceControl => "device.control",
            IntentKind::SystemOpen => "system.open",
            IntentKind::SystemAdmin => "system.admin",
            IntentKind::ChatAnswer => "chat.answer",
        }
    }
}

struct IntentRule {
    kind: IntentKind,
    pattern: Regex,
    priority: u8,
}

static RULES: Lazy<Vec<IntentRule>> = Lazy::new(|| {
    let mut rules = vec![
        // ── Device control ──
        IntentRule {
            kind: IntentKind::DeviceControl,
            pattern: Regex::new(r"(?i)^(?:please\s+)?(?:turn|switch)\s+(?P<state>on|off)\s+(?P<target>.+)$").unwrap(),
            priority: 9,
        },
        IntentRule {
            kind: IntentKind::DeviceControl,
            pattern: Regex::new(r"(?i)^(?:please\s+)?(?:turn|switch)\s+(?P<target>.+?)\s+(?P<state>on|off)$").unwrap(),
            priority: 9,
        },
        IntentRule {
            kind: IntentKind::DeviceControl,
            pattern: Regex::new(r"(?i)^(?:please\s+)?set\s+(?P<target>.+?)\s+to\s+(?P<value>.+)$").unwrap(),
            priority: 8,
        },
        // ── Administrative ──
        IntentRule {
            kind: IntentKind::SystemAdmin,
            pattern: Regex::new(r"(?i)^(?:please\s+)?(?P<verb>shutdown|shut\s+down|reboot|restart|format|delete)(?:\s+(?P<target>.+))?$")
                .unwrap(),
            priority: 8,
        },
        // ── Open ──
        IntentRule {
            kind: IntentKind::SystemOpen,
            pattern: Regex::new(r"(?i)^(?:please\s+)?(?:open|launch|start)\s+(?P<target>.+)$").unwrap(),
            priority: 6,
        },
    ];
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    rules
});

/// Lower-case, strip articles and punctuation, join words with `_`.
fn normalize_target(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| !matches!(w.as_str(), "the" | "a" | "an" | "my"))
        .collect::<Vec<_>>()
        .join("_")
}

/// Rule-based natural language interpreter.
///
/// Emits `{"intent", "action", "target", "utterance"}` and, for `set`,
/// a `value`. Anything no rule matches is a `chat.answer` intent.
#[derive(Default)]
pub struct Interpreter;

impl Interpreter {
    pub fn new() -> Self {
        Self
    }

    pub fn interpret(&self, utterance: &str) -> Option<Intent> {
        let text = utterance.trim().trim_end_matches(['.', '!']);
        if text.is_empty() {
            return None;
        }

        for rule in RULES.iter() {
            let Some(caps) = rule.pattern.captures(text) else {
                continue;
            };
            let target = caps.name("target").map(|m| normalize_target(m.as_str()));

            let intent = match rule.kind {
                IntentKind::DeviceControl => {
                    let target = target.filter(|t| !t.is_empty())?;
                    if let Some(state) = caps.name("state") {
                        let state = state.as_str().to_lowercase();
                        json!({
                            "intent": rule.kind.as_str(),
                            "action": format!("{}_{}", target, state),
                            "target": target,
                            "state": state,
                            "utterance": text,
                        })
                    } else {
                        let value = caps.name("value").map(|m| m.as_str().trim()).unwrap_or_default();
                        json!({
                            "intent": rule.kind.as_str(),
                            "action": "set",
                            "target": target,
                            "value": value,
                            "utterance": text,
                        })
                    }
                }
                IntentKind::SystemAdmin => {
                    let verb = caps
                        .name("verb")
                        .map(|m| m.as_str().split_whitespace().collect::<String>().to_lowercase())
                        .unwrap_or_default();
                    json!({
                        "intent": rule.kind.as_str(),
                        "action": verb,
                        "target": target.unwrap_or_else(|| "system".to_string()),
                        "utterance": text,
                    })
                }
                IntentKind::SystemOpen => json!({
                    "intent": rule.kind.as_str(),
                    "action": "open",
                    "target": target.unwrap_or_default(),
                    "utterance": text,
                }),
                IntentKind::ChatAnswer => continue,
            };
            debug!(intent = rule.kind.as_str(), "Utterance interpreted");
            return Some(intent);
        }

        Some(json!({
            "intent": IntentKind::ChatAnswer.as_str(),
            "action": "answer",
            "target": "conversation",
            "utterance": text,
        }))
    }
}

#[async_trait]
impl CapabilityProvider for Interpreter {
    fn name(&self) -> &str {
        "Interpreter"
    }

    fn aliases(&self) -> Vec<String> {
        vec!["NLU".to_string()]
    }

    async fn process(&self, input: &str) -> Result<String> {
        Ok(self.interpret(input).map(|i| i.to_string()).unwrap_or_default())
    }

    fn on_system_event(&self, name: &str, _payload: &serde_json::Value) -> Result<()> {
        if name == WARMUP {
            debug!(rules = Lazy::force(&RULES).len(), "Intent rules compiled");
        }
        Ok(())
    }
}
