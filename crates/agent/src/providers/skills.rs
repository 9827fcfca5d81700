use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use keystone_core::{Error, Result};
use keystone_modules::CapabilityProvider;
use serde_json::Value;
use tracing::info;

pub const DEVICE_CONTROL: &str = "Device.Control";
pub const SYSTEM_OPEN: &str = "System.Open";
pub const SYSTEM_ADMIN: &str = "System.Admin";
pub const CHAT_ANSWER: &str = "Chat.Answer";

fn parse_args(input: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(input)?;
    if !value.is_object() {
        return Err(Error::Validation("arguments must be a JSON object".to_string()));
    }
    Ok(value)
}

fn arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

fn display(target: &str) -> String {
    target.replace('_', " ")
}

/// In-memory device states keyed by target.
#[derive(Default)]
pub struct DeviceControl {
    states: Mutex<BTreeMap<String, String>>,
}

impl DeviceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, target: &str) -> Option<String> {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).get(target).cloned()
    }

    fn set(&self, target: &str, value: &str) {
        info!(device = %target, value = %value, "Device state changed");
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(target.to_string(), value.to_string());
    }
}

#[async_trait]
impl CapabilityProvider for DeviceControl {
    fn name(&self) -> &str {
        DEVICE_CONTROL
    }

    async fn process(&self, input: &str) -> Result<String> {
        let args = parse_args(input)?;
        let target = arg(&args, "target").ok_or_else(|| Error::Validation("no device target".to_string()))?;

        if let Some(state) = arg(&args, "state") {
            self.set(target, state);
            return Ok(format!("{} turned {}", display(target), state));
        }
        match (arg(&args, "action"), arg(&args, "value")) {
            (Some("set"), Some(value)) => {
                self.set(target, value);
                Ok(format!("{} set to {}", display(target), value))
            }
            (action, _) => Err(Error::Validation(format!(
                "unsupported device action '{}'",
                action.unwrap_or_default()
            ))),
        }
    }
}

/// Records what was asked to be opened.
#[derive(Default)]
pub struct SystemOpen {
    opened: Mutex<Vec<String>>,
}

impl SystemOpen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CapabilityProvider for SystemOpen {
    fn name(&self) -> &str {
        SYSTEM_OPEN
    }

    async fn process(&self, input: &str) -> Result<String> {
        let args = parse_args(input)?;
        let target = arg(&args, "target").ok_or_else(|| Error::Validation("nothing to open".to_string()))?;
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).push(target.to_string());
        Ok(format!("Opened {}", display(target)))
    }
}

/// Administrative actions (shutdown, reboot, delete, format). Only
/// acknowledged and logged.
#[derive(Default)]
pub struct SystemAdmin {
    log: Mutex<Vec<String>>,
}

impl SystemAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CapabilityProvider for SystemAdmin {
    fn name(&self) -> &str {
        SYSTEM_ADMIN
    }

    async fn process(&self, input: &str) -> Result<String> {
        let args = parse_args(input)?;
        let action = arg(&args, "action").ok_or_else(|| Error::Validation("no admin action".to_string()))?;
        let target = arg(&args, "target").unwrap_or("system");
        let entry = format!("{} {}", action, display(target));
        info!(action = %action, on = %target, "Administrative action acknowledged");
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(entry.clone());
        Ok(format!("Acknowledged: {}", entry))
    }
}

#[derive(Default)]
pub struct ChatAnswer;

#[async_trait]
impl CapabilityProvider for ChatAnswer {
    fn name(&self) -> &str {
        CHAT_ANSWER
    }

    async fn process(&self, input: &str) -> Result<String> {
        let args = parse_args(input)?;
        let utterance = arg(&args, "utterance").unwrap_or("(nothing)");
        Ok(format!("Noted: {}", utterance))
    }
}
