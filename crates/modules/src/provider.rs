use std::sync::Arc;

use async_trait::async_trait;
use keystone_core::{Result, SettingSpec, SettingValue};

use crate::registry::CapabilityRegistry;

/// A named unit of functionality reachable through the uniform command
/// interface.
///
/// `process` takes free text (or a JSON document serialized as text) and
/// answers with text. An empty answer means "no answer"; errors and panics
/// are contained by the dispatcher and never reach the caller.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Name the provider reports for itself. May differ from the name it
    /// was registered under.
    fn name(&self) -> &str;

    /// Additional lookup names.
    fn aliases(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once after the provider is stored in the registry. Providers
    /// that need siblings keep a `Weak` to the registry, not an `Arc`.
    fn init(&self, _registry: &Arc<CapabilityRegistry>) -> Result<()> {
        Ok(())
    }

    async fn process(&self, input: &str) -> Result<String>;

    /// Writable settings this provider accepts through `apply_configuration`.
    fn settings(&self) -> Vec<SettingSpec> {
        Vec::new()
    }

    /// Assign an already-coerced value to a declared setting.
    fn apply_setting(&self, name: &str, _value: &SettingValue) -> Result<()> {
        Err(keystone_core::Error::NotFound(format!("setting '{}'", name)))
    }

    /// Lifecycle broadcast such as `Warmup`. Ignored unless overridden.
    fn on_system_event(&self, _name: &str, _payload: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        Ok(())
    }
}
