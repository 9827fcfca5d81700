pub mod agent;
pub mod config_cmd;
pub mod modules_cmd;
pub mod status;

use keystone_agent::AgentRuntime;
use keystone_core::{Config, Paths};

/// Load the config (or defaults) and build a runtime from it.
pub(crate) fn load_runtime() -> anyhow::Result<AgentRuntime> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    Ok(AgentRuntime::new(config))
}
