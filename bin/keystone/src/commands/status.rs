use keystone_agent::AgentRuntime;
use keystone_core::{Config, Paths};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("keystone status");
    println!("===============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (using defaults)" }
    );
    println!("Logs:      {}", paths.logs_dir().display());

    let config = Config::load_or_default(&paths)?;
    println!();
    println!("Confirmation TTL:  {}s", config.agent.confirm_ttl_secs);
    println!("Dispatch timeout:  {}ms", config.agent.dispatch_timeout_ms);
    println!(
        "Policy:            confirm >= {:.2}, block >= {:.2}, consent >= {:.2}",
        config.policy.confirm_threshold, config.policy.block_threshold, config.policy.consent_severity
    );

    let runtime = AgentRuntime::new(config);
    println!();
    println!("Modules:");
    for m in runtime.registry().describe() {
        println!("  {:<16} {}", m.name, if m.enabled { "✓" } else { "✗ disabled" });
    }
    for (name, error) in &runtime.load_report().failed {
        println!("  {:<16} ✗ {}", name, error);
    }

    let skipped: usize = runtime.apply_reports().iter().map(|r| r.skipped.len()).sum();
    if skipped > 0 {
        println!();
        println!("⚠ {} configured setting(s) were not applied; run with --verbose for details", skipped);
    }

    runtime.shutdown();
    Ok(())
}
