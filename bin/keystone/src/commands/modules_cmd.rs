use keystone_modules::Dispatch;

use super::load_runtime;

/// List all registered modules.
pub async fn list() -> anyhow::Result<()> {
    let runtime = load_runtime()?;
    let modules = runtime.registry().describe();

    println!();
    println!("Registered modules ({} total)", modules.len());
    println!();
    for m in &modules {
        let aliases = if m.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aka {})", m.aliases.join(", "))
        };
        println!(
            "  {:<16} {:<8} {:>6}ms{}",
            m.name,
            if m.enabled { "enabled" } else { "disabled" },
            m.timeout_ms,
            aliases
        );
    }
    println!();

    runtime.shutdown();
    Ok(())
}

/// Show one module's description as JSON.
pub async fn info(name: &str) -> anyhow::Result<()> {
    let runtime = load_runtime()?;
    let Some(entry) = runtime.registry().entry(name) else {
        runtime.shutdown();
        anyhow::bail!("no module named '{}'", name);
    };
    let described = runtime
        .registry()
        .describe()
        .into_iter()
        .find(|m| m.name == entry.name());
    if let Some(m) = described {
        println!("{}", serde_json::to_string_pretty(&m)?);
    }
    runtime.shutdown();
    Ok(())
}

/// Send raw input to a module and print what came back.
pub async fn invoke(name: &str, input: &str) -> anyhow::Result<()> {
    let runtime = load_runtime()?;
    let result = runtime.dispatcher().dispatch(name, input).await;
    runtime.shutdown();

    match result {
        Dispatch::Answered(answer) => println!("{}", answer),
        Dispatch::Empty => println!("(no answer)"),
        Dispatch::NotFound => anyhow::bail!("no module named '{}'", name),
        Dispatch::Disabled => anyhow::bail!("module '{}' is disabled", name),
        Dispatch::Failed(diag) | Dispatch::TimedOut(diag) => anyhow::bail!(diag),
    }
    Ok(())
}
