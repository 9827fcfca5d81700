use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use super::load_runtime;

const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

pub async fn run(message: Option<String>, session: String) -> anyhow::Result<()> {
    let runtime = Arc::new(load_runtime()?);
    let report = runtime.load_report();
    for (name, error) in &report.failed {
        eprintln!("Warning: module {} failed to load: {}", name, error);
    }

    if let Some(message) = message {
        let reply = runtime.router().handle(&session, &message).await;
        println!("{}", reply);
        runtime.shutdown();
        return Ok(());
    }

    // Expired confirmations are cleared even if nobody types.
    let sweeper = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let swept = runtime.router().sweep_all();
                if swept > 0 {
                    debug!(swept, "Cleared expired confirmations");
                }
            }
        })
    };

    println!("keystone interactive mode (session: {})", session);
    println!("Type /quit to exit, `help` for commands.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "/quit" | "/exit") {
            break;
        }

        let reply = runtime.router().handle(&session, input).await;
        println!("{}", reply);
        println!();
    }

    sweeper.abort();
    runtime.shutdown();
    info!(session = %session, "Interactive session ended");
    Ok(())
}
