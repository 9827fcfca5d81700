mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "keystone")]
#[command(about = "A module runtime with a confirm-before-act agent pipeline", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration and loaded modules
    Status,

    /// Talk to the agent
    Agent {
        /// Message to send (interactive mode if not provided)
        #[arg(short, long)]
        message: Option<String>,

        /// Session ID
        #[arg(short, long, default_value = "cli:default")]
        session: String,
    },

    /// Inspect and invoke registered modules
    Modules {
        #[command(subcommand)]
        command: ModulesCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ModulesCommands {
    /// List registered modules
    List,
    /// Show one module's settings and state
    Info {
        /// Module name or alias
        name: String,
    },
    /// Send raw input to a module and print its answer
    Invoke {
        /// Module name or alias
        name: String,
        /// Input text
        input: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Agent { message, session } => {
            commands::agent::run(message, session).await?;
        }
        Commands::Modules { command } => match command {
            ModulesCommands::List => {
                commands::modules_cmd::list().await?;
            }
            ModulesCommands::Info { name } => {
                commands::modules_cmd::info(&name).await?;
            }
            ModulesCommands::Invoke { name, input } => {
                commands::modules_cmd::invoke(&name, &input).await?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show().await?;
            }
            ConfigCommands::Init { force } => {
                commands::config_cmd::init(force).await?;
            }
        },
    }

    Ok(())
}
