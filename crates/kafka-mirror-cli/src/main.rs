use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "kafka-mirror")]
#[command(about = "Mirror Kafka topics from a source cluster to a sink cluster", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Recreate the requested topics on the sink and mirror them until Ctrl-C
    Run {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Topic specs (topic, topic@offset, topic@p:o,p:o); replaces the
        /// configured topics when given
        topics: Vec<String>,

        /// Deadline for each reconciliation step, in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Show what a run would change on the sink without changing it
    Plan {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Topic specs; replaces the configured topics when given
        topics: Vec<String>,

        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            config,
            topics,
            timeout_secs,
        } => {
            commands::run::run(&config, topics, timeout_secs).await?;
        }
        Commands::Plan {
            config,
            topics,
            format,
        } => {
            commands::plan::run(&config, topics, &format).await?;
        }
    }

    Ok(())
}
