use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "storage-gateway")]
#[command(about = "HTTP gateway over filesystem, memory and S3 storage backends", long_about = None)]
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
    /// Run the gateway HTTP server
    Serve {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Validate a configuration file and list its backends
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Output format (text, json)
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
        Commands::Serve { config, bind } => {
            commands::serve::run(&config, bind.as_deref()).await?;
        }
        Commands::Check { config, format } => {
            commands::check::run(&config, &format).await?;
        }
    }

    Ok(())
}
