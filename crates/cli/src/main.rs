//! PKE CLI, the main entry point.
//!
//! Commands:
//! - `onboard`   Write a default config
//! - `serve`     Start the HTTP gateway and audit retention sweeper
//! - `status`    Show the effective configuration
//! - `doctor`    Check config, API key and store
//! - `evidence`  Print a course's evidence report

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "pke",
    about = "PKE: course-authoring invocation workflow engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "PKE_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration to ~/.pke/config.toml
    Onboard,

    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the store backend (memory, file, sqlite)
        #[arg(long)]
        store: Option<String>,
    },

    /// Show the effective configuration
    Status,

    /// Diagnose configuration and storage
    Doctor,

    /// Print the evidence report of a course
    Evidence {
        /// Course ID
        course_id: String,

        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Serve { port, store } => commands::serve::run(port, store).await?,
        Commands::Status => commands::status::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Evidence { course_id, json } => commands::evidence::run(&course_id, json).await?,
    }

    Ok(())
}
