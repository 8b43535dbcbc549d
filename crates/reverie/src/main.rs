//! Reverie - persona vector-memory engine
//!
//! Main entry point for the Reverie CLI.

use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;

use commands::{apikey, initdb, start, status, CliError};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Reverie - persona vector-memory engine
#[derive(Parser)]
#[command(name = "reverie")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Metadata database path
    #[arg(long, global = true, env = "REVERIE_DB_PATH", default_value = "reverie.db")]
    pub db_path: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the metadata database schema
    InitDb(initdb::InitDbArgs),

    /// Manage API keys
    #[command(subcommand)]
    Apikey(apikey::ApikeyCommand),

    /// Start the HTTP server
    Start(start::StartArgs),

    /// Probe a running server's health endpoint
    Status(status::StatusArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Console logging plus a rotating JSON file.
    let filter = if cli.verbose {
        "reverie=debug,reverie_core=debug,reverie_memory=debug,reverie_server=debug,info"
    } else {
        "reverie=info,reverie_core=info,reverie_memory=info,reverie_server=info,warn"
    };

    std::fs::create_dir_all("logs").ok();
    let file_appender = tracing_appender::rolling::daily("logs", "reverie.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let ctx = commands::Context {
        db_path: cli.db_path,
        verbose: cli.verbose,
    };

    let result = match cli.command {
        Commands::InitDb(args) => initdb::run(args, &ctx),
        Commands::Apikey(command) => apikey::run(command, &ctx),
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Status(args) => status::run(args, &ctx).await,
    };

    // Exit codes: 0 success, 1 validation error, 2 runtime failure.
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Validation(message)) => {
            eprintln!("error: {}", message);
            ExitCode::from(1)
        }
        Err(CliError::Runtime(error)) => {
            eprintln!("error: {:#}", error);
            ExitCode::from(2)
        }
    }
}
