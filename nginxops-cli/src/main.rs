//! nginxops: GitOps-driven nginx configuration management.
//!
//! # Usage
//!
//! ```text
//! nginxops serve [--config-dir <dir>]
//! nginxops reload [--config-dir <dir>]
//! ```
//!
//! `serve` runs the reconcilers and the operator API until SIGINT/SIGTERM;
//! SIGHUP hot-reloads `servers.yaml` without touching the API. `reload`
//! validates the new `servers.yaml` and delivers that SIGHUP to the running
//! daemon via its PID file.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{reload::ReloadArgs, serve::ServeArgs};

#[derive(Parser, Debug)]
#[command(
    name = "nginxops",
    version,
    about = "Keep fleet nginx configuration synchronized with Git via a coordination store",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the reconcilers and the operator API server.
    Serve(ServeArgs),

    /// Hot-reload servers.yaml in a running daemon (sends SIGHUP).
    Reload(ReloadArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => args.run().await,
        Commands::Reload(args) => args.run(),
    }
}
