//! `nginxops reload`: validate the new servers.yaml, then deliver SIGHUP
//! to the running daemon found via its PID file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use nginxops_core::config;
use nginxops_daemon::pidfile;

#[derive(Args, Debug)]
pub struct ReloadArgs {
    /// Directory searched for servers.yaml (`<dir>/configs` is tried first).
    #[arg(long, default_value = ".")]
    pub config_dir: PathBuf,
}

impl ReloadArgs {
    pub fn run(self) -> Result<()> {
        // Validate before signalling so a broken edit never reaches the
        // running fleet.
        println!("Validating servers.yaml configuration...");
        config::load_server_groups_at(&self.config_dir)
            .context("configuration validation failed")?;
        println!("Configuration validation passed.");

        let pid = pidfile::read_pid().with_context(|| {
            format!(
                "failed to read PID file ({}); is nginxops running?",
                pidfile::pid_file_path().display()
            )
        })?;

        println!("Sending SIGHUP to process {pid}...");
        kill(Pid::from_raw(pid), Signal::SIGHUP).context("failed to send SIGHUP")?;

        println!("Reload signal sent. Check the daemon logs for reload status.");
        Ok(())
    }
}
