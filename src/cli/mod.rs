//! Command-line interface for inboxd.
//!
//! Provides commands for running the daemon in the foreground or in the
//! background, stopping it, and inspecting its state and history.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::adapters::CommandProcessor;
use crate::config::DaemonConfig;
use crate::core::{requeue_failed, status, Daemon, Ledger, PidFile};

/// How long `start` waits for the background daemon to come up
const START_WAIT: Duration = Duration::from_secs(5);

/// How long `stop` waits for the daemon to exit
const STOP_WAIT: Duration = Duration::from_secs(15);

/// inboxd - inbox watcher with a durable, deduplicating priority job queue
#[derive(Parser, Debug)]
#[command(name = "inboxd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: .inboxd/config.yaml in this directory or a parent)
    #[arg(long, global = true, env = "INBOXD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon in the foreground until Ctrl-C or SIGTERM
    Run,

    /// Start the daemon in the background
    Start,

    /// Stop a background daemon
    Stop,

    /// Show daemon and folder status
    Status,

    /// Show recent entries of the action log
    History {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move dead-lettered files back into the inbox
    RequeueFailed,

    /// Show resolved configuration
    Config,
}

impl Cli {
    pub fn load_config(&self) -> Result<DaemonConfig> {
        Ok(DaemonConfig::load(self.config.as_deref())?)
    }

    /// Log to stderr; `run` also appends to `state/watcher.log`
    pub fn init_tracing(&self, config: &DaemonConfig) -> Result<()> {
        let log_file = match self.command {
            Commands::Run => Some(config.paths.log_path()),
            _ => None,
        };
        init_tracing(log_file.as_deref())
    }

    pub async fn execute(self, config: DaemonConfig) -> Result<()> {
        match self.command {
            Commands::Run => run_foreground(config).await,
            Commands::Start => start_background(&config),
            Commands::Stop => stop_background(&config),
            Commands::Status => show_status(&config).await,
            Commands::History { limit, json } => show_history(&config, limit, json),
            Commands::RequeueFailed => {
                let moved = requeue_failed(&config).await?;
                println!("Requeued {} file(s) from {}", moved, config.paths.failed.display());
                Ok(())
            }
            Commands::Config => show_config(&config),
        }
    }
}

/// Set up the global subscriber: `RUST_LOG` filter (default `info`),
/// stderr output, and an optional plain-text log file
pub fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(())
}

async fn run_foreground(config: DaemonConfig) -> Result<()> {
    let processor = CommandProcessor::from_command(
        &config.processor.command,
        Some(config.processor.model.clone()),
    )
    .context("processor.command is empty")?;

    Daemon::new(config, Arc::new(processor)).run().await
}

/// Re-exec ourselves as `inboxd run`, detached from the terminal
fn start_background(config: &DaemonConfig) -> Result<()> {
    let pid_path = config.paths.pid_path();
    if PidFile::is_held(&pid_path) {
        let pid = PidFile::read_pid(&pid_path)
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("inboxd is already running (pid {})", pid);
        return Ok(());
    }

    let exe = std::env::current_exe().context("Failed to locate the inboxd executable")?;
    let mut command = Command::new(exe);
    if let Some(config_file) = &config.config_file {
        command.arg("--config").arg(config_file);
    }
    command
        .arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so the terminal's Ctrl-C does not reach it
        command.process_group(0);
    }

    let mut child = command.spawn().context("Failed to start background daemon")?;

    let deadline = Instant::now() + START_WAIT;
    while Instant::now() < deadline {
        if PidFile::is_held(&pid_path) {
            println!("✅ inboxd started (pid {})", child.id());
            println!("   Log: {}", config.paths.log_path().display());
            return Ok(());
        }
        if let Some(exit) = child.try_wait()? {
            anyhow::bail!(
                "inboxd exited during startup ({}); see {}",
                exit,
                config.paths.log_path().display()
            );
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    anyhow::bail!(
        "inboxd did not come up within {:?}; see {}",
        START_WAIT,
        config.paths.log_path().display()
    )
}

/// Send SIGTERM to the daemon named in the pid file and wait for it
fn stop_background(config: &DaemonConfig) -> Result<()> {
    let pid_path = config.paths.pid_path();

    if !PidFile::is_held(&pid_path) {
        println!("inboxd is not running");
        return Ok(());
    }

    let pid = PidFile::read_pid(&pid_path).context("Pid file is held but holds no pid")?;
    send_terminate(pid)?;

    let deadline = Instant::now() + STOP_WAIT;
    while Instant::now() < deadline {
        if !PidFile::is_held(&pid_path) {
            println!("✅ inboxd stopped (pid {})", pid);
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    anyhow::bail!("inboxd (pid {}) did not stop within {:?}", pid, STOP_WAIT)
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    let status = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .context("Failed to run kill")?;

    if !status.success() {
        anyhow::bail!("kill -TERM {} failed ({})", pid, status);
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> Result<()> {
    anyhow::bail!("inboxd stop is only supported on Unix; stop the foreground process instead")
}

async fn show_status(config: &DaemonConfig) -> Result<()> {
    let status = status(config).await?;

    let state = match (status.running, status.pid) {
        (true, Some(pid)) => format!("running (pid {})", pid),
        (true, None) => "running".to_string(),
        (false, _) => "stopped".to_string(),
    };

    println!("inboxd: {}", state);
    println!("  Root:            {}", config.paths.root.display());
    println!("  Pending (inbox): {}", status.pending);
    println!("  In flight:       {}", status.in_flight);
    println!("  Dead-lettered:   {}", status.dead_lettered);
    println!("  Processed total: {}", status.processed_total);

    if status.dead_lettered > 0 {
        println!();
        println!("Run `inboxd requeue-failed` to retry dead-lettered files.");
    }

    Ok(())
}

fn show_history(config: &DaemonConfig, limit: usize, json: bool) -> Result<()> {
    let db_path = config.paths.db_path();
    if !db_path.exists() {
        println!("No history yet ({} does not exist)", db_path.display());
        return Ok(());
    }

    let ledger = Ledger::open(&db_path)?;
    let entries = ledger.recent_actions(limit)?;
    ledger.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No history yet");
        return Ok(());
    }

    println!("{:<20} {:<22} {:<32} DETAILS", "TIME", "ACTION", "FILE");
    println!("{}", "-".repeat(100));

    for entry in entries {
        println!(
            "{:<20} {:<22} {:<32} {}",
            entry.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            truncate(&entry.filename, 32),
            entry.details
        );
    }

    Ok(())
}

fn show_config(config: &DaemonConfig) -> Result<()> {
    println!(
        "# Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{}…", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_history_flags() {
        let cli =
            Cli::try_parse_from(["inboxd", "history", "--limit", "5", "--json"]).unwrap();
        match cli.command {
            Commands::History { limit, json } => {
                assert_eq!(limit, 5);
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli =
            Cli::try_parse_from(["inboxd", "status", "--config", "/etc/inboxd.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/inboxd.yaml")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_requeue_failed_is_kebab_case() {
        let cli = Cli::try_parse_from(["inboxd", "requeue-failed"]).unwrap();
        assert!(matches!(cli.command, Commands::RequeueFailed));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short.pdf", 32), "short.pdf");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }
}
