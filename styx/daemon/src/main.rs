//! Styx Daemon - Multi-Transport File Server
//!
//! Entry point for the styx daemon. Serves the file protocol on every
//! configured target at once: TCP, Unix domain sockets, Windows named pipes
//! and Hyper-V sockets (listening or dialing out).
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (tcp://127.0.0.1:5640)
//! styx-daemon
//!
//! # Several targets
//! styx-daemon --listen tcp://0.0.0.0:564,file:///run/styx/styx.sock
//!
//! # With config file
//! styx-daemon --config /etc/styx/styx.toml
//!
//! # Verbose logging
//! RUST_LOG=debug styx-daemon
//! ```
//!
//! # Exit Status
//!
//! `1` on an unknown target scheme, a bind failure, a configuration error or
//! an interrupt. The server does not stop on its own otherwise.

mod server;
mod signals;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use styx_core::config::parse_target_list;
use styx_core::{
    load_config, load_config_from_path, ConfigOverrides, ExitReason, ShutdownContext, StoreKind,
    StyxConfig,
};

use server::DaemonServer;

/// Styx Daemon - file server over TCP, Unix sockets, named pipes and Hyper-V sockets
#[derive(Parser, Debug)]
#[command(name = "styx-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Comma-separated listen/dial targets (overrides STYX_LISTEN)
    #[arg(short = 'l', long, value_name = "URLS")]
    listen: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "STYX_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory that file:// targets are placed under
    #[arg(long, value_name = "DIR")]
    sandbox_root: Option<PathBuf>,

    /// Listen backlog
    #[arg(long, value_name = "N")]
    backlog: Option<u32>,

    /// Store implementation
    #[arg(long, value_name = "KIND")]
    store: Option<StoreKind>,

    /// Serve the store read-only
    #[arg(long)]
    read_only: bool,

    /// Prefix prepended to every client path
    #[arg(long, value_name = "PREFIX")]
    path_rewrite: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

impl Args {
    /// Command-line layer of the configuration
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            targets: self.listen.as_deref().map(parse_target_list),
            sandbox_root: self.sandbox_root.clone(),
            backlog: self.backlog,
            store: self.store,
            read_only: self.read_only.then_some(true),
            path_rewrite: self.path_rewrite.clone(),
            log_level: self.log_level.clone(),
            log_file: self.log_file.clone(),
        }
    }
}

/// Resolve the full configuration: defaults, file, environment, CLI
fn resolve_config(args: &Args) -> Result<StyxConfig> {
    let loaded = match &args.config {
        Some(path) if !path.exists() => {
            anyhow::bail!("Config file not found: {}", path.display())
        }
        Some(path) => load_config_from_path(Some(path.clone())),
        None => load_config(),
    };

    let mut config = loaded.context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Initialize logging with the specified level
fn init_logging(level: &str, file: Option<&Path>) -> Result<()> {
    let level = level.to_lowercase();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("styx_daemon={level},styx_core={level}"))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match file {
        Some(path) => {
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(log_file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

async fn run(args: Args) -> Result<ExitReason> {
    signals::ignore_broken_pipe()?;

    let config = resolve_config(&args)?;
    init_logging(&config.log_level, config.log_file.as_deref())?;

    info!("Styx daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());
    info!(source = %config.source(), targets = ?config.targets, "Configuration loaded");
    if let Some(ref path) = config.config_file_path {
        info!(config_path = ?path, "Config file");
    }

    let shutdown = ShutdownContext::new();
    let _signals = signals::spawn(shutdown.clone())?;

    let reason = DaemonServer::new(config).run(shutdown).await?;
    Ok(reason)
}

#[tokio::main]
async fn main() {
    let code = match run(Args::parse()).await {
        Ok(reason) => {
            info!(reason = %reason, "Styx daemon stopped");
            reason.exit_code()
        }
        Err(e) => {
            error!(error = %e, "Styx daemon stopped with error");
            eprintln!("styx-daemon: {e:#}");
            1
        }
    };

    // Blocking accept/connect calls cannot be cancelled; exit without
    // waiting for the runtime to drain them.
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::io::Write;

    #[test]
    fn test_args_map_to_overrides() {
        let args = Args::try_parse_from([
            "styx-daemon",
            "--listen",
            "tcp://127.0.0.1:1, file:///tmp/s.sock",
            "--backlog",
            "9",
            "--store",
            "memory",
            "--read-only",
        ])
        .unwrap();

        let overrides = args.overrides();
        assert_eq!(
            overrides.targets,
            Some(vec![
                "tcp://127.0.0.1:1".to_string(),
                "file:///tmp/s.sock".to_string()
            ])
        );
        assert_eq!(overrides.backlog, Some(9));
        assert_eq!(overrides.store, Some(StoreKind::Memory));
        assert_eq!(overrides.read_only, Some(true));
        assert_eq!(overrides.log_level, None);
    }

    #[test]
    fn test_unset_read_only_flag_does_not_override() {
        let args = Args::try_parse_from(["styx-daemon"]).unwrap();
        assert_eq!(args.overrides().read_only, None);
    }

    #[test]
    fn test_unknown_store_rejected_by_parser() {
        assert!(Args::try_parse_from(["styx-daemon", "--store", "disk"]).is_err());
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        let args = Args::try_parse_from([
            OsStr::new("styx-daemon"),
            OsStr::new("--config"),
            missing.as_os_str(),
        ])
        .unwrap();
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn test_cli_wins_over_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listen]\nbacklog = 64\n[logging]\nlevel = \"debug\"").unwrap();

        let args = Args::try_parse_from([
            OsStr::new("styx-daemon"),
            OsStr::new("--config"),
            file.path().as_os_str(),
            OsStr::new("--backlog"),
            OsStr::new("7"),
        ])
        .unwrap();
        let config = resolve_config(&args).unwrap();

        assert_eq!(config.backlog, 7);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_zero_backlog_fails_validation() {
        let args = Args::try_parse_from(["styx-daemon", "--backlog", "0"]).unwrap();
        assert!(resolve_config(&args).is_err());
    }
}
