// BluePoint Linux: LAN discovery, TCP push transport, campaign dispatcher.

mod config;
mod discovery;
mod pidfile;
mod transport;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bluepoint_core::{CampaignRegistry, Dispatcher, DispatcherConfig, FileRecordStore};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::discovery::LanDiscovery;
use crate::pidfile::PidFile;
use crate::transport::TcpPush;

#[derive(Debug, Parser)]
#[command(name = "bluepoint", version, about = "Proximity-triggered content push daemon")]
struct Cli {
    /// Config file (default: ~/.config/bluepoint/config.toml, then /etc/bluepoint/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the dispatcher in the foreground until SIGINT/SIGTERM
    Start,
    /// Ask a running daemon to finish its current tick and exit
    Stop,
    /// Stop, then start
    Restart,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = match config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("bluepoint: {e:#}");
            return ExitCode::from(2);
        }
    };
    if let Err(e) = init_tracing(&cfg) {
        eprintln!("bluepoint: {e:#}");
        return ExitCode::from(2);
    }

    let result = match cli.command {
        Command::Start => start(&cfg),
        Command::Stop => stop(&cfg),
        Command::Restart => stop(&cfg).and_then(|()| start(&cfg)),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cfg: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match &cfg.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn start(cfg: &Config) -> anyhow::Result<()> {
    let _pid = PidFile::acquire(&cfg.pid_file)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve(cfg))
}

async fn serve(cfg: &Config) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting bluepoint");
    let registry = CampaignRegistry::load(FileRecordStore::new(&cfg.records_path))
        .with_context(|| format!("loading campaigns from {}", cfg.records_path.display()))?;
    let discovery = LanDiscovery::bind(cfg.discovery_port, cfg.inquiry_window(), cfg.peer_timeout())
        .await
        .context("starting discovery")?;
    let transfer = TcpPush::new(cfg.connect_timeout(), cfg.transfer_timeout());
    let dispatcher = Dispatcher::new(
        registry,
        Arc::new(discovery),
        Arc::new(transfer),
        DispatcherConfig {
            tick_interval: cfg.tick_interval(),
            max_concurrent_sends: cfg.max_concurrent_sends,
        },
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => info!("shutdown requested, finishing current tick"),
            Err(e) => warn!(error = %e, "signal handler failed, stopping"),
        }
        on_signal.cancel();
    });

    dispatcher.run(cancel).await.context("saving campaigns")?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

/// SIGTERM the recorded daemon and wait for it to exit. Not running is not an error.
fn stop(cfg: &Config) -> anyhow::Result<()> {
    let Some(pid) = pidfile::read(&cfg.pid_file)? else {
        info!(pid_file = %cfg.pid_file.display(), "not running");
        return Ok(());
    };
    if !pidfile::is_running(pid) {
        info!(pid, "stale pid file, removing");
        let _ = std::fs::remove_file(&cfg.pid_file);
        return Ok(());
    }

    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .context("running kill")?;
    if !status.success() {
        anyhow::bail!("kill -TERM {pid} failed ({status})");
    }
    info!(pid, "stop requested, waiting for the current tick to finish");

    let grace = cfg.stop_grace();
    if !wait_for_exit(pid, grace) {
        // The daemon has not failed; a large tick is still draining and will exit on its own.
        anyhow::bail!(
            "pid {pid} still finishing its tick after {}s; stop_timeout_secs bounds this wait",
            grace.as_secs()
        );
    }
    info!(pid, "stopped");
    Ok(())
}

/// Poll until `pid` is gone. False if it outlives `grace`.
fn wait_for_exit(pid: u32, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while pidfile::is_running(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["bluepoint", "start"]).unwrap();
        assert!(matches!(cli.command, Command::Start));
        assert!(cli.config.is_none());

        let cli = Cli::try_parse_from(["bluepoint", "restart", "--config", "/etc/bp.toml"]).unwrap();
        assert!(matches!(cli.command, Command::Restart));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/bp.toml")));
    }

    #[test]
    fn cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["bluepoint", "reload"]).is_err());
        assert!(Cli::try_parse_from(["bluepoint"]).is_err());
    }

    #[test]
    fn wait_for_exit_gives_up_on_a_live_pid() {
        assert!(!wait_for_exit(std::process::id(), Duration::from_millis(300)));
        // Above the kernel's pid_max, so never a live process.
        assert!(wait_for_exit(4_194_305, Duration::from_millis(300)));
    }

    #[test]
    fn stop_without_pid_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            pid_file: dir.path().join("bluepoint.pid"),
            ..Config::default()
        };
        stop(&cfg).unwrap();
    }
}
