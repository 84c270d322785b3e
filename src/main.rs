use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use nix::sys::signal::Signal;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use tracing_subscriber::EnvFilter;

use hearth::config::{Config, ServerConfig};
use hearth::daemon::{self, PidFile, Supervisor};
use hearth::pipeline::Pipeline;
use hearth::server::{RunMode, Server};

const STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "hearth", version, about = "Embedded HTTP server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the server, in the foreground unless --daemonize is given
    Start(StartArgs),
    /// Stop a running daemon
    Stop(ConfigArg),
    /// Stop a running daemon, then start a new one
    Restart(StartArgs),
    /// Make a running daemon replace its worker
    Reload(ConfigArg),
}

#[derive(Debug, Args)]
struct ConfigArg {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct StartArgs {
    /// Detach and supervise worker processes
    #[arg(short, long)]
    daemonize: bool,
    /// Address to listen on, `*` for all interfaces
    #[arg(short, long)]
    address: Option<String>,
    #[arg(short, long)]
    port: Option<u32>,
    #[command(flatten)]
    config: ConfigArg,
}

impl StartArgs {
    fn load(&self) -> anyhow::Result<Config> {
        let mut config = load_config(self.config.config.as_deref())?;
        if let Some(address) = &self.address {
            config.server.address = address.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        config.validate().context("invalid command line options")?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Start(args) => start(&args.load()?, args.daemonize),
        Command::Stop(args) => stop(&load_config(args.config.as_deref())?),
        Command::Restart(args) => {
            let config = args.load()?;
            stop(&config)?;
            start(&config, true)
        }
        Command::Reload(args) => {
            let config = load_config(args.config.as_deref())?;
            let pid = daemon::signal_daemon(&config.daemon.pid_file, Signal::SIGHUP)?;
            tracing::info!(pid, "reload requested");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    Config::load(path).context("failed to load configuration")
}

fn start(config: &Config, daemonize: bool) -> anyhow::Result<()> {
    if !daemonize {
        return run_worker(&config.server, RunMode::Foreground);
    }

    let server = config.server.clone();
    let supervisor = Supervisor::new(config.daemon.clone());
    let pid = supervisor
        .start(move || match run_worker(&server, RunMode::DaemonChild) {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "worker failed");
                1
            }
        })
        .context("failed to start daemon")?;

    println!("hearth started with pid {pid}");
    Ok(())
}

fn stop(config: &Config) -> anyhow::Result<()> {
    let pid_file = &config.daemon.pid_file;
    if PidFile::running(pid_file)?.is_none() {
        tracing::info!(file = %pid_file.display(), "not running");
        return Ok(());
    }

    let pid = daemon::signal_daemon(pid_file, Signal::SIGTERM)?;
    daemon::wait_for_exit(pid_file, pid, STOP_TIMEOUT)?;
    println!("hearth stopped (pid {pid})");
    Ok(())
}

/// Runs one event loop on a fresh current-thread runtime.
fn run_worker(config: &ServerConfig, mode: RunMode) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    runtime.block_on(async {
        let pipeline = Pipeline::from_config(config).context("failed to open document root")?;
        let mut server = Server::bind(config.clone(), pipeline)?;

        let handle = server.handle();
        for signal in [SIGTERM, SIGINT] {
            signal_hook::flag::register(signal, handle.flag())
                .context("failed to install signal handlers")?;
        }

        server.run(mode).await?;
        Ok(())
    })
}
