#![deny(clippy::mod_module_files)]
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod daemon;
mod error;
mod monitor;
mod pacman;
mod service;
mod storage;
#[cfg(test)]
mod test_support;

use config::MonitorConfig;
use pacman::{QueryExecutor, QuerySettings, SystemRunner, TokioSleeper};
use storage::{FileStateStore, StateStore};

/// Privileged daemon that watches for pacman and AUR updates
#[derive(Parser)]
#[command(name = "arch-update-monitor", version, about)]
struct Cli {
    /// Daemon configuration file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug: bool,

    /// Accept a state file whose checksum does not match
    #[arg(long, global = true)]
    no_checksum: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor daemon (default)
    Run,
    /// Print the persisted state document
    ShowState {
        /// State file to read instead of the configured one
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Print the effective configuration as YAML
    ShowConfig,
    /// Compare a package's installed and repository versions
    Inspect { package: String },
    /// List the packages in a sync group
    Group { name: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = MonitorConfig::load(&cli.config)?;
    let require_checksum = !cli.no_checksum;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config, require_checksum),
        Command::ShowState { path } => {
            show_state(path.unwrap_or(config.state_path), require_checksum)
        }
        Command::ShowConfig => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
        Command::Inspect { package } => inspect(&config, &package),
        Command::Group { name } => group(&config, &name),
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run_daemon(config: MonitorConfig, require_checksum: bool) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        anyhow::bail!("arch-update-monitor must run as root to query and sync pacman");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;
    runtime.block_on(daemon::run(config, require_checksum))
}

fn system_executor(config: &MonitorConfig) -> QueryExecutor {
    QueryExecutor::new(
        Arc::new(SystemRunner),
        Arc::new(TokioSleeper),
        QuerySettings::from(config),
    )
}

fn current_thread_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")
}

fn inspect(config: &MonitorConfig, package: &str) -> Result<()> {
    let executor = system_executor(config);
    let report = current_thread_runtime()?.block_on(async {
        serde_json::json!({
            "package": package,
            "local_version": executor.local_version(package).await,
            "remote_version": executor.remote_version(package).await,
            "newer_available": executor.is_newer_available(package).await,
            "replaces": executor.replaced_packages(package).await,
        })
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn group(config: &MonitorConfig, name: &str) -> Result<()> {
    let executor = system_executor(config);
    let members = current_thread_runtime()?.block_on(executor.group_members(name));
    for member in members {
        println!("{}", member);
    }
    Ok(())
}

fn show_state(path: PathBuf, require_checksum: bool) -> Result<()> {
    let store = FileStateStore::new(path, require_checksum);
    tracing::debug!("reading state from {:?}", store.path());

    let document = store.load();
    let json = serde_json::to_string_pretty(&document).context("Failed to serialize state")?;
    println!("{}", json);
    Ok(())
}
