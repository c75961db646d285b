use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::config::MonitorConfig;
use crate::monitor::{clamp_check_interval, IdleWatchdog, RefreshEngine, Scheduler, ShutdownReason};
use crate::pacman::{HelperResolver, QueryExecutor, QuerySettings, SystemRunner, TokioSleeper};
use crate::service::{MonitorService, Server};
use crate::storage::{FileStateStore, StateStore};

/// Wire up every component and serve until something asks us to stop
pub async fn run(config: MonitorConfig, require_checksum: bool) -> Result<()> {
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(
        config.state_path.clone(),
        require_checksum,
    ));

    // an interval chosen by a client outlives restarts
    let interval = store
        .load()
        .check_interval
        .map(|seconds| Duration::from_secs(clamp_check_interval(seconds)))
        .unwrap_or_else(|| config.check_interval());

    let executor = QueryExecutor::new(
        Arc::new(SystemRunner),
        Arc::new(TokioSleeper),
        QuerySettings::from(&config),
    );
    let resolver = HelperResolver::new(config.aur_helpers.clone());
    let engine = Arc::new(RefreshEngine::new(
        store,
        executor,
        resolver,
        config.cache_ttl(),
    ));

    let scheduler = Scheduler::new(engine.clone(), interval, config.lock_wait_delay());
    let schedule = scheduler.handle();
    let scheduler_task = tokio::spawn(scheduler.run());

    let (shutdown_tx, shutdown_rx) = mpsc::channel(4);

    let watchdog = Arc::new(IdleWatchdog::new(config.idle_timeout()));
    let watchdog_task = tokio::spawn(
        watchdog
            .clone()
            .run(config.idle_check_period(), shutdown_tx.clone()),
    );

    spawn_signal_listener(shutdown_tx.clone())?;

    let service = Arc::new(MonitorService::new(engine, schedule, watchdog, shutdown_tx));
    let server = Server::bind(&config.socket_path, config.socket_mode)?;

    tracing::info!(
        interval_secs = interval.as_secs(),
        idle_timeout_secs = config.idle_timeout,
        state = ?config.state_path,
        "update monitor started"
    );

    let reason = server.run(service, shutdown_rx).await;
    tracing::info!(?reason, "update monitor stopping");

    scheduler_task.abort();
    watchdog_task.abort();
    Ok(())
}

fn spawn_signal_listener(shutdown: mpsc::Sender<ShutdownReason>) -> Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        let reason = tokio::select! {
            _ = terminate.recv() => ShutdownReason::Signal("SIGTERM"),
            _ = interrupt.recv() => ShutdownReason::Signal("SIGINT"),
        };
        let _ = shutdown.send(reason).await;
    });
    Ok(())
}
