use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use super::protocol::{Request, ServerMessage};
use crate::error::Error;
use crate::monitor::{
    clamp_check_interval, IdleWatchdog, Notification, RefreshEngine, ScheduleHandle,
    ShutdownReason,
};

/// Shortest delay `DelayRefresh` will arm
pub const MIN_DELAY_SECS: u64 = 5;

/// Longest delay `DelayRefresh` will arm, one week
pub const MAX_DELAY_SECS: u64 = 7 * 24 * 60 * 60;

/// Operations offered to clients of the monitor socket
///
/// Every operation, read-only ones included, counts as client activity
/// for the idle watchdog.
pub struct MonitorService {
    engine: Arc<RefreshEngine>,
    schedule: ScheduleHandle,
    watchdog: Arc<IdleWatchdog>,
    shutdown: mpsc::Sender<ShutdownReason>,
}

impl MonitorService {
    pub fn new(
        engine: Arc<RefreshEngine>,
        schedule: ScheduleHandle,
        watchdog: Arc<IdleWatchdog>,
        shutdown: mpsc::Sender<ShutdownReason>,
    ) -> Self {
        Self {
            engine,
            schedule,
            watchdog,
            shutdown,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.engine.subscribe()
    }

    pub fn get_state(&self) -> String {
        self.watchdog.touch();
        self.engine.state_json()
    }

    pub fn get_state_summary(&self) -> String {
        self.watchdog.touch();
        self.engine.summary_json()
    }

    /// Start a full refresh; returns once it has been handed to the scheduler
    pub fn refresh(&self) {
        self.watchdog.touch();
        self.schedule.refresh_now();
    }

    /// Push the next periodic refresh out; returns the delay applied
    pub fn delay_refresh(&self, seconds: u64) -> u64 {
        self.watchdog.touch();
        let seconds = seconds.clamp(MIN_DELAY_SECS, MAX_DELAY_SECS);
        self.schedule.delay_once(Duration::from_secs(seconds));
        seconds
    }

    /// Reprogram the recurring timer and remember the interval across restarts
    pub fn set_check_interval(&self, seconds: u64) -> u64 {
        self.watchdog.touch();
        let seconds = clamp_check_interval(seconds);
        self.schedule.set_interval(Duration::from_secs(seconds));
        if let Err(e) = self.engine.set_check_interval(seconds) {
            tracing::warn!(error = %e, "check interval applied but not persisted");
        }
        seconds
    }

    pub fn set_idle_timeout(&self, seconds: u64) -> u64 {
        self.watchdog.touch();
        self.watchdog.set_timeout(seconds).as_secs()
    }

    pub fn set_refresh_paused(&self, paused: bool) {
        self.watchdog.touch();
        self.engine.set_paused(paused);
        tracing::debug!(phase = ?self.engine.phase(), "refresh phase");
    }

    pub fn update_aur_setting(&self, key: &str, value: &str) -> Result<(), Error> {
        self.watchdog.touch();
        let document = self.engine.update_setting(key, value)?;
        if key == "check_interval" {
            if let Some(seconds) = document.check_interval {
                self.schedule.set_interval(Duration::from_secs(seconds));
            }
        }
        tracing::info!(key, value, "setting updated");
        Ok(())
    }

    /// Stop the daemon; only root may do this
    pub async fn quit(&self, peer_uid: Option<u32>) -> Result<(), Error> {
        self.watchdog.touch();
        match peer_uid {
            Some(0) => {
                tracing::info!("quit requested by root");
                let _ = self.shutdown.send(ShutdownReason::Quit).await;
                Ok(())
            }
            Some(uid) => Err(Error::NotPermitted(format!(
                "uid {} may not stop the monitor",
                uid
            ))),
            None => Err(Error::NotPermitted(
                "peer credentials unavailable".to_string(),
            )),
        }
    }

    /// Dispatch one decoded request and build the reply
    pub async fn handle(&self, request: Request, peer_uid: Option<u32>) -> ServerMessage {
        tracing::debug!(?request, ?peer_uid, "request");

        let result = match request {
            Request::GetState => Ok(Value::from(self.get_state())),
            Request::GetStateSummary => Ok(Value::from(self.get_state_summary())),
            Request::Refresh => {
                self.refresh();
                Ok(Value::Null)
            }
            Request::DelayRefresh { seconds } => Ok(Value::from(self.delay_refresh(seconds))),
            Request::SetCheckInterval { seconds } => {
                Ok(Value::from(self.set_check_interval(seconds)))
            }
            Request::SetIdleTimeout { seconds } => Ok(Value::from(self.set_idle_timeout(seconds))),
            Request::SetRefreshPaused { paused } => {
                self.set_refresh_paused(paused);
                Ok(Value::from(paused))
            }
            Request::UpdateAurSetting { key, value } => self
                .update_aur_setting(&key, &value)
                .map(|()| Value::Null),
            Request::Quit => self.quit(peer_uid).await.map(|()| Value::Null),
        };

        match result {
            Ok(value) => ServerMessage::reply(value),
            Err(e) => {
                tracing::warn!(error = %e, "request rejected");
                ServerMessage::error(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{RefreshPhase, Scheduler, MAX_CHECK_INTERVAL_SECS};
    use crate::storage::StateDocument;
    use crate::test_support::{engine_with, exited, FakeRunner, MemoryStore};
    use tokio::time::{timeout, Instant};

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: Arc<RefreshEngine>,
        watchdog: Arc<IdleWatchdog>,
        shutdown: mpsc::Receiver<ShutdownReason>,
        service: MonitorService,
    }

    fn fixture() -> Fixture {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("pacman -Sy", exited(0, "", ""));
        runner.respond("pacman -Qu", exited(0, "foo 1.0-1 -> 1.1-1\n", ""));
        let store = Arc::new(MemoryStore::default());
        let engine = Arc::new(engine_with(runner, store.clone()));

        let scheduler = Scheduler::new(engine.clone(), Duration::from_secs(1800), Duration::from_secs(5));
        let schedule = scheduler.handle();
        tokio::spawn(scheduler.run());

        let watchdog = Arc::new(IdleWatchdog::new(Some(Duration::from_secs(240))));
        let (tx, shutdown) = mpsc::channel(1);
        let service = MonitorService::new(engine.clone(), schedule, watchdog.clone(), tx);

        Fixture {
            store,
            engine,
            watchdog,
            shutdown,
            service,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_calls_count_as_activity() {
        let f = fixture();

        tokio::time::advance(Duration::from_secs(239)).await;
        f.service.get_state_summary();
        tokio::time::advance(Duration::from_secs(239)).await;
        assert!(!f.watchdog.is_expired());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(f.watchdog.is_expired());
        f.service.get_state();
        assert!(!f.watchdog.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_reply_is_immediate() {
        let f = fixture();
        let mut rx = f.service.subscribe();

        let reply = f.service.handle(Request::Refresh, Some(1000)).await;
        assert_eq!(reply, ServerMessage::reply(Value::Null));

        let notification = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(notification.name(), "stateChanged");
        let doc: StateDocument = serde_json::from_str(notification.payload()).unwrap();
        assert_eq!(doc.counts.upgrade, 1);
        assert_eq!(f.store.saves(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clamped_values_are_reported() {
        let f = fixture();

        assert_eq!(
            f.service.handle(Request::DelayRefresh { seconds: 1 }, None).await,
            ServerMessage::reply(5u64)
        );
        assert_eq!(
            f.service.handle(Request::SetIdleTimeout { seconds: 10 }, None).await,
            ServerMessage::reply(30u64)
        );
        assert_eq!(
            f.service.handle(Request::SetCheckInterval { seconds: 15 }, None).await,
            ServerMessage::reply(60u64)
        );
        assert_eq!(f.store.document().unwrap().check_interval, Some(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_durations_are_capped() {
        let f = fixture();
        let mut rx = f.service.subscribe();

        assert_eq!(
            f.service.handle(Request::SetCheckInterval { seconds: u64::MAX }, None).await,
            ServerMessage::reply(MAX_CHECK_INTERVAL_SECS)
        );
        assert_eq!(
            f.service.handle(Request::DelayRefresh { seconds: u64::MAX }, None).await,
            ServerMessage::reply(MAX_DELAY_SECS)
        );
        let reply = f
            .service
            .handle(
                Request::UpdateAurSetting {
                    key: "check_interval".to_string(),
                    value: u64::MAX.to_string(),
                },
                None,
            )
            .await;
        assert_eq!(reply, ServerMessage::reply(Value::Null));
        assert_eq!(
            f.store.document().unwrap().check_interval,
            Some(MAX_CHECK_INTERVAL_SECS)
        );

        // the scheduler is still taking commands
        f.service.handle(Request::Refresh, None).await;
        let notification = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(notification.name(), "stateChanged");
        assert_eq!(f.store.saves(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_refresh_fires_once() {
        let f = fixture();
        let mut rx = f.service.subscribe();
        let started = Instant::now();

        assert_eq!(f.service.delay_refresh(120), 120);
        // let the scheduler take the command
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.engine.phase(), RefreshPhase::DelayScheduled);

        timeout(Duration::from_secs(600), rx.recv()).await.unwrap().unwrap();
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert_eq!(f.engine.phase(), RefreshPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_service_ignores_refresh() {
        let f = fixture();
        let mut rx = f.service.subscribe();

        f.service.handle(Request::SetRefreshPaused { paused: true }, None).await;
        f.service.handle(Request::Refresh, None).await;
        assert!(timeout(Duration::from_secs(30), rx.recv()).await.is_err());
        assert_eq!(f.store.saves(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_aur_setting_errors_are_replies() {
        let f = fixture();

        let reply = f
            .service
            .handle(
                Request::UpdateAurSetting {
                    key: "aur_helper".to_string(),
                    value: "rm".to_string(),
                },
                None,
            )
            .await;
        assert!(matches!(reply, ServerMessage::Error { .. }));

        let reply = f
            .service
            .handle(
                Request::UpdateAurSetting {
                    key: "aur_enabled".to_string(),
                    value: "true".to_string(),
                },
                None,
            )
            .await;
        assert_eq!(reply, ServerMessage::reply(Value::Null));
        assert!(f.store.document().unwrap().aur_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_requires_root() {
        let mut f = fixture();

        let reply = f.service.handle(Request::Quit, Some(1000)).await;
        assert!(matches!(reply, ServerMessage::Error { .. }));
        let reply = f.service.handle(Request::Quit, None).await;
        assert!(matches!(reply, ServerMessage::Error { .. }));
        assert!(f.shutdown.try_recv().is_err());

        let reply = f.service.handle(Request::Quit, Some(0)).await;
        assert_eq!(reply, ServerMessage::reply(Value::Null));
        assert_eq!(f.shutdown.recv().await, Some(ShutdownReason::Quit));
    }
}
