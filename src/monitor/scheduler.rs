use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use super::engine::{RefreshEngine, RefreshOutcome};
use super::session::Trigger;

/// Stand-in deadline for durations too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduleCommand {
    RefreshNow,
    SetInterval(Duration),
    DelayOnce(Duration),
    RetryAfterLock,
}

/// Cheap, cloneable way to reprogram the scheduler from other tasks
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    tx: mpsc::UnboundedSender<ScheduleCommand>,
}

impl ScheduleHandle {
    /// Start a full refresh (sync + queries) without waiting for it
    pub fn refresh_now(&self) {
        self.send(ScheduleCommand::RefreshNow);
    }

    /// Change the recurring period; the next fire is rescheduled from now
    pub fn set_interval(&self, interval: Duration) {
        self.send(ScheduleCommand::SetInterval(interval));
    }

    /// Move the next fire to `delay` from now, then resume the normal period
    pub fn delay_once(&self, delay: Duration) {
        self.send(ScheduleCommand::DelayOnce(delay));
    }

    fn retry_after_lock(&self) {
        self.send(ScheduleCommand::RetryAfterLock);
    }

    fn send(&self, command: ScheduleCommand) {
        if self.tx.send(command).is_err() {
            tracing::warn!(?command, "scheduler has stopped, command dropped");
        }
    }
}

/// Owns every timer that leads to a refresh
///
/// Refreshes are spawned, never awaited inline, so a slow query cannot
/// delay commands. The engine drops triggers that arrive while one runs.
pub struct Scheduler {
    engine: Arc<RefreshEngine>,
    interval: Duration,
    lock_wait_delay: Duration,
    rx: mpsc::UnboundedReceiver<ScheduleCommand>,
    handle: ScheduleHandle,
}

impl Scheduler {
    pub fn new(engine: Arc<RefreshEngine>, interval: Duration, lock_wait_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            engine,
            interval,
            lock_wait_delay,
            rx,
            handle: ScheduleHandle { tx },
        }
    }

    pub fn handle(&self) -> ScheduleHandle {
        self.handle.clone()
    }

    pub async fn run(self) {
        let Scheduler {
            engine,
            mut interval,
            lock_wait_delay,
            mut rx,
            handle,
        } = self;

        let mut next_fire = deadline(interval);
        let mut delayed = false;
        let mut lock_retry_at: Option<Instant> = None;

        tracing::debug!(interval_secs = interval.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = sleep_until(next_fire) => {
                    let trigger = if delayed { Trigger::Delayed } else { Trigger::Timer };
                    delayed = false;
                    next_fire = deadline(interval);
                    spawn_refresh(&engine, &handle, trigger);
                }
                _ = sleep_until(lock_retry_at.unwrap_or(next_fire)), if lock_retry_at.is_some() => {
                    lock_retry_at = None;
                    spawn_refresh(&engine, &handle, Trigger::LockRetry);
                }
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        ScheduleCommand::RefreshNow => {
                            spawn_refresh(&engine, &handle, Trigger::Manual);
                        }
                        ScheduleCommand::SetInterval(new_interval) => {
                            interval = new_interval;
                            // a pending delayed fire keeps its deadline
                            if !delayed {
                                next_fire = deadline(interval);
                            }
                            tracing::info!(interval_secs = interval.as_secs(), "check interval changed");
                        }
                        ScheduleCommand::DelayOnce(delay) => {
                            delayed = true;
                            next_fire = deadline(delay);
                            engine.mark_delay_scheduled();
                            tracing::info!(delay_secs = delay.as_secs(), "next refresh delayed");
                        }
                        ScheduleCommand::RetryAfterLock => {
                            if lock_retry_at.is_none() {
                                lock_retry_at = Some(deadline(lock_wait_delay));
                            }
                        }
                    }
                }
            }
        }
    }
}

fn deadline(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn spawn_refresh(engine: &Arc<RefreshEngine>, handle: &ScheduleHandle, trigger: Trigger) {
    let engine = Arc::clone(engine);
    let handle = handle.clone();
    tokio::spawn(async move {
        if engine.refresh(trigger).await == RefreshOutcome::DeferredForLock {
            handle.retry_after_lock();
        }
    });
}
