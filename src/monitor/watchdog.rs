use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

/// Lower bound applied by `set_timeout`
pub const MIN_IDLE_TIMEOUT_SECS: u64 = 30;

/// Why the daemon is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Idle,
    /// A privileged client sent `Quit`
    Quit,
    Signal(&'static str),
}

#[derive(Debug)]
struct Activity {
    last: Instant,
    timeout: Option<Duration>,
}

/// Ends the process once no client has called in for a while
#[derive(Debug)]
pub struct IdleWatchdog {
    activity: Mutex<Activity>,
}

impl IdleWatchdog {
    /// `None` disables idle shutdown until `set_timeout` is called
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            activity: Mutex::new(Activity {
                last: Instant::now(),
                timeout,
            }),
        }
    }

    pub fn touch(&self) {
        self.activity().last = Instant::now();
    }

    /// Set the idle timeout, clamped to the minimum; returns the value applied
    pub fn set_timeout(&self, seconds: u64) -> Duration {
        let timeout = Duration::from_secs(seconds.max(MIN_IDLE_TIMEOUT_SECS));
        self.activity().timeout = Some(timeout);
        timeout
    }

    pub fn is_expired(&self) -> bool {
        let activity = self.activity();
        activity
            .timeout
            .is_some_and(|timeout| activity.last.elapsed() > timeout)
    }

    /// Check every `period` and request shutdown once idle
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: mpsc::Sender<ShutdownReason>) {
        let mut ticker = tokio::time::interval(period);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.is_expired() {
                tracing::info!("no client activity, requesting shutdown");
                let _ = shutdown.send(ShutdownReason::Idle).await;
                return;
            }
        }
    }

    fn activity(&self) -> std::sync::MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(|e| e.into_inner())
    }
}
