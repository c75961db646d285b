mod engine;
mod scheduler;
mod session;
mod watchdog;

pub use engine::{clamp_check_interval, Notification, RefreshEngine};
pub use scheduler::{ScheduleHandle, Scheduler};
pub use watchdog::{IdleWatchdog, ShutdownReason};

#[cfg(test)]
pub use engine::MAX_CHECK_INTERVAL_SECS;
#[cfg(test)]
pub use session::RefreshPhase;
