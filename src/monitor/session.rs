/// What asked for a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An explicit `Refresh` call from a client
    Manual,
    /// The recurring check timer
    Timer,
    /// The one-shot fire armed by `DelayRefresh`
    Delayed,
    /// The single retry scheduled after the sync hit a held database lock
    LockRetry,
}

impl Trigger {
    /// Full refreshes sync the package databases before querying
    pub fn syncs_database(self) -> bool {
        matches!(self, Trigger::Manual | Trigger::LockRetry)
    }
}

/// Why a refresh request was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    Paused,
    /// A lock-wait retry is already scheduled and will do the work
    LockWaitPending,
    /// Another refresh is running; requests are never queued
    InFlight,
}

/// Externally observable state of the refresh machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
    LockWaitBackoff,
    Paused,
    DelayScheduled,
}

/// Flags that gate refresh attempts
///
/// Always accessed under the engine's state mutex, so every transition is
/// a plain field update.
#[derive(Debug, Default)]
pub struct RefreshSession {
    paused: bool,
    in_flight: bool,
    lock_wait_pending: bool,
    delay_pending: bool,
}

impl RefreshSession {
    /// Decide whether a refresh for `trigger` may start, and mark it running if so
    pub fn admit(&mut self, trigger: Trigger) -> Result<(), Skip> {
        match trigger {
            Trigger::LockRetry => self.lock_wait_pending = false,
            Trigger::Delayed => self.delay_pending = false,
            Trigger::Manual | Trigger::Timer => {}
        }

        if self.paused {
            return Err(Skip::Paused);
        }
        if self.lock_wait_pending {
            return Err(Skip::LockWaitPending);
        }
        if self.in_flight {
            return Err(Skip::InFlight);
        }

        self.in_flight = true;
        Ok(())
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    /// The running refresh gave up on a locked database; one retry will follow
    pub fn defer_for_lock(&mut self) {
        self.in_flight = false;
        self.lock_wait_pending = true;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn mark_delay_scheduled(&mut self) {
        self.delay_pending = true;
    }

    pub fn phase(&self) -> RefreshPhase {
        if self.in_flight {
            RefreshPhase::Refreshing
        } else if self.lock_wait_pending {
            RefreshPhase::LockWaitBackoff
        } else if self.paused {
            RefreshPhase::Paused
        } else if self.delay_pending {
            RefreshPhase::DelayScheduled
        } else {
            RefreshPhase::Idle
        }
    }
}
