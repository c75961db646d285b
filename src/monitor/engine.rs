use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use super::session::{RefreshPhase, RefreshSession, Skip, Trigger};
use crate::error::Error;
use crate::pacman::{HelperResolver, QueryExecutor, SyncOutcome};
use crate::storage::{ResponseCache, StateDocument, StateStore};

/// Lower bound applied to every requested check interval
pub const MIN_CHECK_INTERVAL_SECS: u64 = 60;

/// Upper bound on the check interval, one week
pub const MAX_CHECK_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Bring a client or persisted interval into the accepted range
pub fn clamp_check_interval(seconds: u64) -> u64 {
    seconds.clamp(MIN_CHECK_INTERVAL_SECS, MAX_CHECK_INTERVAL_SECS)
}

const NOTIFICATION_CAPACITY: usize = 16;

/// Change notifications fanned out to connected clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StateChanged(String),
    SummaryChanged(String),
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::StateChanged(_) => "stateChanged",
            Notification::SummaryChanged(_) => "summaryChanged",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            Notification::StateChanged(payload) | Notification::SummaryChanged(payload) => payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Published,
    Skipped(Skip),
    /// The sync found the database locked; a single retry must be scheduled
    DeferredForLock,
    /// The lock retry found the database locked again; nothing more is scheduled
    LockAbandoned,
    /// Queries ran but the document could not be written
    NotSaved,
}

/// Document fields that clients may patch directly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    AurEnabled,
    AurHelper,
    CheckInterval,
}

impl FromStr for SettingKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aur_enabled" => Ok(SettingKey::AurEnabled),
            "aur_helper" => Ok(SettingKey::AurHelper),
            "check_interval" => Ok(SettingKey::CheckInterval),
            other => Err(Error::InvalidSetting(format!("unknown key `{}`", other))),
        }
    }
}

struct Shared {
    cache: ResponseCache,
    session: RefreshSession,
}

/// Builds, persists and publishes state documents
///
/// One mutex guards the cache, the session flags and every
/// load-modify-save sequence against the store. It is never held while a
/// subprocess runs.
pub struct RefreshEngine {
    store: Arc<dyn StateStore>,
    executor: QueryExecutor,
    resolver: HelperResolver,
    shared: Mutex<Shared>,
    notifications: broadcast::Sender<Notification>,
}

impl RefreshEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        executor: QueryExecutor,
        resolver: HelperResolver,
        cache_ttl: Duration,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            store,
            executor,
            resolver,
            shared: Mutex::new(Shared {
                cache: ResponseCache::new(cache_ttl),
                session: RefreshSession::default(),
            }),
            notifications,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// The persisted document, read through the lock
    pub fn document(&self) -> StateDocument {
        let _shared = self.shared();
        self.store.load()
    }

    /// Full document as compact JSON, served from the cache while fresh
    pub fn state_json(&self) -> String {
        let mut shared = self.shared();
        if let Some(cached) = shared.cache.state() {
            return cached.to_string();
        }
        let payload = self.store.load().to_json();
        shared.cache.fill_state(payload.clone());
        payload
    }

    /// Summary projection as compact JSON, cached separately
    pub fn summary_json(&self) -> String {
        let mut shared = self.shared();
        if let Some(cached) = shared.cache.summary() {
            return cached.to_string();
        }
        let payload = self.store.load().summary().to_json();
        shared.cache.fill_summary(payload.clone());
        payload
    }

    pub fn phase(&self) -> RefreshPhase {
        self.shared().session.phase()
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared().session.set_paused(paused);
        tracing::info!(paused, "refresh pause toggled");
    }

    pub fn mark_delay_scheduled(&self) {
        self.shared().session.mark_delay_scheduled();
    }

    /// Run one refresh cycle
    ///
    /// Returns without doing anything when the session refuses the trigger.
    /// Notifications are sent only after the new document was saved.
    pub async fn refresh(&self, trigger: Trigger) -> RefreshOutcome {
        let admitted = self.shared().session.admit(trigger);
        if let Err(skip) = admitted {
            tracing::debug!(?trigger, ?skip, "refresh skipped");
            return RefreshOutcome::Skipped(skip);
        }
        tracing::debug!(?trigger, "refresh started");

        if trigger.syncs_database() {
            match self.executor.sync_databases().await {
                SyncOutcome::Synced => {}
                SyncOutcome::Locked if trigger == Trigger::LockRetry => {
                    self.shared().session.finish();
                    tracing::info!("package database still locked, waiting for the next refresh");
                    return RefreshOutcome::LockAbandoned;
                }
                SyncOutcome::Locked => {
                    self.shared().session.defer_for_lock();
                    tracing::info!("package database locked, deferring refresh");
                    return RefreshOutcome::DeferredForLock;
                }
                SyncOutcome::Failed => {
                    tracing::warn!("querying against the existing sync databases");
                }
            }
        }

        let prior = self.document();

        let packages = self.executor.list_upgrades().await;
        let (aur_packages, helper) = if prior.aur_enabled {
            let helper = self.resolver.resolve(&prior.aur_helper);
            if helper.is_empty() {
                tracing::info!("AUR checks enabled but no helper is installed");
                (Vec::new(), helper)
            } else {
                (self.executor.list_aur_upgrades(&helper).await, helper)
            }
        } else {
            (Vec::new(), String::new())
        };

        let mut shared = self.shared();
        // Reload so a settings patch made while the queries ran survives
        let current = self.store.load();
        let mut document = StateDocument::from_updates(
            packages,
            aur_packages,
            Utc::now().timestamp(),
            &current,
        );
        if !helper.is_empty() && current.aur_helper == prior.aur_helper {
            document.aur_helper = helper;
        }

        let outcome = match self.store.save(&document) {
            Ok(()) => {
                shared.cache.invalidate();
                self.publish(&document);
                tracing::info!(
                    upgrade = document.counts.upgrade,
                    aur_upgrade = document.counts.aur_upgrade,
                    "state refreshed"
                );
                RefreshOutcome::Published
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to save state, nothing published");
                RefreshOutcome::NotSaved
            }
        };
        shared.session.finish();
        outcome
    }

    /// Patch one field of the persisted document without running any query
    pub fn update_setting(&self, key: &str, value: &str) -> Result<StateDocument, Error> {
        let key: SettingKey = key.parse()?;
        let value = value.trim();

        match key {
            SettingKey::AurEnabled => {
                let enabled = parse_flag(value)?;
                self.patch(|doc| doc.aur_enabled = enabled)
            }
            SettingKey::AurHelper => {
                if !value.is_empty() && !self.resolver.is_candidate(value) {
                    return Err(Error::InvalidSetting(format!(
                        "`{}` is not a known AUR helper",
                        value
                    )));
                }
                let helper = value.to_string();
                self.patch(|doc| doc.aur_helper = helper)
            }
            SettingKey::CheckInterval => {
                let seconds: u64 = value.parse().map_err(|_| {
                    Error::InvalidSetting(format!("check_interval `{}` is not a number", value))
                })?;
                if seconds == 0 {
                    return Err(Error::InvalidSetting(
                        "check_interval must be positive".to_string(),
                    ));
                }
                self.set_check_interval(seconds)
            }
        }
    }

    /// Persist the poll interval, clamped to the accepted range
    pub fn set_check_interval(&self, seconds: u64) -> Result<StateDocument, Error> {
        let seconds = clamp_check_interval(seconds);
        self.patch(|doc| doc.check_interval = Some(seconds))
    }

    fn patch<F: FnOnce(&mut StateDocument)>(&self, apply: F) -> Result<StateDocument, Error> {
        let mut shared = self.shared();
        let mut document = self.store.load();
        apply(&mut document);
        self.store.save(&document)?;
        shared.cache.invalidate();
        Ok(document)
    }

    fn publish(&self, document: &StateDocument) {
        // send only fails when no client is subscribed
        let _ = self
            .notifications
            .send(Notification::StateChanged(document.to_json()));
        let _ = self
            .notifications
            .send(Notification::SummaryChanged(document.summary().to_json()));
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_flag(value: &str) -> Result<bool, Error> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::InvalidSetting(format!(
            "`{}` is not a boolean",
            other
        ))),
    }
}
