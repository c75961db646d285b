use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default location of the daemon configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/arch-update-monitor/config.yaml";

/// Configuration for the update monitor daemon
///
/// Every field has a default, so an absent or partial config file is valid.
/// Durations are stored as whole seconds unless the field name says otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Root-owned file holding the checksummed state document
    #[serde(default = "defaults::state_path")]
    pub state_path: PathBuf,
    /// Unix socket clients connect to
    #[serde(default = "defaults::socket_path")]
    pub socket_path: PathBuf,
    /// Permission bits applied to the socket after binding
    #[serde(default = "defaults::socket_mode")]
    pub socket_mode: u32,
    /// Period of the background refresh timer
    #[serde(default = "defaults::check_interval")]
    pub check_interval: u64,
    /// Exit after this long without client activity (0 disables)
    #[serde(default = "defaults::idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "defaults::idle_check_period")]
    pub idle_check_period: u64,
    /// How long a serialized response stays fresh
    #[serde(default = "defaults::cache_ttl")]
    pub cache_ttl: u64,
    /// Delay before re-running a refresh deferred by a held database lock
    #[serde(default = "defaults::lock_wait_delay")]
    pub lock_wait_delay: u64,
    /// Retries after the first lock-contended attempt of a single query
    #[serde(default = "defaults::lock_retries")]
    pub lock_retries: u32,
    #[serde(default = "defaults::lock_retry_base_delay_ms")]
    pub lock_retry_base_delay_ms: u64,
    #[serde(default = "defaults::query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "defaults::aur_query_timeout")]
    pub aur_query_timeout: u64,
    #[serde(default = "defaults::sync_timeout")]
    pub sync_timeout: u64,
    #[serde(default = "defaults::field_timeout")]
    pub field_timeout: u64,
    /// pacman executable (name or absolute path)
    #[serde(default = "defaults::pacman")]
    pub pacman: String,
    #[serde(default = "defaults::vercmp")]
    pub vercmp: String,
    /// AUR helpers probed in order when none is persisted
    #[serde(default = "defaults::aur_helpers")]
    pub aur_helpers: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            state_path: defaults::state_path(),
            socket_path: defaults::socket_path(),
            socket_mode: defaults::socket_mode(),
            check_interval: defaults::check_interval(),
            idle_timeout: defaults::idle_timeout(),
            idle_check_period: defaults::idle_check_period(),
            cache_ttl: defaults::cache_ttl(),
            lock_wait_delay: defaults::lock_wait_delay(),
            lock_retries: defaults::lock_retries(),
            lock_retry_base_delay_ms: defaults::lock_retry_base_delay_ms(),
            query_timeout: defaults::query_timeout(),
            aur_query_timeout: defaults::aur_query_timeout(),
            sync_timeout: defaults::sync_timeout(),
            field_timeout: defaults::field_timeout(),
            pacman: defaults::pacman(),
            vercmp: defaults::vercmp(),
            aur_helpers: defaults::aur_helpers(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the given file (if it exists) and environment variables
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!("loading monitor config from {:?}", path);
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            tracing::debug!("no config file at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        // An empty file deserializes to unit, not to a mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = env::var("ARCH_UPDATE_MONITOR_STATE_PATH") {
            self.state_path = PathBuf::from(path);
        }

        if let Ok(path) = env::var("ARCH_UPDATE_MONITOR_SOCKET") {
            self.socket_path = PathBuf::from(path);
        }

        if let Ok(secs) = env::var("ARCH_UPDATE_MONITOR_CHECK_INTERVAL") {
            self.check_interval = secs
                .parse()
                .context("Failed to parse ARCH_UPDATE_MONITOR_CHECK_INTERVAL as u64")?;
        }

        if let Ok(secs) = env::var("ARCH_UPDATE_MONITOR_IDLE_TIMEOUT") {
            self.idle_timeout = secs
                .parse()
                .context("Failed to parse ARCH_UPDATE_MONITOR_IDLE_TIMEOUT as u64")?;
        }

        Ok(())
    }

    /// Render the effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval.max(1))
    }

    /// `None` when the idle watchdog is disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }

    pub fn idle_check_period(&self) -> Duration {
        Duration::from_secs(self.idle_check_period.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn lock_wait_delay(&self) -> Duration {
        Duration::from_secs(self.lock_wait_delay)
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(crate) fn state_path() -> PathBuf {
        PathBuf::from("/var/lib/arch-update-monitor/state.json")
    }

    pub(crate) fn socket_path() -> PathBuf {
        PathBuf::from("/run/arch-update-monitor.sock")
    }

    pub(crate) fn socket_mode() -> u32 {
        0o666
    }

    pub(crate) fn check_interval() -> u64 {
        30 * 60
    }

    pub(crate) fn idle_timeout() -> u64 {
        4 * 60
    }

    pub(crate) fn idle_check_period() -> u64 {
        30
    }

    pub(crate) fn cache_ttl() -> u64 {
        5
    }

    pub(crate) fn lock_wait_delay() -> u64 {
        5
    }

    pub(crate) fn lock_retries() -> u32 {
        2
    }

    pub(crate) fn lock_retry_base_delay_ms() -> u64 {
        2000
    }

    pub(crate) fn query_timeout() -> u64 {
        30
    }

    pub(crate) fn aur_query_timeout() -> u64 {
        60
    }

    pub(crate) fn sync_timeout() -> u64 {
        120
    }

    pub(crate) fn field_timeout() -> u64 {
        10
    }

    pub(crate) fn pacman() -> String {
        "pacman".to_string()
    }

    pub(crate) fn vercmp() -> String {
        "vercmp".to_string()
    }

    pub(crate) fn aur_helpers() -> Vec<String> {
        ["paru", "yay", "pikaur", "trizen"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}
