use std::sync::Arc;
use std::time::Duration;

use super::output::{field_list, field_value, is_lock_contention, split_lines};
use super::runner::{ProcessRunner, RunOutcome, Sleeper};
use crate::config::MonitorConfig;
use crate::error::Error;

/// `pacman -Qu` and `<helper> -Qua` exit 1 when nothing is upgradable
const LIST_OK_CODES: &[i32] = &[0, 1];
const STRICT_OK_CODES: &[i32] = &[0];

/// Result of a database sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    /// The lock was still held after all retries
    Locked,
    Failed,
}

/// Timeouts, binaries and retry policy for external queries
#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub pacman: String,
    pub vercmp: String,
    pub query_timeout: Duration,
    pub aur_query_timeout: Duration,
    pub sync_timeout: Duration,
    pub field_timeout: Duration,
    pub lock_retries: u32,
    pub lock_retry_base_delay: Duration,
}

impl From<&MonitorConfig> for QuerySettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            pacman: config.pacman.clone(),
            vercmp: config.vercmp.clone(),
            query_timeout: Duration::from_secs(config.query_timeout),
            aur_query_timeout: Duration::from_secs(config.aur_query_timeout),
            sync_timeout: Duration::from_secs(config.sync_timeout),
            field_timeout: Duration::from_secs(config.field_timeout),
            lock_retries: config.lock_retries,
            lock_retry_base_delay: Duration::from_millis(config.lock_retry_base_delay_ms),
        }
    }
}

/// Runs pacman and AUR helper queries
///
/// Every invocation is bounded by a completion timeout. A failure whose
/// stderr shows the database lock is held is retried with exponential
/// backoff; every other failure is logged and degrades to an empty result.
pub struct QueryExecutor {
    runner: Arc<dyn ProcessRunner>,
    sleeper: Arc<dyn Sleeper>,
    settings: QuerySettings,
}

impl QueryExecutor {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        sleeper: Arc<dyn Sleeper>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            runner,
            sleeper,
            settings,
        }
    }

    /// Upgradable packages from the sync repositories (`pacman -Qu`)
    pub async fn list_upgrades(&self) -> Vec<String> {
        let pacman = self.settings.pacman.clone();
        self.list(&pacman, &["-Qu"], self.settings.query_timeout)
            .await
    }

    /// Upgradable AUR packages via the given helper (`<helper> -Qua`)
    pub async fn list_aur_upgrades(&self, helper: &str) -> Vec<String> {
        self.list(helper, &["-Qua"], self.settings.aur_query_timeout)
            .await
    }

    /// Refresh the sync databases (`pacman -Sy`)
    pub async fn sync_databases(&self) -> SyncOutcome {
        let args = to_args(&["-Sy"]);
        match self
            .run_with_lock_retry(
                &self.settings.pacman,
                &args,
                self.settings.sync_timeout,
                STRICT_OK_CODES,
            )
            .await
        {
            Ok(_) => {
                tracing::info!("sync databases refreshed");
                SyncOutcome::Synced
            }
            Err(e) if e.is_lock_contention() => {
                tracing::warn!(error = %e, "sync databases still locked after retries");
                SyncOutcome::Locked
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to refresh sync databases");
                SyncOutcome::Failed
            }
        }
    }

    /// Installed version of `pkg`
    pub async fn local_version(&self, pkg: &str) -> Option<String> {
        self.package_field("-Qi", pkg, "Version").await
    }

    /// Version of `pkg` in the sync repositories
    pub async fn remote_version(&self, pkg: &str) -> Option<String> {
        self.package_field("-Si", pkg, "Version").await
    }

    /// True when the repositories carry a newer version than the installed one
    pub async fn is_newer_available(&self, pkg: &str) -> bool {
        let (Some(local), Some(remote)) =
            (self.local_version(pkg).await, self.remote_version(pkg).await)
        else {
            return false;
        };

        let args = vec![local, remote];
        match self
            .run_with_lock_retry(
                &self.settings.vercmp,
                &args,
                self.settings.field_timeout,
                STRICT_OK_CODES,
            )
            .await
        {
            // vercmp prints -1 when the first version is older
            Ok(stdout) => stdout.trim() == "-1",
            Err(e) => {
                tracing::debug!(package = pkg, error = %e, "vercmp failed");
                false
            }
        }
    }

    /// Packages belonging to a sync group (`pacman -Sqg`)
    pub async fn group_members(&self, group: &str) -> Vec<String> {
        let pacman = self.settings.pacman.clone();
        match self
            .run_with_lock_retry(
                &pacman,
                &to_args(&["-Sqg", group]),
                self.settings.field_timeout,
                STRICT_OK_CODES,
            )
            .await
        {
            Ok(stdout) => split_lines(&stdout),
            Err(e) => {
                tracing::debug!(group, error = %e, "group lookup failed");
                Vec::new()
            }
        }
    }

    /// Packages the repository version of `pkg` replaces
    pub async fn replaced_packages(&self, pkg: &str) -> Vec<String> {
        self.package_field("-Si", pkg, "Replaces")
            .await
            .map(|value| field_list(&value))
            .unwrap_or_default()
    }

    async fn list(&self, program: &str, args: &[&str], timeout: Duration) -> Vec<String> {
        match self
            .run_with_lock_retry(program, &to_args(args), timeout, LIST_OK_CODES)
            .await
        {
            Ok(stdout) => {
                let lines = split_lines(&stdout);
                tracing::debug!(program, count = lines.len(), "upgrade query finished");
                lines
            }
            Err(e) => {
                tracing::warn!(program, error = %e, "upgrade query failed");
                Vec::new()
            }
        }
    }

    async fn package_field(&self, op: &str, pkg: &str, field: &str) -> Option<String> {
        let pacman = self.settings.pacman.clone();
        match self
            .run_with_lock_retry(
                &pacman,
                &to_args(&[op, pkg]),
                self.settings.field_timeout,
                STRICT_OK_CODES,
            )
            .await
        {
            Ok(stdout) => field_value(&stdout, field).filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::debug!(package = pkg, field, error = %e, "field lookup failed");
                None
            }
        }
    }

    /// Run once, then retry lock-contended failures with a doubling delay
    async fn run_with_lock_retry(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        ok_codes: &[i32],
    ) -> Result<String, Error> {
        let mut delay = self.settings.lock_retry_base_delay;
        let mut retries_left = self.settings.lock_retries;

        loop {
            match self.run_once(program, args, timeout, ok_codes).await {
                Err(e) if e.is_lock_contention() && retries_left > 0 => {
                    tracing::info!(
                        command = %display_command(program, args),
                        delay_ms = delay.as_millis() as u64,
                        retries_left,
                        "package database locked, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    retries_left -= 1;
                }
                other => return other,
            }
        }
    }

    async fn run_once(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        ok_codes: &[i32],
    ) -> Result<String, Error> {
        let command = display_command(program, args);
        tracing::trace!(%command, "running");

        match self.runner.run(program, args, timeout).await {
            RunOutcome::FailedToStart(source) => Err(Error::Spawn { command, source }),
            RunOutcome::TimedOut => Err(Error::Timeout {
                command,
                seconds: timeout.as_secs(),
            }),
            RunOutcome::Exited {
                code,
                stdout,
                stderr,
            } => {
                if code.is_some_and(|c| ok_codes.contains(&c)) {
                    Ok(stdout)
                } else if is_lock_contention(&stderr) {
                    Err(Error::DatabaseLocked { command })
                } else {
                    Err(Error::ExitStatus {
                        command,
                        code,
                        stderr: stderr.trim().to_string(),
                    })
                }
            }
        }
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
