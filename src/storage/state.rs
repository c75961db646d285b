use serde::{Deserialize, Serialize};

/// Outcome of the most recent refresh cycle
#[derive(Serialize, Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Nothing has been checked yet
    #[default]
    Idle,
    Ok,
}

/// Derived update counters
///
/// `remove` and `held` are reserved and always written as zero.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    #[serde(default)]
    pub upgrade: usize,
    #[serde(default)]
    pub aur_upgrade: usize,
    #[serde(default)]
    pub total_upgrade: usize,
    #[serde(default)]
    pub remove: usize,
    #[serde(default)]
    pub held: usize,
}

impl Counts {
    pub fn new(upgrade: usize, aur_upgrade: usize) -> Self {
        Self {
            upgrade,
            aur_upgrade,
            total_upgrade: upgrade + aur_upgrade,
            remove: 0,
            held: 0,
        }
    }
}

/// The state document persisted in state.json and published to clients
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct StateDocument {
    /// Unix timestamp of the last successful refresh
    #[serde(default)]
    pub checked_at: i64,

    #[serde(default)]
    pub counts: Counts,

    /// Raw `pacman -Qu` lines (`name old -> new`)
    #[serde(default)]
    pub packages: Vec<String>,

    /// Raw `<helper> -Qua` lines
    #[serde(default)]
    pub aur_packages: Vec<String>,

    #[serde(default)]
    pub status: Status,

    // User preferences echoed into the document so the daemon never has to
    // read the session user's configuration.
    #[serde(default)]
    pub aur_enabled: bool,

    #[serde(default)]
    pub aur_helper: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<u64>,
}

/// The subset of the document a tray icon needs
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StateSummary {
    pub checked_at: i64,
    pub counts: Counts,
    pub status: Status,
}

impl StateDocument {
    /// Build a fresh document from query results, carrying preferences over from `prior`
    pub fn from_updates(
        packages: Vec<String>,
        aur_packages: Vec<String>,
        checked_at: i64,
        prior: &StateDocument,
    ) -> Self {
        StateDocument {
            checked_at,
            counts: Counts::new(packages.len(), aur_packages.len()),
            packages,
            aur_packages,
            status: Status::Ok,
            aur_enabled: prior.aur_enabled,
            aur_helper: prior.aur_helper.clone(),
            check_interval: prior.check_interval,
        }
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary {
            checked_at: self.checked_at,
            counts: self.counts,
            status: self.status,
        }
    }

    /// Compact JSON as sent over the socket
    pub fn to_json(&self) -> String {
        // Plain data with string keys cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl StateSummary {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
