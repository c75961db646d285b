use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    Protocol(String),
    InvalidSetting(String),
    /// The caller lacks the privilege the operation requires
    NotPermitted(String),
    /// The external tool could not be started at all
    Spawn { command: String, source: std::io::Error },
    /// The external tool did not finish within its completion budget
    Timeout { command: String, seconds: u64 },
    /// The package database lock is held by another pacman invocation
    DatabaseLocked { command: String },
    ExitStatus {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Json(e) => write!(f, "JSON error: {}", e),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::InvalidSetting(msg) => write!(f, "Invalid setting: {}", msg),
            Error::NotPermitted(msg) => write!(f, "Not permitted: {}", msg),
            Error::Spawn { command, source } => {
                write!(f, "Failed to start `{}`: {}", command, source)
            }
            Error::Timeout { command, seconds } => {
                write!(f, "`{}` timed out after {} seconds", command, seconds)
            }
            Error::DatabaseLocked { command } => {
                write!(f, "`{}` could not lock the package database", command)
            }
            Error::ExitStatus {
                command,
                code,
                stderr,
            } => match code {
                Some(code) => write!(f, "`{}` exited with code {}: {}", command, code, stderr),
                None => write!(f, "`{}` was terminated by a signal: {}", command, stderr),
            },
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl Error {
    /// True for failures worth retrying after the package database lock is released
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Error::DatabaseLocked { .. })
    }
}
