use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::traits::StateStore;
use super::StateDocument;
use crate::error::Error;

/// On-disk envelope pairing the state with its checksum
#[derive(Serialize, Deserialize)]
struct Envelope {
    state: serde_json::Value,
    checksum: String,
}

/// File-backed state store guarded by a SHA-256 checksum
pub struct FileStateStore {
    path: PathBuf,
    require_checksum: bool,
}

impl FileStateStore {
    /// Create a store for `path`.
    /// With `require_checksum` off, a document whose checksum does not match is
    /// still returned; intended for diagnostic reads only.
    pub fn new<P: AsRef<Path>>(path: P, require_checksum: bool) -> Self {
        FileStateStore {
            path: path.as_ref().to_path_buf(),
            require_checksum,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compute the hex SHA-256 of the canonical (compact, key-sorted) serialization
    pub fn compute_checksum(state: &serde_json::Value) -> String {
        // serde_json::Value keeps object keys in a BTreeMap, so this is key-sorted
        let payload = serde_json::to_vec(state).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&payload);
        hex::encode(hasher.finalize())
    }

    fn read_document(&self) -> Result<Option<StateDocument>, Error> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = serde_json::from_str(&content)?;

        match &envelope.state {
            serde_json::Value::Object(map) if !map.is_empty() => {}
            _ => return Err(Error::Protocol("state member missing or empty".to_string())),
        }

        if self.require_checksum && envelope.checksum != Self::compute_checksum(&envelope.state) {
            return Err(Error::Protocol("state checksum mismatch".to_string()));
        }

        Ok(Some(serde_json::from_value(envelope.state)?))
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> StateDocument {
        match self.read_document() {
            Ok(Some(state)) => state,
            Ok(None) => StateDocument::default(),
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "discarding untrusted state file");
                StateDocument::default()
            }
        }
    }

    fn save(&self, state: &StateDocument) -> Result<(), Error> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let value = serde_json::to_value(state)?;
        let envelope = Envelope {
            checksum: Self::compute_checksum(&value),
            state: value,
        };
        let json = serde_json::to_string_pretty(&envelope)?;

        // 1. Write to a temp file next to the target
        let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
        temp.write_all(json.as_bytes())?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;

        // Unprivileged clients may read the file for diagnostics
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o644))?;
        }

        // 2. Atomic rename (atomic on POSIX systems)
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!(path = ?self.path, "state document saved");
        Ok(())
    }
}
