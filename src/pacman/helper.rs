use std::ffi::OsString;

/// Picks the AUR helper used for `-Qua` queries
///
/// A persisted choice is reused while it is still on the search path;
/// otherwise the candidates are probed in order.
pub struct HelperResolver {
    candidates: Vec<String>,
    /// Overrides `PATH` for lookups; `None` uses the process environment
    search_path: Option<OsString>,
}

impl HelperResolver {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            search_path: None,
        }
    }

    /// Resolve against an explicit search path instead of `PATH`
    #[cfg(test)]
    pub fn with_search_path(candidates: Vec<String>, search_path: OsString) -> Self {
        Self {
            candidates,
            search_path: Some(search_path),
        }
    }

    /// Return the helper to use, or an empty string when none is installed
    pub fn resolve(&self, persisted: &str) -> String {
        if !persisted.is_empty() {
            if self.is_candidate(persisted) && self.is_installed(persisted) {
                return persisted.to_string();
            }
            tracing::info!(helper = persisted, "persisted AUR helper no longer usable, probing");
        }

        match self.candidates.iter().find(|name| self.is_installed(name)) {
            Some(name) => {
                tracing::debug!(helper = %name, "discovered AUR helper");
                name.clone()
            }
            None => {
                tracing::debug!("no AUR helper installed");
                String::new()
            }
        }
    }

    /// Only configured candidates may be selected; the daemon executes the name as root
    pub fn is_candidate(&self, name: &str) -> bool {
        self.candidates.iter().any(|c| c == name)
    }

    fn is_installed(&self, name: &str) -> bool {
        match &self.search_path {
            Some(paths) => match std::env::current_dir() {
                Ok(cwd) => which::which_in(name, Some(paths), cwd).is_ok(),
                Err(_) => false,
            },
            None => which::which(name).is_ok(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn install(dir: &Path, name: &str) {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn candidates() -> Vec<String> {
        vec!["paru".to_string(), "yay".to_string(), "pikaur".to_string()]
    }

    #[test]
    fn test_probes_candidates_in_order() {
        let bin = TempDir::new().unwrap();
        install(bin.path(), "pikaur");
        install(bin.path(), "yay");

        let resolver =
            HelperResolver::with_search_path(candidates(), bin.path().as_os_str().to_owned());

        assert_eq!(resolver.resolve(""), "yay");
    }

    #[test]
    fn test_keeps_installed_persisted_choice() {
        let bin = TempDir::new().unwrap();
        install(bin.path(), "paru");
        install(bin.path(), "pikaur");

        let resolver =
            HelperResolver::with_search_path(candidates(), bin.path().as_os_str().to_owned());

        assert_eq!(resolver.resolve("pikaur"), "pikaur");
    }

    #[test]
    fn test_rediscovers_when_persisted_choice_is_gone() {
        let bin = TempDir::new().unwrap();
        install(bin.path(), "paru");

        let resolver =
            HelperResolver::with_search_path(candidates(), bin.path().as_os_str().to_owned());

        assert_eq!(resolver.resolve("yay"), "paru");
    }

    #[test]
    fn test_rejects_unknown_persisted_name() {
        let bin = TempDir::new().unwrap();
        install(bin.path(), "evil");
        install(bin.path(), "yay");

        let resolver =
            HelperResolver::with_search_path(candidates(), bin.path().as_os_str().to_owned());

        assert_eq!(resolver.resolve("evil"), "yay");
        assert!(!resolver.is_candidate("evil"));
    }

    #[test]
    fn test_nothing_installed_is_empty() {
        let bin = TempDir::new().unwrap();
        let resolver =
            HelperResolver::with_search_path(candidates(), bin.path().as_os_str().to_owned());

        assert_eq!(resolver.resolve(""), "");
    }
}
