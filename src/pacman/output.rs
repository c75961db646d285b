//! Parsing of pacman and AUR helper text output.

/// stderr fragments pacman prints when another process holds db.lck
const LOCK_SIGNATURES: [&str; 2] = ["could not lock database", "unable to lock database"];

/// Split command output into trimmed, non-empty lines
pub fn split_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when stderr says the package database is locked
pub fn is_lock_contention(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    LOCK_SIGNATURES.iter().any(|sig| stderr.contains(sig))
}

/// Value of a `Key : value` line from `pacman -Qi` / `-Si` output
pub fn field_value(output: &str, field: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == field).then(|| value.trim().to_string())
    })
}

/// Split a whitespace separated field (e.g. `Replaces`) into names; `None` means empty
pub fn field_list(value: &str) -> Vec<String> {
    if value.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    value
        .split_whitespace()
        .map(|item| item.trim_matches(','))
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
