use std::time::Duration;

use tokio::time::Instant;

/// A serialized response and the moment it was filled
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: String,
    filled_at: Instant,
}

/// Short-lived cache of serialized state responses
///
/// Holds the full document and the summary projection separately. Entries
/// age from the moment they were filled; writers call `invalidate` after
/// every successful save so a reader never sees a pre-write payload.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    state: Option<CacheEntry>,
    summary: Option<CacheEntry>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: None,
            summary: None,
        }
    }

    /// Cached full document, if still fresh
    pub fn state(&self) -> Option<&str> {
        self.fresh(&self.state)
    }

    /// Cached summary projection, if still fresh
    pub fn summary(&self) -> Option<&str> {
        self.fresh(&self.summary)
    }

    pub fn fill_state(&mut self, payload: String) {
        self.state = Some(CacheEntry {
            payload,
            filled_at: Instant::now(),
        });
    }

    pub fn fill_summary(&mut self, payload: String) {
        self.summary = Some(CacheEntry {
            payload,
            filled_at: Instant::now(),
        });
    }

    /// Drop both entries
    pub fn invalidate(&mut self) {
        self.state = None;
        self.summary = None;
    }

    fn fresh<'a>(&self, entry: &'a Option<CacheEntry>) -> Option<&'a str> {
        entry
            .as_ref()
            .filter(|e| e.filled_at.elapsed() < self.ttl)
            .map(|e| e.payload.as_str())
    }
}
