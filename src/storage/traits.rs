use crate::error::Error;

use super::StateDocument;

/// Trait for the persisted state document
pub trait StateStore: Send + Sync {
    /// Read the current document.
    /// Returns the default document if none exists or it cannot be trusted.
    fn load(&self) -> StateDocument;

    /// Durably write a new document.
    /// Callers publish the document only after this returns Ok.
    fn save(&self, state: &StateDocument) -> Result<(), Error>;
}
