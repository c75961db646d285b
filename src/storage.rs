mod cache;
mod filesystem;
mod state;
mod traits;

pub use cache::ResponseCache;
pub use filesystem::FileStateStore;
pub use state::StateDocument;
pub use traits::StateStore;

#[cfg(test)]
pub use state::{Counts, Status};
