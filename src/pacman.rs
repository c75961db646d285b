mod executor;
mod helper;
mod output;
mod runner;

pub use executor::{QueryExecutor, QuerySettings, SyncOutcome};
pub use helper::HelperResolver;
pub use runner::{SystemRunner, TokioSleeper};

#[cfg(test)]
pub use runner::{ProcessRunner, RunOutcome, Sleeper};
