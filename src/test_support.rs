//! Fakes shared by unit tests: a scripted process runner, a recording
//! sleeper and an in-memory state store that counts reads.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Error;
use crate::monitor::RefreshEngine;
use crate::pacman::{
    HelperResolver, ProcessRunner, QueryExecutor, QuerySettings, RunOutcome, Sleeper,
};
use crate::storage::{StateDocument, StateStore};

pub const LOCKED_STDERR: &str =
    "error: failed to init transaction (unable to lock database)\nerror: could not lock database: File exists\n";

pub fn exited(code: i32, stdout: &str, stderr: &str) -> RunOutcome {
    RunOutcome::Exited {
        code: Some(code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

pub fn query_settings() -> QuerySettings {
    QuerySettings {
        pacman: "pacman".to_string(),
        vercmp: "vercmp".to_string(),
        query_timeout: Duration::from_secs(30),
        aur_query_timeout: Duration::from_secs(60),
        sync_timeout: Duration::from_secs(120),
        field_timeout: Duration::from_secs(10),
        lock_retries: 2,
        lock_retry_base_delay: Duration::from_millis(100),
    }
}

/// Engine over fakes with no AUR helper installed and a 5s cache
pub fn engine_with(runner: Arc<FakeRunner>, store: Arc<MemoryStore>) -> RefreshEngine {
    let executor = QueryExecutor::new(
        runner,
        Arc::new(RecordingSleeper::default()),
        query_settings(),
    );
    let resolver = HelperResolver::with_search_path(Vec::new(), OsString::new());
    RefreshEngine::new(store, executor, resolver, Duration::from_secs(5))
}

fn duplicate(outcome: &RunOutcome) -> RunOutcome {
    match outcome {
        RunOutcome::FailedToStart(e) => {
            RunOutcome::FailedToStart(std::io::Error::new(e.kind(), e.to_string()))
        }
        RunOutcome::TimedOut => RunOutcome::TimedOut,
        RunOutcome::Exited {
            code,
            stdout,
            stderr,
        } => RunOutcome::Exited {
            code: *code,
            stdout: stdout.clone(),
            stderr: stderr.clone(),
        },
    }
}

struct Script {
    /// The last outcome repeats once the queue is down to one entry
    outcomes: VecDeque<RunOutcome>,
    delay: Duration,
}

/// Process runner answering from a table keyed by the full command line
#[derive(Default)]
pub struct FakeRunner {
    scripts: Mutex<HashMap<String, Script>>,
    log: Mutex<Vec<(String, Duration)>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, outcome: RunOutcome) {
        self.respond_sequence(command, vec![outcome]);
    }

    pub fn respond_sequence(&self, command: &str, outcomes: Vec<RunOutcome>) {
        self.script(command, outcomes, Duration::ZERO);
    }

    /// Answer after `delay` of (tokio) time has passed
    pub fn respond_after(&self, command: &str, delay: Duration, outcome: RunOutcome) {
        self.script(command, vec![outcome], delay);
    }

    fn script(&self, command: &str, outcomes: Vec<RunOutcome>, delay: Duration) {
        self.scripts.lock().unwrap().insert(
            command.to_string(),
            Script {
                outcomes: outcomes.into(),
                delay,
            },
        );
    }

    /// Number of invocations whose command line is `prefix` or starts with `prefix `
    pub fn calls(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(cmd, _)| matches_prefix(cmd, prefix))
            .count()
    }

    pub fn timeouts(&self, prefix: &str) -> Vec<Duration> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(cmd, _)| matches_prefix(cmd, prefix))
            .map(|(_, timeout)| *timeout)
            .collect()
    }
}

fn matches_prefix(cmd: &str, prefix: &str) -> bool {
    cmd == prefix || cmd.starts_with(&format!("{} ", prefix))
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> RunOutcome {
        let command = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.log.lock().unwrap().push((command.clone(), timeout));

        let (outcome, delay) = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&command) {
                Some(script) => {
                    let outcome = if script.outcomes.len() > 1 {
                        script.outcomes.pop_front()
                    } else {
                        script.outcomes.front().map(duplicate)
                    };
                    (outcome, script.delay)
                }
                None => (None, Duration::ZERO),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        outcome.unwrap_or_else(|| {
            RunOutcome::FailedToStart(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no script for `{}`", command),
            ))
        })
    }
}

/// Sleeper that returns immediately and remembers what it was asked for
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.recorded().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// State store kept in memory
#[derive(Default)]
pub struct MemoryStore {
    document: Mutex<Option<StateDocument>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
    fail_saves: Mutex<bool>,
}

impl MemoryStore {
    pub fn with_document(document: StateDocument) -> Self {
        Self {
            document: Mutex::new(Some(document)),
            ..Self::default()
        }
    }

    pub fn document(&self) -> Option<StateDocument> {
        self.document.lock().unwrap().clone()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> StateDocument {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.document().unwrap_or_default()
    }

    fn save(&self, state: &StateDocument) -> Result<(), Error> {
        if *self.fail_saves.lock().unwrap() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only state directory",
            )));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.document.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}
