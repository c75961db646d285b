use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// What happened to one external command
#[derive(Debug)]
pub enum RunOutcome {
    /// The process could not be spawned
    FailedToStart(std::io::Error),
    /// The process outlived its completion timeout and was killed
    TimedOut,
    /// The process exited; `code` is `None` when it was terminated by a signal
    Exited {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

/// Spawns external programs with a completion timeout
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> RunOutcome;
}

/// Runs real child processes through tokio
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> RunOutcome {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout must not leave an orphan behind
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return RunOutcome::FailedToStart(e),
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => RunOutcome::Exited {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => RunOutcome::FailedToStart(e),
            Err(_) => RunOutcome::TimedOut,
        }
    }
}

/// Pauses between retries
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
