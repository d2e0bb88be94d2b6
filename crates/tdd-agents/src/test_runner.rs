//! Test execution behind a timeout.
//!
//! Test runs are blocking, potentially long subprocess calls. Both runners
//! here keep them off the async scheduler so concurrent orchestrator runs are
//! not stalled, and both turn an exceeded deadline into
//! [`TestRunnerError::Timeout`]. Neither retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::tdd::TestRunResult;
use tracing::{debug, warn};

use crate::config::TddConfig;
use crate::errors::TestRunnerError;

/// Placeholder replaced with the test file path in command arguments.
pub const TEST_PATH_PLACEHOLDER: &str = "{test_path}";
/// Placeholder replaced with the suite id in command arguments.
pub const SUITE_ID_PLACEHOLDER: &str = "{suite_id}";

/// Runs a generated test suite against the current workspace.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(
        &self,
        test_path: &str,
        suite_id: &str,
    ) -> Result<TestRunResult, TestRunnerError>;
}

pub type SharedTestRunner = Arc<dyn TestRunner>;

// ── Blocking adapter ─────────────────────────────────────────────────────────

type BlockingRunFn = dyn Fn(&str, &str) -> Result<TestRunResult, TestRunnerError> + Send + Sync;

/// Adapts a synchronous runner function onto the blocking thread pool.
///
/// On timeout the blocking task is abandoned; it finishes in the background.
pub struct BlockingTestRunner {
    run: Arc<BlockingRunFn>,
    timeout: Duration,
}

impl BlockingTestRunner {
    pub fn new<F>(timeout: Duration, run: F) -> Self
    where
        F: Fn(&str, &str) -> Result<TestRunResult, TestRunnerError> + Send + Sync + 'static,
    {
        Self {
            run: Arc::new(run),
            timeout,
        }
    }
}

#[async_trait]
impl TestRunner for BlockingTestRunner {
    async fn run_tests(
        &self,
        test_path: &str,
        suite_id: &str,
    ) -> Result<TestRunResult, TestRunnerError> {
        let run = Arc::clone(&self.run);
        let test_path = test_path.to_string();
        let suite_id = suite_id.to_string();

        // Run in a blocking task to avoid blocking the async runtime
        let handle = tokio::task::spawn_blocking(move || run(&test_path, &suite_id));

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(TestRunnerError::Join(e.to_string())),
            Err(_) => Err(TestRunnerError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

// ── Command runner ───────────────────────────────────────────────────────────

/// Runs a shell-style test command in the workspace and reads a JSON
/// [`TestRunResult`] from its stdout.
///
/// The report may be the whole of stdout or its last non-empty line, so
/// harnesses can print progress before the report. A non-zero exit status is
/// expected when tests fail and is only an error if no report was printed.
/// The child is killed when the timeout fires.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandTestRunner {
    /// Build from a command line such as `pytest {test_path} --json-report`.
    pub fn from_command_line(
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<Self, TestRunnerError> {
        let mut parts = shlex::split(command)
            .ok_or_else(|| TestRunnerError::InvalidCommand(command.to_string()))?
            .into_iter();
        let program = parts
            .next()
            .ok_or_else(|| TestRunnerError::InvalidCommand("empty command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            working_dir: working_dir.to_path_buf(),
            timeout,
        })
    }

    /// Runner for `config.test_command`, or `None` when no command is set.
    pub fn from_config(
        config: &TddConfig,
        working_dir: &Path,
    ) -> Result<Option<Self>, TestRunnerError> {
        config
            .test_command
            .as_deref()
            .map(|cmd| Self::from_command_line(cmd, working_dir, config.test_timeout()))
            .transpose()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn expand_args(&self, test_path: &str, suite_id: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| {
                a.replace(TEST_PATH_PLACEHOLDER, test_path)
                    .replace(SUITE_ID_PLACEHOLDER, suite_id)
            })
            .collect()
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run_tests(
        &self,
        test_path: &str,
        suite_id: &str,
    ) -> Result<TestRunResult, TestRunnerError> {
        let args = self.expand_args(test_path, suite_id);
        debug!(program = %self.program, ?args, suite_id, "Running test command");

        let child = tokio::process::Command::new(&self.program)
            .args(&args)
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(TestRunnerError::Spawn {
                    command: self.program.clone(),
                    source: e,
                })
            }
            Err(_) => {
                warn!(suite_id, seconds = self.timeout.as_secs(), "Test command timed out");
                return Err(TestRunnerError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_report(&stdout) {
            Some(report) => Ok(report),
            None if !output.status.success() => Err(TestRunnerError::Execution {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            None => Err(TestRunnerError::InvalidReport(truncate(stdout.trim(), 200))),
        }
    }
}

/// Parse a JSON report from the whole output or from its last non-empty line.
fn parse_report(stdout: &str) -> Option<TestRunResult> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok().or_else(|| {
        trimmed
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .and_then(|l| serde_json::from_str(l.trim()).ok())
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
