use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default coding retries before the debugger is brought in.
const DEFAULT_MAX_CODING_RETRIES: u32 = 3;
/// Default wall-clock budget for one test run.
const DEFAULT_TEST_TIMEOUT_SECS: u64 = 300;
/// Default identity recorded on gate requests.
const DEFAULT_REQUESTED_BY: &str = "tdd-orchestrator";

const ENV_MAX_CODING_RETRIES: &str = "TDD_MAX_CODING_RETRIES";
const ENV_TEST_TIMEOUT_SECS: &str = "TDD_TEST_TIMEOUT_SECS";
const ENV_REQUESTED_BY: &str = "TDD_REQUESTED_BY";
const ENV_GATE_URL: &str = "TDD_GATE_URL";
const ENV_TEST_COMMAND: &str = "TDD_TEST_COMMAND";

/// TDD loop configuration.
///
/// Precedence (highest to lowest): environment variables, TOML file, defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TddConfig {
    /// Failed coding attempts tolerated before each further failure is
    /// escalated to the debugger.
    pub max_coding_retries: u32,
    /// Timeout for a single test run.
    pub test_timeout_secs: u64,
    /// Identity recorded as the requester of gate reviews.
    pub requested_by: String,
    /// Base URL of a remote gate service (None = no HTTP dispatcher).
    pub gate_url: Option<String>,
    /// Command used by `CommandTestRunner`, with `{test_path}` and
    /// `{suite_id}` placeholders.
    pub test_command: Option<String>,
}

impl Default for TddConfig {
    fn default() -> Self {
        Self {
            max_coding_retries: DEFAULT_MAX_CODING_RETRIES,
            test_timeout_secs: DEFAULT_TEST_TIMEOUT_SECS,
            requested_by: DEFAULT_REQUESTED_BY.to_string(),
            gate_url: None,
            test_command: None,
        }
    }
}

impl TddConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Parse a TOML document, then apply environment overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Failed to parse TDD config TOML")?;
        Ok(config.with_env_overrides())
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    fn with_env_overrides(mut self) -> Self {
        self.max_coding_retries = u32_from_env(ENV_MAX_CODING_RETRIES, self.max_coding_retries);
        self.test_timeout_secs = u64_from_env(ENV_TEST_TIMEOUT_SECS, self.test_timeout_secs);
        if let Ok(v) = std::env::var(ENV_REQUESTED_BY) {
            self.requested_by = v;
        }
        if let Ok(v) = std::env::var(ENV_GATE_URL) {
            self.gate_url = Some(v);
        }
        if let Ok(v) = std::env::var(ENV_TEST_COMMAND) {
            self.test_command = Some(v);
        }
        self
    }

    pub fn with_max_coding_retries(mut self, max_coding_retries: u32) -> Self {
        self.max_coding_retries = max_coding_retries;
        self
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    /// Fail count above which the run is abandoned. Saturates at `u32::MAX`.
    pub fn safety_valve(&self) -> u32 {
        self.max_coding_retries.saturating_add(5)
    }
}

fn u32_from_env(var: &str, default: u32) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn u64_from_env(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
