//! Typed agent contracts for the TDD loop.
//!
//! Every agent call takes an [`AgentRequest`] and yields an [`AgentOutcome`]
//! whose payload is a closed union of the typed artifacts the loop consumes.
//! The orchestrator never looks payloads up by string key.
//!
//! ## Request → payload
//!
//! ```text
//! GenerateTests → AgentPayload::TestSuite
//! Implement     → AgentPayload::Implementation
//! Review        → AgentPayload::Review { passed, review }
//! Debug         → AgentPayload::DebugAnalysis
//! Develop       → AgentPayload::Development     (orchestrator as an agent)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use coordination::tdd::{CodeReview, DebugAnalysis, Implementation, TestRunResult, TestSuite};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Context ──────────────────────────────────────────────────────────────────

/// A relevant file excerpt packed for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub path: String,
    pub content: String,
}

/// Bag of file snippets and interface signatures relevant to the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPack {
    #[serde(default)]
    pub snippets: Vec<ContextSnippet>,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

/// Per-run context handed unchanged to every agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub session_id: String,
    pub task_id: String,
    pub tenant_id: String,
    pub workspace_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_pack: Option<ContextPack>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl AgentContext {
    pub fn new(
        session_id: impl Into<String>,
        task_id: impl Into<String>,
        tenant_id: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            task_id: task_id.into(),
            tenant_id: tenant_id.into(),
            workspace_path: workspace_path.into(),
            context_pack: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_context_pack(mut self, pack: ContextPack) -> Self {
        self.context_pack = Some(pack);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// String-valued metadata entry, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

// ── Agent identity ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    TestGenerator,
    Coder,
    Reviewer,
    Debugger,
    Orchestrator,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TestGenerator => write!(f, "test_generator"),
            Self::Coder => write!(f, "coder"),
            Self::Reviewer => write!(f, "reviewer"),
            Self::Debugger => write!(f, "debugger"),
            Self::Orchestrator => write!(f, "orchestrator"),
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────────────────

/// A development task as handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevelopmentTask {
    pub task_description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl DevelopmentTask {
    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            task_description: task_description.into(),
            acceptance_criteria: Vec::new(),
        }
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }
}

/// Input to a single agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentRequest {
    GenerateTests {
        task_description: String,
        acceptance_criteria: Vec<String>,
    },
    Implement {
        task_description: String,
        test_code: String,
        fail_count: u32,
        /// String form of the most recent attempt.
        previous_implementation: Option<String>,
        test_errors: Vec<String>,
        debug_analysis: Option<DebugAnalysis>,
    },
    Review {
        implementation: String,
        test_suite: String,
        test_results: String,
    },
    Debug {
        test_output: String,
        implementation: String,
        test_code: String,
    },
    Develop(DevelopmentTask),
}

impl AgentRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GenerateTests { .. } => "generate_tests",
            Self::Implement { .. } => "implement",
            Self::Review { .. } => "review",
            Self::Debug { .. } => "debug",
            Self::Develop(_) => "develop",
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────────

/// Typed success payload of an agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AgentPayload {
    #[default]
    None,
    TestSuite(TestSuite),
    Implementation(Implementation),
    Review {
        passed: bool,
        review: CodeReview,
    },
    DebugAnalysis(DebugAnalysis),
    Development(Box<DevelopmentResult>),
}

/// Result of one agent invocation. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub success: bool,
    pub agent_type: AgentType,
    pub task_id: String,
    #[serde(default)]
    pub artifact_paths: Vec<String>,
    #[serde(default)]
    pub payload: AgentPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Agent's own suggestion that a retry might help. The orchestrator does
    /// not act on it.
    #[serde(default)]
    pub should_retry: bool,
}

impl AgentOutcome {
    pub fn success(agent_type: AgentType, task_id: impl Into<String>, payload: AgentPayload) -> Self {
        Self {
            success: true,
            agent_type,
            task_id: task_id.into(),
            artifact_paths: Vec::new(),
            payload,
            error_message: None,
            should_retry: false,
        }
    }

    pub fn failure(
        agent_type: AgentType,
        task_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            agent_type,
            task_id: task_id.into(),
            artifact_paths: Vec::new(),
            payload: AgentPayload::None,
            error_message: Some(message.into()),
            should_retry: false,
        }
    }

    pub fn with_artifact(mut self, path: impl Into<String>) -> Self {
        self.artifact_paths.push(path.into());
        self
    }

    pub fn with_retry_hint(mut self) -> Self {
        self.should_retry = true;
        self
    }

    /// Error text of a failed call, or a generic message naming the agent.
    pub fn failure_message(&self) -> String {
        self.error_message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("{} failed without an error message", self.agent_type))
    }
}

// ── Development result ───────────────────────────────────────────────────────

/// Metadata keys written on the terminal result.
pub mod meta {
    pub const HITL4_STATUS: &str = "hitl4_status";
    pub const HITL4_REASON: &str = "hitl4_reason";
    pub const FINAL_STATE: &str = "final_state";
    pub const STATE_TRACE: &str = "state_trace";
    pub const TRANSITIONS: &str = "transitions";
}

/// Terminal value of one orchestrator run, created once at a loop exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<Implementation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_suite: Option<TestSuite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_result: Option<TestRunResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<CodeReview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_analysis: Option<DebugAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hitl4_request_id: Option<String>,
    pub retry_count: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl DevelopmentResult {
    /// A failed run: only the cause and the retry count survive.
    pub fn failed(error_message: impl Into<String>, retry_count: u32) -> Self {
        Self {
            success: false,
            implementation: None,
            test_suite: None,
            test_run_result: None,
            review: None,
            debug_analysis: None,
            error_message: Some(error_message.into()),
            hitl4_request_id: None,
            retry_count,
            metadata: BTreeMap::new(),
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}
