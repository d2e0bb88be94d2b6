//! Gate types: HITL checkpoints, their statuses, and accepted evidence

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::GateError;

/// Evidence item kinds produced by the TDD loop.
pub mod evidence_kind {
    pub const ARTIFACT: &str = "artifact";
    pub const TEST_SUITE: &str = "test_suite";
    pub const TEST_RESULT: &str = "test_result";
    pub const REVIEW: &str = "review";
    pub const REQUIREMENTS: &str = "requirements";
    pub const USER_STORY: &str = "user_story";
    pub const DESIGN_DOC: &str = "design_doc";
    pub const ARCHITECTURE: &str = "architecture";
    pub const PLAN: &str = "plan";
    pub const TASK_BREAKDOWN: &str = "task_breakdown";
    pub const COVERAGE_REPORT: &str = "coverage_report";
    pub const RELEASE_NOTES: &str = "release_notes";
    pub const APPROVAL: &str = "approval";
}

/// Human approval checkpoints in the delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    Backlog,
    Design,
    Plan,
    Code,
    Validation,
    Release,
}

impl GateType {
    pub const ALL: [GateType; 6] = [
        Self::Backlog,
        Self::Design,
        Self::Plan,
        Self::Code,
        Self::Validation,
        Self::Release,
    ];

    /// Evidence item types that satisfy this gate.
    ///
    /// A bundle covers the gate when any one of its items has a listed type.
    pub fn accepted_evidence(self) -> &'static [&'static str] {
        use evidence_kind::*;
        match self {
            Self::Backlog => &[REQUIREMENTS, USER_STORY],
            Self::Design => &[DESIGN_DOC, ARCHITECTURE],
            Self::Plan => &[PLAN, TASK_BREAKDOWN],
            Self::Code => &[ARTIFACT, TEST_RESULT],
            Self::Validation => &[TEST_RESULT, COVERAGE_REPORT, REVIEW],
            Self::Release => &[RELEASE_NOTES, TEST_RESULT, APPROVAL],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Design => "design",
            Self::Plan => "plan",
            Self::Code => "code",
            Self::Validation => "validation",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateType {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GateError::UnknownGateType(s.to_string()))
    }
}

/// Lifecycle of a gate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl GateStatus {
    /// Whether a decision has closed the request.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A reviewer's decision on a gate request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub approved: bool,
    pub decided_by: String,
    #[serde(default)]
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}

/// A submitted gate request as returned by a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRequest {
    pub request_id: String,
    pub task_id: String,
    pub gate_type: GateType,
    pub status: GateStatus,
    #[serde(default)]
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<GateDecision>,
}

impl GateRequest {
    pub fn pending(
        request_id: impl Into<String>,
        task_id: impl Into<String>,
        gate_type: GateType,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            task_id: task_id.into(),
            gate_type,
            status: GateStatus::Pending,
            requested_by: requested_by.into(),
            requested_at: Utc::now(),
            decision: None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.status == GateStatus::Rejected
    }

    /// The reviewer's stated reason, empty if undecided.
    pub fn decision_reason(&self) -> &str {
        self.decision
            .as_ref()
            .map(|d| d.reason.as_str())
            .unwrap_or("")
    }
}
