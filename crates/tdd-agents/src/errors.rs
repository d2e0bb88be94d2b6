//! TDD loop error taxonomy with failure classification.
//!
//! Every way a run can stop early is represented here. The orchestrator asks
//! `failure_class()` instead of matching on messages.
//!
//! ## Failure classes
//!
//! | Class             | Effect on the loop                                 |
//! |-------------------|----------------------------------------------------|
//! | FatalImmediate    | run ends as Failed, never retried                  |
//! | RetryableInLoop   | fail count +1, error context fed to next attempt   |
//! | DegradedContinue  | logged, loop continues without the result          |
//! | TerminalExternal  | run ends as RejectedByGate, artifacts preserved    |

use std::fmt;

use coordination::gates::GateError;
use thiserror::Error;

use crate::contracts::AgentType;
use crate::state_machine::IllegalTransition;

/// How a failure affects the TDD loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    FatalImmediate,
    RetryableInLoop,
    DegradedContinue,
    TerminalExternal,
}

impl FailureClass {
    /// Whether the run ends on this class of failure.
    pub fn ends_run(self) -> bool {
        matches!(self, Self::FatalImmediate | Self::TerminalExternal)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FatalImmediate => write!(f, "fatal_immediate"),
            Self::RetryableInLoop => write!(f, "retryable_in_loop"),
            Self::DegradedContinue => write!(f, "degraded_continue"),
            Self::TerminalExternal => write!(f, "terminal_external"),
        }
    }
}

/// Errors raised by a test runner.
#[derive(Debug, Error)]
pub enum TestRunnerError {
    #[error("Test run timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Failed to start test command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Test command failed (exit {code}): {stderr}")]
    Execution { code: i32, stderr: String },

    #[error("Test runner produced an unreadable report: {0}")]
    InvalidReport(String),

    #[error("Invalid test command: {0}")]
    InvalidCommand(String),

    #[error("Test runner task aborted: {0}")]
    Join(String),
}

/// Why a run stopped before reaching a gate decision.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    // ── Fatal ─────────────────────────────────────────────────────────────
    /// Test generator reported failure; message kept verbatim.
    #[error("{0}")]
    TestGeneration(String),

    /// Coder reported failure; message kept verbatim.
    #[error("{0}")]
    Coding(String),

    /// Reviewer could not execute (not a negative review).
    #[error("{0}")]
    ReviewExecution(String),

    #[error("{0}")]
    TestRunner(#[from] TestRunnerError),

    /// Agent reported success without the payload its request requires.
    #[error("{agent} reported success but returned no {expected} payload")]
    MissingPayload {
        agent: AgentType,
        expected: &'static str,
    },

    /// Fail count passed the hard iteration bound.
    #[error("Maximum iterations exceeded ({fail_count} failed attempts, limit {limit})")]
    MaxIterations { fail_count: u32, limit: u32 },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Gate submission failed: {0}")]
    GateSubmission(#[from] GateError),

    /// The loop attempted a move its state table forbids.
    #[error("{0}")]
    IllegalTransition(#[from] IllegalTransition),

    // ── Retryable in loop ─────────────────────────────────────────────────
    #[error("{count} tests failed")]
    TestsFailed { count: usize },

    #[error("Review rejected the implementation with {issues} issues")]
    ReviewRejected { issues: usize },

    // ── Degraded ──────────────────────────────────────────────────────────
    #[error("Debugger failed: {0}")]
    Debugger(String),

    // ── External ──────────────────────────────────────────────────────────
    #[error("Gate {request_id} rejected: {reason}")]
    GateRejected { request_id: String, reason: String },
}

impl OrchestrationError {
    /// Classify this error for the loop's control flow.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::TestsFailed { .. } | Self::ReviewRejected { .. } => FailureClass::RetryableInLoop,
            Self::Debugger(_) => FailureClass::DegradedContinue,
            Self::GateRejected { .. } => FailureClass::TerminalExternal,
            Self::TestGeneration(_)
            | Self::Coding(_)
            | Self::ReviewExecution(_)
            | Self::TestRunner(_)
            | Self::MissingPayload { .. }
            | Self::MaxIterations { .. }
            | Self::Cancelled
            | Self::GateSubmission(_)
            | Self::IllegalTransition(_) => FailureClass::FatalImmediate,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.failure_class() == FailureClass::FatalImmediate
    }
}
