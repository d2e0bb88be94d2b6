//! TDD loop states and the legal-transition table.
//!
//! The orchestrator moves a run through these states with `advance()`, which
//! rejects any move the table does not list and appends a `TransitionRecord`
//! otherwise. The record list becomes the run's state trace. `max_iterations`
//! and `max_transitions` bound how long that trace can get.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of TDD loop states.
///
/// Every run starts at `GeneratingTests` and terminates at `Succeeded`,
/// `RejectedByGate`, or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TddState {
    /// Test generator is writing the fixed test suite.
    GeneratingTests,
    /// Coder is producing an implementation attempt.
    Coding,
    /// Test runner is executing the suite against the attempt.
    RunningTests,
    /// Reviewer is judging an attempt whose tests passed.
    Reviewing,
    /// Debugger is diagnosing repeated test failures.
    Escalating,
    /// Evidence bundle is being submitted to the HITL gate.
    SubmittingGate,
    /// Tests and review passed; gate pending or approved. Terminal.
    Succeeded,
    /// Gate reviewer rejected the result. Terminal.
    RejectedByGate,
    /// Fatal error, cancellation or safety valve. Terminal.
    Failed,
}

impl TddState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::RejectedByGate | Self::Failed)
    }
}

impl fmt::Display for TddState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GeneratingTests => write!(f, "GeneratingTests"),
            Self::Coding => write!(f, "Coding"),
            Self::RunningTests => write!(f, "RunningTests"),
            Self::Reviewing => write!(f, "Reviewing"),
            Self::Escalating => write!(f, "Escalating"),
            Self::SubmittingGate => write!(f, "SubmittingGate"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::RejectedByGate => write!(f, "RejectedByGate"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Legal transitions between TDD states.
///
/// ```text
/// GeneratingTests → Coding | Failed
/// Coding          → RunningTests | Failed
/// RunningTests    → Reviewing | Escalating | Coding | Failed
/// Escalating      → Coding | Failed
/// Reviewing       → SubmittingGate | Succeeded | Coding | Failed
/// SubmittingGate  → Succeeded | RejectedByGate | Failed
/// ```
fn is_legal_transition(from: TddState, to: TddState) -> bool {
    use TddState::*;

    // Any non-terminal state can transition to Failed.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (GeneratingTests, Coding)
            | (Coding, RunningTests)
            // Tests green → review; red → retry or escalate
            | (RunningTests, Reviewing)
            | (RunningTests, Escalating)
            | (RunningTests, Coding)
            | (Escalating, Coding)
            // Review passed → gate (or straight to success without a dispatcher)
            | (Reviewing, SubmittingGate)
            | (Reviewing, Succeeded)
            | (Reviewing, Coding)
            | (SubmittingGate, Succeeded)
            | (SubmittingGate, RejectedByGate)
    )
}

/// Upper bound on coding iterations for a given retry budget.
///
/// The loop trips its safety valve once the fail count exceeds
/// `max_coding_retries + 5`; every non-final iteration adds exactly one
/// failure, so iteration `max_coding_retries + 7` is the last one that can
/// start. Saturates at `u32::MAX`.
pub fn max_iterations(max_coding_retries: u32) -> u32 {
    max_coding_retries.saturating_add(7)
}

/// Upper bound on transitions one run can record.
///
/// One initial transition, at most three per iteration
/// (→ Coding, → RunningTests, → Reviewing | Escalating), and two at the end.
pub fn max_transitions(max_coding_retries: u32) -> usize {
    (max_iterations(max_coding_retries) as usize)
        .saturating_mul(3)
        .saturating_add(3)
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TddState,
    pub to: TddState,
    /// Coding iteration at the time of transition (0 before the loop).
    pub iteration: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: TddState,
    pub to: TddState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The TDD state machine.
///
/// Tracks the current state, enforces legal transitions, and maintains
/// a log of all transitions for diagnostics.
pub struct StateMachine {
    current: TddState,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine starting at `GeneratingTests`.
    pub fn new() -> Self {
        Self {
            current: TddState::GeneratingTests,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> TddState {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// Attempt to advance to the next state.
    pub fn advance(&mut self, to: TddState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            iteration = self.iteration,
            "State transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` from any non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(TddState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Summary string of the state machine's history.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let head = format!(
            "{} → {} ({}ms, {} transitions)",
            TddState::GeneratingTests,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if states.is_empty() {
            head
        } else {
            format!("{head} [{}]", states.join(" → "))
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
