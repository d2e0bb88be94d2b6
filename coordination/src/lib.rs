//! TDD Coordination Library
//!
//! Deterministic, agent-free pieces of the TDD orchestration loop:
//! - The TDD domain model: test suites, implementations, test runs, reviews
//!   and debug analyses exchanged between agents
//! - HITL gate types and the gate → accepted-evidence table
//! - Integrity-hashed evidence bundles, their flat-map wire form, and
//!   coverage validation
//! - The `GateDispatcher` seam and an in-memory gate store
//!
//! # Usage
//!
//! ```
//! use coordination::gates::{evidence_kind, validate_evidence_for_gate, EvidenceBundle, EvidenceItem, GateType};
//!
//! let bundle = EvidenceBundle::new("task-1", GateType::Code, "abc123", "one file")
//!     .with_item(EvidenceItem::from_content(evidence_kind::ARTIFACT, "src/lib.rs", "code", "fn f() {}"));
//! assert!(validate_evidence_for_gate(&bundle).is_ok());
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod gates;
pub mod tdd;

// Re-export key gate types
pub use gates::{
    content_hash, validate_evidence_for_gate, AutoDecision, EvidenceBundle, EvidenceItem,
    GateDispatcher, GateError, GateRequest, GateResult, GateStatus, GateType, MemoryGateStore,
    SharedGateDispatcher,
};

// Re-export key TDD model types
pub use tdd::{CodeReview, DebugAnalysis, Implementation, TestRunResult, TestSuite};
