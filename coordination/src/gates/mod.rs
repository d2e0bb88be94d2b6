//! HITL gates: evidence bundles, validation, and gate dispatch
//!
//! A development cycle that passes its tests and review is not accepted until
//! a human approves it at a gate. The orchestrator packages what it produced
//! into an [`EvidenceBundle`], and a [`GateDispatcher`] opens the request.
//!
//! # Gate → accepted evidence
//!
//! ```text
//! backlog    → requirements | user_story
//! design     → design_doc | architecture
//! plan       → plan | task_breakdown
//! code       → artifact | test_result
//! validation → test_result | coverage_report | review
//! release    → release_notes | test_result | approval
//! ```

pub mod dispatcher;
pub mod error;
pub mod evidence;
pub mod store;
pub mod types;

pub use dispatcher::{GateDispatcher, SharedGateDispatcher};
pub use error::{GateError, GateResult};
pub use evidence::{
    content_hash, validate_evidence_for_gate, DevelopmentEvidence, EvidenceBundle, EvidenceItem,
};
pub use store::{AutoDecision, DecisionLogEntry, GateRecord, MemoryGateStore};
pub use types::{evidence_kind, GateDecision, GateRequest, GateStatus, GateType};
