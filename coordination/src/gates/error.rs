//! Gate error types

use thiserror::Error;

use super::types::{GateStatus, GateType};

/// Result type alias for gate operations
pub type GateResult<T> = Result<T, GateError>;

/// Errors raised while building, validating, storing, or dispatching gates
#[derive(Error, Debug)]
pub enum GateError {
    /// Bundle carries no evidence items at all
    #[error("Evidence bundle for {gate_type} gate has no items")]
    EmptyEvidence { gate_type: GateType },

    /// No item type intersects the gate's accepted set
    #[error("Evidence bundle for {gate_type} gate has none of the required evidence types: {accepted}")]
    MissingEvidence { gate_type: GateType, accepted: String },

    /// Flat-map encoding could not be decoded
    #[error("Malformed evidence bundle: {0}")]
    MalformedBundle(String),

    #[error("Unknown gate type: {0}")]
    UnknownGateType(String),

    #[error("Gate request not found: {0}")]
    NotFound(String),

    /// Decision attempted on a request that is no longer pending
    #[error("Gate request {request_id} is already {status}")]
    AlreadyDecided {
        request_id: String,
        status: GateStatus,
    },

    /// Transport or remote-side failure when submitting a gate request
    #[error("Gate dispatch failed: {0}")]
    Dispatch(String),

    #[error("Gate store lock poisoned")]
    LockPoisoned,
}

impl GateError {
    /// Whether this error reports a coverage problem with the evidence itself.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyEvidence { .. } | Self::MissingEvidence { .. }
        )
    }
}
