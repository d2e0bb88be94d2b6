//! Gate dispatcher seam.
//!
//! The orchestrator submits evidence through this trait and never talks to a
//! gate backend directly. Implementations must be safe to share between
//! concurrent orchestrator runs.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::GateResult;
use super::evidence::EvidenceBundle;
use super::types::{GateRequest, GateType};

/// Submits evidence bundles to a HITL gate backend.
#[async_trait]
pub trait GateDispatcher: Send + Sync {
    /// Open a gate request for `task_id`.
    ///
    /// The returned request is usually `Pending`; a backend that decides
    /// synchronously may already return `Approved` or `Rejected`.
    async fn request_gate(
        &self,
        task_id: &str,
        session_id: &str,
        gate_type: GateType,
        bundle: &EvidenceBundle,
        requested_by: &str,
    ) -> GateResult<GateRequest>;
}

/// Shared handle to a dispatcher.
pub type SharedGateDispatcher = Arc<dyn GateDispatcher>;
