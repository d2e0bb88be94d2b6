//! In-memory gate store
//!
//! Keeps every submitted bundle in its canonical flat-map encoding, keyed by
//! request id, together with the request's decision history. Useful for local
//! runs and tests; production deployments put a persistent store behind
//! [`GateDispatcher`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::dispatcher::GateDispatcher;
use super::error::{GateError, GateResult};
use super::evidence::{validate_evidence_for_gate, EvidenceBundle};
use super::types::{GateDecision, GateRequest, GateStatus, GateType};

/// Decision applied at submission time, before a human sees the request.
#[derive(Debug, Clone, Default)]
pub enum AutoDecision {
    /// Leave requests pending.
    #[default]
    None,
    Approve { decided_by: String },
    Reject { decided_by: String, reason: String },
}

/// Stored gate request plus its submission context.
#[derive(Debug, Clone)]
pub struct GateRecord {
    pub request: GateRequest,
    pub session_id: String,
    /// Canonical flat-map bundle encoding.
    pub bundle: HashMap<String, String>,
}

/// One entry of the decision log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionLogEntry {
    pub request_id: String,
    pub task_id: String,
    pub status: GateStatus,
    pub decided_by: String,
    pub reason: String,
}

#[derive(Default)]
struct StoreState {
    records: HashMap<String, GateRecord>,
    decisions: Vec<DecisionLogEntry>,
}

/// Thread-safe in-memory [`GateDispatcher`].
#[derive(Default)]
pub struct MemoryGateStore {
    state: RwLock<StoreState>,
    auto_decision: AutoDecision,
}

impl MemoryGateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_decision(mut self, auto_decision: AutoDecision) -> Self {
        self.auto_decision = auto_decision;
        self
    }

    /// Fetch a request by id.
    pub fn get(&self, request_id: &str) -> GateResult<GateRequest> {
        let state = self.state.read().map_err(|_| GateError::LockPoisoned)?;
        state
            .records
            .get(request_id)
            .map(|r| r.request.clone())
            .ok_or_else(|| GateError::NotFound(request_id.to_string()))
    }

    /// Decode the stored bundle of a request.
    pub fn load_bundle(&self, request_id: &str) -> GateResult<EvidenceBundle> {
        let state = self.state.read().map_err(|_| GateError::LockPoisoned)?;
        let record = state
            .records
            .get(request_id)
            .ok_or_else(|| GateError::NotFound(request_id.to_string()))?;
        EvidenceBundle::from_map(&record.bundle)
    }

    /// All requests for a task, oldest first.
    pub fn requests_for_task(&self, task_id: &str) -> GateResult<Vec<GateRequest>> {
        let state = self.state.read().map_err(|_| GateError::LockPoisoned)?;
        let mut out: Vec<GateRequest> = state
            .records
            .values()
            .filter(|r| r.request.task_id == task_id)
            .map(|r| r.request.clone())
            .collect();
        out.sort_by_key(|r| r.requested_at);
        Ok(out)
    }

    /// Record a human decision on a pending request.
    pub fn decide(
        &self,
        request_id: &str,
        approved: bool,
        decided_by: &str,
        reason: &str,
    ) -> GateResult<GateRequest> {
        let mut state = self.state.write().map_err(|_| GateError::LockPoisoned)?;
        let record = state
            .records
            .get_mut(request_id)
            .ok_or_else(|| GateError::NotFound(request_id.to_string()))?;
        apply_decision(&mut record.request, approved, decided_by, reason)?;
        let request = record.request.clone();
        state.decisions.push(log_entry(&request));
        info!(
            request_id,
            task_id = %request.task_id,
            status = %request.status,
            decided_by,
            "Gate decision recorded"
        );
        Ok(request)
    }

    /// Mark a pending request as expired.
    pub fn expire(&self, request_id: &str) -> GateResult<GateRequest> {
        let mut state = self.state.write().map_err(|_| GateError::LockPoisoned)?;
        let record = state
            .records
            .get_mut(request_id)
            .ok_or_else(|| GateError::NotFound(request_id.to_string()))?;
        if record.request.status.is_terminal() {
            return Err(GateError::AlreadyDecided {
                request_id: request_id.to_string(),
                status: record.request.status,
            });
        }
        record.request.status = GateStatus::Expired;
        let request = record.request.clone();
        state.decisions.push(log_entry(&request));
        Ok(request)
    }

    /// Decision log in the order decisions were made.
    pub fn decision_log(&self) -> GateResult<Vec<DecisionLogEntry>> {
        let state = self.state.read().map_err(|_| GateError::LockPoisoned)?;
        Ok(state.decisions.clone())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn apply_decision(
    request: &mut GateRequest,
    approved: bool,
    decided_by: &str,
    reason: &str,
) -> GateResult<()> {
    if request.status.is_terminal() {
        return Err(GateError::AlreadyDecided {
            request_id: request.request_id.clone(),
            status: request.status,
        });
    }
    request.status = if approved {
        GateStatus::Approved
    } else {
        GateStatus::Rejected
    };
    request.decision = Some(GateDecision {
        approved,
        decided_by: decided_by.to_string(),
        reason: reason.to_string(),
        decided_at: Utc::now(),
    });
    Ok(())
}

fn log_entry(request: &GateRequest) -> DecisionLogEntry {
    let (decided_by, reason) = request
        .decision
        .as_ref()
        .map(|d| (d.decided_by.clone(), d.reason.clone()))
        .unwrap_or_default();
    DecisionLogEntry {
        request_id: request.request_id.clone(),
        task_id: request.task_id.clone(),
        status: request.status,
        decided_by,
        reason,
    }
}

#[async_trait]
impl GateDispatcher for MemoryGateStore {
    async fn request_gate(
        &self,
        task_id: &str,
        session_id: &str,
        gate_type: GateType,
        bundle: &EvidenceBundle,
        requested_by: &str,
    ) -> GateResult<GateRequest> {
        if bundle.gate_type != gate_type {
            return Err(GateError::MalformedBundle(format!(
                "bundle {} was built for the {} gate, not {}",
                bundle.bundle_id, bundle.gate_type, gate_type
            )));
        }
        validate_evidence_for_gate(bundle)?;
        let encoded = bundle.to_map()?;

        let mut request = GateRequest::pending(
            format!("gate-{}", Uuid::new_v4()),
            task_id,
            gate_type,
            requested_by,
        );

        let mut state = self.state.write().map_err(|_| GateError::LockPoisoned)?;
        match &self.auto_decision {
            AutoDecision::None => {}
            AutoDecision::Approve { decided_by } => {
                apply_decision(&mut request, true, decided_by, "")?;
                state.decisions.push(log_entry(&request));
            }
            AutoDecision::Reject { decided_by, reason } => {
                apply_decision(&mut request, false, decided_by, reason)?;
                state.decisions.push(log_entry(&request));
            }
        }

        debug!(
            request_id = %request.request_id,
            task_id,
            gate = %gate_type,
            status = %request.status,
            items = bundle.items.len(),
            "Stored gate request"
        );

        state.records.insert(
            request.request_id.clone(),
            GateRecord {
                request: request.clone(),
                session_id: session_id.to_string(),
                bundle: encoded,
            },
        );
        Ok(request)
    }
}
