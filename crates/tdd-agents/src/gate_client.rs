//! HTTP client for a remote HITL gate service.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use coordination::gates::{
    EvidenceBundle, GateDispatcher, GateError, GateRequest, GateResult, GateType,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::TddConfig;

/// Request body posted to `{base_url}/gates`.
#[derive(Debug, Serialize)]
pub struct GateSubmission<'a> {
    pub task_id: &'a str,
    pub session_id: &'a str,
    pub gate_type: GateType,
    pub requested_by: &'a str,
    /// Canonical flat-map encoding of the bundle.
    pub evidence: HashMap<String, String>,
}

/// [`GateDispatcher`] backed by a gate service over HTTP.
///
/// The service answers with the created [`GateRequest`] as JSON, normally
/// pending.
pub struct HttpGateDispatcher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGateDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> GateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GateError::Dispatch(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Dispatcher for `config.gate_url`, or `None` when no URL is set.
    pub fn from_config(config: &TddConfig, timeout: Duration) -> GateResult<Option<Self>> {
        config
            .gate_url
            .as_deref()
            .map(|url| Self::new(url, timeout))
            .transpose()
    }

    pub fn endpoint(&self) -> String {
        format!("{}/gates", self.base_url)
    }
}

#[async_trait]
impl GateDispatcher for HttpGateDispatcher {
    async fn request_gate(
        &self,
        task_id: &str,
        session_id: &str,
        gate_type: GateType,
        bundle: &EvidenceBundle,
        requested_by: &str,
    ) -> GateResult<GateRequest> {
        let body = GateSubmission {
            task_id,
            session_id,
            gate_type,
            requested_by,
            evidence: bundle.to_map()?,
        };
        let url = self.endpoint();
        debug!(%url, task_id, gate = %gate_type, bundle_id = %bundle.bundle_id, "Submitting gate request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GateError::Dispatch(e.to_string()))?
            .error_for_status()
            .map_err(|e| GateError::Dispatch(e.to_string()))?;

        let request: GateRequest = response
            .json()
            .await
            .map_err(|e| GateError::Dispatch(format!("invalid gate response: {e}")))?;

        info!(
            task_id,
            request_id = %request.request_id,
            status = %request.status,
            "Gate request created"
        );
        Ok(request)
    }
}
