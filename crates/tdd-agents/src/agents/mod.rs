//! Domain agent seam.
//!
//! The test generator, coder, reviewer and debugger are all driven through
//! [`DomainAgent`]. How an agent builds prompts or talks to a model is its own
//! business; the orchestrator only sees typed requests and outcomes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::contracts::{AgentContext, AgentOutcome, AgentRequest, AgentType};

/// An agent the TDD loop can invoke.
///
/// Implementations are shared between concurrent orchestrator runs and must
/// not keep per-run state.
#[async_trait]
pub trait DomainAgent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// Execute one request.
    ///
    /// Execution problems are reported as an unsuccessful outcome, not a
    /// panic or an `Err`.
    async fn execute(&self, ctx: &AgentContext, request: AgentRequest) -> AgentOutcome;
}

pub type SharedAgent = Arc<dyn DomainAgent>;

/// The four agents one orchestrator run sequences.
#[derive(Clone)]
pub struct TddAgents {
    pub test_generator: SharedAgent,
    pub coder: SharedAgent,
    pub reviewer: SharedAgent,
    pub debugger: SharedAgent,
}

impl TddAgents {
    pub fn new(
        test_generator: SharedAgent,
        coder: SharedAgent,
        reviewer: SharedAgent,
        debugger: SharedAgent,
    ) -> Self {
        Self {
            test_generator,
            coder,
            reviewer,
            debugger,
        }
    }
}
