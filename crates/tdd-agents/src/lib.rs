//! TDD agent orchestration.
//!
//! Drives a test generator, coder, reviewer and debugger through a bounded
//! test-driven loop and hands passing work to a HITL gate as an evidence
//! bundle.
//!
//! - [`agents`]: the `DomainAgent` seam the four agents implement
//! - [`contracts`]: typed requests, payloads and the terminal `DevelopmentResult`
//! - [`orchestrator`]: the loop itself
//! - [`state_machine`]: loop states and the legal-transition table
//! - [`test_runner`]: command and blocking test runners behind a timeout
//! - [`gate_client`]: HTTP gate dispatcher
//! - [`config`]: env/TOML configuration

pub mod agents;
pub mod config;
pub mod contracts;
pub mod errors;
pub mod gate_client;
pub mod orchestrator;
pub mod state_machine;
pub mod test_runner;

pub use agents::{DomainAgent, SharedAgent, TddAgents};
pub use config::TddConfig;
pub use contracts::{
    AgentContext, AgentOutcome, AgentPayload, AgentRequest, AgentType, DevelopmentResult,
    DevelopmentTask,
};
pub use errors::{FailureClass, OrchestrationError, TestRunnerError};
pub use gate_client::HttpGateDispatcher;
pub use orchestrator::TddOrchestrator;
pub use state_machine::{StateMachine, TddState};
pub use test_runner::{BlockingTestRunner, CommandTestRunner, SharedTestRunner, TestRunner};
