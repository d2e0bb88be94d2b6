//! TDD orchestration loop.
//!
//! One run generates a fixed test suite, then alternates coding attempts with
//! test runs until an attempt passes both the tests and the review. Repeated
//! test failures bring in the debugger. A passing attempt is packaged as an
//! evidence bundle and submitted to the `code` HITL gate when a dispatcher is
//! configured.
//!
//! ```text
//! GeneratingTests → Coding → RunningTests ─┬─ red ──→ Coding (or Escalating → Coding)
//!                                          └─ green → Reviewing ─┬─ rejected → Coding
//!                                                                └─ passed → SubmittingGate
//!                                                                            → Succeeded | RejectedByGate
//! ```
//!
//! Every non-final iteration adds exactly one to the fail count, so the loop
//! is a bounded `for`. The safety valve at the top of each iteration ends the
//! run once the fail count exceeds `max_coding_retries + 5`.

use std::path::Path;

use async_trait::async_trait;
use coordination::gates::{
    validate_evidence_for_gate, DevelopmentEvidence, EvidenceBundle, GateRequest, GateType,
    SharedGateDispatcher,
};
use coordination::tdd::{CodeReview, DebugAnalysis, Implementation, TestRunResult, TestSuite};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::{DomainAgent, TddAgents};
use crate::config::TddConfig;
use crate::contracts::{
    meta, AgentContext, AgentOutcome, AgentPayload, AgentRequest, AgentType, DevelopmentResult,
    DevelopmentTask,
};
use crate::errors::OrchestrationError;
use crate::state_machine::{max_iterations, StateMachine, TddState};
use crate::test_runner::SharedTestRunner;

/// Metadata key on [`AgentContext`] that pins the git SHA for evidence.
pub const GIT_SHA_METADATA_KEY: &str = "git_sha";
/// Recorded when no git SHA can be resolved.
pub const UNKNOWN_GIT_SHA: &str = "unknown";

/// Sequences the TDD agents for one task at a time.
///
/// A single orchestrator can drive any number of concurrent runs; all
/// per-run state lives inside [`TddOrchestrator::run`].
pub struct TddOrchestrator {
    agents: TddAgents,
    test_runner: SharedTestRunner,
    gate_dispatcher: Option<SharedGateDispatcher>,
    config: TddConfig,
    cancel: Option<CancellationToken>,
}

/// Mutable state owned by one run.
struct RunState {
    machine: StateMachine,
    fail_count: u32,
    previous_implementation: Option<String>,
    test_errors: Vec<String>,
    debug_analysis: Option<DebugAnalysis>,
}

impl RunState {
    fn new() -> Self {
        Self {
            machine: StateMachine::new(),
            fail_count: 0,
            previous_implementation: None,
            test_errors: Vec::new(),
            debug_analysis: None,
        }
    }
}

/// Everything a passing attempt produced.
struct Artifacts {
    implementation: Implementation,
    test_suite: TestSuite,
    test_run: TestRunResult,
    review: CodeReview,
}

/// How a run left the loop without an error.
enum Exit {
    Succeeded {
        artifacts: Artifacts,
        gate: Option<GateRequest>,
    },
    RejectedByGate {
        artifacts: Artifacts,
        gate: GateRequest,
    },
}

impl TddOrchestrator {
    pub fn new(agents: TddAgents, test_runner: SharedTestRunner, config: TddConfig) -> Self {
        Self {
            agents,
            test_runner,
            gate_dispatcher: None,
            config,
            cancel: None,
        }
    }

    pub fn with_gate_dispatcher(mut self, dispatcher: SharedGateDispatcher) -> Self {
        self.gate_dispatcher = Some(dispatcher);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &TddConfig {
        &self.config
    }

    /// Drive one task to a terminal state.
    ///
    /// Never panics or returns an error: every failure is folded into an
    /// unsuccessful [`DevelopmentResult`].
    pub async fn run(&self, ctx: &AgentContext, task: &DevelopmentTask) -> DevelopmentResult {
        let mut state = RunState::new();
        info!(
            task_id = %ctx.task_id,
            session_id = %ctx.session_id,
            max_coding_retries = self.config.max_coding_retries,
            gate = self.gate_dispatcher.is_some(),
            "Starting TDD run"
        );

        let mut result = match self.drive(ctx, task, &mut state).await {
            Ok(exit) => Self::exit_result(exit, state.fail_count, state.debug_analysis.take()),
            Err(err) => {
                error!(
                    task_id = %ctx.task_id,
                    fail_count = state.fail_count,
                    class = %err.failure_class(),
                    error = %err,
                    "TDD run failed"
                );
                let message = err.to_string();
                if let Err(e) = state.machine.fail(&message) {
                    warn!(task_id = %ctx.task_id, error = %e, "Could not record failure transition");
                }
                DevelopmentResult::failed(message, state.fail_count)
            }
        };

        Self::record_trace(&mut result, &state.machine);
        info!(
            task_id = %ctx.task_id,
            success = result.success,
            retry_count = result.retry_count,
            trace = %state.machine.summary(),
            "TDD run finished"
        );
        result
    }

    async fn drive(
        &self,
        ctx: &AgentContext,
        task: &DevelopmentTask,
        st: &mut RunState,
    ) -> Result<Exit, OrchestrationError> {
        self.check_cancelled()?;
        let (suite, test_path) = self.generate_tests(ctx, task).await?;
        let suite_source = suite.source();
        st.machine.advance(
            TddState::Coding,
            Some(format!("{} tests generated", suite.test_count()).as_str()),
        )?;

        let max = self.config.max_coding_retries;
        let valve = self.config.safety_valve();

        for iteration in 1..=max_iterations(max) {
            if st.fail_count > valve {
                return Err(OrchestrationError::MaxIterations {
                    fail_count: st.fail_count,
                    limit: valve,
                });
            }
            self.check_cancelled()?;
            st.machine.set_iteration(iteration);
            debug!(task_id = %ctx.task_id, iteration, fail_count = st.fail_count, "Coding attempt");

            // ── Coding ──
            let implementation = self.implement(ctx, task, &suite_source, st).await?;
            let implementation_text = implementation.to_source_string();
            st.previous_implementation = Some(implementation_text.clone());
            st.machine.advance(TddState::RunningTests, None)?;

            // ── Running tests ──
            self.check_cancelled()?;
            let run = self
                .test_runner
                .run_tests(&test_path, suite.suite_id())
                .await?;

            if !run.all_passed() {
                st.fail_count += 1;
                st.test_errors = run.error_messages();
                let retry = OrchestrationError::TestsFailed {
                    count: run.failed_count,
                };
                warn!(
                    task_id = %ctx.task_id,
                    iteration,
                    fail_count = st.fail_count,
                    class = %retry.failure_class(),
                    "{retry}"
                );

                if st.fail_count > max {
                    st.machine.advance(
                        TddState::Escalating,
                        Some(format!("fail count {} > {max}", st.fail_count).as_str()),
                    )?;
                    self.escalate(ctx, &run, &implementation_text, &suite_source, st)
                        .await;
                }
                st.machine.advance(TddState::Coding, Some(retry.to_string().as_str()))?;
                continue;
            }

            // ── Reviewing ──
            st.machine.advance(TddState::Reviewing, Some("all tests passed"))?;
            self.check_cancelled()?;
            let (passed, review) = self
                .review(ctx, &implementation_text, &suite_source, &run)
                .await?;

            if !passed {
                st.fail_count += 1;
                st.test_errors = review.issue_messages();
                st.debug_analysis = None;
                let retry = OrchestrationError::ReviewRejected {
                    issues: review.issues.len(),
                };
                warn!(
                    task_id = %ctx.task_id,
                    iteration,
                    fail_count = st.fail_count,
                    class = %retry.failure_class(),
                    "{retry}"
                );
                st.machine.advance(TddState::Coding, Some(retry.to_string().as_str()))?;
                continue;
            }

            info!(task_id = %ctx.task_id, iteration, fail_count = st.fail_count, "Tests and review passed");
            let artifacts = Artifacts {
                implementation,
                test_suite: suite,
                test_run: run,
                review,
            };
            return self
                .submit(ctx, task, &test_path, artifacts, &mut st.machine)
                .await;
        }

        Err(OrchestrationError::MaxIterations {
            fail_count: st.fail_count,
            limit: valve,
        })
    }

    fn check_cancelled(&self) -> Result<(), OrchestrationError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(OrchestrationError::Cancelled),
            _ => Ok(()),
        }
    }

    // ── Agent calls ──────────────────────────────────────────────────────────

    /// Returns the suite and the path the runner should execute.
    async fn generate_tests(
        &self,
        ctx: &AgentContext,
        task: &DevelopmentTask,
    ) -> Result<(TestSuite, String), OrchestrationError> {
        let outcome = self
            .agents
            .test_generator
            .execute(
                ctx,
                AgentRequest::GenerateTests {
                    task_description: task.task_description.clone(),
                    acceptance_criteria: task.acceptance_criteria.clone(),
                },
            )
            .await;
        if !outcome.success {
            return Err(OrchestrationError::TestGeneration(outcome.failure_message()));
        }

        let test_path = outcome
            .artifact_paths
            .first()
            .cloned()
            .unwrap_or_else(|| default_test_path(&ctx.workspace_path, &ctx.task_id));
        match outcome.payload {
            AgentPayload::TestSuite(suite) => {
                info!(task_id = %ctx.task_id, tests = suite.test_count(), %test_path, "Test suite generated");
                Ok((suite, test_path))
            }
            _ => Err(OrchestrationError::MissingPayload {
                agent: AgentType::TestGenerator,
                expected: "test_suite",
            }),
        }
    }

    async fn implement(
        &self,
        ctx: &AgentContext,
        task: &DevelopmentTask,
        suite_source: &str,
        st: &RunState,
    ) -> Result<Implementation, OrchestrationError> {
        let request = AgentRequest::Implement {
            task_description: task.task_description.clone(),
            test_code: suite_source.to_string(),
            fail_count: st.fail_count,
            previous_implementation: st.previous_implementation.clone(),
            test_errors: st.test_errors.clone(),
            debug_analysis: st.debug_analysis.clone(),
        };
        let outcome = self.agents.coder.execute(ctx, request).await;
        if !outcome.success {
            // Retry hints from the coder are not honoured.
            return Err(OrchestrationError::Coding(outcome.failure_message()));
        }
        match outcome.payload {
            AgentPayload::Implementation(implementation) => {
                debug!(task_id = %ctx.task_id, files = implementation.files.len(), "Implementation received");
                Ok(implementation)
            }
            _ => Err(OrchestrationError::MissingPayload {
                agent: AgentType::Coder,
                expected: "implementation",
            }),
        }
    }

    async fn review(
        &self,
        ctx: &AgentContext,
        implementation_text: &str,
        suite_source: &str,
        run: &TestRunResult,
    ) -> Result<(bool, CodeReview), OrchestrationError> {
        let outcome = self
            .agents
            .reviewer
            .execute(
                ctx,
                AgentRequest::Review {
                    implementation: implementation_text.to_string(),
                    test_suite: suite_source.to_string(),
                    test_results: run.format_report(),
                },
            )
            .await;
        if !outcome.success {
            return Err(OrchestrationError::ReviewExecution(outcome.failure_message()));
        }
        match outcome.payload {
            AgentPayload::Review { passed, review } => {
                debug!(task_id = %ctx.task_id, passed, issues = review.issues.len(), "Review received");
                Ok((passed, review))
            }
            _ => Err(OrchestrationError::MissingPayload {
                agent: AgentType::Reviewer,
                expected: "review",
            }),
        }
    }

    /// Ask the debugger for an analysis. Failures leave the run unchanged.
    async fn escalate(
        &self,
        ctx: &AgentContext,
        run: &TestRunResult,
        implementation_text: &str,
        suite_source: &str,
        st: &mut RunState,
    ) {
        info!(task_id = %ctx.task_id, fail_count = st.fail_count, "Escalating to debugger");
        let outcome = self
            .agents
            .debugger
            .execute(
                ctx,
                AgentRequest::Debug {
                    test_output: run.format_report(),
                    implementation: implementation_text.to_string(),
                    test_code: suite_source.to_string(),
                },
            )
            .await;

        let degraded = if !outcome.success {
            OrchestrationError::Debugger(outcome.failure_message())
        } else {
            match outcome.payload {
                AgentPayload::DebugAnalysis(analysis) => {
                    info!(task_id = %ctx.task_id, root_cause = %analysis.root_cause, "Debug analysis ready");
                    st.debug_analysis = Some(analysis);
                    return;
                }
                _ => OrchestrationError::Debugger(
                    OrchestrationError::MissingPayload {
                        agent: AgentType::Debugger,
                        expected: "debug_analysis",
                    }
                    .to_string(),
                ),
            }
        };
        warn!(
            task_id = %ctx.task_id,
            class = %degraded.failure_class(),
            error = %degraded,
            "Continuing without debug analysis"
        );
    }

    // ── Gate submission ──────────────────────────────────────────────────────

    async fn submit(
        &self,
        ctx: &AgentContext,
        task: &DevelopmentTask,
        test_path: &str,
        artifacts: Artifacts,
        machine: &mut StateMachine,
    ) -> Result<Exit, OrchestrationError> {
        let Some(dispatcher) = &self.gate_dispatcher else {
            machine.advance(TddState::Succeeded, Some("no gate dispatcher"))?;
            return Ok(Exit::Succeeded {
                artifacts,
                gate: None,
            });
        };

        self.check_cancelled()?;
        machine.advance(TddState::SubmittingGate, None)?;
        let git_sha = resolve_git_sha(ctx).await;
        let bundle = EvidenceBundle::for_development(
            GateType::Code,
            DevelopmentEvidence {
                task_id: &ctx.task_id,
                task_description: &task.task_description,
                git_sha: &git_sha,
                test_path,
                implementation: &artifacts.implementation,
                test_suite: &artifacts.test_suite,
                test_run: &artifacts.test_run,
                review: &artifacts.review,
            },
        );
        validate_evidence_for_gate(&bundle)?;

        let gate = dispatcher
            .request_gate(
                &ctx.task_id,
                &ctx.session_id,
                GateType::Code,
                &bundle,
                &self.config.requested_by,
            )
            .await?;
        info!(
            task_id = %ctx.task_id,
            request_id = %gate.request_id,
            status = %gate.status,
            bundle_id = %bundle.bundle_id,
            "Gate request submitted"
        );

        if gate.is_rejected() {
            let rejection = OrchestrationError::GateRejected {
                request_id: gate.request_id.clone(),
                reason: gate.decision_reason().to_string(),
            };
            warn!(task_id = %ctx.task_id, class = %rejection.failure_class(), "{rejection}");
            machine.advance(TddState::RejectedByGate, Some(gate.decision_reason()))?;
            return Ok(Exit::RejectedByGate { artifacts, gate });
        }

        machine.advance(TddState::Succeeded, Some(format!("gate {}", gate.status).as_str()))?;
        Ok(Exit::Succeeded {
            artifacts,
            gate: Some(gate),
        })
    }

    // ── Result assembly ──────────────────────────────────────────────────────

    fn exit_result(
        exit: Exit,
        fail_count: u32,
        debug_analysis: Option<DebugAnalysis>,
    ) -> DevelopmentResult {
        let (success, artifacts, gate) = match exit {
            Exit::Succeeded { artifacts, gate } => (true, artifacts, gate),
            Exit::RejectedByGate { artifacts, gate } => (false, artifacts, Some(gate)),
        };

        let mut result = DevelopmentResult {
            success,
            implementation: Some(artifacts.implementation),
            test_suite: Some(artifacts.test_suite),
            test_run_result: Some(artifacts.test_run),
            review: Some(artifacts.review),
            debug_analysis,
            error_message: None,
            hitl4_request_id: None,
            retry_count: fail_count,
            metadata: Default::default(),
        };

        if let Some(gate) = gate {
            result
                .metadata
                .insert(meta::HITL4_STATUS.into(), Value::from(gate.status.to_string()));
            if gate.is_rejected() {
                let reason = gate.decision_reason().to_string();
                result.error_message = Some(
                    OrchestrationError::GateRejected {
                        request_id: gate.request_id.clone(),
                        reason: reason.clone(),
                    }
                    .to_string(),
                );
                result
                    .metadata
                    .insert(meta::HITL4_REASON.into(), Value::from(reason));
            }
            result.hitl4_request_id = Some(gate.request_id);
        }
        result
    }

    fn record_trace(result: &mut DevelopmentResult, machine: &StateMachine) {
        result.metadata.insert(
            meta::FINAL_STATE.into(),
            Value::from(machine.current().to_string()),
        );
        result
            .metadata
            .insert(meta::STATE_TRACE.into(), Value::from(machine.summary()));
        match serde_json::to_value(machine.transitions()) {
            Ok(transitions) => {
                result.metadata.insert(meta::TRANSITIONS.into(), transitions);
            }
            Err(e) => warn!(error = %e, "Could not serialize transition log"),
        }
    }
}

/// Where the suite is assumed to live when the generator names no file.
fn default_test_path(workspace: &Path, task_id: &str) -> String {
    workspace
        .join("tests")
        .join(format!("test_{task_id}"))
        .to_string_lossy()
        .into_owned()
}

/// Git SHA for evidence: context metadata, then `git rev-parse HEAD` in the
/// workspace, then [`UNKNOWN_GIT_SHA`].
pub async fn resolve_git_sha(ctx: &AgentContext) -> String {
    if let Some(sha) = ctx.metadata_str(GIT_SHA_METADATA_KEY) {
        if !sha.trim().is_empty() {
            return sha.trim().to_string();
        }
    }

    let output = tokio::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(&ctx.workspace_path)
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            let sha = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if sha.is_empty() {
                UNKNOWN_GIT_SHA.to_string()
            } else {
                sha
            }
        }
        Ok(out) => {
            debug!(
                workspace = %ctx.workspace_path.display(),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "git rev-parse failed"
            );
            UNKNOWN_GIT_SHA.to_string()
        }
        Err(e) => {
            debug!(error = %e, "git unavailable");
            UNKNOWN_GIT_SHA.to_string()
        }
    }
}

// ── Orchestrator as an agent ─────────────────────────────────────────────────

#[async_trait]
impl DomainAgent for TddOrchestrator {
    fn agent_type(&self) -> AgentType {
        AgentType::Orchestrator
    }

    async fn execute(&self, ctx: &AgentContext, request: AgentRequest) -> AgentOutcome {
        let task = match request {
            AgentRequest::Develop(task) => task,
            other => {
                return AgentOutcome::failure(
                    AgentType::Orchestrator,
                    ctx.task_id.clone(),
                    format!("orchestrator cannot handle {} requests", other.kind()),
                )
            }
        };

        let result = self.run(ctx, &task).await;
        let artifact_paths = result
            .implementation
            .as_ref()
            .map(Implementation::file_paths)
            .unwrap_or_default();
        AgentOutcome {
            success: result.success,
            agent_type: AgentType::Orchestrator,
            task_id: ctx.task_id.clone(),
            artifact_paths,
            error_message: result.error_message.clone(),
            payload: AgentPayload::Development(Box::new(result)),
            should_retry: false,
        }
    }
}
