//! End-to-end TDD loop scenarios with scripted agents, runner and gates.
//!
//! No model endpoint or test harness is needed: every collaborator is an
//! in-process fake that replays a script and records what it was asked.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coordination::gates::{
    evidence_kind, AutoDecision, EvidenceBundle, GateDispatcher, GateError, GateRequest,
    GateResult, GateStatus, GateType, MemoryGateStore,
};
use coordination::tdd::{
    CodeFile, CodeReview, DebugAnalysis, Implementation, IssueSeverity, ReviewIssue, TestCase,
    TestResult, TestRunResult, TestSuite, TestType,
};
use tdd_agents::contracts::meta;
use tdd_agents::state_machine::max_transitions;
use tdd_agents::{
    AgentContext, AgentOutcome, AgentPayload, AgentRequest, AgentType, DevelopmentTask,
    DomainAgent, TddAgents, TddConfig, TddOrchestrator, TestRunner, TestRunnerError,
};
use tokio_util::sync::CancellationToken;

const TASK_ID: &str = "task-1";
const TEST_PATH: &str = "tests/test_task_1.py";

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn ctx() -> AgentContext {
    AgentContext::new("sess-1", TASK_ID, "tenant-a", "/tmp/ws").with_metadata("git_sha", "deadbeef")
}

fn task() -> DevelopmentTask {
    DevelopmentTask::new("Add a slugify helper")
        .with_criterion("lowercases input")
        .with_criterion("replaces spaces with dashes")
}

fn suite() -> TestSuite {
    let case = |id: &str, code: &str| TestCase {
        id: id.into(),
        name: id.into(),
        description: String::new(),
        test_type: TestType::Unit,
        code: code.into(),
        requirement_ref: None,
    };
    TestSuite {
        task_id: TASK_ID.into(),
        test_cases: vec![
            case("t-lower", "assert slugify('AB') == 'ab'"),
            case("t-space", "assert slugify('a b') == 'a-b'"),
        ],
        setup_code: "from slug import slugify".into(),
        teardown_code: String::new(),
        fixtures: vec!["tmp_path".into()],
    }
}

fn implementation() -> Implementation {
    Implementation {
        task_id: TASK_ID.into(),
        files: vec![CodeFile {
            path: "slug.py".into(),
            content: "def slugify(s):\n    return s.lower().replace(' ', '-')\n".into(),
            language: "python".into(),
        }],
        imports: vec![],
        dependencies: vec![],
    }
}

fn review(passed: bool, issues: Vec<ReviewIssue>) -> CodeReview {
    CodeReview {
        implementation_id: TASK_ID.into(),
        passed,
        issues,
        suggestions: vec![],
        security_concerns: vec![],
    }
}

fn analysis() -> DebugAnalysis {
    DebugAnalysis {
        failure_id: "t-space".into(),
        root_cause: "spaces are not replaced".into(),
        fix_suggestion: "call replace".into(),
        changes: vec![],
    }
}

fn generator_ok() -> AgentOutcome {
    AgentOutcome::success(AgentType::TestGenerator, TASK_ID, AgentPayload::TestSuite(suite()))
        .with_artifact(TEST_PATH)
}

fn coder_ok() -> AgentOutcome {
    AgentOutcome::success(
        AgentType::Coder,
        TASK_ID,
        AgentPayload::Implementation(implementation()),
    )
}

fn review_outcome(passed: bool, issues: Vec<ReviewIssue>) -> AgentOutcome {
    AgentOutcome::success(
        AgentType::Reviewer,
        TASK_ID,
        AgentPayload::Review {
            passed,
            review: review(passed, issues),
        },
    )
}

fn debugger_ok() -> AgentOutcome {
    AgentOutcome::success(
        AgentType::Debugger,
        TASK_ID,
        AgentPayload::DebugAnalysis(analysis()),
    )
}

// ── Scripted agent ───────────────────────────────────────────────────────────

/// Replays scripted outcomes, then repeats the fallback forever.
struct ScriptedAgent {
    agent_type: AgentType,
    script: Mutex<VecDeque<AgentOutcome>>,
    fallback: AgentOutcome,
    calls: Mutex<Vec<AgentRequest>>,
    cancel_on_call: Option<CancellationToken>,
}

impl ScriptedAgent {
    fn always(outcome: AgentOutcome) -> Arc<Self> {
        Self::scripted(vec![], outcome)
    }

    fn scripted(script: Vec<AgentOutcome>, fallback: AgentOutcome) -> Arc<Self> {
        Arc::new(Self {
            agent_type: fallback.agent_type,
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
            cancel_on_call: None,
        })
    }

    fn cancelling(outcome: AgentOutcome, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            agent_type: outcome.agent_type,
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
            calls: Mutex::new(Vec::new()),
            cancel_on_call: Some(token),
        })
    }

    fn calls(&self) -> Vec<AgentRequest> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DomainAgent for ScriptedAgent {
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    async fn execute(&self, _ctx: &AgentContext, request: AgentRequest) -> AgentOutcome {
        self.calls.lock().unwrap().push(request);
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

// ── Scripted test runner ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum RunStep {
    Pass,
    Fail(usize),
    Timeout,
}

struct ScriptedRunner {
    script: Mutex<VecDeque<RunStep>>,
    fallback: RunStep,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedRunner {
    fn new(script: Vec<RunStep>, fallback: RunStep) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TestRunner for ScriptedRunner {
    async fn run_tests(
        &self,
        test_path: &str,
        suite_id: &str,
    ) -> Result<TestRunResult, TestRunnerError> {
        self.calls
            .lock()
            .unwrap()
            .push((test_path.to_string(), suite_id.to_string()));
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        let result = |id: &str, passed: bool| TestResult {
            test_id: id.into(),
            passed,
            output: String::new(),
            error: (!passed).then(|| format!("{id}: assertion failed")),
            duration_ms: 3,
        };
        match step {
            RunStep::Pass => Ok(TestRunResult::from_results(
                suite_id,
                vec![result("t-lower", true), result("t-space", true)],
                92.5,
            )),
            RunStep::Fail(n) => Ok(TestRunResult::from_results(
                suite_id,
                (0..n).map(|i| result(&format!("t-{i}"), false)).collect(),
                40.0,
            )),
            RunStep::Timeout => Err(TestRunnerError::Timeout { seconds: 30 }),
        }
    }
}

// ── Gate fakes ───────────────────────────────────────────────────────────────

struct UnavailableGate;

#[async_trait]
impl GateDispatcher for UnavailableGate {
    async fn request_gate(
        &self,
        _task_id: &str,
        _session_id: &str,
        _gate_type: GateType,
        _bundle: &EvidenceBundle,
        _requested_by: &str,
    ) -> GateResult<GateRequest> {
        Err(GateError::Dispatch("503 Service Unavailable".into()))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    generator: Arc<ScriptedAgent>,
    coder: Arc<ScriptedAgent>,
    reviewer: Arc<ScriptedAgent>,
    debugger: Arc<ScriptedAgent>,
    runner: Arc<ScriptedRunner>,
}

impl Harness {
    /// All agents succeed; the runner follows `steps` then passes.
    fn new(steps: Vec<RunStep>) -> Self {
        Self {
            generator: ScriptedAgent::always(generator_ok()),
            coder: ScriptedAgent::always(coder_ok()),
            reviewer: ScriptedAgent::always(review_outcome(true, vec![])),
            debugger: ScriptedAgent::always(debugger_ok()),
            runner: ScriptedRunner::new(steps, RunStep::Pass),
        }
    }

    fn orchestrator(&self, max_coding_retries: u32) -> TddOrchestrator {
        let agents = TddAgents::new(
            self.generator.clone(),
            self.coder.clone(),
            self.reviewer.clone(),
            self.debugger.clone(),
        );
        TddOrchestrator::new(
            agents,
            self.runner.clone(),
            TddConfig::default().with_max_coding_retries(max_coding_retries),
        )
    }

    fn coder_requests(&self) -> Vec<(u32, Vec<String>, bool, Option<String>)> {
        self.coder
            .calls()
            .into_iter()
            .map(|req| match req {
                AgentRequest::Implement {
                    fail_count,
                    test_errors,
                    debug_analysis,
                    previous_implementation,
                    ..
                } => (
                    fail_count,
                    test_errors,
                    debug_analysis.is_some(),
                    previous_implementation,
                ),
                other => panic!("coder received {}", other.kind()),
            })
            .collect()
    }
}

fn transitions_len(result: &tdd_agents::DevelopmentResult) -> usize {
    result.metadata[meta::TRANSITIONS]
        .as_array()
        .map(Vec::len)
        .unwrap_or(0)
}

// ── Success paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn fail_then_pass_retries_once() {
    let h = Harness::new(vec![RunStep::Fail(1)]);
    let result = h.orchestrator(3).run(&ctx(), &task()).await;

    assert!(result.success);
    assert_eq!(result.retry_count, 1);
    assert!(result.error_message.is_none());
    assert_eq!(h.debugger.call_count(), 0);

    let calls = h.coder_requests();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, 0);
    assert!(calls[0].1.is_empty());
    assert!(calls[0].3.is_none());
    assert_eq!(calls[1].0, 1);
    assert_eq!(calls[1].1, vec!["t-0: assertion failed".to_string()]);
    assert_eq!(
        calls[1].3.as_deref(),
        Some(implementation().to_source_string().as_str())
    );
}

#[tokio::test]
async fn first_attempt_success_has_zero_retries_and_trace() {
    let h = Harness::new(vec![]);
    let result = h.orchestrator(3).run(&ctx(), &task()).await;

    assert!(result.success);
    assert_eq!(result.retry_count, 0);
    assert_eq!(result.implementation, Some(implementation()));
    assert_eq!(result.test_suite, Some(suite()));
    assert!(result.test_run_result.as_ref().unwrap().all_passed());
    assert!(result.review.as_ref().unwrap().passed);
    assert!(result.hitl4_request_id.is_none());
    assert!(!result.metadata.contains_key(meta::HITL4_STATUS));
    assert_eq!(result.metadata_str(meta::FINAL_STATE), Some("Succeeded"));
    assert!(result
        .metadata_str(meta::STATE_TRACE)
        .unwrap()
        .contains("Succeeded"));
    // → Coding, → RunningTests, → Reviewing, → Succeeded
    assert_eq!(transitions_len(&result), 4);
}

#[tokio::test]
async fn runner_receives_generated_test_path_and_suite_id() {
    let h = Harness::new(vec![]);
    h.orchestrator(3).run(&ctx(), &task()).await;

    let calls = h.runner.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![(TEST_PATH.to_string(), TASK_ID.to_string())]);

    match &h.generator.calls()[0] {
        AgentRequest::GenerateTests {
            task_description,
            acceptance_criteria,
        } => {
            assert_eq!(task_description, "Add a slugify helper");
            assert_eq!(acceptance_criteria.len(), 2);
        }
        other => panic!("generator received {}", other.kind()),
    }
    match &h.reviewer.calls()[0] {
        AgentRequest::Review {
            implementation: text,
            test_suite,
            test_results,
        } => {
            assert!(text.contains("# File: slug.py"));
            assert_eq!(test_suite, &suite().source());
            assert!(test_results.contains("2 passed, 0 failed"));
        }
        other => panic!("reviewer received {}", other.kind()),
    }
}

#[tokio::test]
async fn missing_generator_artifact_falls_back_to_workspace_path() {
    let mut h = Harness::new(vec![]);
    h.generator = ScriptedAgent::always(AgentOutcome::success(
        AgentType::TestGenerator,
        TASK_ID,
        AgentPayload::TestSuite(suite()),
    ));
    h.orchestrator(3).run(&ctx(), &task()).await;

    let (path, _) = h.runner.calls.lock().unwrap()[0].clone();
    assert_eq!(path, "/tmp/ws/tests/test_task-1");
}

// ── Escalation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_failures_escalate_to_debugger() {
    let h = Harness::new(vec![RunStep::Fail(2); 4]);
    let result = h.orchestrator(2).run(&ctx(), &task()).await;

    assert!(result.success);
    assert_eq!(result.retry_count, 4);
    // fail counts 3 and 4 exceed the budget of 2
    assert_eq!(h.debugger.call_count(), 2);
    assert_eq!(result.debug_analysis, Some(analysis()));

    let calls = h.coder_requests();
    assert_eq!(calls.len(), 5);
    let with_analysis: Vec<bool> = calls.iter().map(|c| c.2).collect();
    assert_eq!(with_analysis, vec![false, false, false, true, true]);
}

#[tokio::test]
async fn escalation_first_fires_past_retry_budget() {
    let h = Harness::new(vec![RunStep::Fail(1); 2]);
    h.orchestrator(2).run(&ctx(), &task()).await;
    assert_eq!(h.debugger.call_count(), 0);

    let h = Harness::new(vec![RunStep::Fail(1); 3]);
    h.orchestrator(2).run(&ctx(), &task()).await;
    assert_eq!(h.debugger.call_count(), 1);
    match &h.debugger.calls()[0] {
        AgentRequest::Debug {
            test_output,
            implementation: text,
            test_code,
        } => {
            assert!(test_output.contains("[FAIL] t-0"));
            assert!(text.contains("def slugify"));
            assert_eq!(test_code, &suite().source());
        }
        other => panic!("debugger received {}", other.kind()),
    }
}

#[tokio::test]
async fn debugger_failure_is_not_fatal() {
    let mut h = Harness::new(vec![RunStep::Fail(1)]);
    h.debugger = ScriptedAgent::always(AgentOutcome::failure(
        AgentType::Debugger,
        TASK_ID,
        "debug model offline",
    ));
    let result = h.orchestrator(0).run(&ctx(), &task()).await;

    assert!(result.success);
    assert_eq!(result.retry_count, 1);
    assert_eq!(h.debugger.call_count(), 1);
    assert!(result.debug_analysis.is_none());
    assert!(!h.coder_requests()[1].2);
}

#[tokio::test]
async fn debugger_success_without_analysis_is_degraded() {
    let mut h = Harness::new(vec![RunStep::Fail(1)]);
    h.debugger = ScriptedAgent::always(AgentOutcome::success(
        AgentType::Debugger,
        TASK_ID,
        AgentPayload::None,
    ));
    let result = h.orchestrator(0).run(&ctx(), &task()).await;
    assert!(result.success);
    assert!(result.debug_analysis.is_none());
}

// ── Review rejection ─────────────────────────────────────────────────────────

#[tokio::test]
async fn review_rejection_feeds_issues_back_and_clears_analysis() {
    let mut h = Harness::new(vec![RunStep::Fail(1)]);
    h.reviewer = ScriptedAgent::scripted(
        vec![review_outcome(
            false,
            vec![
                ReviewIssue::new(IssueSeverity::High, "unsanitised input"),
                ReviewIssue::new(IssueSeverity::Low, "missing docstring"),
            ],
        )],
        review_outcome(true, vec![]),
    );
    let result = h.orchestrator(0).run(&ctx(), &task()).await;

    assert!(result.success);
    assert_eq!(result.retry_count, 2);

    let calls = h.coder_requests();
    assert_eq!(calls.len(), 3);
    // after the test failure the debugger's analysis is passed on
    assert!(calls[1].2);
    // the negative review resets it and replaces the errors
    assert_eq!(calls[2].0, 2);
    assert!(!calls[2].2);
    assert_eq!(
        calls[2].1,
        vec![
            "HIGH: unsanitised input".to_string(),
            "LOW: missing docstring".to_string()
        ]
    );
    assert!(result.debug_analysis.is_none());
}

// ── Fatal failures ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_generation_failure_is_fatal() {
    let mut h = Harness::new(vec![]);
    h.generator = ScriptedAgent::always(AgentOutcome::failure(
        AgentType::TestGenerator,
        TASK_ID,
        "LLM quota exhausted",
    ));
    let result = h.orchestrator(3).run(&ctx(), &task()).await;

    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("LLM quota exhausted"));
    assert!(result.implementation.is_none());
    assert!(result.test_suite.is_none());
    assert_eq!(result.retry_count, 0);
    assert_eq!(h.coder.call_count(), 0);
    assert_eq!(result.metadata_str(meta::FINAL_STATE), Some("Failed"));
}

#[tokio::test]
async fn coder_failure_is_fatal_despite_retry_hint() {
    let mut h = Harness::new(vec![RunStep::Fail(1)]);
    h.coder = ScriptedAgent::scripted(
        vec![coder_ok()],
        AgentOutcome::failure(AgentType::Coder, TASK_ID, "context window exceeded")
            .with_retry_hint(),
    );
    let result = h.orchestrator(3).run(&ctx(), &task()).await;

    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("context window exceeded"));
    assert_eq!(result.retry_count, 1);
    assert_eq!(h.coder.call_count(), 2);
    assert_eq!(h.runner.call_count(), 1);
    assert!(result.implementation.is_none());
}

#[tokio::test]
async fn reviewer_execution_failure_is_fatal() {
    let mut h = Harness::new(vec![]);
    h.reviewer = ScriptedAgent::always(AgentOutcome::failure(
        AgentType::Reviewer,
        TASK_ID,
        "reviewer crashed",
    ));
    let result = h.orchestrator(3).run(&ctx(), &task()).await;

    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("reviewer crashed"));
    assert_eq!(h.coder.call_count(), 1);
}

#[tokio::test]
async fn runner_timeout_is_fatal() {
    let h = Harness::new(vec![RunStep::Fail(1), RunStep::Timeout]);
    let result = h.orchestrator(3).run(&ctx(), &task()).await;

    assert!(!result.success);
    assert_eq!(
        result.error_message.as_deref(),
        Some("Test run timed out after 30s")
    );
    assert_eq!(result.retry_count, 1);
    assert_eq!(h.reviewer.call_count(), 0);
}

#[tokio::test]
async fn success_without_payload_is_fatal() {
    let mut h = Harness::new(vec![]);
    h.coder = ScriptedAgent::always(AgentOutcome::success(
        AgentType::Coder,
        TASK_ID,
        AgentPayload::None,
    ));
    let result = h.orchestrator(3).run(&ctx(), &task()).await;

    assert!(!result.success);
    assert!(result
        .error_message
        .unwrap()
        .contains("no implementation payload"));
    assert_eq!(h.runner.call_count(), 0);
}

// ── Safety valve ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn safety_valve_stops_endless_failures() {
    for max in [0, 2] {
        let h = Harness {
            runner: ScriptedRunner::new(vec![], RunStep::Fail(1)),
            ..Harness::new(vec![])
        };
        let result = h.orchestrator(max).run(&ctx(), &task()).await;

        assert!(!result.success);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Maximum iterations exceeded"));
        assert_eq!(result.retry_count, max + 6);
        assert_eq!(h.coder.call_count() as u32, max + 6);
        assert_eq!(h.debugger.call_count() as u32, 6);
        assert!(transitions_len(&result) <= max_transitions(max));
        assert_eq!(result.metadata_str(meta::FINAL_STATE), Some("Failed"));
    }
}

#[tokio::test]
async fn endless_review_rejections_hit_the_valve() {
    let mut h = Harness::new(vec![]);
    h.reviewer = ScriptedAgent::always(review_outcome(
        false,
        vec![ReviewIssue::new(IssueSeverity::Medium, "style")],
    ));
    let result = h.orchestrator(1).run(&ctx(), &task()).await;

    assert!(!result.success);
    assert_eq!(result.retry_count, 7);
    // review failures never escalate
    assert_eq!(h.debugger.call_count(), 0);
}

// ── Gates ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn gate_rejection_preserves_artifacts() {
    let store = Arc::new(MemoryGateStore::new().with_auto_decision(AutoDecision::Reject {
        decided_by: "alice".into(),
        reason: "X".into(),
    }));
    let h = Harness::new(vec![]);
    let result = h
        .orchestrator(3)
        .with_gate_dispatcher(store.clone())
        .run(&ctx(), &task())
        .await;

    assert!(!result.success);
    let request_id = result.hitl4_request_id.clone().unwrap();
    assert_eq!(result.metadata_str(meta::HITL4_STATUS), Some("rejected"));
    assert_eq!(result.metadata_str(meta::HITL4_REASON), Some("X"));
    assert!(result.implementation.is_some());
    assert!(result.test_suite.is_some());
    assert!(result.test_run_result.is_some());
    assert!(result.review.is_some());
    assert_eq!(result.metadata_str(meta::FINAL_STATE), Some("RejectedByGate"));
    assert_eq!(store.get(&request_id).unwrap().status, GateStatus::Rejected);
}

#[tokio::test]
async fn pending_gate_succeeds_with_request_id_and_stored_evidence() {
    let store = Arc::new(MemoryGateStore::new());
    let h = Harness::new(vec![RunStep::Fail(1)]);
    let result = h
        .orchestrator(3)
        .with_gate_dispatcher(store.clone())
        .run(&ctx(), &task())
        .await;

    assert!(result.success);
    assert_eq!(result.retry_count, 1);
    assert_eq!(result.metadata_str(meta::HITL4_STATUS), Some("pending"));
    let request_id = result.hitl4_request_id.clone().unwrap();

    let request = store.get(&request_id).unwrap();
    assert_eq!(request.status, GateStatus::Pending);
    assert_eq!(request.gate_type, GateType::Code);
    assert_eq!(request.requested_by, "tdd-orchestrator");

    let bundle = store.load_bundle(&request_id).unwrap();
    assert_eq!(bundle.task_id, TASK_ID);
    assert_eq!(bundle.git_sha, "deadbeef");
    assert_eq!(
        bundle.item_types(),
        vec![
            evidence_kind::ARTIFACT,
            evidence_kind::TEST_SUITE,
            evidence_kind::TEST_RESULT,
            evidence_kind::REVIEW
        ]
    );
    assert!(bundle.verify_item(
        evidence_kind::ARTIFACT,
        &implementation().concatenated_contents()
    ));
    assert!(bundle.verify_item(evidence_kind::TEST_SUITE, &suite().source()));
    assert_eq!(bundle.find_item(evidence_kind::TEST_SUITE).unwrap().path, TEST_PATH);
    assert!(bundle.summary.contains("Add a slugify helper"));

    // a later human decision is recorded against the same request
    let decided = store.decide(&request_id, true, "bob", "lgtm").unwrap();
    assert_eq!(decided.status, GateStatus::Approved);
}

#[tokio::test]
async fn approved_gate_reports_status() {
    let store = Arc::new(MemoryGateStore::new().with_auto_decision(AutoDecision::Approve {
        decided_by: "auto".into(),
    }));
    let h = Harness::new(vec![]);
    let result = h
        .orchestrator(3)
        .with_gate_dispatcher(store)
        .run(&ctx(), &task())
        .await;

    assert!(result.success);
    assert_eq!(result.metadata_str(meta::HITL4_STATUS), Some("approved"));
    assert!(result.hitl4_request_id.is_some());
}

#[tokio::test]
async fn gate_dispatch_error_is_fatal() {
    let h = Harness::new(vec![]);
    let result = h
        .orchestrator(3)
        .with_gate_dispatcher(Arc::new(UnavailableGate))
        .run(&ctx(), &task())
        .await;

    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("503"));
    assert!(result.implementation.is_none());
    assert!(result.hitl4_request_id.is_none());
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_before_start_calls_no_agent() {
    let token = CancellationToken::new();
    token.cancel();
    let h = Harness::new(vec![]);
    let result = h
        .orchestrator(3)
        .with_cancellation(token)
        .run(&ctx(), &task())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("Run cancelled"));
    assert_eq!(h.generator.call_count(), 0);
}

#[tokio::test]
async fn cancellation_during_coding_stops_before_tests() {
    let token = CancellationToken::new();
    let mut h = Harness::new(vec![]);
    h.coder = ScriptedAgent::cancelling(coder_ok(), token.clone());
    let result = h
        .orchestrator(3)
        .with_cancellation(token)
        .run(&ctx(), &task())
        .await;

    assert!(!result.success);
    assert_eq!(h.coder.call_count(), 1);
    assert_eq!(h.runner.call_count(), 0);
}

// ── Concurrency and composition ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_are_independent() {
    let h = Harness::new(vec![]);
    let orchestrator = Arc::new(h.orchestrator(3));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                let ctx = AgentContext::new(format!("sess-{i}"), format!("task-{i}"), "t", "/tmp/ws")
                    .with_metadata("git_sha", "abc");
                orchestrator.run(&ctx, &task()).await
            })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.success);
        assert_eq!(result.retry_count, 0);
    }
    assert_eq!(h.coder.call_count(), 4);
}

#[tokio::test]
async fn orchestrator_runs_as_a_domain_agent() {
    let h = Harness::new(vec![RunStep::Fail(1)]);
    let agent: Arc<dyn DomainAgent> = Arc::new(h.orchestrator(3));
    assert_eq!(agent.agent_type(), AgentType::Orchestrator);

    let outcome = agent
        .execute(&ctx(), AgentRequest::Develop(task()))
        .await;
    assert!(outcome.success);
    assert_eq!(outcome.artifact_paths, vec!["slug.py".to_string()]);
    match outcome.payload {
        AgentPayload::Development(result) => assert_eq!(result.retry_count, 1),
        other => panic!("unexpected payload {other:?}"),
    }

    let outcome = agent
        .execute(
            &ctx(),
            AgentRequest::GenerateTests {
                task_description: "x".into(),
                acceptance_criteria: vec![],
            },
        )
        .await;
    assert!(!outcome.success);
    assert!(outcome.failure_message().contains("generate_tests"));
}
