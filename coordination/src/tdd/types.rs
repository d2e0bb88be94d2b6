//! TDD types: test suites, implementations, test runs, reviews, debug analyses
//!
//! These are the typed artifacts handed between the TDD agents. A `TestSuite`
//! is generated once per task and held fixed; an `Implementation` is produced
//! fresh on every coding attempt.

use serde::{Deserialize, Serialize};

// ── Test suite ───────────────────────────────────────────────────────────────

/// Kind of generated test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    #[default]
    Unit,
    Integration,
    Property,
    EdgeCase,
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unit => write!(f, "unit"),
            Self::Integration => write!(f, "integration"),
            Self::Property => write!(f, "property"),
            Self::EdgeCase => write!(f, "edge_case"),
        }
    }
}

/// A single generated test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub test_type: TestType,
    pub code: String,
    /// Acceptance criterion this test covers, if the generator linked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_ref: Option<String>,
}

/// Tests generated for a task before any implementation exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub task_id: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub setup_code: String,
    #[serde(default)]
    pub teardown_code: String,
    #[serde(default)]
    pub fixtures: Vec<String>,
}

impl TestSuite {
    /// Identifier handed to the test runner.
    pub fn suite_id(&self) -> &str {
        &self.task_id
    }

    pub fn test_count(&self) -> usize {
        self.test_cases.len()
    }

    /// Full test source: setup, every case in order, then teardown.
    ///
    /// This is the canonical text hashed into `test_suite` evidence.
    pub fn source(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(self.test_cases.len() + 2);
        if !self.setup_code.is_empty() {
            parts.push(&self.setup_code);
        }
        parts.extend(self.test_cases.iter().map(|tc| tc.code.as_str()));
        if !self.teardown_code.is_empty() {
            parts.push(&self.teardown_code);
        }
        parts.join("\n\n")
    }
}

// ── Implementation ───────────────────────────────────────────────────────────

/// One source file produced by the coder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFile {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub language: String,
}

/// The coder's output for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub task_id: String,
    pub files: Vec<CodeFile>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Implementation {
    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// File contents joined in order. Hashed into `artifact` evidence.
    pub fn concatenated_contents(&self) -> String {
        self.files
            .iter()
            .map(|f| f.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// String snapshot used for reviewer/debugger input and retry prompting.
    pub fn to_source_string(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            out.push_str(&format!("# File: {}\n", file.path));
            out.push_str(&file.content);
            if !file.content.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

// ── Test execution ───────────────────────────────────────────────────────────

/// Result of a single test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub passed: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TestResult {
    /// Error text for a failed test; falls back to captured output, then to a
    /// generic message when the runner reported neither.
    pub fn failure_message(&self) -> String {
        match self.error.as_deref() {
            Some(e) if !e.trim().is_empty() => e.to_string(),
            _ if !self.output.trim().is_empty() => self.output.clone(),
            _ => format!("{} failed", self.test_id),
        }
    }
}

/// Outcome of running the whole suite once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub suite_id: String,
    pub results: Vec<TestResult>,
    pub passed_count: usize,
    pub failed_count: usize,
    #[serde(default)]
    pub coverage_percent: f64,
}

impl TestRunResult {
    /// Build a run result, deriving the counts from `results`.
    pub fn from_results(
        suite_id: impl Into<String>,
        results: Vec<TestResult>,
        coverage_percent: f64,
    ) -> Self {
        let passed_count = results.iter().filter(|r| r.passed).count();
        let failed_count = results.len() - passed_count;
        Self {
            suite_id: suite_id.into(),
            results,
            passed_count,
            failed_count,
            coverage_percent,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed_count == 0
    }

    pub fn failed(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// One message per failed test, in run order.
    pub fn error_messages(&self) -> Vec<String> {
        self.failed().map(TestResult::failure_message).collect()
    }

    /// Pass/fail/coverage report. Hashed into `test_result` evidence and
    /// handed to the reviewer and debugger.
    pub fn format_report(&self) -> String {
        let mut out = format!(
            "Test run {}: {} passed, {} failed, coverage {:.1}%\n",
            self.suite_id, self.passed_count, self.failed_count, self.coverage_percent
        );
        for r in &self.results {
            if r.passed {
                out.push_str(&format!("[PASS] {} ({}ms)\n", r.test_id, r.duration_ms));
            } else {
                out.push_str(&format!(
                    "[FAIL] {} ({}ms): {}\n",
                    r.test_id,
                    r.duration_ms,
                    r.failure_message()
                ));
            }
        }
        out
    }
}

// ── Review ───────────────────────────────────────────────────────────────────

/// Severity of a review finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl ReviewIssue {
    pub fn new(severity: IssueSeverity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            file_path: None,
            line: None,
        }
    }
}

/// Reviewer verdict on an implementation whose tests passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReview {
    pub implementation_id: String,
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub security_concerns: Vec<String>,
}

impl CodeReview {
    /// `"<SEVERITY>: <description>"` per issue, fed back to the coder.
    pub fn issue_messages(&self) -> Vec<String> {
        self.issues
            .iter()
            .map(|i| format!("{}: {}", i.severity, i.description))
            .collect()
    }

    /// Human-readable rendering. Hashed into `review` evidence.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Review of {}: {}\n",
            self.implementation_id,
            if self.passed { "PASSED" } else { "FAILED" }
        );
        if !self.issues.is_empty() {
            out.push_str("Issues:\n");
            for issue in &self.issues {
                out.push_str(&format!("- {}: {}", issue.severity, issue.description));
                if let Some(path) = &issue.file_path {
                    out.push_str(&format!(" ({}:{})", path, issue.line.unwrap_or(0)));
                }
                out.push('\n');
            }
        }
        if !self.suggestions.is_empty() {
            out.push_str("Suggestions:\n");
            for s in &self.suggestions {
                out.push_str(&format!("- {s}\n"));
            }
        }
        if !self.security_concerns.is_empty() {
            out.push_str("Security concerns:\n");
            for s in &self.security_concerns {
                out.push_str(&format!("- {s}\n"));
            }
        }
        out
    }
}

// ── Debug analysis ───────────────────────────────────────────────────────────

/// A concrete edit proposed by the debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChange {
    pub file_path: String,
    pub original_code: String,
    pub new_code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub line_start: u32,
    #[serde(default)]
    pub line_end: u32,
}

/// Debugger diagnosis of a repeated test failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugAnalysis {
    pub failure_id: String,
    pub root_cause: String,
    pub fix_suggestion: String,
    #[serde(default)]
    pub changes: Vec<CodeChange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str, code: &str) -> TestCase {
        TestCase {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            test_type: TestType::Unit,
            code: code.into(),
            requirement_ref: None,
        }
    }

    fn result(id: &str, passed: bool, error: Option<&str>) -> TestResult {
        TestResult {
            test_id: id.into(),
            passed,
            output: String::new(),
            error: error.map(String::from),
            duration_ms: 5,
        }
    }

    #[test]
    fn test_suite_source_orders_setup_cases_teardown() {
        let suite = TestSuite {
            task_id: "t-1".into(),
            test_cases: vec![case("a", "assert a"), case("b", "assert b")],
            setup_code: "setup()".into(),
            teardown_code: "teardown()".into(),
            fixtures: vec![],
        };
        assert_eq!(
            suite.source(),
            "setup()\n\nassert a\n\nassert b\n\nteardown()"
        );
        assert_eq!(suite.suite_id(), "t-1");
        assert_eq!(suite.test_count(), 2);
    }

    #[test]
    fn test_suite_source_skips_empty_setup() {
        let suite = TestSuite {
            task_id: "t-1".into(),
            test_cases: vec![case("a", "assert a")],
            setup_code: String::new(),
            teardown_code: String::new(),
            fixtures: vec![],
        };
        assert_eq!(suite.source(), "assert a");
    }

    #[test]
    fn test_run_counts_and_error_messages() {
        let run = TestRunResult::from_results(
            "s",
            vec![
                result("ok", true, None),
                result("bad", false, Some("expected 2, got 3")),
                result("silent", false, None),
            ],
            71.5,
        );
        assert_eq!(run.passed_count, 1);
        assert_eq!(run.failed_count, 2);
        assert!(!run.all_passed());
        assert_eq!(
            run.error_messages(),
            vec!["expected 2, got 3".to_string(), "silent failed".to_string()]
        );
    }

    #[test]
    fn test_report_lists_every_result() {
        let run = TestRunResult::from_results(
            "s",
            vec![result("ok", true, None), result("bad", false, Some("boom"))],
            50.0,
        );
        let report = run.format_report();
        assert!(report.starts_with("Test run s: 1 passed, 1 failed, coverage 50.0%"));
        assert!(report.contains("[PASS] ok (5ms)"));
        assert!(report.contains("[FAIL] bad (5ms): boom"));
    }

    #[test]
    fn test_review_issue_messages_use_uppercase_severity() {
        let review = CodeReview {
            implementation_id: "impl-1".into(),
            passed: false,
            issues: vec![
                ReviewIssue::new(IssueSeverity::High, "unchecked index"),
                ReviewIssue::new(IssueSeverity::Low, "naming"),
            ],
            suggestions: vec![],
            security_concerns: vec![],
        };
        assert_eq!(
            review.issue_messages(),
            vec!["HIGH: unchecked index".to_string(), "LOW: naming".to_string()]
        );
        assert!(review.render().contains("FAILED"));
    }

    #[test]
    fn test_implementation_source_string_marks_files() {
        let implementation = Implementation {
            task_id: "t".into(),
            files: vec![
                CodeFile {
                    path: "src/a.py".into(),
                    content: "x = 1".into(),
                    language: "python".into(),
                },
                CodeFile {
                    path: "src/b.py".into(),
                    content: "y = 2\n".into(),
                    language: "python".into(),
                },
            ],
            imports: vec![],
            dependencies: vec![],
        };
        let text = implementation.to_source_string();
        assert!(text.contains("# File: src/a.py\nx = 1\n"));
        assert!(text.contains("# File: src/b.py\ny = 2\n"));
        assert_eq!(implementation.concatenated_contents(), "x = 1\ny = 2\n");
    }

    #[test]
    fn test_case_type_field_is_named_type() {
        let json = serde_json::to_value(case("a", "x")).unwrap();
        assert_eq!(json["type"], "unit");
    }
}
