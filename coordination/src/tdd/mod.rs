//! TDD domain model shared by the orchestrator and the evidence builder.

pub mod types;

pub use types::{
    CodeChange, CodeFile, CodeReview, DebugAnalysis, Implementation, IssueSeverity, ReviewIssue,
    TestCase, TestResult, TestRunResult, TestSuite, TestType,
};
