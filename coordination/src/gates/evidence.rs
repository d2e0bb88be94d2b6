//! Evidence bundles: hash-integrity-checked artifacts submitted with a gate
//!
//! A bundle is built once per successful development cycle and stored by the
//! gate backend as a flat string map. The `items` field of that map is a JSON
//! array string; every other field is stored as plain text.
//!
//! ```text
//! bundle_id   → "6f1c…"            (UUID v4)
//! task_id     → "task-42"
//! gate_type   → "code"
//! git_sha     → "a1b2c3…"
//! items       → "[{\"item_type\":\"artifact\",…}]"
//! created_at  → "2026-01-05T10:11:12.123456Z"
//! summary     → "TDD cycle for task task-42: …"
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::error::{GateError, GateResult};
use super::types::{evidence_kind, GateType};
use crate::tdd::{CodeReview, Implementation, TestRunResult, TestSuite};

/// Flat-map keys of the canonical storage encoding.
pub mod keys {
    pub const BUNDLE_ID: &str = "bundle_id";
    pub const TASK_ID: &str = "task_id";
    pub const GATE_TYPE: &str = "gate_type";
    pub const GIT_SHA: &str = "git_sha";
    pub const ITEMS: &str = "items";
    pub const CREATED_AT: &str = "created_at";
    pub const SUMMARY: &str = "summary";
}

/// SHA-256 hex digest of UTF-8 text. Pure and unsalted.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// One hashed artifact inside a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub item_type: String,
    pub path: String,
    pub description: String,
    pub content_hash: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl EvidenceItem {
    /// Build an item whose hash is computed from `content`.
    pub fn from_content(
        item_type: impl Into<String>,
        path: impl Into<String>,
        description: impl Into<String>,
        content: &str,
    ) -> Self {
        Self {
            item_type: item_type.into(),
            path: path.into(),
            description: description.into(),
            content_hash: content_hash(content),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether `content` still hashes to the recorded digest.
    pub fn matches(&self, content: &str) -> bool {
        self.content_hash == content_hash(content)
    }
}

/// Inputs for the evidence of one successful implement → test → review cycle.
#[derive(Debug, Clone, Copy)]
pub struct DevelopmentEvidence<'a> {
    pub task_id: &'a str,
    pub task_description: &'a str,
    pub git_sha: &'a str,
    pub test_path: &'a str,
    pub implementation: &'a Implementation,
    pub test_suite: &'a TestSuite,
    pub test_run: &'a TestRunResult,
    pub review: &'a CodeReview,
}

/// Evidence submitted to a HITL gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub bundle_id: String,
    pub task_id: String,
    pub gate_type: GateType,
    pub git_sha: String,
    pub items: Vec<EvidenceItem>,
    pub created_at: DateTime<Utc>,
    pub summary: String,
}

impl EvidenceBundle {
    /// Empty bundle with a fresh id.
    pub fn new(
        task_id: impl Into<String>,
        gate_type: GateType,
        git_sha: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            bundle_id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            gate_type,
            git_sha: git_sha.into(),
            items: Vec::new(),
            created_at: Utc::now(),
            summary: summary.into(),
        }
    }

    pub fn with_item(mut self, item: EvidenceItem) -> Self {
        self.items.push(item);
        self
    }

    /// Build the four-item bundle for a completed cycle.
    ///
    /// Items, in order: `artifact`, `test_suite`, `test_result`, `review`.
    pub fn for_development(gate_type: GateType, ev: DevelopmentEvidence<'_>) -> Self {
        let implementation = ev.implementation;
        let suite = ev.test_suite;
        let run = ev.test_run;
        let review = ev.review;

        let artifact = EvidenceItem::from_content(
            evidence_kind::ARTIFACT,
            implementation
                .files
                .first()
                .map(|f| f.path.clone())
                .unwrap_or_else(|| format!("{}/implementation", ev.task_id)),
            format!("Implementation ({} files)", implementation.files.len()),
            &implementation.concatenated_contents(),
        )
        .with_metadata("files", json!(implementation.file_paths()))
        .with_metadata("imports", json!(implementation.imports))
        .with_metadata("dependencies", json!(implementation.dependencies));

        let test_suite = EvidenceItem::from_content(
            evidence_kind::TEST_SUITE,
            ev.test_path,
            format!("Generated test suite ({} tests)", suite.test_count()),
            &suite.source(),
        )
        .with_metadata("test_count", suite.test_count())
        .with_metadata("fixtures", json!(suite.fixtures));

        let test_result = EvidenceItem::from_content(
            evidence_kind::TEST_RESULT,
            format!("{}/test-results", run.suite_id),
            format!(
                "Test run: {} passed, {} failed",
                run.passed_count, run.failed_count
            ),
            &run.format_report(),
        )
        .with_metadata("passed", run.passed_count)
        .with_metadata("failed", run.failed_count)
        .with_metadata("coverage", run.coverage_percent)
        .with_metadata("all_passed", run.all_passed());

        let review_item = EvidenceItem::from_content(
            evidence_kind::REVIEW,
            format!("{}/review", review.implementation_id),
            format!(
                "Code review: {}",
                if review.passed { "passed" } else { "failed" }
            ),
            &review.render(),
        )
        .with_metadata("passed", review.passed)
        .with_metadata("issue_count", review.issues.len())
        .with_metadata("security_concern_count", review.security_concerns.len());

        let summary = format!(
            "TDD cycle for task {}: {}\nFiles: {} | Tests: {} | Coverage: {:.1}% | Review: {} ({} issues)",
            ev.task_id,
            ev.task_description,
            implementation.files.len(),
            suite.test_count(),
            run.coverage_percent,
            if review.passed { "PASSED" } else { "FAILED" },
            review.issues.len(),
        );

        Self::new(ev.task_id, gate_type, ev.git_sha, summary)
            .with_item(artifact)
            .with_item(test_suite)
            .with_item(test_result)
            .with_item(review_item)
    }

    pub fn item_types(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.item_type.as_str()).collect()
    }

    pub fn find_item(&self, item_type: &str) -> Option<&EvidenceItem> {
        self.items.iter().find(|i| i.item_type == item_type)
    }

    /// Re-hash `content` and compare it with the stored item of `item_type`.
    ///
    /// Returns `false` when the bundle has no such item.
    pub fn verify_item(&self, item_type: &str, content: &str) -> bool {
        self.find_item(item_type)
            .is_some_and(|item| item.matches(content))
    }

    /// Encode into the canonical flat string map used by gate stores.
    pub fn to_map(&self) -> GateResult<HashMap<String, String>> {
        let items = serde_json::to_string(&self.items)
            .map_err(|e| GateError::MalformedBundle(format!("items: {e}")))?;
        let mut map = HashMap::with_capacity(7);
        map.insert(keys::BUNDLE_ID.to_string(), self.bundle_id.clone());
        map.insert(keys::TASK_ID.to_string(), self.task_id.clone());
        map.insert(keys::GATE_TYPE.to_string(), self.gate_type.to_string());
        map.insert(keys::GIT_SHA.to_string(), self.git_sha.clone());
        map.insert(keys::ITEMS.to_string(), items);
        map.insert(keys::CREATED_AT.to_string(), self.created_at.to_rfc3339());
        map.insert(keys::SUMMARY.to_string(), self.summary.clone());
        Ok(map)
    }

    /// Decode from the canonical flat string map.
    pub fn from_map(map: &HashMap<String, String>) -> GateResult<Self> {
        fn field<'m>(map: &'m HashMap<String, String>, key: &str) -> GateResult<&'m str> {
            map.get(key)
                .map(String::as_str)
                .ok_or_else(|| GateError::MalformedBundle(format!("missing field `{key}`")))
        }

        let gate_type = field(map, keys::GATE_TYPE)?
            .parse::<GateType>()
            .map_err(|e| GateError::MalformedBundle(e.to_string()))?;
        let items: Vec<EvidenceItem> = serde_json::from_str(field(map, keys::ITEMS)?)
            .map_err(|e| GateError::MalformedBundle(format!("items: {e}")))?;
        let created_at = match map.get(keys::CREATED_AT) {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| GateError::MalformedBundle(format!("created_at: {e}")))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        Ok(Self {
            bundle_id: field(map, keys::BUNDLE_ID)?.to_string(),
            task_id: field(map, keys::TASK_ID)?.to_string(),
            gate_type,
            git_sha: field(map, keys::GIT_SHA)?.to_string(),
            items,
            created_at,
            summary: map.get(keys::SUMMARY).cloned().unwrap_or_default(),
        })
    }
}

/// Check that `bundle` carries evidence its gate accepts.
///
/// Coverage is disjunctive: one item of any accepted type is enough.
pub fn validate_evidence_for_gate(bundle: &EvidenceBundle) -> GateResult<()> {
    if bundle.items.is_empty() {
        return Err(GateError::EmptyEvidence {
            gate_type: bundle.gate_type,
        });
    }

    let accepted = bundle.gate_type.accepted_evidence();
    if bundle
        .items
        .iter()
        .any(|item| accepted.contains(&item.item_type.as_str()))
    {
        Ok(())
    } else {
        Err(GateError::MissingEvidence {
            gate_type: bundle.gate_type,
            accepted: accepted.join(", "),
        })
    }
}
