use crate::site::Site;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Three-tier outcome taxonomy. `Failure` is a legitimate evaluation result;
/// `Error` means the evaluation system could not complete the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalStatus {
    Success,
    Failure,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionResult {
    pub assertion_name: String,
    pub status: EvalStatus,
    #[serde(default)]
    pub assertion_msgs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl AssertionResult {
    pub fn failure(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            assertion_name: name.into(),
            status: EvalStatus::Failure,
            assertion_msgs: vec![msg.into()],
            error_msg: None,
        }
    }

    pub fn error(name: impl Into<String>, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        Self {
            assertion_name: name.into(),
            status: EvalStatus::Error,
            assertion_msgs: Vec::new(),
            error_msg: Some(msg),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorResult {
    pub evaluator_name: String,
    pub status: EvalStatus,
    pub score: f64,
    #[serde(default)]
    pub actual: Value,
    #[serde(default)]
    pub actual_normalized: Value,
    #[serde(default)]
    pub expected: Value,
    #[serde(default)]
    pub assertions: Vec<AssertionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl EvaluatorResult {
    /// Success when no assertion failed; failure otherwise; error when any
    /// assertion carries an error status.
    pub fn from_assertions(
        evaluator_name: impl Into<String>,
        actual: Value,
        actual_normalized: Value,
        expected: Value,
        assertions: Vec<AssertionResult>,
    ) -> Self {
        let status = if assertions
            .iter()
            .any(|a| a.status == EvalStatus::Error)
        {
            EvalStatus::Error
        } else if assertions.is_empty() {
            EvalStatus::Success
        } else {
            EvalStatus::Failure
        };
        let error_msg = assertions
            .iter()
            .find_map(|a| a.error_msg.clone());
        Self {
            evaluator_name: evaluator_name.into(),
            status,
            score: if status == EvalStatus::Success { 1.0 } else { 0.0 },
            actual,
            actual_normalized,
            expected,
            assertions,
            error_msg,
        }
    }

    pub fn error(evaluator_name: impl Into<String>, error_msg: impl Into<String>) -> Self {
        Self {
            evaluator_name: evaluator_name.into(),
            status: EvalStatus::Error,
            score: 0.0,
            actual: Value::Null,
            actual_normalized: Value::Null,
            expected: Value::Null,
            assertions: Vec::new(),
            error_msg: Some(error_msg.into()),
        }
    }
}

/// Unit of record: one task's evaluation outcome. Reproducible — identical
/// inputs yield an identical document, which the checksums make auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvalResult {
    pub task_id: u32,
    pub intent_template_id: u32,
    pub sites: Vec<Site>,
    pub task_revision: u32,
    pub status: EvalStatus,
    pub score: f64,
    pub evaluators_results: Vec<EvaluatorResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub webarena_verified_version: String,
    pub evaluator_checksum: String,
    pub data_checksum: String,
}

impl TaskEvalResult {
    /// Task status/score invariant: success with score 1.0 iff every
    /// evaluator succeeded; any error wins over failures.
    pub fn aggregate_status(evaluators_results: &[EvaluatorResult]) -> (EvalStatus, f64) {
        let any_error = evaluators_results
            .iter()
            .any(|e| e.status == EvalStatus::Error);
        let all_success = evaluators_results
            .iter()
            .all(|e| e.status == EvalStatus::Success && e.score == 1.0);
        if any_error {
            (EvalStatus::Error, 0.0)
        } else if all_success && !evaluators_results.is_empty() {
            (EvalStatus::Success, 1.0)
        } else {
            (EvalStatus::Failure, 0.0)
        }
    }
}

/// Per-site row in the batch summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteTaskOutcome {
    pub task_id: u32,
    pub status: EvalStatus,
    pub score: f64,
}

/// Aggregate document written once per batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub timestamp: String,
    pub webarena_verified_version: String,
    pub evaluator_checksum: String,
    pub data_checksum: String,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub error_count: usize,
    pub per_site_summary: BTreeMap<String, Vec<SiteTaskOutcome>>,
    pub task_results: Vec<TaskEvalResult>,
}
