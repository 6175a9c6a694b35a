//! Deterministic evaluation engine for web-agent benchmark tasks: given a
//! task definition, the agent's final response, and a captured network
//! trace, decide whether the agent accomplished the task.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use wav_types::{
    EvalStatus, EvaluatorCfg, EvaluatorResult, NetworkTrace, Site, TaskDefinition, TaskEvalResult,
    TaskType, WavConfig,
};

pub mod batch;
pub mod comparator;
pub mod data_types;
pub mod evaluators;
pub mod jsonpath;
pub mod schema;
pub mod trim;

use evaluators::{evaluate_agent_response, evaluate_network_event};

/// Dataset reader: loads the task file once, validates every entry against
/// the bundled schema, and indexes by task id.
#[derive(Debug)]
pub struct DataReader {
    tasks: BTreeMap<u32, TaskDefinition>,
    data_checksum: String,
    source_path: PathBuf,
}

impl DataReader {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading dataset {}", path.display()))?;
        let documents: Vec<Value> = serde_json::from_str(&raw)
            .with_context(|| format!("dataset {} is not a JSON array", path.display()))?;

        let schema = wav_schemas::compile_schema(wav_schemas::TASK_SCHEMA)?;
        let mut tasks = BTreeMap::new();
        for document in documents {
            wav_schemas::validate(&schema, &document)
                .with_context(|| format!("invalid task document in {}", path.display()))?;
            let task = TaskDefinition::from_value(document)?;
            if tasks.insert(task.task_id, task).is_some() {
                return Err(anyhow!(
                    "duplicate task_id in dataset {}",
                    path.display()
                ));
            }
        }
        let data_checksum = wav_provenance::data_checksum(path)?;
        debug!(tasks = tasks.len(), path = %path.display(), "dataset loaded");
        Ok(Self {
            tasks,
            data_checksum,
            source_path: path.to_path_buf(),
        })
    }

    pub fn get_task(&self, task_id: u32) -> Result<&TaskDefinition> {
        self.tasks
            .get(&task_id)
            .ok_or_else(|| anyhow!("task {} not found in dataset", task_id))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn data_checksum(&self) -> &str {
        &self.data_checksum
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Task listing filtered by metadata. Every filter is optional.
    pub fn filtered_tasks(
        &self,
        sites: Option<&[Site]>,
        task_type: Option<TaskType>,
        template_id: Option<u32>,
    ) -> Vec<&TaskDefinition> {
        self.tasks
            .values()
            .filter(|task| {
                if let Some(sites) = sites {
                    if !task.sites.iter().any(|site| sites.contains(site)) {
                        return false;
                    }
                }
                if let Some(task_type) = task_type {
                    if task.task_type() != Some(task_type) {
                        return false;
                    }
                }
                if let Some(template_id) = template_id {
                    if task.intent_template_id != template_id {
                        return false;
                    }
                }
                true
            })
            .collect()
    }
}

/// The network trace as presented to the orchestrator: either parsed, or a
/// description of why it could not be (missing file, malformed document).
/// The latter becomes an `error` result on each network evaluator instead of
/// aborting the task.
pub enum TraceInput {
    Loaded(NetworkTrace),
    Unavailable(String),
}

impl TraceInput {
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::Unavailable(format!("network trace file missing: {}", path.display()));
        }
        match NetworkTrace::from_file(path) {
            Ok(trace) => Self::Loaded(trace),
            Err(err) => Self::Unavailable(format!("{:#}", err)),
        }
    }
}

/// Input bundle for one task evaluation. Created once per task and read-only
/// to evaluators.
pub struct TaskEvalContext<'a> {
    pub task: &'a TaskDefinition,
    pub agent_response_raw: &'a Value,
    pub network_trace: &'a TraceInput,
}

/// Evaluation orchestrator. Holds the read-only pieces shared by every task:
/// site config, engine version, and the provenance checksums. Safe to share
/// across worker threads.
pub struct TaskEvaluator {
    config: WavConfig,
    version: String,
    evaluator_checksum: String,
    data_checksum: String,
}

impl TaskEvaluator {
    pub fn new(config: WavConfig, data_checksum: String) -> Self {
        Self {
            config,
            version: wav_provenance::WEBARENA_VERIFIED_VERSION.to_string(),
            evaluator_checksum: wav_provenance::evaluator_checksum(),
            data_checksum,
        }
    }

    pub fn config(&self) -> &WavConfig {
        &self.config
    }

    pub fn provenance(&self) -> batch::Provenance {
        batch::Provenance {
            version: self.version.clone(),
            evaluator_checksum: self.evaluator_checksum.clone(),
            data_checksum: self.data_checksum.clone(),
        }
    }

    pub fn evaluate_context(&self, context: &TaskEvalContext<'_>) -> TaskEvalResult {
        self.evaluate_task(context.task, context.agent_response_raw, context.network_trace)
    }

    /// Run every evaluator the task declares, in order. Each produces
    /// exactly one result; an evaluator-internal error becomes that
    /// evaluator's `error` result and never aborts its siblings.
    pub fn evaluate_task(
        &self,
        task: &TaskDefinition,
        agent_response_raw: &Value,
        trace: &TraceInput,
    ) -> TaskEvalResult {
        let mut evaluators_results = Vec::with_capacity(task.eval.len());
        for cfg in &task.eval {
            let name = cfg.evaluator_name();
            let result = match cfg {
                EvaluatorCfg::AgentResponse(cfg) => {
                    evaluate_agent_response(cfg, agent_response_raw)
                        .unwrap_or_else(|err| EvaluatorResult::error(name, format!("{:#}", err)))
                }
                EvaluatorCfg::NetworkEvent(cfg) => match trace {
                    TraceInput::Loaded(trace) => {
                        evaluate_network_event(cfg, trace, &task.sites, &self.config)
                            .unwrap_or_else(|err| {
                                EvaluatorResult::error(name, format!("{:#}", err))
                            })
                    }
                    TraceInput::Unavailable(reason) => {
                        EvaluatorResult::error(name, reason.clone())
                    }
                },
            };
            if result.status == EvalStatus::Error {
                warn!(
                    task_id = task.task_id,
                    evaluator = name,
                    error = result.error_msg.as_deref().unwrap_or(""),
                    "evaluator error"
                );
            }
            evaluators_results.push(result);
        }

        let (status, score) = TaskEvalResult::aggregate_status(&evaluators_results);
        let error_msg = evaluators_results
            .iter()
            .find_map(|result| {
                if result.status == EvalStatus::Error {
                    result.error_msg.clone()
                } else {
                    None
                }
            });

        TaskEvalResult {
            task_id: task.task_id,
            intent_template_id: task.intent_template_id,
            sites: task.sites.clone(),
            task_revision: task.revision,
            status,
            score,
            evaluators_results,
            error_msg,
            webarena_verified_version: self.version.clone(),
            evaluator_checksum: self.evaluator_checksum.clone(),
            data_checksum: self.data_checksum.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        std::env::temp_dir().join(format!("wav_eval_{}_{}", label, nanos))
    }

    fn navigation_task() -> Value {
        json!({
            "task_id": 677,
            "revision": 1,
            "intent_template_id": 311,
            "sites": ["shopping_admin"],
            "intent": "Open the sales order dashboard",
            "eval": [
                {
                    "evaluator": "AgentResponseEvaluator",
                    "expected": {"task_type": "navigate", "status": "SUCCESS", "retrieved_data": null}
                },
                {
                    "evaluator": "NetworkEventEvaluator",
                    "expected": {"url": "http://localhost:7780/admin/sales/order/", "response_status": 200}
                }
            ]
        })
    }

    fn nav_trace() -> TraceInput {
        let document = json!({"log": {"entries": [{
            "request": {
                "url": "http://localhost:7780/admin/sales/order/",
                "method": "GET",
                "headers": [
                    {"name": "Sec-Fetch-Dest", "value": "document"},
                    {"name": "Sec-Fetch-Mode", "value": "navigate"}
                ]
            },
            "response": {"status": 200, "headers": [{"name": "Content-Type", "value": "text/html"}]}
        }]}});
        TraceInput::Loaded(NetworkTrace::from_content(&document).expect("trace"))
    }

    fn evaluator() -> TaskEvaluator {
        TaskEvaluator::new(WavConfig::default(), "sha256:testdata".to_string())
    }

    #[test]
    fn full_navigation_task_evaluates_to_success() {
        let task = TaskDefinition::from_value(navigation_task()).expect("task");
        let response = json!({"task_type": "NAVIGATE", "status": "SUCCESS", "retrieved_data": null});
        let trace = nav_trace();
        let context = TaskEvalContext {
            task: &task,
            agent_response_raw: &response,
            network_trace: &trace,
        };
        let result = evaluator().evaluate_context(&context);
        assert_eq!(result.status, EvalStatus::Success);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.evaluators_results.len(), 2);
        assert_eq!(result.task_id, 677);
        assert_eq!(result.data_checksum, "sha256:testdata");
        assert!(result.evaluator_checksum.starts_with("sha256:"));
        assert!(!result.webarena_verified_version.is_empty());
    }

    #[test]
    fn one_failing_evaluator_fails_the_task() {
        let task = TaskDefinition::from_value(navigation_task()).expect("task");
        let response = json!({"task_type": "RETRIEVE", "status": "SUCCESS", "retrieved_data": null});
        let result = evaluator().evaluate_task(&task, &response, &nav_trace());
        assert_eq!(result.status, EvalStatus::Failure);
        assert_eq!(result.score, 0.0);
        // Network evaluator still ran and succeeded.
        assert_eq!(result.evaluators_results[1].status, EvalStatus::Success);
    }

    #[test]
    fn missing_trace_is_an_error_on_the_network_evaluator_only() {
        let task = TaskDefinition::from_value(navigation_task()).expect("task");
        let response = json!({"task_type": "navigate", "status": "SUCCESS", "retrieved_data": null});
        let trace = TraceInput::Unavailable("network trace file missing: network.har".to_string());
        let result = evaluator().evaluate_task(&task, &response, &trace);
        assert_eq!(result.status, EvalStatus::Error);
        assert_eq!(result.evaluators_results[0].status, EvalStatus::Success);
        assert_eq!(result.evaluators_results[1].status, EvalStatus::Error);
        assert!(result
            .error_msg
            .as_deref()
            .expect("error message")
            .contains("network trace file missing"));
    }

    #[test]
    fn reevaluation_is_reproducible() {
        let task = TaskDefinition::from_value(navigation_task()).expect("task");
        let response = json!({"task_type": "navigate", "status": "SUCCESS", "retrieved_data": null});
        let evaluator = evaluator();
        let first = evaluator.evaluate_task(&task, &response, &nav_trace());
        let second = evaluator.evaluate_task(&task, &response, &nav_trace());
        assert_eq!(
            serde_json::to_value(&first).expect("serialize"),
            serde_json::to_value(&second).expect("serialize")
        );
    }

    #[test]
    fn data_reader_loads_validates_and_indexes() {
        let root = temp_root("reader");
        fs::create_dir_all(&root).expect("dir");
        let path = root.join("dataset.json");
        fs::write(
            &path,
            serde_json::to_vec_pretty(&json!([navigation_task()])).expect("serialize"),
        )
        .expect("write");

        let reader = DataReader::from_file(&path).expect("load");
        assert_eq!(reader.len(), 1);
        assert!(reader.get_task(677).is_ok());
        assert!(reader.get_task(1).is_err());
        assert!(reader.data_checksum().starts_with("sha256:"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn data_reader_rejects_duplicates_and_bad_documents() {
        let root = temp_root("reader_dup");
        fs::create_dir_all(&root).expect("dir");

        let dup = root.join("dup.json");
        fs::write(
            &dup,
            serde_json::to_vec(&json!([navigation_task(), navigation_task()])).expect("serialize"),
        )
        .expect("write");
        assert!(DataReader::from_file(&dup)
            .expect_err("duplicate ids")
            .to_string()
            .contains("duplicate task_id"));

        let invalid = root.join("invalid.json");
        fs::write(&invalid, b"[{\"task_id\": 1}]").expect("write");
        assert!(DataReader::from_file(&invalid).is_err());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn filtered_tasks_by_metadata() {
        let root = temp_root("reader_filter");
        fs::create_dir_all(&root).expect("dir");
        let mut retrieve_task = navigation_task();
        retrieve_task["task_id"] = json!(42);
        retrieve_task["intent_template_id"] = json!(99);
        retrieve_task["sites"] = json!(["reddit"]);
        retrieve_task["eval"] = json!([{
            "evaluator": "AgentResponseEvaluator",
            "expected": {"task_type": "retrieve", "status": "SUCCESS", "retrieved_data": ["x"]}
        }]);
        let path = root.join("dataset.json");
        fs::write(
            &path,
            serde_json::to_vec(&json!([navigation_task(), retrieve_task])).expect("serialize"),
        )
        .expect("write");

        let reader = DataReader::from_file(&path).expect("load");
        assert_eq!(reader.filtered_tasks(None, None, None).len(), 2);
        assert_eq!(
            reader
                .filtered_tasks(Some(&[Site::Reddit]), None, None)
                .len(),
            1
        );
        assert_eq!(
            reader
                .filtered_tasks(None, Some(TaskType::Retrieve), None)
                .len(),
            1
        );
        assert_eq!(reader.filtered_tasks(None, None, Some(311)).len(), 1);
        assert_eq!(
            reader
                .filtered_tasks(Some(&[Site::Gitlab]), None, None)
                .len(),
            0
        );
        let _ = fs::remove_dir_all(root);
    }
}
