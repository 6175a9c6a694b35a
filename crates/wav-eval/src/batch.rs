//! Batch runner: fans the orchestrator out across task output directories on
//! a bounded worker pool and writes one result document per task plus an
//! aggregate summary. Tasks are independent; one corrupt artifact degrades a
//! single task to `error` and never aborts the run.

use crate::{DataReader, TaskEvaluator, TraceInput};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use tracing::{info, warn};
use wav_core::atomic_write_json_pretty;
use wav_types::{EvalStatus, EvalSummary, SiteTaskOutcome, TaskEvalResult};

pub const EVAL_SUMMARY_FILE_NAME: &str = "eval_summary.json";

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub output_dir: PathBuf,
    /// Explicit task ids; discovery over `output_dir` when empty.
    pub task_ids: Vec<u32>,
    /// Worker threads; 0 means available parallelism.
    pub max_workers: usize,
    /// Skip writing per-task and summary documents.
    pub no_write: bool,
}

impl BatchOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            task_ids: Vec::new(),
            max_workers: 0,
            no_write: false,
        }
    }
}

/// Numeric directories under `output_dir` containing the agent-response file
/// are completed tasks; numeric directories without one are reported as
/// skipped. Everything else is ignored.
pub fn discover_completed_tasks(
    output_dir: &Path,
    agent_response_file_name: &str,
) -> (Vec<u32>, Vec<u32>) {
    let mut discovered = Vec::new();
    let mut skipped = Vec::new();
    if !output_dir.is_dir() {
        return (discovered, skipped);
    }
    for entry in walkdir::WalkDir::new(output_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .flatten()
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(task_id) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if entry.path().join(agent_response_file_name).is_file() {
            discovered.push(task_id);
        } else {
            skipped.push(task_id);
        }
    }
    discovered.sort_unstable();
    skipped.sort_unstable();
    (discovered, skipped)
}

pub struct BatchRunner {
    evaluator: Arc<TaskEvaluator>,
    reader: Arc<DataReader>,
}

impl BatchRunner {
    pub fn new(evaluator: TaskEvaluator, reader: DataReader) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
            reader: Arc::new(reader),
        }
    }

    pub fn reader(&self) -> &DataReader {
        &self.reader
    }

    pub fn evaluator(&self) -> &TaskEvaluator {
        &self.evaluator
    }

    /// Evaluate one task directory. Read or parse problems become that
    /// task's own `error` result.
    pub fn evaluate_task_dir(&self, task_id: u32, task_dir: &Path) -> TaskEvalResult {
        match self.try_evaluate(task_id, task_dir) {
            Ok(result) => result,
            Err(err) => {
                warn!(task_id, error = %format!("{:#}", err), "task evaluation errored");
                self.degraded_result(task_id, format!("{:#}", err))
            }
        }
    }

    fn try_evaluate(&self, task_id: u32, task_dir: &Path) -> Result<TaskEvalResult> {
        let task = self.reader.get_task(task_id)?;
        let config = self.evaluator.config();

        let response_path = task_dir.join(&config.agent_response_file_name);
        let raw_text = fs::read_to_string(&response_path)
            .with_context(|| format!("agent response file missing: {}", response_path.display()))?;
        let agent_response_raw = Value::String(raw_text);

        let trace = TraceInput::load(&task_dir.join(&config.trace_file_name));
        Ok(self
            .evaluator
            .evaluate_task(task, &agent_response_raw, &trace))
    }

    /// Result-of-record for a task whose inputs could not even be read: the
    /// dataset metadata is attached when available, the status is `error`.
    fn degraded_result(&self, task_id: u32, error_msg: String) -> TaskEvalResult {
        let task = self.reader.get_task(task_id).ok();
        TaskEvalResult {
            task_id,
            intent_template_id: task.map(|t| t.intent_template_id).unwrap_or(0),
            sites: task.map(|t| t.sites.clone()).unwrap_or_default(),
            task_revision: task.map(|t| t.revision).unwrap_or(0),
            status: EvalStatus::Error,
            score: 0.0,
            evaluators_results: Vec::new(),
            error_msg: Some(error_msg),
            webarena_verified_version: wav_provenance::WEBARENA_VERIFIED_VERSION.to_string(),
            evaluator_checksum: wav_provenance::evaluator_checksum(),
            data_checksum: self.reader.data_checksum().to_string(),
        }
    }

    /// Run the batch. Cross-task fan-out is embarrassingly parallel: workers
    /// share only the read-only evaluator and reader. The summary is sorted
    /// by task id, so it is deterministic regardless of completion order.
    pub fn run(&self, options: &BatchOptions) -> Result<EvalSummary> {
        let config = self.evaluator.config();
        let task_ids = if options.task_ids.is_empty() {
            let (discovered, skipped) =
                discover_completed_tasks(&options.output_dir, &config.agent_response_file_name);
            if !skipped.is_empty() {
                warn!(?skipped, "task directories without an agent response");
            }
            discovered
        } else {
            let mut ids = options.task_ids.clone();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        info!(total = task_ids.len(), "starting batch evaluation");

        let worker_count = if options.max_workers == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            options.max_workers
        }
        .min(task_ids.len().max(1));

        let queue = Arc::new(Mutex::new(task_ids.clone()));
        let (completions_tx, completions_rx) = mpsc::channel::<TaskEvalResult>();
        let spawned: Result<()> = thread::scope(|scope| {
            for worker_idx in 0..worker_count {
                let queue = Arc::clone(&queue);
                let completions_tx = completions_tx.clone();
                let output_dir = options.output_dir.clone();
                let runner = &*self;
                thread::Builder::new()
                    .name(format!("wav-worker-{}", worker_idx))
                    .spawn_scoped(scope, move || loop {
                        let task_id = match queue.lock() {
                            Ok(mut queue) => match queue.pop() {
                                Some(id) => id,
                                None => break,
                            },
                            Err(_) => break,
                        };
                        let task_dir = output_dir.join(task_id.to_string());
                        let result = runner.evaluate_task_dir(task_id, &task_dir);
                        let _ = completions_tx.send(result);
                    })
                    .map_err(|e| anyhow!("failed to spawn batch worker thread: {}", e))?;
            }
            drop(completions_tx);
            Ok(())
        });
        spawned?;

        let mut results: Vec<TaskEvalResult> = completions_rx.iter().collect();
        results.sort_by_key(|result| result.task_id);

        if !options.no_write {
            for result in &results {
                let path = options
                    .output_dir
                    .join(result.task_id.to_string())
                    .join(&config.eval_result_file_name);
                atomic_write_json_pretty(&path, &serde_json::to_value(result)?)?;
            }
        }

        let summary = summarize(results, self.evaluator.provenance());
        if !options.no_write {
            let path = options.output_dir.join(EVAL_SUMMARY_FILE_NAME);
            atomic_write_json_pretty(&path, &serde_json::to_value(&summary)?)?;
        }
        info!(
            total = summary.total,
            success = summary.success_count,
            failed = summary.failed_count,
            errors = summary.error_count,
            "batch evaluation finished"
        );
        Ok(summary)
    }
}

/// Provenance triple stamped into the summary.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub version: String,
    pub evaluator_checksum: String,
    pub data_checksum: String,
}

fn summarize(results: Vec<TaskEvalResult>, provenance: Provenance) -> EvalSummary {
    let mut per_site_summary: BTreeMap<String, Vec<SiteTaskOutcome>> = BTreeMap::new();
    let mut success_count = 0;
    let mut failed_count = 0;
    let mut error_count = 0;
    for result in &results {
        match result.status {
            EvalStatus::Success => success_count += 1,
            EvalStatus::Failure => failed_count += 1,
            EvalStatus::Error => error_count += 1,
        }
        for site in &result.sites {
            per_site_summary
                .entry(site.as_str().to_string())
                .or_default()
                .push(SiteTaskOutcome {
                    task_id: result.task_id,
                    status: result.status,
                    score: result.score,
                });
        }
    }
    EvalSummary {
        timestamp: chrono::Utc::now().to_rfc3339(),
        webarena_verified_version: provenance.version,
        evaluator_checksum: provenance.evaluator_checksum,
        data_checksum: provenance.data_checksum,
        total: results.len(),
        success_count,
        failed_count,
        error_count,
        per_site_summary,
        task_results: results,
    }
}
