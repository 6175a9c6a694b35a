use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use wav_eval::batch::{discover_completed_tasks, BatchOptions, BatchRunner};
use wav_eval::trim::trim_har_file;
use wav_eval::{DataReader, TaskEvaluator, TraceInput};
use wav_types::{EvalStatus, Site, TaskType, WavConfig};

#[derive(Parser)]
#[command(name = "wav", version, about = "WebArena Verified evaluation CLI")]
struct Cli {
    /// Path to the dataset JSON file.
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,
    /// Path to the runtime config (YAML or JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TaskTypeArg {
    #[value(name = "retrieve")]
    Retrieve,
    #[value(name = "mutate")]
    Mutate,
    #[value(name = "navigate")]
    Navigate,
}

impl From<TaskTypeArg> for TaskType {
    fn from(value: TaskTypeArg) -> Self {
        match value {
            TaskTypeArg::Retrieve => TaskType::Retrieve,
            TaskTypeArg::Mutate => TaskType::Mutate,
            TaskTypeArg::Navigate => TaskType::Navigate,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a single task directory.
    EvalTask {
        #[arg(long)]
        task_id: u32,
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Evaluate many tasks and write per-task results plus a summary.
    EvalTasks {
        #[arg(long)]
        output_dir: PathBuf,
        /// Comma-separated task ids; discovery over output-dir when omitted.
        #[arg(long)]
        task_ids: Option<String>,
        /// Comma-separated site filter.
        #[arg(long)]
        sites: Option<String>,
        #[arg(long, value_enum)]
        task_type: Option<TaskTypeArg>,
        #[arg(long)]
        template_id: Option<u32>,
        /// Worker threads (0 = available parallelism).
        #[arg(long, default_value_t = 0)]
        max_workers: usize,
        /// List the tasks that would run, without evaluating.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Trim static assets from a HAR file and redact sensitive headers.
    TrimTrace {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print a task definition from the dataset.
    ShowTask {
        #[arg(long)]
        task_id: u32,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<WavConfig> {
    match path {
        Some(path) => WavConfig::from_file(path),
        None => Ok(WavConfig::default()),
    }
}

fn load_reader(dataset: Option<&PathBuf>) -> Result<DataReader> {
    let path = dataset.ok_or_else(|| anyhow!("--dataset is required for this command"))?;
    DataReader::from_file(path)
}

fn parse_id_list(raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| anyhow!("invalid task id: '{}'", part))
        })
        .collect()
}

fn parse_site_list(raw: &str) -> Result<Vec<Site>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Site::parse)
        .collect()
}

/// Intersect requested ids with dataset-metadata filters.
fn filter_task_ids(
    task_ids: Vec<u32>,
    reader: &DataReader,
    sites: Option<&[Site]>,
    task_type: Option<TaskType>,
    template_id: Option<u32>,
) -> Vec<u32> {
    if sites.is_none() && task_type.is_none() && template_id.is_none() {
        return task_ids;
    }
    let matching: Vec<u32> = reader
        .filtered_tasks(sites, task_type, template_id)
        .iter()
        .map(|task| task.task_id)
        .collect();
    task_ids
        .into_iter()
        .filter(|id| matching.contains(id))
        .collect()
}

fn run_eval_task(
    cli: &Cli,
    task_id: u32,
    output_dir: &PathBuf,
    json_output: bool,
) -> Result<i32> {
    let config = load_config(cli.config.as_ref())?;
    let reader = load_reader(cli.dataset.as_ref())?;
    let task = reader.get_task(task_id)?.clone();
    let evaluator = TaskEvaluator::new(config, reader.data_checksum().to_string());

    let task_dir = output_dir.join(task_id.to_string());
    let response_path = task_dir.join(&evaluator.config().agent_response_file_name);
    let raw_text = std::fs::read_to_string(&response_path)
        .map_err(|e| anyhow!("failed reading {}: {}", response_path.display(), e))?;
    let trace = TraceInput::load(&task_dir.join(&evaluator.config().trace_file_name));

    let result = evaluator.evaluate_task(&task, &json!(raw_text), &trace);
    let result_path = task_dir.join(&evaluator.config().eval_result_file_name);
    wav_core::atomic_write_json_pretty(&result_path, &serde_json::to_value(&result)?)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "task {}: {} (score {})",
            result.task_id,
            match result.status {
                EvalStatus::Success => "success",
                EvalStatus::Failure => "failure",
                EvalStatus::Error => "error",
            },
            result.score
        );
        if let Some(error_msg) = &result.error_msg {
            println!("  error: {}", error_msg);
        }
    }
    Ok(0)
}

#[allow(clippy::too_many_arguments)]
fn run_eval_tasks(
    cli: &Cli,
    output_dir: &PathBuf,
    task_ids: Option<&String>,
    sites: Option<&String>,
    task_type: Option<TaskTypeArg>,
    template_id: Option<u32>,
    max_workers: usize,
    dry_run: bool,
    json_output: bool,
) -> Result<i32> {
    let config = load_config(cli.config.as_ref())?;
    let site_filter = sites.map(|raw| parse_site_list(raw)).transpose()?;
    let type_filter = task_type.map(TaskType::from);

    let explicit = task_ids.map(|raw| parse_id_list(raw)).transpose()?;
    let discovered = match &explicit {
        Some(ids) => ids.clone(),
        None => {
            let (found, skipped) =
                discover_completed_tasks(output_dir, &config.agent_response_file_name);
            if !skipped.is_empty() {
                eprintln!("skipping task dirs without an agent response: {:?}", skipped);
            }
            found
        }
    };

    if dry_run {
        println!("would evaluate {} task(s): {:?}", discovered.len(), discovered);
        return Ok(0);
    }

    let reader = load_reader(cli.dataset.as_ref())?;
    let selected = filter_task_ids(
        discovered,
        &reader,
        site_filter.as_deref(),
        type_filter,
        template_id,
    );
    let evaluator = TaskEvaluator::new(config, reader.data_checksum().to_string());
    let runner = BatchRunner::new(evaluator, reader);

    let mut options = BatchOptions::new(output_dir.clone());
    options.task_ids = selected;
    options.max_workers = max_workers;
    let summary = runner.run(&options)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "evaluated {} task(s): {} success, {} failed, {} error",
            summary.total, summary.success_count, summary.failed_count, summary.error_count
        );
    }
    Ok(0)
}

fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Commands::EvalTask {
            task_id,
            output_dir,
            json,
        } => run_eval_task(cli, *task_id, output_dir, *json),
        Commands::EvalTasks {
            output_dir,
            task_ids,
            sites,
            task_type,
            template_id,
            max_workers,
            dry_run,
            json,
        } => run_eval_tasks(
            cli,
            output_dir,
            task_ids.as_ref(),
            sites.as_ref(),
            *task_type,
            *template_id,
            *max_workers,
            *dry_run,
            *json,
        ),
        Commands::TrimTrace {
            input,
            output,
            json,
        } => {
            let stats = trim_har_file(input, output)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "kept {}/{} entries, sanitized {} header(s), {}% smaller",
                    stats.trimmed_entries,
                    stats.original_entries,
                    stats.request_headers_sanitized + stats.response_headers_sanitized,
                    stats.reduction_percent
                );
            }
            Ok(0)
        }
        Commands::ShowTask { task_id } => {
            let reader = load_reader(cli.dataset.as_ref())?;
            let task = reader.get_task(*task_id)?;
            println!("{}", serde_json::to_string_pretty(task)?);
            Ok(0)
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {:#}", err);
            std::process::exit(1);
        }
    }
}
