use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use runflow::app::{Layout, PipelineEventRouter};
use runflow::config::{EngineConfig, WorkflowDefinition};
use runflow::domain::{
    CheckpointId, GitId, IssueKey, McpServerId, PipelineEvent, ReportId, WorkExecutionId,
    WorkNodeConfig, WorkflowRunId,
};
use runflow::paths::{self, RunflowPaths};
use runflow::structured_logger::StructuredLogger;
use runflow::wiring::{file_backed, in_memory, Engine};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runflow")]
#[command(about = "Durable multi-step workflow runs with checkpoints over git work trees")]
#[command(version = env!("RUNFLOW_GIT_SHA"))]
struct Cli {
    /// Engine configuration file (default: ~/.runflow/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep everything in memory; nothing is written to disk
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a run from a workflow definition
    Create {
        #[arg(long)]
        workflow: PathBuf,
        #[arg(long)]
        issue: String,
        /// Seed value as key=value, repeatable
        #[arg(long = "seed", value_parser = parse_seed)]
        seeds: Vec<(String, String)>,
    },
    Start {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
    },
    Pause {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
    },
    Resume {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
    },
    Cancel {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },
    /// Delete a run that is not running
    Delete {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
    },
    /// Append the steps of a workflow definition to a run
    AddNodes {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
        #[arg(long)]
        workflow: PathBuf,
    },
    RemoveNode {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
        sequence: u32,
    },
    /// Re-open the tasks of the current step from a task index on
    Rewind {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
        #[arg(value_parser = parse_execution_id)]
        execution: WorkExecutionId,
        #[arg(long, default_value = "0")]
        from_task: usize,
    },
    /// List runs, or show one run
    List {
        #[arg(value_parser = parse_run_id)]
        run: Option<WorkflowRunId>,
    },
    Summary,
    Checkpoints {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
    },
    Capture {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
    },
    Restore {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
        #[arg(value_parser = parse_checkpoint_id)]
        checkpoint: CheckpointId,
    },
    /// Pause runs left RUNNING by a previous process
    Recover,
    Reports {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
    },
    Report {
        #[arg(value_parser = parse_report_id)]
        report: ReportId,
    },
    /// Show the run directory, or a sub-directory of it
    Tree {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
        path: Option<String>,
    },
    Cat {
        #[arg(value_parser = parse_run_id)]
        run: WorkflowRunId,
        path: String,
    },
    InvalidateGit {
        git_id: String,
    },
    InvalidateMcp {
        server_id: String,
    },
    /// Apply one pipeline event given as JSON
    Event {
        json: String,
    },
    /// Apply pipeline events read as JSON lines from stdin until Ctrl-C
    Serve,
}

fn parse_run_id(s: &str) -> Result<WorkflowRunId, String> {
    WorkflowRunId::from_string(s).map_err(|e| e.to_string())
}

fn parse_execution_id(s: &str) -> Result<WorkExecutionId, String> {
    WorkExecutionId::from_string(s).map_err(|e| e.to_string())
}

fn parse_checkpoint_id(s: &str) -> Result<CheckpointId, String> {
    CheckpointId::from_string(s).map_err(|e| e.to_string())
}

fn parse_report_id(s: &str) -> Result<ReportId, String> {
    ReportId::from_string(s).map_err(|e| e.to_string())
}

fn parse_seed(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_from_env("RUNFLOW_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{}", text);
    Ok(())
}

fn seed_run(config: &EngineConfig) -> Result<Option<runflow::domain::NewRun>> {
    let Some(path) = &config.seed_workflow else {
        return Ok(None);
    };
    let definition = WorkflowDefinition::load(path)?;
    let new_run = definition
        .new_run(IssueKey::from("seed"), BTreeMap::new())
        .with_context(|| format!("building seed run from {}", path.display()))?;
    Ok(Some(new_run))
}

fn build_engine(
    config: &EngineConfig,
    paths: &RunflowPaths,
    in_memory_only: bool,
) -> Result<(Engine, Option<Arc<StructuredLogger>>)> {
    if in_memory_only {
        let layout = Layout {
            trees_root: paths.trees.clone(),
            spaces_root: paths.spaces.clone(),
        };
        let (ctx, _adapters) = in_memory(layout, config.retry.clone());
        return Ok((Engine::new(ctx, config), None));
    }

    paths.ensure()?;
    let journal = if config.journal {
        Some(Arc::new(StructuredLogger::new(&paths.logs)?))
    } else {
        None
    };
    let ctx = file_backed(paths, config.retry.clone(), journal.clone())
        .context("opening run store")?;
    Ok((Engine::new(ctx, config), journal))
}

async fn serve(engine: &Engine, router: PipelineEventRouter) -> Result<()> {
    let router_task = tokio::spawn(router.run());
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    info!("reading pipeline events from stdin");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    info!("stdin closed, serving until interrupted");
                    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<PipelineEvent>(&line) {
                    Ok(event) => {
                        engine
                            .ctx
                            .events
                            .publish(runflow::domain::RunEvent::Pipeline(event))
                            .await?;
                    }
                    Err(err) => warn!(error = %err, "ignoring malformed pipeline event"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    router_task.abort();
    Ok(())
}

fn node_configs(workflow: &Path) -> Result<Vec<WorkNodeConfig>> {
    let definition = WorkflowDefinition::load(workflow)?;
    Ok(definition.work_node_configs()?)
}

async fn execute(
    engine: &Engine,
    journal: Option<Arc<StructuredLogger>>,
    command: Command,
) -> Result<()> {
    match command {
        Command::Create {
            workflow,
            issue,
            seeds,
        } => {
            let definition = WorkflowDefinition::load(&workflow)?;
            let new_run =
                definition.new_run(IssueKey::from(issue.as_str()), seeds.into_iter().collect())?;
            let run = engine.create_run.create(new_run).await?;
            println!("{}", run.id());
        }
        Command::Start { run } => print_json(&engine.lifecycle.start(run).await?)?,
        Command::Pause { run } => print_json(&engine.lifecycle.pause(run).await?)?,
        Command::Resume { run } => print_json(&engine.lifecycle.resume(run).await?)?,
        Command::Cancel { run, reason } => {
            print_json(&engine.lifecycle.cancel(run, &reason).await?)?
        }
        Command::Delete { run } => {
            engine.lifecycle.delete_run(run).await?;
            println!("deleted {}", run);
        }
        Command::AddNodes { run, workflow } => {
            for config in node_configs(&workflow)? {
                let sequence = engine.lifecycle.add_work_node(run, config).await?;
                println!("added step {}", sequence);
            }
        }
        Command::RemoveNode { run, sequence } => {
            print_json(&engine.lifecycle.remove_work_node(run, sequence).await?)?
        }
        Command::Rewind {
            run,
            execution,
            from_task,
        } => print_json(
            &engine
                .lifecycle
                .rewind_work_execution(run, execution, from_task)
                .await?,
        )?,
        Command::List { run: Some(run) } => print_json(&engine.queries.run(run).await?)?,
        Command::List { run: None } => {
            for run in engine.queries.runs().await? {
                println!(
                    "{}  {:<11}  {}  step {}/{}",
                    run.id(),
                    run.status(),
                    run.issue_key(),
                    run.current_work_index(),
                    run.work_node_configs().len()
                );
            }
        }
        Command::Summary => print_json(&engine.queries.summary().await?)?,
        Command::Checkpoints { run } => print_json(&engine.queries.checkpoints(run).await?)?,
        Command::Capture { run } => print_json(&engine.checkpoints.capture(run).await?)?,
        Command::Restore { run, checkpoint } => {
            print_json(&engine.checkpoints.restore(run, checkpoint).await?)?
        }
        Command::Recover => print_json(&engine.recovery.recover_orphans().await?)?,
        Command::Reports { run } => print_json(&engine.queries.reports(run).await?)?,
        Command::Report { report } => {
            println!("{}", engine.queries.report_content(report).await?)
        }
        Command::Tree { run, path } => {
            print_json(&engine.queries.workspace_tree(run, path.as_deref()).await?)?
        }
        Command::Cat { run, path } => {
            print!("{}", engine.queries.read_workspace_file(run, &path).await?)
        }
        Command::InvalidateGit { git_id } => print_json(
            &engine
                .invalidation
                .git_deleted(&GitId::from(git_id.as_str()))
                .await?,
        )?,
        Command::InvalidateMcp { server_id } => print_json(
            &engine
                .invalidation
                .mcp_server_deleted(&McpServerId::from(server_id.as_str()))
                .await?,
        )?,
        Command::Event { json } => {
            let event: PipelineEvent =
                serde_json::from_str(&json).context("parsing pipeline event")?;
            if let Err(err) = engine.progress.handle(event.clone()).await {
                if let Some(journal) = &journal {
                    journal.log_rejected_pipeline_event(&event, &err.to_string());
                }
                bail!("pipeline event rejected: {}", err);
            }
        }
        Command::Serve => {
            let router = engine.router(journal);
            serve(engine, router).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_config = paths::config_path()?;
    let config = EngineConfig::load_or_default(cli.config.as_deref(), &default_config)?;
    init_tracing(&config);

    let home = paths::runflow_home_dir()?;
    let paths = config.paths(&home);
    let (engine, journal) = build_engine(&config, &paths, cli.in_memory)?;

    let report = engine.startup(seed_run(&config)?).await?;
    if !report.recovered.is_empty() {
        warn!(count = report.recovered.len(), "paused runs orphaned by a previous process");
    }

    execute(&engine, journal, cli.command).await
}
