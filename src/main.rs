use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use transit_cube::{
    get_recent_run_events, run_scheduled, DailySchedule, Pipeline, PipelineConfig, RunReport,
    RunStatus, Task,
};

#[derive(Parser)]
#[command(name = "transit-cube")]
#[command(about = "Daily bus/halte transaction ETL: CSV → staging → cube → CSV", long_about = None)]
struct Cli {
    /// Directory holding staging.db and cube.db
    #[arg(long, global = true)]
    warehouse_dir: Option<PathBuf>,

    /// Directory the input CSVs are read from
    #[arg(long, global = true)]
    input_dir: Option<PathBuf>,

    /// Directory the cube exports are written to
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all four tasks for one execution date
    Run {
        /// Execution date (YYYY-MM-DD); defaults to today in local time
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Run a single task (init-schemas, load-to-staging, transform, export)
    Task {
        #[arg(value_name = "TASK", value_parser = parse_task)]
        task: Task,

        /// Execution date (YYYY-MM-DD); defaults to today in local time
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Stay in the foreground and run the pipeline every day at the scheduled hour
    Schedule {
        /// Stop after this many runs (runs forever when omitted)
        #[arg(long)]
        max_runs: Option<usize>,
    },
    /// Show the most recent task executions from the run log
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

fn parse_task(raw: &str) -> Result<Task, String> {
    raw.parse::<Task>().map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env().context("Invalid configuration")?;
    if let Some(dir) = cli.warehouse_dir {
        config.warehouse_dir = dir;
    }
    if let Some(dir) = cli.input_dir {
        config.input_dir = dir;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    let schedule = DailySchedule::from_config(&config)?;
    let pipeline = Pipeline::new(config);

    match cli.command {
        Commands::Run { date } => {
            let date = date.unwrap_or_else(|| schedule.today(Utc::now()));
            let report = pipeline.run(date);
            print_report(&report);
            report.into_result()?;
        }
        Commands::Task { task, date } => {
            let date = date.unwrap_or_else(|| schedule.today(Utc::now()));
            let report = pipeline.run_task(task, date);
            print_report(&report);
            report.into_result()?;
        }
        Commands::Schedule { max_runs } => {
            run_scheduled(&pipeline, &schedule, max_runs)?;
        }
        Commands::History { limit } => {
            let conn = pipeline.warehouse().connect()?;
            let events = get_recent_run_events(&conn, limit)?;
            if events.is_empty() {
                println!("No runs recorded yet.");
            }
            for event in events {
                let marker = match event.status {
                    RunStatus::Success => "✓",
                    RunStatus::Failed => "✗",
                };
                println!(
                    "{} {}  {:<24} {:<8} {}  run {}",
                    marker,
                    event.execution_date,
                    event.task,
                    event.status.as_str(),
                    event.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    event.run_id
                );
            }
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n🚌 Run {} for {}", report.run_id, report.execution_date);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for outcome in &report.tasks {
        let elapsed = (outcome.finished_at - outcome.started_at).num_milliseconds();
        match outcome.status {
            RunStatus::Success => println!("✓ {:<24} {:>6} ms", outcome.task, elapsed),
            RunStatus::Failed => println!(
                "✗ {:<24} {:>6} ms  {}",
                outcome.task,
                elapsed,
                outcome.detail["error"].as_str().unwrap_or("")
            ),
        }
    }
    let skipped = Task::ALL.len().saturating_sub(report.tasks.len());
    if !report.succeeded() && skipped > 0 {
        println!("  ({} downstream task(s) not run)", skipped);
    }
}

/// Colored stderr output, plus a daily-rolling JSON file when LOG_FILE_PATH is set
fn init_logging() -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let (json_layer, guard) = match std::env::var("LOG_FILE_PATH") {
        Ok(log_file_path) => {
            let path = PathBuf::from(&log_file_path);
            let log_dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs"));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "transit_cube.log".into());

            let file_appender = tracing_appender::rolling::daily(log_dir, file_name);
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(non_blocking_file)
                .with_filter(
                    EnvFilter::try_from_env("RUST_LOG_JSON")
                        .unwrap_or_else(|_| EnvFilter::new("debug")),
                );
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    guard
}
