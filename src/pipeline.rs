// 🚌 Pipeline - four tasks, straight-line dependency
// init_schemas → load_to_staging → transform_in_warehouse → export_to_csv

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, info_span, warn};

use crate::config::PipelineConfig;
use crate::db::{init_schemas, insert_run_event, RunEvent, RunStatus, Warehouse};
use crate::export::export_to_csv;
use crate::loader::load_to_staging;
use crate::transform::transform_in_warehouse;

// ============================================================================
// TASKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    InitSchemas,
    LoadToStaging,
    TransformInWarehouse,
    ExportToCsv,
}

impl Task {
    /// Execution order; each task needs the previous one to have completed
    pub const ALL: [Task; 4] = [
        Task::InitSchemas,
        Task::LoadToStaging,
        Task::TransformInWarehouse,
        Task::ExportToCsv,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Task::InitSchemas => "init_schemas",
            Task::LoadToStaging => "load_to_staging",
            Task::TransformInWarehouse => "transform_in_warehouse",
            Task::ExportToCsv => "export_to_csv",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Task {
    type Err = anyhow::Error;

    /// Accepts the task name in snake_case or kebab-case, plus short aliases
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().replace('-', "_").as_str() {
            "init_schemas" | "init" => Ok(Task::InitSchemas),
            "load_to_staging" | "load" => Ok(Task::LoadToStaging),
            "transform_in_warehouse" | "transform" => Ok(Task::TransformInWarehouse),
            "export_to_csv" | "export" => Ok(Task::ExportToCsv),
            other => Err(anyhow!("unknown task '{}'", other)),
        }
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task: Task,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Row counts / written files on success, the error chain on failure
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub execution_date: NaiveDate,
    pub tasks: Vec<TaskOutcome>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status == RunStatus::Success)
    }

    pub fn failed_task(&self) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.status == RunStatus::Failed)
    }

    /// Collapse into a Result for callers that only care whether the run passed
    pub fn into_result(self) -> Result<RunReport> {
        if let Some(failed) = self.failed_task() {
            let message = failed.detail["error"].as_str().unwrap_or("unknown error");
            return Err(anyhow!(
                "task {} failed for {}: {}",
                failed.task,
                self.execution_date,
                message
            ));
        }
        Ok(self)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    warehouse: Warehouse,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let warehouse = Warehouse::new(config.warehouse_dir.clone());
        Pipeline { config, warehouse }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Run all four tasks for `execution_date`, stopping at the first failure.
    pub fn run(&self, execution_date: NaiveDate) -> RunReport {
        self.run_tasks(&Task::ALL, execution_date)
    }

    /// Run one task alone (manual rerun of a single step).
    pub fn run_task(&self, task: Task, execution_date: NaiveDate) -> RunReport {
        self.run_tasks(&[task], execution_date)
    }

    fn run_tasks(&self, tasks: &[Task], execution_date: NaiveDate) -> RunReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(%run_id, %execution_date, tasks = tasks.len(), "Pipeline run started");

        let mut report = RunReport {
            run_id,
            execution_date,
            tasks: Vec::with_capacity(tasks.len()),
        };

        for task in tasks {
            let outcome = self.run_one(*task, &report.run_id, execution_date);
            let failed = outcome.status == RunStatus::Failed;
            report.tasks.push(outcome);
            if failed {
                break;
            }
        }

        if report.succeeded() {
            info!(run_id = %report.run_id, %execution_date, "Pipeline run succeeded");
        } else {
            error!(run_id = %report.run_id, %execution_date, "Pipeline run failed");
        }
        report
    }

    fn run_one(&self, task: Task, run_id: &str, execution_date: NaiveDate) -> TaskOutcome {
        let span = info_span!("task", task = task.name(), %execution_date);
        let _enter = span.enter();

        let started_at = Utc::now();
        let (status, detail) = match self.execute(task, execution_date) {
            Ok(detail) => {
                info!("Task {} succeeded", task);
                (RunStatus::Success, detail)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(error = %message, "Task {} failed", task);
                (RunStatus::Failed, serde_json::json!({ "error": message }))
            }
        };

        let event = RunEvent::new(run_id, execution_date, task.name(), status, started_at, detail);
        self.record(&event);

        TaskOutcome {
            task,
            status,
            started_at,
            finished_at: event.finished_at,
            detail: event.detail,
        }
    }

    /// One connection per task, released when the task returns
    fn execute(&self, task: Task, execution_date: NaiveDate) -> Result<serde_json::Value> {
        let mut conn = self.warehouse.connect()?;

        let detail = match task {
            Task::InitSchemas => {
                init_schemas(&conn)?;
                serde_json::json!({})
            }
            Task::LoadToStaging => {
                let stats = load_to_staging(&mut conn, &self.config.input_dir, execution_date)?;
                let files = serde_json::to_value(stats)?;
                serde_json::json!({ "files": files })
            }
            Task::TransformInWarehouse => {
                let stat = transform_in_warehouse(&mut conn, execution_date)?;
                serde_json::to_value(stat)?
            }
            Task::ExportToCsv => {
                let exported = export_to_csv(&conn, &self.config.output_dir, execution_date)?;
                let files = serde_json::to_value(exported)?;
                serde_json::json!({ "files": files })
            }
        };

        Ok(detail)
    }

    /// Run-log writes never fail the run
    fn record(&self, event: &RunEvent) {
        let result = self
            .warehouse
            .connect()
            .and_then(|conn| insert_run_event(&conn, event));
        if let Err(e) = result {
            let message = format!("{:#}", e);
            warn!(error = %message, task = %event.task, "Could not record run event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_order_and_names() {
        let names: Vec<&str> = Task::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "init_schemas",
                "load_to_staging",
                "transform_in_warehouse",
                "export_to_csv"
            ]
        );
    }

    #[test]
    fn test_task_from_str() {
        assert_eq!("init-schemas".parse::<Task>().unwrap(), Task::InitSchemas);
        assert_eq!("load".parse::<Task>().unwrap(), Task::LoadToStaging);
        assert_eq!("transform".parse::<Task>().unwrap(), Task::TransformInWarehouse);
        assert_eq!("export_to_csv".parse::<Task>().unwrap(), Task::ExportToCsv);
        assert!("deploy".parse::<Task>().is_err());
    }

    #[test]
    fn test_failed_load_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            warehouse_dir: dir.path().join("warehouse"),
            input_dir: dir.path().join("missing-input"),
            output_dir: dir.path().join("output"),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(config);
        let date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();

        let report = pipeline.run(date);

        assert!(!report.succeeded());
        assert_eq!(report.tasks.len(), 2, "transform and export must not run");
        assert_eq!(report.tasks[0].status, RunStatus::Success);
        assert_eq!(report.failed_task().unwrap().task, Task::LoadToStaging);
        assert!(!dir.path().join("output").exists());

        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("load_to_staging"));
    }

    #[test]
    fn test_run_is_recorded_in_run_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            warehouse_dir: dir.path().join("warehouse"),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(config);
        let date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();

        let report = pipeline.run_task(Task::InitSchemas, date);
        assert!(report.succeeded());

        let conn = pipeline.warehouse().connect().unwrap();
        let events = crate::db::get_run_events(&conn, &report.run_id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].task, "init_schemas");
        assert_eq!(events[0].status, RunStatus::Success);
    }
}
