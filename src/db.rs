use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, DatabaseName};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::normalize::register_sql_functions;

pub const STAGING_SCHEMA: &str = "staging";
pub const CUBE_SCHEMA: &str = "cube";

/// Warehouse - a directory holding one SQLite file per schema
///
/// Every connection attaches `staging.db` and `cube.db` under their schema
/// names, so SQL addresses tables as `staging.x` / `cube.y`. A transaction
/// touching both files commits atomically per file only.
#[derive(Debug, Clone)]
pub struct Warehouse {
    dir: PathBuf,
}

impl Warehouse {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Warehouse { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Database file backing a schema
    pub fn schema_path(&self, schema: &str) -> PathBuf {
        self.dir.join(format!("{}.db", schema))
    }

    /// Open a fresh connection for one task; dropped when the task ends.
    pub fn connect(&self) -> Result<Connection> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create warehouse directory {}", self.dir.display())
        })?;

        let conn = Connection::open_in_memory().context("Failed to open warehouse connection")?;
        for schema in [STAGING_SCHEMA, CUBE_SCHEMA] {
            let path = self.schema_path(schema);
            attach_schema(&conn, &path.to_string_lossy(), schema)?;
        }
        configure_connection(&conn)?;

        debug!(dir = %self.dir.display(), "Warehouse connection opened");
        Ok(conn)
    }
}

/// Connection with both schemas held in memory (tests and dry runs)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    for schema in [STAGING_SCHEMA, CUBE_SCHEMA] {
        attach_schema(&conn, ":memory:", schema)?;
    }
    configure_connection(&conn)?;
    Ok(conn)
}

fn attach_schema(conn: &Connection, location: &str, schema: &str) -> Result<()> {
    conn.execute(&format!("ATTACH DATABASE ?1 AS {}", schema), [location])
        .with_context(|| format!("Failed to attach schema '{}' from {}", schema, location))?;

    // WAL per file; in-memory attachments silently stay in "memory" mode
    conn.pragma_update(Some(DatabaseName::Attached(schema)), "journal_mode", "WAL")?;
    Ok(())
}

fn configure_connection(conn: &Connection) -> Result<()> {
    // Runs for different dates may overlap; wait on the writer lock instead of failing
    conn.busy_timeout(Duration::from_secs(30))?;
    register_sql_functions(conn).context("Failed to register SQL functions")?;
    Ok(())
}

// ============================================================================
// SCHEMA INITIALIZER
// ============================================================================

/// Create every staging and cube table if absent. Never drops or alters anything.
pub fn init_schemas(conn: &Connection) -> Result<()> {
    // ==========================================================================
    // Staging: raw file tables
    // ==========================================================================
    info!("Creating staging tables if not exists...");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staging.routes (
            route_code TEXT NULL,
            route_name TEXT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staging.realisasi_bus (
            tanggal_realisasi TEXT NULL,
            bus_body_no TEXT NULL,
            rute_realisasi TEXT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staging.shelter_corridor (
            shelter_name_var TEXT NULL,
            corridor_code TEXT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staging.transaksi_bus (
            uuid TEXT NULL,
            waktu_transaksi TEXT NULL,
            armada_id_var TEXT NULL,
            no_body_var TEXT NULL,
            card_number_var INTEGER NULL,
            card_type_var TEXT NULL,
            balance_before_int INTEGER NULL,
            fare_int INTEGER NULL,
            balance_after_int INTEGER NULL,
            transcode_txt TEXT NULL,
            gate_in_boo INTEGER NULL,
            p_latitude_flo REAL NULL,
            p_longitude_flo REAL NULL,
            status_var TEXT NULL,
            free_service_boo INTEGER NULL,
            insert_on_dtm TEXT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staging.transaksi_halte (
            uuid TEXT NULL,
            waktu_transaksi TEXT NULL,
            shelter_name_var TEXT NULL,
            terminal_name_var TEXT NULL,
            card_number_var INTEGER NULL,
            card_type_var TEXT NULL,
            balance_before_int INTEGER NULL,
            fare_int INTEGER NULL,
            balance_after_int INTEGER NULL,
            transcode_txt TEXT NULL,
            gate_in_boo INTEGER NULL,
            p_latitude_flo REAL NULL,
            p_longitude_flo REAL NULL,
            status_var TEXT NULL,
            free_service_boo INTEGER NULL,
            insert_on_dtm TEXT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Staging: unified, deduplicated transactions
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS staging.union_transaksi (
            uuid TEXT NULL,
            waktu_transaksi TEXT NULL,
            armada_id_var TEXT NULL,
            no_body_var TEXT NULL,
            shelter_name_var TEXT NULL,
            terminal_name_var TEXT NULL,
            card_number_var INTEGER NULL,
            card_type_var TEXT NULL,
            balance_before_int INTEGER NULL,
            fare_int INTEGER NULL,
            balance_after_int INTEGER NULL,
            transcode_txt TEXT NULL,
            gate_in_boo INTEGER NULL,
            p_latitude_flo REAL NULL,
            p_longitude_flo REAL NULL,
            status_var TEXT NULL,
            free_service_boo INTEGER NULL,
            insert_on_dtm TEXT NULL,
            route_code TEXT NULL,
            route_name TEXT NULL,
            transaction_source TEXT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Run log (audit trail: one row per executed task)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS staging.pipeline_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            run_id TEXT NOT NULL,
            execution_date TEXT NOT NULL,
            task TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            detail TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Cube tables
    // ==========================================================================
    info!("Creating cube tables if not exists...");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cube.agg_by_card_type (
            waktu_transaksi TEXT NULL,
            card_type_var TEXT NULL,
            gate_in_boo INTEGER NULL,
            jumlah_pelanggan INTEGER NULL,
            jumlah_amount INTEGER NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cube.agg_by_route (
            waktu_transaksi TEXT NULL,
            route_code TEXT NULL,
            route_name TEXT NULL,
            gate_in_boo INTEGER NULL,
            jumlah_pelanggan INTEGER NULL,
            jumlah_amount INTEGER NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cube.agg_by_tarif (
            waktu_transaksi TEXT NULL,
            fare_int INTEGER NULL,
            gate_in_boo INTEGER NULL,
            jumlah_pelanggan INTEGER NULL,
            jumlah_amount INTEGER NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS staging.idx_realisasi_bus_date ON realisasi_bus(tanggal_realisasi)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS staging.idx_union_transaksi_date ON union_transaksi(waktu_transaksi)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS staging.idx_pipeline_runs_date ON pipeline_runs(execution_date)",
        [],
    )?;

    for table in ["agg_by_card_type", "agg_by_route", "agg_by_tarif"] {
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS cube.idx_{table}_date ON {table}(waktu_transaksi)"
            ),
            [],
        )?;
    }

    info!("Schemas 'staging' and 'cube' and tables in them are ready.");
    Ok(())
}

/// Row count of a schema-qualified table, optionally restricted to one date
pub fn count_rows(
    conn: &Connection,
    table: &str,
    date_column: Option<&str>,
    date: NaiveDate,
) -> Result<i64> {
    let count = match date_column {
        Some(column) => conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE date({}) = ?1", table, column),
            [date],
            |row| row.get(0),
        )?,
        None => conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?,
    };
    Ok(count)
}

// ============================================================================
// RUN LOG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One executed task of one pipeline run ("every run is an event")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub event_id: String,
    pub run_id: String,
    pub execution_date: NaiveDate,
    pub task: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub detail: serde_json::Value,
}

impl RunEvent {
    pub fn new(
        run_id: &str,
        execution_date: NaiveDate,
        task: &str,
        status: RunStatus,
        started_at: DateTime<Utc>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            execution_date,
            task: task.to_string(),
            status,
            started_at,
            finished_at: Utc::now(),
            detail,
        }
    }
}

pub fn insert_run_event(conn: &Connection, event: &RunEvent) -> Result<()> {
    let detail_json = serde_json::to_string(&event.detail)?;

    conn.execute(
        "INSERT INTO staging.pipeline_runs (
            event_id, run_id, execution_date, task, status, started_at, finished_at, detail
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.event_id,
            event.run_id,
            event.execution_date,
            event.task,
            event.status.as_str(),
            event.started_at.to_rfc3339(),
            event.finished_at.to_rfc3339(),
            detail_json,
        ],
    )?;

    Ok(())
}

/// Most recent run-log rows, newest first
pub fn get_recent_run_events(conn: &Connection, limit: usize) -> Result<Vec<RunEvent>> {
    query_run_events(
        conn,
        "SELECT event_id, run_id, execution_date, task, status, started_at, finished_at, detail
         FROM staging.pipeline_runs
         ORDER BY id DESC
         LIMIT ?1",
        params![limit as i64],
    )
}

/// All tasks recorded for a run, in execution order
pub fn get_run_events(conn: &Connection, run_id: &str) -> Result<Vec<RunEvent>> {
    query_run_events(
        conn,
        "SELECT event_id, run_id, execution_date, task, status, started_at, finished_at, detail
         FROM staging.pipeline_runs
         WHERE run_id = ?1
         ORDER BY id ASC",
        params![run_id],
    )
}

fn query_run_events(
    conn: &Connection,
    sql: &str,
    query_params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<RunEvent>> {
    let mut stmt = conn.prepare(sql)?;

    let events = stmt
        .query_map(query_params, |row| {
            let status_str: String = row.get(4)?;
            let started_str: String = row.get(5)?;
            let finished_str: String = row.get(6)?;
            let detail_json: String = row.get(7)?;

            Ok(RunEvent {
                event_id: row.get(0)?,
                run_id: row.get(1)?,
                execution_date: row.get(2)?,
                task: row.get(3)?,
                status: RunStatus::parse(&status_str).ok_or(rusqlite::Error::InvalidQuery)?,
                started_at: parse_rfc3339(&started_str)?,
                finished_at: parse_rfc3339(&finished_str)?,
                detail: serde_json::from_str(&detail_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

fn parse_rfc3339(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)
}
