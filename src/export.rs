// 📤 Cube Export - one CSV per cube table for the execution date
// Files are named <table>_<YYYYMMDD>.csv and overwritten on rerun

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::{QuoteStyle, WriterBuilder};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::transform::CubeTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardTypeRow {
    pub waktu_transaksi: NaiveDate,
    pub card_type_var: Option<String>,
    pub gate_in_boo: Option<bool>,
    pub jumlah_pelanggan: i64,
    pub jumlah_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRow {
    pub waktu_transaksi: NaiveDate,
    pub route_code: Option<String>,
    pub route_name: Option<String>,
    pub gate_in_boo: Option<bool>,
    pub jumlah_pelanggan: i64,
    pub jumlah_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TarifRow {
    pub waktu_transaksi: NaiveDate,
    pub fare_int: Option<i64>,
    pub gate_in_boo: Option<bool>,
    pub jumlah_pelanggan: i64,
    pub jumlah_amount: i64,
}

/// One written export file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFile {
    pub table: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// `agg_by_route` + 2025-07-01 → `agg_by_route_20250701.csv`
pub fn export_file_name(cube: CubeTable, execution_date: NaiveDate) -> String {
    format!("{}_{}.csv", cube.table(), execution_date.format("%Y%m%d"))
}

/// Write the three cube tables for `execution_date` into `output_dir`.
pub fn export_to_csv(
    conn: &Connection,
    output_dir: &Path,
    execution_date: NaiveDate,
) -> Result<Vec<ExportedFile>> {
    info!(%execution_date, "Exporting aggregated data to CSV...");
    std::fs::create_dir_all(output_dir).with_context(|| {
        format!("Failed to create output directory {}", output_dir.display())
    })?;

    let mut exported = Vec::with_capacity(CubeTable::ALL.len());
    for cube in CubeTable::ALL {
        let path = output_dir.join(export_file_name(cube, execution_date));
        info!(path = %path.display(), "Exporting cube.{}", cube.table());

        let header = export_header(cube);
        let rows = match cube {
            CubeTable::ByCardType => {
                write_rows(&path, &header, &get_card_type_rows(conn, execution_date)?)?
            }
            CubeTable::ByRoute => {
                write_rows(&path, &header, &get_route_rows(conn, execution_date)?)?
            }
            CubeTable::ByTarif => {
                write_rows(&path, &header, &get_tarif_rows(conn, execution_date)?)?
            }
        };

        exported.push(ExportedFile {
            table: cube.table().to_string(),
            path,
            rows,
        });
    }

    info!(%execution_date, "All CSV exports complete.");
    Ok(exported)
}

fn write_rows<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::NonNumeric)
        .from_writer(file);

    // Header is written explicitly so empty exports still carry it
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = rows.len(), "CSV written");
    Ok(rows.len())
}

/// Header row: grouping key columns followed by the two measures
pub fn export_header(cube: CubeTable) -> Vec<&'static str> {
    let mut header = cube.key_columns();
    header.extend(["jumlah_pelanggan", "jumlah_amount"]);
    header
}

// ============================================================================
// CUBE READERS
// ============================================================================

pub fn get_card_type_rows(conn: &Connection, execution_date: NaiveDate) -> Result<Vec<CardTypeRow>> {
    let mut stmt = conn.prepare(
        "SELECT waktu_transaksi, card_type_var, gate_in_boo, jumlah_pelanggan, jumlah_amount
         FROM cube.agg_by_card_type
         WHERE waktu_transaksi = ?1
         ORDER BY card_type_var, gate_in_boo",
    )?;

    let rows = stmt
        .query_map([execution_date], |row| {
            Ok(CardTypeRow {
                waktu_transaksi: row.get(0)?,
                card_type_var: row.get(1)?,
                gate_in_boo: row.get(2)?,
                jumlah_pelanggan: row.get(3)?,
                jumlah_amount: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn get_route_rows(conn: &Connection, execution_date: NaiveDate) -> Result<Vec<RouteRow>> {
    let mut stmt = conn.prepare(
        "SELECT waktu_transaksi, route_code, route_name, gate_in_boo, jumlah_pelanggan, jumlah_amount
         FROM cube.agg_by_route
         WHERE waktu_transaksi = ?1
         ORDER BY route_code, route_name, gate_in_boo",
    )?;

    let rows = stmt
        .query_map([execution_date], |row| {
            Ok(RouteRow {
                waktu_transaksi: row.get(0)?,
                route_code: row.get(1)?,
                route_name: row.get(2)?,
                gate_in_boo: row.get(3)?,
                jumlah_pelanggan: row.get(4)?,
                jumlah_amount: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn get_tarif_rows(conn: &Connection, execution_date: NaiveDate) -> Result<Vec<TarifRow>> {
    let mut stmt = conn.prepare(
        "SELECT waktu_transaksi, fare_int, gate_in_boo, jumlah_pelanggan, jumlah_amount
         FROM cube.agg_by_tarif
         WHERE waktu_transaksi = ?1
         ORDER BY fare_int, gate_in_boo",
    )?;

    let rows = stmt
        .query_map([execution_date], |row| {
            Ok(TarifRow {
                waktu_transaksi: row.get(0)?,
                fare_int: row.get(1)?,
                gate_in_boo: row.get(2)?,
                jumlah_pelanggan: row.get(3)?,
                jumlah_amount: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}
