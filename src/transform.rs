// 🔄 Transform & Aggregate - runs entirely as SQL inside the warehouse
// union (status 'S' only) → normalize no_body_var → dedup → three cube aggregates

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

// ============================================================================
// CUBE TABLES
// ============================================================================

/// CubeTable - the three aggregate tables, each keyed by date + dimensions + gate_in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CubeTable {
    ByCardType,
    ByRoute,
    ByTarif,
}

impl CubeTable {
    pub const ALL: [CubeTable; 3] = [CubeTable::ByCardType, CubeTable::ByRoute, CubeTable::ByTarif];

    /// Table name inside the `cube` schema (also the export file stem)
    pub fn table(&self) -> &'static str {
        match self {
            CubeTable::ByCardType => "agg_by_card_type",
            CubeTable::ByRoute => "agg_by_route",
            CubeTable::ByTarif => "agg_by_tarif",
        }
    }

    /// Grouping dimensions between the date and gate_in
    pub fn dimensions(&self) -> &'static [&'static str] {
        match self {
            CubeTable::ByCardType => &["card_type_var"],
            CubeTable::ByRoute => &["route_code", "route_name"],
            CubeTable::ByTarif => &["fare_int"],
        }
    }

    /// Full grouping key, in column order
    pub fn key_columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["waktu_transaksi"];
        columns.extend_from_slice(self.dimensions());
        columns.push("gate_in_boo");
        columns
    }

    fn aggregate_sql(&self) -> String {
        let key = self.key_columns().join(", ");
        format!(
            "INSERT INTO cube.{table} ({key}, jumlah_pelanggan, jumlah_amount)
             SELECT {key}, COUNT(*), COALESCE(SUM(fare_int), 0)
             FROM staging.union_transaksi
             WHERE waktu_transaksi = ?1
             GROUP BY {key}",
            table = self.table(),
            key = key,
        )
    }
}

// ============================================================================
// SQL
// ============================================================================

/// Columns of `staging.union_transaksi` that identify a transaction.
/// `insert_on_dtm` is an ingestion stamp and is excluded; the earliest one is kept.
const TRANSACTION_COLUMNS: &str = "uuid, waktu_transaksi, armada_id_var, no_body_var, \
    shelter_name_var, terminal_name_var, card_number_var, card_type_var, \
    balance_before_int, fare_int, balance_after_int, transcode_txt, gate_in_boo, \
    p_latitude_flo, p_longitude_flo, status_var, free_service_boo, \
    route_code, route_name, transaction_source";

const DELETE_UNION_SQL: &str = "DELETE FROM staging.union_transaksi WHERE waktu_transaksi = ?1";

/// Each transaction resolves to at most one route: lookups that match several
/// rows take the smallest code, so a tap never fans out into extra union rows.
fn union_insert_sql() -> String {
    format!(
        "WITH union_trx AS (
            SELECT
                dtb.uuid,
                date(dtb.waktu_transaksi) AS waktu_transaksi,
                dtb.armada_id_var,
                normalize_body_no(dtb.no_body_var) AS no_body_var,
                NULL AS shelter_name_var,
                NULL AS terminal_name_var,
                dtb.card_number_var,
                dtb.card_type_var,
                dtb.balance_before_int,
                dtb.fare_int,
                dtb.balance_after_int,
                dtb.transcode_txt,
                dtb.gate_in_boo,
                dtb.p_latitude_flo,
                dtb.p_longitude_flo,
                dtb.status_var,
                dtb.free_service_boo,
                dtb.insert_on_dtm,
                (
                    SELECT MIN(drb.rute_realisasi)
                    FROM staging.realisasi_bus drb
                    WHERE drb.tanggal_realisasi = date(dtb.waktu_transaksi)
                        AND normalize_body_no(drb.bus_body_no) = normalize_body_no(dtb.no_body_var)
                ) AS route_code,
                'BUS' AS transaction_source
            FROM staging.transaksi_bus dtb
            WHERE dtb.status_var = 'S' AND date(dtb.waktu_transaksi) = ?1
            UNION ALL
            SELECT
                dth.uuid,
                date(dth.waktu_transaksi) AS waktu_transaksi,
                NULL AS armada_id_var,
                NULL AS no_body_var,
                dth.shelter_name_var,
                dth.terminal_name_var,
                dth.card_number_var,
                dth.card_type_var,
                dth.balance_before_int,
                dth.fare_int,
                dth.balance_after_int,
                dth.transcode_txt,
                dth.gate_in_boo,
                dth.p_latitude_flo,
                dth.p_longitude_flo,
                dth.status_var,
                dth.free_service_boo,
                dth.insert_on_dtm,
                (
                    SELECT MIN(dsc.corridor_code)
                    FROM staging.shelter_corridor dsc
                    WHERE dsc.shelter_name_var = dth.shelter_name_var
                ) AS route_code,
                'HALTE' AS transaction_source
            FROM staging.transaksi_halte dth
            WHERE dth.status_var = 'S' AND date(dth.waktu_transaksi) = ?1
        ),
        routed_trx AS (
            SELECT
                union_trx.*,
                (
                    SELECT MIN(dr.route_name)
                    FROM staging.routes dr
                    WHERE dr.route_code = union_trx.route_code
                ) AS route_name
            FROM union_trx
        )
        INSERT INTO staging.union_transaksi ({cols}, insert_on_dtm)
        SELECT {cols}, MIN(insert_on_dtm)
        FROM routed_trx
        GROUP BY {cols}",
        cols = TRANSACTION_COLUMNS
    )
}

// ============================================================================
// TRANSFORM
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CubeStat {
    pub table: String,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformStat {
    /// Deduplicated rows in `staging.union_transaksi` for the date
    pub union_rows: usize,
    pub cubes: Vec<CubeStat>,
}

/// Rebuild `staging.union_transaksi` and the three cubes for `execution_date`.
///
/// One transaction. Commits are atomic per schema file (`staging.db`, `cube.db`),
/// not across both; a rerun for the same date repairs a torn commit.
pub fn transform_in_warehouse(
    conn: &mut Connection,
    execution_date: NaiveDate,
) -> Result<TransformStat> {
    info!(%execution_date, "Starting transformation in warehouse...");
    let tx = conn.transaction()?;

    let removed = tx
        .execute(DELETE_UNION_SQL, [execution_date])
        .context("Failed to clear staging.union_transaksi")?;
    let union_rows = tx
        .execute(&union_insert_sql(), [execution_date])
        .context("Failed to build staging.union_transaksi")?;
    debug!(removed, inserted = union_rows, "Rebuilt staging.union_transaksi");
    info!("Transformation complete. Created staging.union_transaksi.");

    let mut cubes = Vec::with_capacity(CubeTable::ALL.len());
    for cube in CubeTable::ALL {
        tx.execute(
            &format!("DELETE FROM cube.{} WHERE waktu_transaksi = ?1", cube.table()),
            [execution_date],
        )
        .with_context(|| format!("Failed to clear cube.{}", cube.table()))?;

        let rows = tx
            .execute(&cube.aggregate_sql(), [execution_date])
            .with_context(|| format!("Failed to aggregate cube.{}", cube.table()))?;

        info!(rows, "Transformation complete. Created cube.{}.", cube.table());
        cubes.push(CubeStat {
            table: cube.table().to_string(),
            rows,
        });
    }

    tx.commit().context("Failed to commit transformation")?;

    info!(
        %execution_date,
        union_rows,
        "Transformation complete. Aggregated data updated in cube schema."
    );
    Ok(TransformStat { union_rows, cubes })
}
