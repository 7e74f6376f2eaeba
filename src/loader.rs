// 📂 CSV Loader - input files → staging tables
// Delete-then-insert per execution date; each file is its own transaction

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::records::{
    BusTransactionRecord, HalteTransactionRecord, RealisasiBusRecord, RouteRecord,
    ShelterCorridorRecord, SourceFile, StagingRecord,
};

/// Outcome of loading one input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLoadStat {
    pub file: String,
    pub table: String,
    /// Rows parsed from the file
    pub rows_read: usize,
    /// Rows written to staging (dated files keep only the execution date)
    pub rows_inserted: usize,
    /// Rows removed before inserting
    pub rows_replaced: usize,
}

/// Load all five input files for `execution_date`.
///
/// Files are committed one at a time: a failure leaves earlier files loaded.
pub fn load_to_staging(
    conn: &mut Connection,
    input_dir: &Path,
    execution_date: NaiveDate,
) -> Result<Vec<FileLoadStat>> {
    info!(%execution_date, input_dir = %input_dir.display(), "Starting load to staging...");

    let mut stats = Vec::with_capacity(SourceFile::ALL.len());
    for source in SourceFile::ALL {
        let stat = match source {
            SourceFile::Routes => load_file::<RouteRecord>(conn, input_dir, execution_date)?,
            SourceFile::RealisasiBus => {
                load_file::<RealisasiBusRecord>(conn, input_dir, execution_date)?
            }
            SourceFile::ShelterCorridor => {
                load_file::<ShelterCorridorRecord>(conn, input_dir, execution_date)?
            }
            SourceFile::TransaksiBus => {
                load_file::<BusTransactionRecord>(conn, input_dir, execution_date)?
            }
            SourceFile::TransaksiHalte => {
                load_file::<HalteTransactionRecord>(conn, input_dir, execution_date)?
            }
        };
        info!(
            file = %stat.file,
            table = %stat.table,
            rows_read = stat.rows_read,
            rows_inserted = stat.rows_inserted,
            "Loaded {} to staging.{}",
            stat.file,
            stat.table
        );
        stats.push(stat);
    }

    info!("All CSVs loaded to staging.");
    Ok(stats)
}

/// Parse every row of one source file; the first bad row fails the whole file
pub fn read_records<R: StagingRecord>(path: &Path) -> Result<Vec<R>> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();
    for column in R::SOURCE.columns() {
        if !headers.iter().any(|h| h == *column) {
            bail!(
                "Missing required column '{}' in {}",
                column,
                path.display()
            );
        }
    }

    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: R = result.with_context(|| {
            format!("Malformed row in {}", path.display())
        })?;
        records.push(record);
    }

    Ok(records)
}

fn load_file<R: StagingRecord>(
    conn: &mut Connection,
    input_dir: &Path,
    execution_date: NaiveDate,
) -> Result<FileLoadStat> {
    let source = R::SOURCE;
    let path = input_dir.join(source.file_name());
    debug!(path = %path.display(), "Reading source file");

    let records: Vec<R> = read_records(&path)?;
    let rows_read = records.len();

    let tx = conn.transaction()?;

    let rows_replaced = match source.date_column() {
        Some(column) => tx.execute(
            &format!(
                "DELETE FROM staging.{} WHERE date({}) = ?1",
                source.table(),
                column
            ),
            [execution_date],
        )?,
        None => tx.execute(&format!("DELETE FROM staging.{}", source.table()), [])?,
    };

    let mut rows_inserted = 0;
    {
        let mut stmt = tx.prepare(&source.insert_sql())?;
        for record in &records {
            let in_scope = match record.business_date() {
                Some(date) => date == execution_date,
                None => true,
            };
            if !in_scope {
                continue;
            }
            record
                .insert(&mut stmt)
                .with_context(|| format!("Failed to insert into staging.{}", source.table()))?;
            rows_inserted += 1;
        }
    }

    tx.commit()
        .with_context(|| format!("Failed to commit load of {}", source.file_name()))?;

    Ok(FileLoadStat {
        file: source.file_name().to_string(),
        table: source.table().to_string(),
        rows_read,
        rows_inserted,
        rows_replaced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, init_schemas, open_in_memory};
    use std::fs;

    const BUS_HEADER: &str = "uuid,waktu_transaksi,armada_id_var,no_body_var,card_number_var,card_type_var,balance_before_int,fare_int,balance_after_int,transcode_txt,gate_in_boo,p_latitude_flo,p_longitude_flo,status_var,free_service_boo,insert_on_dtm";
    const HALTE_HEADER: &str = "uuid,waktu_transaksi,shelter_name_var,terminal_name_var,card_number_var,card_type_var,balance_before_int,fare_int,balance_after_int,transcode_txt,gate_in_boo,p_latitude_flo,p_longitude_flo,status_var,free_service_boo,insert_on_dtm";

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, d).unwrap()
    }

    /// Write a full input set where bus rows span two days
    fn write_inputs(dir: &Path) {
        fs::write(
            dir.join("dummy_routes.csv"),
            "route_code,route_name\nR1,Blok M - Kota\nR2,Pulogadung - Harmoni\n",
        )
        .unwrap();
        fs::write(
            dir.join("dummy_realisasi_bus.csv"),
            "tanggal_realisasi,bus_body_no,rute_realisasi\n2025-07-01,ABC123,R1\n2025-07-02,ABC123,R2\n",
        )
        .unwrap();
        fs::write(
            dir.join("dummy_shelter_corridor.csv"),
            "shelter_name_var,corridor_code\nHalte Senen,2\n",
        )
        .unwrap();
        fs::write(
            dir.join("dummy_transaksi_bus.csv"),
            format!(
                "{}\n{}\n{}\n",
                BUS_HEADER,
                "b1,2025-07-01 08:00:00,ARM1,ABC123,111,A,10000,3500,6500,TX,true,-6.2,106.8,S,false,2025-07-01 08:00:01",
                "b2,2025-07-02 08:00:00,ARM1,ABC123,112,A,10000,3500,6500,TX,true,-6.2,106.8,S,false,2025-07-02 08:00:01",
            ),
        )
        .unwrap();
        fs::write(
            dir.join("dummy_transaksi_halte.csv"),
            format!(
                "{}\n{}\n",
                HALTE_HEADER,
                "h1,2025-07-01 09:00:00,Halte Senen,T1,221,B,5000,3500,1500,TX,false,-6.1,106.9,S,false,2025-07-01 09:00:01",
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_load_scopes_dated_tables_to_execution_date() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());

        let mut conn = open_in_memory().unwrap();
        init_schemas(&conn).unwrap();

        let stats = load_to_staging(&mut conn, dir.path(), date(1)).unwrap();
        assert_eq!(stats.len(), 5);

        let bus = stats.iter().find(|s| s.table == "transaksi_bus").unwrap();
        assert_eq!(bus.rows_read, 2);
        assert_eq!(bus.rows_inserted, 1);

        assert_eq!(count_rows(&conn, "staging.routes", None, date(1)).unwrap(), 2);
        assert_eq!(
            count_rows(&conn, "staging.transaksi_bus", None, date(1)).unwrap(),
            1
        );
    }

    #[test]
    fn test_reload_same_date_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());

        let mut conn = open_in_memory().unwrap();
        init_schemas(&conn).unwrap();

        load_to_staging(&mut conn, dir.path(), date(1)).unwrap();
        let second = load_to_staging(&mut conn, dir.path(), date(1)).unwrap();

        let bus = second.iter().find(|s| s.table == "transaksi_bus").unwrap();
        assert_eq!(bus.rows_replaced, 1);
        assert_eq!(
            count_rows(&conn, "staging.transaksi_bus", Some("waktu_transaksi"), date(1)).unwrap(),
            1
        );
        assert_eq!(count_rows(&conn, "staging.routes", None, date(1)).unwrap(), 2);
    }

    #[test]
    fn test_other_dates_survive_a_load() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());

        let mut conn = open_in_memory().unwrap();
        init_schemas(&conn).unwrap();

        load_to_staging(&mut conn, dir.path(), date(1)).unwrap();
        load_to_staging(&mut conn, dir.path(), date(2)).unwrap();

        assert_eq!(
            count_rows(&conn, "staging.transaksi_bus", Some("waktu_transaksi"), date(1)).unwrap(),
            1
        );
        assert_eq!(
            count_rows(&conn, "staging.transaksi_bus", Some("waktu_transaksi"), date(2)).unwrap(),
            1
        );
        assert_eq!(
            count_rows(&conn, "staging.realisasi_bus", Some("tanggal_realisasi"), date(1)).unwrap(),
            1
        );
    }

    #[test]
    fn test_missing_column_aborts_file() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        fs::write(dir.path().join("dummy_routes.csv"), "route_code\nR1\n").unwrap();

        let mut conn = open_in_memory().unwrap();
        init_schemas(&conn).unwrap();

        let err = load_to_staging(&mut conn, dir.path(), date(1)).unwrap_err();
        assert!(format!("{:#}", err).contains("route_name"));
    }

    #[test]
    fn test_earlier_files_stay_loaded_when_later_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        fs::write(
            dir.path().join("dummy_transaksi_halte.csv"),
            format!("{}\nh1,not-a-time,Halte Senen,T1,221,B,5000,3500,1500,TX,false,-6.1,106.9,S,false,x\n", HALTE_HEADER),
        )
        .unwrap();

        let mut conn = open_in_memory().unwrap();
        init_schemas(&conn).unwrap();

        let err = load_to_staging(&mut conn, dir.path(), date(1)).unwrap_err();
        assert!(format!("{:#}", err).contains("Malformed row"));

        assert_eq!(
            count_rows(&conn, "staging.transaksi_bus", None, date(1)).unwrap(),
            1,
            "Bus file was committed before the halte file failed"
        );
        assert_eq!(
            count_rows(&conn, "staging.transaksi_halte", None, date(1)).unwrap(),
            0
        );
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();

        let mut conn = open_in_memory().unwrap();
        init_schemas(&conn).unwrap();

        let err = load_to_staging(&mut conn, dir.path(), date(1)).unwrap_err();
        assert!(format!("{:#}", err).contains("dummy_routes.csv"));
    }
}
