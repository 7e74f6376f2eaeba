use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use transit_cube::{
    get_card_type_rows, get_route_rows, get_tarif_rows, CardTypeRow, CubeTable, Pipeline,
    PipelineConfig, Task,
};

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/input")
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, d).unwrap()
}

fn pipeline_for(workdir: &TempDir, input_dir: PathBuf) -> Pipeline {
    Pipeline::new(PipelineConfig {
        warehouse_dir: workdir.path().join("warehouse"),
        input_dir,
        output_dir: workdir.path().join("output"),
        ..PipelineConfig::default()
    })
}

fn read_exports(output_dir: &Path, execution_date: NaiveDate) -> Vec<(String, Vec<u8>)> {
    CubeTable::ALL
        .iter()
        .map(|cube| {
            let name = transit_cube::export_file_name(*cube, execution_date);
            let bytes = fs::read(output_dir.join(&name)).unwrap();
            (name, bytes)
        })
        .collect()
}

#[test]
fn test_full_pipeline_is_idempotent() {
    let workdir = TempDir::new().unwrap();
    let pipeline = pipeline_for(&workdir, fixtures_dir());
    let output_dir = workdir.path().join("output");

    let first = pipeline.run(date(1));
    assert!(first.succeeded(), "first run failed: {:?}", first.failed_task());
    assert_eq!(first.tasks.len(), Task::ALL.len());
    let first_exports = read_exports(&output_dir, date(1));

    let conn = pipeline.warehouse().connect().unwrap();
    let first_cube = get_route_rows(&conn, date(1)).unwrap();
    drop(conn);

    let second = pipeline.run(date(1));
    assert!(second.succeeded());
    let second_exports = read_exports(&output_dir, date(1));

    let conn = pipeline.warehouse().connect().unwrap();
    let second_cube = get_route_rows(&conn, date(1)).unwrap();

    assert_eq!(first_exports, second_exports, "exports must be byte-identical");
    assert_eq!(first_cube, second_cube);
}

#[test]
fn test_card_type_cube_contents() {
    let workdir = TempDir::new().unwrap();
    let pipeline = pipeline_for(&workdir, fixtures_dir());
    assert!(pipeline.run(date(1)).succeeded());

    let conn = pipeline.warehouse().connect().unwrap();
    let rows = get_card_type_rows(&conn, date(1)).unwrap();

    let expected = vec![
        CardTypeRow {
            waktu_transaksi: date(1),
            card_type_var: Some("A".to_string()),
            gate_in_boo: Some(true),
            jumlah_pelanggan: 3,
            jumlah_amount: 9000,
        },
        CardTypeRow {
            waktu_transaksi: date(1),
            card_type_var: Some("B".to_string()),
            gate_in_boo: Some(false),
            jumlah_pelanggan: 1,
            jumlah_amount: 3500,
        },
        CardTypeRow {
            waktu_transaksi: date(1),
            card_type_var: Some("C".to_string()),
            gate_in_boo: Some(true),
            jumlah_pelanggan: 1,
            jumlah_amount: 0,
        },
    ];
    assert_eq!(rows, expected);
}

#[test]
fn test_routes_resolved_for_both_sources() {
    let workdir = TempDir::new().unwrap();
    let pipeline = pipeline_for(&workdir, fixtures_dir());
    assert!(pipeline.run(date(1)).succeeded());

    let conn = pipeline.warehouse().connect().unwrap();
    let rows = get_route_rows(&conn, date(1)).unwrap();

    let summary: Vec<(Option<String>, Option<bool>, i64, i64)> = rows
        .into_iter()
        .map(|r| (r.route_code, r.gate_in_boo, r.jumlah_pelanggan, r.jumlah_amount))
        .collect();
    assert_eq!(
        summary,
        vec![
            (Some("2".to_string()), Some(true), 2, 5500),
            (Some("R1".to_string()), Some(false), 1, 3500),
            (Some("R1".to_string()), Some(true), 2, 3500),
        ]
    );
}

#[test]
fn test_cube_totals_match_deduplicated_staging() {
    let workdir = TempDir::new().unwrap();
    let pipeline = pipeline_for(&workdir, fixtures_dir());
    assert!(pipeline.run(date(1)).succeeded());

    let conn = pipeline.warehouse().connect().unwrap();
    let staged: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM staging.union_transaksi WHERE waktu_transaksi = ?1",
            [date(1)],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(staged, 5, "b1 duplicate collapsed, b4/h3 filtered, b5 other date");

    let by_card: i64 = get_card_type_rows(&conn, date(1))
        .unwrap()
        .iter()
        .map(|r| r.jumlah_pelanggan)
        .sum();
    let by_route: i64 = get_route_rows(&conn, date(1))
        .unwrap()
        .iter()
        .map(|r| r.jumlah_pelanggan)
        .sum();
    let by_tarif: i64 = get_tarif_rows(&conn, date(1))
        .unwrap()
        .iter()
        .map(|r| r.jumlah_pelanggan)
        .sum();

    assert_eq!(by_card, staged);
    assert_eq!(by_route, staged);
    assert_eq!(by_tarif, staged);

    let not_successful: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM staging.union_transaksi WHERE status_var != 'S'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(not_successful, 0);
}

#[test]
fn test_single_duplicated_bus_transaction() {
    let input = TempDir::new().unwrap();
    for file in ["dummy_routes.csv", "dummy_realisasi_bus.csv", "dummy_shelter_corridor.csv"] {
        fs::copy(fixtures_dir().join(file), input.path().join(file)).unwrap();
    }
    let bus_row = "t1,2025-07-01 07:00:00,ARM01,ABC123,9001,A,10000,3500,6500,TX,true,,,S,false,2025-07-01 07:00:01";
    fs::write(
        input.path().join("dummy_transaksi_bus.csv"),
        format!(
            "uuid,waktu_transaksi,armada_id_var,no_body_var,card_number_var,card_type_var,balance_before_int,fare_int,balance_after_int,transcode_txt,gate_in_boo,p_latitude_flo,p_longitude_flo,status_var,free_service_boo,insert_on_dtm\n{}\n{}\n",
            bus_row, bus_row
        ),
    )
    .unwrap();
    fs::write(
        input.path().join("dummy_transaksi_halte.csv"),
        "uuid,waktu_transaksi,shelter_name_var,terminal_name_var,card_number_var,card_type_var,balance_before_int,fare_int,balance_after_int,transcode_txt,gate_in_boo,p_latitude_flo,p_longitude_flo,status_var,free_service_boo,insert_on_dtm\n",
    )
    .unwrap();

    let workdir = TempDir::new().unwrap();
    let pipeline = pipeline_for(&workdir, input.path().to_path_buf());
    let report = pipeline.run(date(1));
    assert!(report.succeeded(), "{:?}", report.failed_task());

    let conn = pipeline.warehouse().connect().unwrap();
    let rows = get_card_type_rows(&conn, date(1)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].card_type_var.as_deref(), Some("A"));
    assert_eq!(rows[0].jumlah_pelanggan, 1);
    assert_eq!(rows[0].jumlah_amount, 3500);

    let (body, route): (String, String) = conn
        .query_row(
            "SELECT no_body_var, route_code FROM staging.union_transaksi",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(body, "ABC-123");
    assert_eq!(route, "R1");
}

#[test]
fn test_runs_for_different_dates_do_not_interfere() {
    let workdir = TempDir::new().unwrap();
    let pipeline = pipeline_for(&workdir, fixtures_dir());

    assert!(pipeline.run(date(1)).succeeded());
    let conn = pipeline.warehouse().connect().unwrap();
    let before = get_tarif_rows(&conn, date(1)).unwrap();
    drop(conn);

    assert!(pipeline.run(date(2)).succeeded());

    let conn = pipeline.warehouse().connect().unwrap();
    assert_eq!(get_tarif_rows(&conn, date(1)).unwrap(), before);

    let day_two = get_card_type_rows(&conn, date(2)).unwrap();
    assert_eq!(day_two.len(), 1);
    assert_eq!(day_two[0].jumlah_pelanggan, 1);

    let output_dir = workdir.path().join("output");
    assert!(output_dir.join("agg_by_card_type_20250701.csv").exists());
    assert!(output_dir.join("agg_by_card_type_20250702.csv").exists());
}

#[test]
fn test_single_task_rerun() {
    let workdir = TempDir::new().unwrap();
    let pipeline = pipeline_for(&workdir, fixtures_dir());
    assert!(pipeline.run(date(1)).succeeded());

    let export_path = workdir.path().join("output/agg_by_route_20250701.csv");
    fs::remove_file(&export_path).unwrap();

    let report = pipeline.run_task(Task::ExportToCsv, date(1));
    assert!(report.succeeded());
    assert_eq!(report.tasks.len(), 1);
    assert!(export_path.exists());
}
