// 🏗️ Input Records - typed rows of the five source CSVs
// Each source file maps to one staging table; coercion is lenient, validation is minimal

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Statement};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

// ============================================================================
// SOURCE FILES
// ============================================================================

/// SourceFile - the fixed set of input files the loader knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFile {
    Routes,
    RealisasiBus,
    ShelterCorridor,
    TransaksiBus,
    TransaksiHalte,
}

impl SourceFile {
    /// Load order: reference data first, then the transactions that join against it
    pub const ALL: [SourceFile; 5] = [
        SourceFile::Routes,
        SourceFile::RealisasiBus,
        SourceFile::ShelterCorridor,
        SourceFile::TransaksiBus,
        SourceFile::TransaksiHalte,
    ];

    /// File name inside the input directory
    pub fn file_name(&self) -> &'static str {
        match self {
            SourceFile::Routes => "dummy_routes.csv",
            SourceFile::RealisasiBus => "dummy_realisasi_bus.csv",
            SourceFile::ShelterCorridor => "dummy_shelter_corridor.csv",
            SourceFile::TransaksiBus => "dummy_transaksi_bus.csv",
            SourceFile::TransaksiHalte => "dummy_transaksi_halte.csv",
        }
    }

    /// Table name inside the `staging` schema
    pub fn table(&self) -> &'static str {
        match self {
            SourceFile::Routes => "routes",
            SourceFile::RealisasiBus => "realisasi_bus",
            SourceFile::ShelterCorridor => "shelter_corridor",
            SourceFile::TransaksiBus => "transaksi_bus",
            SourceFile::TransaksiHalte => "transaksi_halte",
        }
    }

    /// Columns that must be present in the CSV header, in staging insert order
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            SourceFile::Routes => &["route_code", "route_name"],
            SourceFile::RealisasiBus => &["tanggal_realisasi", "bus_body_no", "rute_realisasi"],
            SourceFile::ShelterCorridor => &["shelter_name_var", "corridor_code"],
            SourceFile::TransaksiBus => &[
                "uuid",
                "waktu_transaksi",
                "armada_id_var",
                "no_body_var",
                "card_number_var",
                "card_type_var",
                "balance_before_int",
                "fare_int",
                "balance_after_int",
                "transcode_txt",
                "gate_in_boo",
                "p_latitude_flo",
                "p_longitude_flo",
                "status_var",
                "free_service_boo",
                "insert_on_dtm",
            ],
            SourceFile::TransaksiHalte => &[
                "uuid",
                "waktu_transaksi",
                "shelter_name_var",
                "terminal_name_var",
                "card_number_var",
                "card_type_var",
                "balance_before_int",
                "fare_int",
                "balance_after_int",
                "transcode_txt",
                "gate_in_boo",
                "p_latitude_flo",
                "p_longitude_flo",
                "status_var",
                "free_service_boo",
                "insert_on_dtm",
            ],
        }
    }

    /// Column scoping rows to an execution date; None for reference data
    pub fn date_column(&self) -> Option<&'static str> {
        match self {
            SourceFile::Routes | SourceFile::ShelterCorridor => None,
            SourceFile::RealisasiBus => Some("tanggal_realisasi"),
            SourceFile::TransaksiBus | SourceFile::TransaksiHalte => Some("waktu_transaksi"),
        }
    }

    /// Parameterised INSERT for this file's staging table
    pub fn insert_sql(&self) -> String {
        let columns = self.columns();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO staging.{} ({}) VALUES ({})",
            self.table(),
            columns.join(", "),
            placeholders.join(", ")
        )
    }
}

// ============================================================================
// STAGING RECORD TRAIT
// ============================================================================

/// A CSV row that knows its source file and how to bind itself to a staging INSERT.
pub trait StagingRecord: DeserializeOwned {
    const SOURCE: SourceFile;

    /// Business date of the row (None for undated reference rows)
    fn business_date(&self) -> Option<NaiveDate>;

    /// Execute the prepared `SOURCE.insert_sql()` statement for this row
    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize>;
}

// ============================================================================
// RECORD TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteRecord {
    #[serde(deserialize_with = "de_opt_string")]
    pub route_code: Option<String>,
    #[serde(deserialize_with = "de_opt_string")]
    pub route_name: Option<String>,
}

impl StagingRecord for RouteRecord {
    const SOURCE: SourceFile = SourceFile::Routes;

    fn business_date(&self) -> Option<NaiveDate> {
        None
    }

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![self.route_code, self.route_name])
    }
}

/// Actual bus-to-route assignment for one day
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RealisasiBusRecord {
    #[serde(deserialize_with = "de_date")]
    pub tanggal_realisasi: NaiveDate,
    #[serde(deserialize_with = "de_opt_string")]
    pub bus_body_no: Option<String>,
    #[serde(deserialize_with = "de_opt_string")]
    pub rute_realisasi: Option<String>,
}

impl StagingRecord for RealisasiBusRecord {
    const SOURCE: SourceFile = SourceFile::RealisasiBus;

    fn business_date(&self) -> Option<NaiveDate> {
        Some(self.tanggal_realisasi)
    }

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.tanggal_realisasi,
            self.bus_body_no,
            self.rute_realisasi
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShelterCorridorRecord {
    #[serde(deserialize_with = "de_opt_string")]
    pub shelter_name_var: Option<String>,
    /// Always kept as text, even when the file holds numeric-looking codes
    #[serde(deserialize_with = "de_opt_string")]
    pub corridor_code: Option<String>,
}

impl StagingRecord for ShelterCorridorRecord {
    const SOURCE: SourceFile = SourceFile::ShelterCorridor;

    fn business_date(&self) -> Option<NaiveDate> {
        None
    }

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![self.shelter_name_var, self.corridor_code])
    }
}

/// Card tap recorded on a bus
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BusTransactionRecord {
    #[serde(deserialize_with = "de_opt_string")]
    pub uuid: Option<String>,
    #[serde(deserialize_with = "de_timestamp")]
    pub waktu_transaksi: NaiveDateTime,
    #[serde(deserialize_with = "de_opt_string")]
    pub armada_id_var: Option<String>,
    #[serde(deserialize_with = "de_opt_string")]
    pub no_body_var: Option<String>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub card_number_var: Option<i64>,
    #[serde(deserialize_with = "de_opt_string")]
    pub card_type_var: Option<String>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub balance_before_int: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub fare_int: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub balance_after_int: Option<i64>,
    #[serde(deserialize_with = "de_opt_string")]
    pub transcode_txt: Option<String>,
    #[serde(deserialize_with = "de_opt_bool")]
    pub gate_in_boo: Option<bool>,
    pub p_latitude_flo: Option<f64>,
    pub p_longitude_flo: Option<f64>,
    #[serde(deserialize_with = "de_opt_string")]
    pub status_var: Option<String>,
    #[serde(deserialize_with = "de_opt_bool")]
    pub free_service_boo: Option<bool>,
    #[serde(deserialize_with = "de_opt_string")]
    pub insert_on_dtm: Option<String>,
}

impl StagingRecord for BusTransactionRecord {
    const SOURCE: SourceFile = SourceFile::TransaksiBus;

    fn business_date(&self) -> Option<NaiveDate> {
        Some(self.waktu_transaksi.date())
    }

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.uuid,
            self.waktu_transaksi,
            self.armada_id_var,
            self.no_body_var,
            self.card_number_var,
            self.card_type_var,
            self.balance_before_int,
            self.fare_int,
            self.balance_after_int,
            self.transcode_txt,
            self.gate_in_boo,
            self.p_latitude_flo,
            self.p_longitude_flo,
            self.status_var,
            self.free_service_boo,
            self.insert_on_dtm,
        ])
    }
}

/// Card tap recorded at a station (halte) gate
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HalteTransactionRecord {
    #[serde(deserialize_with = "de_opt_string")]
    pub uuid: Option<String>,
    #[serde(deserialize_with = "de_timestamp")]
    pub waktu_transaksi: NaiveDateTime,
    #[serde(deserialize_with = "de_opt_string")]
    pub shelter_name_var: Option<String>,
    #[serde(deserialize_with = "de_opt_string")]
    pub terminal_name_var: Option<String>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub card_number_var: Option<i64>,
    #[serde(deserialize_with = "de_opt_string")]
    pub card_type_var: Option<String>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub balance_before_int: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub fare_int: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub balance_after_int: Option<i64>,
    #[serde(deserialize_with = "de_opt_string")]
    pub transcode_txt: Option<String>,
    #[serde(deserialize_with = "de_opt_bool")]
    pub gate_in_boo: Option<bool>,
    pub p_latitude_flo: Option<f64>,
    pub p_longitude_flo: Option<f64>,
    #[serde(deserialize_with = "de_opt_string")]
    pub status_var: Option<String>,
    #[serde(deserialize_with = "de_opt_bool")]
    pub free_service_boo: Option<bool>,
    #[serde(deserialize_with = "de_opt_string")]
    pub insert_on_dtm: Option<String>,
}

impl StagingRecord for HalteTransactionRecord {
    const SOURCE: SourceFile = SourceFile::TransaksiHalte;

    fn business_date(&self) -> Option<NaiveDate> {
        Some(self.waktu_transaksi.date())
    }

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.uuid,
            self.waktu_transaksi,
            self.shelter_name_var,
            self.terminal_name_var,
            self.card_number_var,
            self.card_type_var,
            self.balance_before_int,
            self.fare_int,
            self.balance_after_int,
            self.transcode_txt,
            self.gate_in_boo,
            self.p_latitude_flo,
            self.p_longitude_flo,
            self.status_var,
            self.free_service_boo,
            self.insert_on_dtm,
        ])
    }
}

// ============================================================================
// COERCION
// ============================================================================

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp; a bare date means midnight
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| anyhow!("invalid timestamp '{}'", raw))
}

/// Parse a date; timestamps are accepted and truncated to their date
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| parse_timestamp(raw).map(|ts| ts.date()))
        .map_err(|_| anyhow!("invalid date '{}'", raw))
}

/// Integers may arrive float-rendered ("3500.0"); fractional values are rejected
pub fn parse_int(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(value);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 && value.abs() < 9.0e15 => Ok(value as i64),
        _ => Err(anyhow!("invalid integer '{}'", raw)),
    }
}

pub fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        other => Err(anyhow!("invalid boolean '{}'", other)),
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(non_empty(Option::<String>::deserialize(deserializer)?))
}

fn de_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    non_empty(Option::<String>::deserialize(deserializer)?)
        .map(|s| parse_int(&s))
        .transpose()
        .map_err(serde::de::Error::custom)
}

fn de_opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    non_empty(Option::<String>::deserialize(deserializer)?)
        .map(|s| parse_bool(&s))
        .transpose()
        .map_err(serde::de::Error::custom)
}

fn de_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).map_err(serde::de::Error::custom)
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}
