// 🔧 Vehicle Identifier Normalization
// "ABC123" → "ABC-123"; anything that doesn't fit the pattern passes through untouched

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

/// Name of the SQL scalar function registered on every warehouse connection
pub const NORMALIZE_BODY_NO_FN: &str = "normalize_body_no";

static BODY_NO_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]{3})([0-9]+)$").ok());

/// Insert a hyphen between a 3-letter prefix and its trailing digits.
///
/// Only `<3 letters><digits>` is rewritten. Already-hyphenated values,
/// other shapes and empty strings are returned unchanged.
pub fn normalize_body_no(raw: &str) -> String {
    match BODY_NO_PATTERN.as_ref().and_then(|re| re.captures(raw)) {
        Some(caps) => format!("{}-{}", &caps[1], &caps[2]),
        None => raw.to_string(),
    }
}

/// Expose [`normalize_body_no`] to SQL so the transform runs inside the warehouse.
///
/// NULL stays NULL; non-text values are compared by their text rendering.
pub fn register_sql_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        NORMALIZE_BODY_NO_FN,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let normalized = match ctx.get_raw(0) {
                ValueRef::Null => None,
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                    Some(normalize_body_no(&String::from_utf8_lossy(bytes)))
                }
                ValueRef::Integer(i) => Some(i.to_string()),
                ValueRef::Real(r) => Some(r.to_string()),
            };
            Ok(normalized)
        },
    )
}
