// ⚙️ Pipeline Configuration
// Paths and schedule settings, read from the environment (or .env) with CLI overrides

use anyhow::{Context, Result};
use chrono::FixedOffset;
use std::path::PathBuf;

pub const ENV_WAREHOUSE_DIR: &str = "TRANSIT_CUBE_WAREHOUSE_DIR";
pub const ENV_INPUT_DIR: &str = "TRANSIT_CUBE_INPUT_DIR";
pub const ENV_OUTPUT_DIR: &str = "TRANSIT_CUBE_OUTPUT_DIR";
pub const ENV_SCHEDULE_HOUR: &str = "TRANSIT_CUBE_SCHEDULE_HOUR";
pub const ENV_UTC_OFFSET_HOURS: &str = "TRANSIT_CUBE_UTC_OFFSET_HOURS";

/// Runtime settings for one pipeline process.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Directory holding `staging.db` and `cube.db`
    pub warehouse_dir: PathBuf,

    /// Directory the five input CSVs are read from
    pub input_dir: PathBuf,

    /// Directory the cube exports are written to
    pub output_dir: PathBuf,

    /// Local hour of the daily trigger (0-23)
    pub schedule_hour: u32,

    /// Local UTC offset in whole hours (Asia/Jakarta = +7)
    pub utc_offset_hours: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            warehouse_dir: PathBuf::from("data/warehouse"),
            input_dir: PathBuf::from("data/input"),
            output_dir: PathBuf::from("data/output"),
            schedule_hour: 7,
            utc_offset_hours: 7,
        }
    }
}

impl PipelineConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = PipelineConfig::default();

        if let Some(dir) = lookup(ENV_WAREHOUSE_DIR) {
            config.warehouse_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_INPUT_DIR) {
            config.input_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(hour) = lookup(ENV_SCHEDULE_HOUR) {
            config.schedule_hour = hour
                .trim()
                .parse()
                .with_context(|| format!("{} must be an hour, got '{}'", ENV_SCHEDULE_HOUR, hour))?;
        }
        if let Some(offset) = lookup(ENV_UTC_OFFSET_HOURS) {
            config.utc_offset_hours = offset.trim().parse().with_context(|| {
                format!("{} must be whole hours, got '{}'", ENV_UTC_OFFSET_HOURS, offset)
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schedule_hour > 23 {
            anyhow::bail!(
                "schedule hour must be between 0 and 23, got {}",
                self.schedule_hour
            );
        }
        self.local_offset()?;
        Ok(())
    }

    /// Fixed offset the schedule and default execution date are computed in.
    pub fn local_offset(&self) -> Result<FixedOffset> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .with_context(|| format!("UTC offset out of range: {} hours", self.utc_offset_hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = PipelineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.schedule_hour, 7);
        assert_eq!(config.local_offset().unwrap().local_minus_utc(), 7 * 3600);
    }

    #[test]
    fn test_overrides_from_env() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            (ENV_INPUT_DIR, "/srv/in"),
            (ENV_SCHEDULE_HOUR, "5"),
            (ENV_UTC_OFFSET_HOURS, "-3"),
        ]))
        .unwrap();

        assert_eq!(config.input_dir, PathBuf::from("/srv/in"));
        assert_eq!(config.output_dir, PathBuf::from("data/output"));
        assert_eq!(config.schedule_hour, 5);
        assert_eq!(config.utc_offset_hours, -3);
    }

    #[test]
    fn test_invalid_hour_is_rejected() {
        let err = PipelineConfig::from_lookup(lookup_from(&[(ENV_SCHEDULE_HOUR, "25")]))
            .unwrap_err();
        assert!(err.to_string().contains("between 0 and 23"));

        let err = PipelineConfig::from_lookup(lookup_from(&[(ENV_SCHEDULE_HOUR, "seven")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_SCHEDULE_HOUR));
    }

    #[test]
    fn test_out_of_range_offset_is_rejected() {
        let result = PipelineConfig::from_lookup(lookup_from(&[(ENV_UTC_OFFSET_HOURS, "30")]));
        assert!(result.is_err());
    }
}
