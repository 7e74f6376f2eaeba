// ⏰ Daily Schedule - fires the pipeline once a day at a fixed local hour
// No retries and no catch-up: a missed or failed day waits for a manual rerun

use anyhow::{Context, Result};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, TimeZone, Utc};
use std::thread;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    hour: u32,
    offset: FixedOffset,
}

impl DailySchedule {
    pub fn new(hour: u32, offset: FixedOffset) -> Result<Self> {
        if hour > 23 {
            anyhow::bail!("schedule hour must be between 0 and 23, got {}", hour);
        }
        Ok(DailySchedule { hour, offset })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(config.schedule_hour, config.local_offset()?)
    }

    /// Next trigger instant strictly after `now`.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Result<DateTime<FixedOffset>> {
        let local = now.with_timezone(&self.offset);
        let mut day = local.date_naive();

        loop {
            let candidate = day
                .and_hms_opt(self.hour, 0, 0)
                .and_then(|naive| self.offset.from_local_datetime(&naive).single())
                .with_context(|| format!("invalid trigger time on {}", day))?;
            if candidate > local {
                return Ok(candidate);
            }
            day = day
                .checked_add_days(Days::new(1))
                .context("schedule ran past the end of the calendar")?;
        }
    }

    /// Execution date of the run fired at `fire`: its local calendar date
    pub fn execution_date(&self, fire: DateTime<FixedOffset>) -> NaiveDate {
        fire.with_timezone(&self.offset).date_naive()
    }

    /// Today's date in the schedule's local offset (default for manual runs)
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }
}

/// Block forever (or for `max_runs` runs), firing the full pipeline at each trigger.
pub fn run_scheduled(
    pipeline: &Pipeline,
    schedule: &DailySchedule,
    max_runs: Option<usize>,
) -> Result<()> {
    let mut runs = 0;
    loop {
        if max_runs.is_some_and(|max| runs >= max) {
            return Ok(());
        }

        let now = Utc::now();
        let fire = schedule.next_fire_after(now)?;
        let wait = (fire.with_timezone(&Utc) - now).to_std().unwrap_or_default();
        info!(next_run = %fire, wait_secs = wait.as_secs(), "Waiting for next scheduled run");
        thread::sleep(wait);

        let execution_date = schedule.execution_date(fire);
        let report = pipeline.run(execution_date);
        if let Some(failed) = report.failed_task() {
            error!(
                run_id = %report.run_id,
                %execution_date,
                task = %failed.task,
                "Scheduled run failed; rerun manually with --date {}",
                execution_date
            );
        }
        runs += 1;
    }
}
