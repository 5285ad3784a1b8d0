//! Time-of-day jobs: sheet export and digests.

use chrono::{DateTime, Utc, Weekday};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{Config, TimeOfDay};
use crate::digest::DigestKind;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledJob {
    SheetsSync,
    Digest(DigestKind),
}

impl ScheduledJob {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SheetsSync => "sheets-sync",
            Self::Digest(DigestKind::Daily) => "daily-digest",
            Self::Digest(DigestKind::Weekly) => "weekly-digest",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub job: ScheduledJob,
    pub expression: String,
    pub schedule: Schedule,
}

// cron crate uses 7-field format: sec min hour day month dow year

/// Every day at the given local time.
pub fn daily_cron(at: TimeOfDay) -> String {
    format!("0 {} {} * * * *", at.minute, at.hour)
}

/// Once a week on `day` at the given local time.
pub fn weekly_cron(day: Weekday, at: TimeOfDay) -> String {
    format!("0 {} {} * * {} *", at.minute, at.hour, day)
}

/// Jobs enabled by the configuration.
pub fn plan(config: &Config) -> Result<Vec<ScheduleEntry>, cron::error::Error> {
    let mut wanted = Vec::new();

    if config.sheets_sync_enabled && config.sheets.is_some() {
        wanted.push((ScheduledJob::SheetsSync, daily_cron(config.sheets_sync_time)));
    }
    if config.digests_enabled {
        wanted.push((ScheduledJob::Digest(DigestKind::Daily), daily_cron(config.daily_digest_time)));
        wanted.push((
            ScheduledJob::Digest(DigestKind::Weekly),
            weekly_cron(config.weekly_digest_day, config.weekly_digest_time),
        ));
    }

    wanted
        .into_iter()
        .map(|(job, expression)| {
            let schedule = Schedule::from_str(&expression)?;
            Ok(ScheduleEntry { job, expression, schedule })
        })
        .collect()
}

/// Next occurrence strictly after `after`, evaluated in `tz`.
pub fn next_run(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|t| t.with_timezone(&Utc))
}

/// Next occurrence after a job fired at `last`. Never earlier than `last`
/// itself, so a wall clock running behind the timer cannot repeat a slot.
pub fn next_after(schedule: &Schedule, tz: Tz, now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    let from = last.map_or(now, |last| last.max(now));
    next_run(schedule, tz, from)
}

/// Spawn one loop per enabled job. A job never overlaps with itself.
pub fn spawn(state: AppState) -> Result<Vec<JoinHandle<()>>, cron::error::Error> {
    let entries = plan(&state.config)?;
    if entries.is_empty() {
        info!("⏰ No scheduled jobs enabled");
    }

    let handles = entries
        .into_iter()
        .map(|entry| {
            let state = state.clone();
            tokio::spawn(async move { run_entry(state, entry).await })
        })
        .collect();
    Ok(handles)
}

async fn run_entry(state: AppState, entry: ScheduleEntry) {
    let tz = state.config.timezone;
    info!("⏰ Scheduled {} ({} {})", entry.job.name(), entry.expression, tz);

    let mut last = None;
    loop {
        let Some(next) = next_after(&entry.schedule, tz, Utc::now(), last) else {
            warn!("No future occurrence for {}, stopping", entry.job.name());
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        last = Some(next);

        info!("⏰ Running {}", entry.job.name());
        match entry.job {
            ScheduledJob::SheetsSync => {
                if let Err(e) = state.sync_sheets().await {
                    error!("Scheduled sheet sync failed: {e}");
                }
            }
            ScheduledJob::Digest(kind) => {
                if let Err(e) = state.send_digest(kind).await {
                    error!("Scheduled {} digest failed: {}", kind.as_str(), e);
                }
            }
        }
    }
}
