//! Job timing for the relay loop.
//!
//! Jobs are either fixed-interval or once a day at a wall-clock time. Daily times
//! are read in local time, expressed as a fixed offset from UTC.

use crate::config::{parse_hhmm, ScheduleConfig};
use crate::types::{RelayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DAY_SECS: i64 = 86_400;

/// How often a job should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Run every N seconds.
    Interval { secs: u64 },
    /// Run once a day at `hour:min` local time.
    Daily { hour: u8, min: u8 },
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval { secs } => {
                if *secs >= 3600 {
                    write!(f, "every {} hours", secs / 3600)
                } else if *secs >= 60 {
                    write!(f, "every {} minutes", secs / 60)
                } else {
                    write!(f, "every {} seconds", secs)
                }
            }
            Self::Daily { hour, min } => write!(f, "daily at {hour:02}:{min:02}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingest,
    Digest,
    Stats,
    Cleanup,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::Digest => "digest",
            JobKind::Stats => "stats",
            JobKind::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub kind: JobKind,
    pub schedule: Schedule,
    /// Local-time epoch seconds of the last run.
    pub last_run: Option<i64>,
    pub enabled: bool,
}

impl ScheduledJob {
    pub fn new(kind: JobKind, schedule: Schedule) -> Self {
        Self {
            kind,
            schedule,
            last_run: None,
            enabled: true,
        }
    }

    /// `now` is local-time epoch seconds.
    pub fn is_due(&self, now: i64) -> bool {
        if !self.enabled {
            return false;
        }

        match &self.schedule {
            Schedule::Interval { secs } => match self.last_run {
                None => true,
                Some(last) => now.saturating_sub(last) >= *secs as i64,
            },
            Schedule::Daily { hour, min } => {
                let day_secs = i64::from(*hour) * 3600 + i64::from(*min) * 60;
                let today_start = now - now.rem_euclid(DAY_SECS);
                let scheduled = today_start + day_secs;

                match self.last_run {
                    None => now >= scheduled,
                    Some(last) => last < scheduled && now >= scheduled,
                }
            }
        }
    }

    pub fn mark_run(&mut self, now: i64) {
        self.last_run = Some(now);
    }
}

pub struct JobScheduler {
    jobs: Vec<ScheduledJob>,
    offset_secs: i64,
}

impl JobScheduler {
    /// Interval jobs start due. Daily jobs are armed at `now`, so a slot already
    /// passed today waits for tomorrow instead of firing at startup.
    pub fn new(jobs: Vec<ScheduledJob>, offset_minutes: i32, now: DateTime<Utc>) -> Self {
        let offset_secs = i64::from(offset_minutes) * 60;
        let local_now = now.timestamp() + offset_secs;
        let jobs = jobs
            .into_iter()
            .map(|mut job| {
                if matches!(job.schedule, Schedule::Daily { .. }) && job.last_run.is_none() {
                    job.last_run = Some(local_now);
                }
                job
            })
            .collect();
        Self { jobs, offset_secs }
    }

    pub fn from_config(config: &ScheduleConfig, now: DateTime<Utc>) -> Result<Self> {
        let daily = |value: &str| -> Result<Schedule> {
            let (hour, min) = parse_hhmm(value).map_err(RelayError::Config)?;
            Ok(Schedule::Daily { hour, min })
        };

        let jobs = vec![
            ScheduledJob::new(
                JobKind::Ingest,
                Schedule::Interval {
                    secs: config.polling_interval().as_secs(),
                },
            ),
            ScheduledJob::new(JobKind::Digest, daily(&config.digest_time)?),
            ScheduledJob::new(JobKind::Stats, daily(&config.stats_time)?),
            ScheduledJob::new(JobKind::Cleanup, daily(&config.cleanup_time)?),
        ];
        Ok(Self::new(jobs, config.timezone_offset_minutes, now))
    }

    fn local(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() + self.offset_secs
    }

    /// Due jobs in registration order.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<JobKind> {
        let local = self.local(now);
        self.jobs.iter().filter(|j| j.is_due(local)).map(|j| j.kind).collect()
    }

    pub fn mark_run(&mut self, kind: JobKind, now: DateTime<Utc>) {
        let local = self.local(now);
        if let Some(job) = self.jobs.iter_mut().find(|j| j.kind == kind) {
            job.mark_run(local);
        }
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }
}
