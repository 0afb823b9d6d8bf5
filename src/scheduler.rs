// src/scheduler.rs
//! Timezone-aware cron trigger for the ingestion pipeline.
//!
//! One run at a time: a tick that lands while a run is in flight is dropped.
//! Ticks missed while the process was asleep collapse into a single catch-up
//! run, unless the latest of them is older than the misfire grace window.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self);
}

/// Parse a cron expression, prepending a seconds field to 5-field input.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).with_context(|| format!("invalid cron expression: {expr:?}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Started,
    SkippedBusy,
    Misfired,
}

impl TickOutcome {
    fn as_str(self) -> &'static str {
        match self {
            TickOutcome::Started => "started",
            TickOutcome::SkippedBusy => "skipped_busy",
            TickOutcome::Misfired => "misfired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPlan {
    /// No fire time in the window.
    Idle,
    /// Latest due fire time, still within grace.
    Fire(DateTime<Utc>),
    /// Latest due fire time, already past grace.
    Misfired(DateTime<Utc>),
}

/// Decide what to do for the fire times in `(last_check, now]`.
pub fn plan_tick(
    schedule: &Schedule,
    tz: Tz,
    last_check: DateTime<Utc>,
    now: DateTime<Utc>,
    grace: Duration,
) -> TickPlan {
    if now <= last_check {
        return TickPlan::Idle;
    }
    let latest = schedule
        .after(&last_check.with_timezone(&tz))
        .map(|t| t.with_timezone(&Utc))
        .take_while(|t| *t <= now)
        .last();
    let Some(at) = latest else {
        return TickPlan::Idle;
    };
    let late = (now - at).to_std().unwrap_or(Duration::ZERO);
    if late > grace {
        TickPlan::Misfired(at)
    } else {
        TickPlan::Fire(at)
    }
}

pub struct CronScheduler {
    schedule: Schedule,
    tz: Tz,
    grace: Duration,
    job: Arc<dyn Job>,
    running: Arc<Mutex<()>>,
}

impl CronScheduler {
    pub fn new(schedule: Schedule, tz: Tz, grace: Duration, job: Arc<dyn Job>) -> Self {
        Self {
            schedule,
            tz,
            grace,
            job,
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_expr(expr: &str, tz: Tz, grace: Duration, job: Arc<dyn Job>) -> Result<Self> {
        Ok(Self::new(parse_cron(expr)?, tz, grace, job))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Next fire time strictly after `after`, in UTC.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Start the job unless a previous run still holds the guard.
    pub fn try_fire(&self) -> TickOutcome {
        let outcome = match self.running.clone().try_lock_owned() {
            Ok(guard) => {
                let job = self.job.clone();
                tokio::spawn(async move {
                    job.run().await;
                    drop(guard);
                });
                TickOutcome::Started
            }
            Err(_) => {
                tracing::warn!(target: "scheduler", "previous run still in progress, tick dropped");
                TickOutcome::SkippedBusy
            }
        };
        counter!("scheduler_ticks_total", "outcome" => outcome.as_str()).increment(1);
        outcome
    }

    /// Evaluate the window `(last_check, now]` and act on it.
    pub fn tick(&self, last_check: DateTime<Utc>, now: DateTime<Utc>) -> Option<TickOutcome> {
        match plan_tick(&self.schedule, self.tz, last_check, now, self.grace) {
            TickPlan::Idle => None,
            TickPlan::Fire(at) => {
                tracing::debug!(target: "scheduler", scheduled_for = %at, "tick");
                Some(self.try_fire())
            }
            TickPlan::Misfired(at) => {
                tracing::warn!(
                    target: "scheduler",
                    scheduled_for = %at,
                    grace_secs = self.grace.as_secs(),
                    "run missed its grace window, skipped"
                );
                counter!("scheduler_ticks_total", "outcome" => TickOutcome::Misfired.as_str())
                    .increment(1);
                Some(TickOutcome::Misfired)
            }
        }
    }

    /// Wait for the run in flight, if any.
    pub async fn wait_idle(&self) {
        let _ = self.running.lock().await;
    }

    /// Drive the schedule forever on a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(target: "scheduler", tz = %self.tz, "scheduler started");
            let mut last_check = Utc::now();
            loop {
                let Some(next) = self.next_fire_after(last_check) else {
                    tracing::warn!(target: "scheduler", "schedule has no future fire times, stopping");
                    return;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;

                let now = Utc::now();
                self.tick(last_check, now);
                last_check = now;
            }
        })
    }
}
