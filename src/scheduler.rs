//! Cron-driven recurring timer for the nightly batch.
//!
//! Schedules are standard 5-field cron expressions evaluated in a configured
//! IANA timezone. `RecurringTimer` is an explicit resource: it owns the spawned
//! task, `stop()` shuts it down after any in-flight job finishes, and dropping
//! the handle aborts the task outright.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::SignalError;

/// Nightly at 02:00 in the configured timezone.
pub const DEFAULT_SCHEDULE: &str = "0 2 * * *";

/// Parse a 5-field cron expression.
pub fn parse_cron(expr: &str) -> Result<Schedule, SignalError> {
    // The cron crate expects 6 fields (with seconds)
    let full_expr = format!("0 {}", expr.trim());

    full_expr.parse::<Schedule>().map_err(|e| {
        SignalError::Configuration(format!("Invalid cron expression '{}': {}", expr, e))
    })
}

/// Parse `expr`, falling back to `DEFAULT_SCHEDULE` when it is invalid.
pub fn schedule_or_default(expr: &str) -> Result<Schedule, SignalError> {
    match parse_cron(expr) {
        Ok(schedule) => Ok(schedule),
        Err(e) => {
            log::warn!("Scheduler: {}; using default '{}'", e, DEFAULT_SCHEDULE);
            parse_cron(DEFAULT_SCHEDULE)
        }
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, SignalError> {
    name.parse()
        .map_err(|_| SignalError::Configuration(format!("Invalid timezone: {}", name)))
}

/// First scheduled time strictly after `after`, evaluated in `tz`.
pub fn next_fire_after(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|t| t.with_timezone(&Utc))
}

pub struct RecurringTimer {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl RecurringTimer {
    /// Spawn the timer. `job` runs to completion before the next fire time is
    /// computed, so runs never overlap; fires missed while a job was running
    /// are skipped rather than queued.
    pub fn start<F, Fut>(schedule: Schedule, tz: Tz, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            // Wall-clock times are mapped onto the tokio clock from a single
            // anchor, so the loop follows tokio time (and paused test clocks).
            let anchor_wall = Utc::now();
            let anchor = Instant::now();
            let wall_now = || {
                let elapsed = chrono::Duration::from_std(anchor.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero());
                anchor_wall + elapsed
            };

            let mut cursor = anchor_wall;
            loop {
                let Some(fire_at) = next_fire_after(&schedule, tz, cursor) else {
                    log::warn!("Scheduler: schedule has no upcoming fire time, stopping");
                    break;
                };
                let offset = (fire_at - anchor_wall).to_std().unwrap_or(Duration::ZERO);
                log::info!("Scheduler: next run at {}", fire_at.with_timezone(&tz));

                tokio::select! {
                    _ = tokio::time::sleep_until(anchor + offset) => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }

                job().await;
                cursor = fire_at.max(wall_now());
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop firing. Waits for a job that is already running to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    log::warn!("Scheduler: timer task ended abnormally: {}", e);
                }
            }
        }
    }
}

impl Drop for RecurringTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
