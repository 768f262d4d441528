//! The maintenance runner.
//!
//! A single select loop ticks once per minute and dispatches jobs when
//! a calendar boundary was crossed since the previous tick:
//! - every tick: tip expiry sweep (plus detached invite refreshes)
//! - hour boundary: regex counter flush, link resend, status report
//! - day boundary: admin refresh, backup round, log rotation
//! - month boundary: accumulation reset
//!
//! Jobs are spawned detached so a slow Telegram call never delays the
//! next tick; consistency between overlapping runs comes from the named
//! locks, not from the scheduling.

use std::time::Duration;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info};

use super::JobContext;
use super::maintenance::{
    backup_files, flush_regex_counters, minute_tick, refresh_admins, report_status, resend_links,
    reset_monthly, rotate_logs,
};
use crate::telegram::GroupApi;

/// Messages that can be sent to the runner.
#[derive(Debug, Clone)]
pub enum RunnerMessage {
    /// Run a backup round now.
    TriggerBackup,
    /// Run the admin refresh now.
    TriggerAdminRefresh,
    /// Stop the runner.
    Shutdown,
}

/// Calendar boundaries crossed between two ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Crossings {
    hour: bool,
    day: bool,
    month: bool,
}

fn crossings<Tz: TimeZone>(last: &DateTime<Tz>, now: &DateTime<Tz>) -> Crossings {
    let day = now.date_naive() != last.date_naive();
    Crossings {
        hour: day || now.hour() != last.hour(),
        day,
        month: now.month() != last.month() || now.year() != last.year(),
    }
}

/// Drives the periodic maintenance jobs.
pub struct MaintenanceRunner<A> {
    ctx: JobContext<A>,

    /// Base tick of the minute job.
    tick_interval: Duration,

    /// Pause between files during a backup round.
    backup_pause: Duration,
}

impl<A: GroupApi + 'static> MaintenanceRunner<A> {
    /// Creates a runner with the production cadence.
    #[must_use]
    pub fn new(ctx: JobContext<A>) -> Self {
        Self {
            ctx,
            tick_interval: Duration::from_secs(60),
            backup_pause: Duration::from_secs(5),
        }
    }

    /// Sets the base tick interval.
    #[must_use]
    pub const fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Sets the pause between backup files.
    #[must_use]
    pub const fn with_backup_pause(mut self, backup_pause: Duration) -> Self {
        self.backup_pause = backup_pause;
        self
    }

    /// Runs the maintenance loop until a shutdown message arrives.
    pub async fn run(&self, mut rx: mpsc::Receiver<RunnerMessage>) {
        info!("Maintenance runner started");

        let mut timer = interval(self.tick_interval);
        let mut last = Local::now();

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let now = Local::now();
                    self.dispatch(crossings(&last, &now));
                    last = now;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(RunnerMessage::TriggerBackup) => {
                            debug!("Manual backup round triggered");
                            let ctx = self.ctx.clone();
                            let pause = self.backup_pause;
                            tokio::spawn(async move {
                                backup_files(&ctx, pause).await;
                            });
                        }
                        Some(RunnerMessage::TriggerAdminRefresh) => {
                            debug!("Manual admin refresh triggered");
                            let ctx = self.ctx.clone();
                            tokio::spawn(async move {
                                refresh_admins(&ctx).await;
                            });
                        }
                        Some(RunnerMessage::Shutdown) | None => {
                            info!("Maintenance runner shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, crossed: Crossings) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            minute_tick(&ctx).await;
        });

        if crossed.hour {
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                flush_regex_counters(&ctx).await;
                resend_links(&ctx).await;
                report_status(&ctx, "awake").await;
            });
        }

        if crossed.day {
            let ctx = self.ctx.clone();
            let pause = self.backup_pause;
            tokio::spawn(async move {
                refresh_admins(&ctx).await;
                backup_files(&ctx, pause).await;
            });

            let log_path = self.ctx.settings.log_path.clone();
            tokio::task::spawn_blocking(move || rotate_logs(&log_path));
        }

        if crossed.month {
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                reset_monthly(&ctx).await;
            });
        }
    }
}

impl<A> std::fmt::Debug for MaintenanceRunner<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceRunner")
            .field("tick_interval", &self.tick_interval)
            .field("backup_pause", &self.backup_pause)
            .finish_non_exhaustive()
    }
}
