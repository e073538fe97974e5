use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use tracing::{error, info, warn};

use super::planner::DailyPlan;
use super::scheduler::{FullSyncOptions, SyncOutcome, UpdateScheduler};

const TICK_SECS: u64 = 60;
const CLEANUP_EVERY_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    FullSync,
    SmartSync { force: bool },
    Cleanup,
}

/// Wall-clock bookkeeping deciding which jobs are due on a tick.
#[derive(Debug, Clone)]
pub struct TriggerClock {
    full_sync_hour: u32,
    last_full_sync: Option<NaiveDate>,
    last_smart_hour: Option<(NaiveDate, u32)>,
    last_cleanup: Option<DateTime<Utc>>,
    /// Budgeted poll instants not yet run, earliest first
    planned: Vec<DateTime<Utc>>,
}

impl TriggerClock {
    pub fn new(full_sync_hour: u32) -> Self {
        TriggerClock {
            full_sync_hour,
            last_full_sync: None,
            last_smart_hour: None,
            last_cleanup: None,
            planned: Vec::new(),
        }
    }

    pub fn set_plan(&mut self, plan: &DailyPlan) {
        self.planned = plan.polls.iter().map(|p| p.at).collect();
        self.planned.sort();
    }

    pub fn pending_polls(&self) -> usize {
        self.planned.len()
    }

    /// Jobs to run now, in order. Marks them as run.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<Trigger> {
        let mut due = Vec::new();
        let today = now.date_naive();

        if now.hour() == self.full_sync_hour && self.last_full_sync != Some(today) {
            self.last_full_sync = Some(today);
            due.push(Trigger::FullSync);
        }

        // Several overdue instants collapse into one call
        let before = self.planned.len();
        self.planned.retain(|at| *at > now);
        let planned_due = self.planned.len() < before;

        let hour = (today, now.hour());
        let hourly_due = self.last_smart_hour != Some(hour);
        self.last_smart_hour = Some(hour);

        if planned_due {
            due.push(Trigger::SmartSync { force: true });
        } else if hourly_due {
            due.push(Trigger::SmartSync { force: false });
        }

        let cleanup_due = self
            .last_cleanup
            .map_or(true, |last| now - last >= Duration::minutes(CLEANUP_EVERY_MINUTES));
        if cleanup_due {
            self.last_cleanup = Some(now);
            due.push(Trigger::Cleanup);
        }

        due
    }
}

/// Drive every trigger until Ctrl-C.
pub async fn run(scheduler: &UpdateScheduler, full_sync_hour: u32) -> Result<()> {
    let mut clock = TriggerClock::new(full_sync_hour);
    refresh_plan(scheduler, &mut clock);

    info!(
        "Daemon started: full sync daily at {:02}:00 UTC, smart sync hourly, {} planned poll(s) pending",
        full_sync_hour,
        clock.pending_polls()
    );

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(TICK_SECS));
    // A long full sync must not be followed by a burst of catch-up ticks
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                for trigger in clock.due(now) {
                    let outcome = match trigger {
                        Trigger::FullSync => scheduler.full_sync(FullSyncOptions::default(), now).await,
                        Trigger::SmartSync { force } => scheduler.smart_sync(force, now).await,
                        Trigger::Cleanup => scheduler.cleanup(now).await,
                    };
                    log_outcome(trigger, &outcome);
                    if trigger == Trigger::FullSync {
                        refresh_plan(scheduler, &mut clock);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping daemon");
                break;
            }
        }
    }

    Ok(())
}

fn refresh_plan(scheduler: &UpdateScheduler, clock: &mut TriggerClock) {
    match scheduler.plan(Utc::now()) {
        Ok(plan) => {
            info!(
                "Daily plan: {} poll(s), {} dropped for budget",
                plan.polls.len(),
                plan.dropped()
            );
            clock.set_plan(&plan);
        }
        Err(e) => error!("Failed to compute daily plan: {:#}", e),
    }
}

fn log_outcome(trigger: Trigger, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Failed(msg) => warn!("{:?} failed: {}", trigger, msg),
        other => info!("{:?} {}", trigger, other),
    }
}
