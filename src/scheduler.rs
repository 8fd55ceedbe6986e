//! Daily trigger at the configured local time
//!
//! Runs missed while the process was down are not caught up; the next
//! occurrence is always strictly in the future.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};
use tracing::{error, info, warn};

use crate::controller::{Controller, Trigger};
use crate::error::Error;
use crate::workflow::RunOutcome;

/// Time from `now` until the next `at` in `now`'s time zone, today if
/// still ahead, else tomorrow.
///
/// The wall-clock target is resolved in the zone before subtracting, so a
/// DST change in between shortens or lengthens the wait. A time skipped by a
/// spring-forward gap fires an hour later on the wall clock.
pub fn next_run_delay<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> Duration {
    let tz = now.timezone();
    let today = now.date_naive();
    for offset in 0..3 {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if let Some(next) = resolve_local(&tz, date.and_time(at)) {
            if next > *now {
                return next
                    .signed_duration_since(now.clone())
                    .to_std()
                    .unwrap_or_default();
            }
        }
    }
    Duration::from_secs(24 * 3600)
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + TimeDelta::hours(1))).earliest())
}

/// Loop forever: sleep until the next occurrence, run, repeat.
pub async fn run_forever(controller: Arc<Controller>) {
    let at = controller.settings().schedule_time;
    info!(schedule = %at.format("%H:%M"), "Scheduler started");

    loop {
        let delay = next_run_delay(&Local::now(), at);
        info!(
            next_in_secs = delay.as_secs(),
            "Next scheduled run in {}h {}m",
            delay.as_secs() / 3600,
            (delay.as_secs() % 3600) / 60
        );
        tokio::time::sleep(delay).await;
        tick(&controller).await;
    }
}

/// One scheduled run, awaited to completion.
pub async fn tick(controller: &Arc<Controller>) -> Option<RunOutcome> {
    info!("Scheduled streak run triggered");
    match controller.trigger_run(None, false, Trigger::Scheduler) {
        Ok(handle) => match handle.task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Scheduled run task failed: {}", e);
                None
            }
        },
        Err(Error::RunAlreadyInProgress) => {
            warn!("Skipping scheduled run: a run is already in progress");
            None
        }
        Err(e) => {
            error!("Scheduled run could not start: {}", e);
            None
        }
    }
}
