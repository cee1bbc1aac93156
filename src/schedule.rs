use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tracing::{info, warn};

/// Fixed weekly firing point: weekday + wall-clock time in a named zone.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSpec {
    pub weekday: Weekday,
    pub time: NaiveTime,
    pub tz: Tz,
}

/// Next calendar date landing on `weekday` strictly after `after`.
/// Always 1-7 days ahead; an exact weekday match advances a full week.
pub fn next_weekday(after: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (weekday.num_days_from_monday() as i64
        - after.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    let ahead = if ahead == 0 { 7 } else { ahead };
    after + Duration::days(ahead)
}

/// Next instant of (weekday, time) in the spec's zone strictly after `now`.
///
/// DST is resolved here rather than left to a cron library: an ambiguous
/// local time (clocks fall back) maps to the earlier of the two instants,
/// and a nonexistent local time (clocks spring forward) fires one hour
/// later on the same day.
pub fn next_occurrence(spec: &ScheduleSpec, now: DateTime<Tz>) -> DateTime<Tz> {
    let today = now.date_naive();
    let ahead = (spec.weekday.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    let mut candidate = today + Duration::days(ahead);
    loop {
        if let Some(at) = resolve_local(spec.tz, candidate, spec.time) {
            if at > now {
                return at;
            }
        }
        candidate += Duration::days(7);
    }
}

fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(at) => Some(at),
        LocalResult::Ambiguous(earlier, _) => Some(earlier),
        LocalResult::None => tz
            .from_local_datetime(&(date.and_time(time) + Duration::hours(1)))
            .earliest(),
    }
}

/// Time source for the scheduler loop, swapped for a virtual clock in tests.
#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now_utc(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: StdDuration);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: StdDuration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fire `action` at every occurrence of the spec, forever.
///
/// Each firing runs to completion before the next one is computed, so
/// overlapping scheduled runs cannot happen. A failed run is logged and
/// never breaks the loop.
pub async fn run_weekly<F, Fut>(spec: ScheduleSpec, action: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    run_weekly_with(SystemClock, spec, action).await
}

pub async fn run_weekly_with<C, F, Fut>(clock: C, spec: ScheduleSpec, mut action: F)
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    loop {
        let now = clock.now_utc().with_timezone(&spec.tz);
        let fire_at = next_occurrence(&spec, now);
        info!(fire_at = %fire_at, "next weekly run scheduled");
        wait_until(&clock, fire_at.with_timezone(&Utc)).await;
        if let Err(err) = action().await {
            let msg = format!("{err:#}");
            warn!(error = %msg, "scheduled run failed");
        }
    }
}

/// Sleep until `deadline` in bounded chunks, re-checking the wall clock
/// between chunks so a suspended process fires on resume instead of late.
async fn wait_until<C: Clock>(clock: &C, deadline: DateTime<Utc>) {
    const MAX_CHUNK: StdDuration = StdDuration::from_secs(60 * 60);
    loop {
        let now = clock.now_utc();
        if now >= deadline {
            return;
        }
        let remaining = (deadline - now).to_std().unwrap_or(StdDuration::ZERO);
        clock.sleep(remaining.min(MAX_CHUNK)).await;
    }
}
