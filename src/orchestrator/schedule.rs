//! Daily schedule at a fixed UTC time of day.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

/// Tick for `date` at `time_of_day`.
pub fn tick_on(date: NaiveDate, time_of_day: NaiveTime) -> DateTime<Utc> {
    date.and_time(time_of_day).and_utc()
}

/// Most recent tick at or before `now`. Used for `--once` without a date.
pub fn latest_tick(now: DateTime<Utc>, time_of_day: NaiveTime) -> DateTime<Utc> {
    let today = tick_on(now.date_naive(), time_of_day);
    if today <= now {
        today
    } else {
        today - Duration::days(1)
    }
}

/// First tick strictly after `now`. Missed ticks are never returned.
pub fn next_tick(now: DateTime<Utc>, time_of_day: NaiveTime) -> DateTime<Utc> {
    let today = tick_on(now.date_naive(), time_of_day);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
