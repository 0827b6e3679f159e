//! Human-readable elapsed time ("2 days 3 hours").

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};
use thiserror::Error;

/// A timestamp string that is not valid RFC 3339.
#[derive(Error, Debug)]
#[error("invalid timestamp '{input}': {source}")]
pub struct TimestampError {
    input: String,
    source: chrono::ParseError,
}

/// Parse an RFC 3339 timestamp such as `2019-03-01T10:20:30Z`.
///
/// # Errors
///
/// Returns [`TimestampError`] if `input` is not valid RFC 3339.
pub fn parse_timestamp(input: &str) -> Result<DateTime<FixedOffset>, TimestampError> {
    DateTime::parse_from_rfc3339(input).map_err(|source| TimestampError {
        input: input.to_string(),
        source,
    })
}

/// Time elapsed since `start`, rendered with [`format_duration_between`].
pub fn format_elapsed<Tz: TimeZone>(start: &DateTime<Tz>) -> String {
    let now = Utc::now().with_timezone(&start.timezone());
    format_duration_between(start, &now)
}

/// Calendar difference between two instants, as at most the two largest
/// non-zero units.
///
/// Units are compared field by field (years, months, days, hours, minutes,
/// seconds) in `start`'s timezone. A negative field borrows one from the next
/// larger unit; a day borrow adds the length of `start`'s month. The order of
/// the arguments does not matter. Identical instants render as an empty
/// string.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use cell_core::duration::format_duration_between;
///
/// let start = Utc.with_ymd_and_hms(2019, 1, 1, 10, 0, 0).unwrap();
/// let end = Utc.with_ymd_and_hms(2019, 1, 2, 11, 0, 0).unwrap();
/// assert_eq!(format_duration_between(&start, &end), "1 days 1 hours");
/// ```
pub fn format_duration_between<Tz: TimeZone, Tz2: TimeZone>(
    start: &DateTime<Tz>,
    end: &DateTime<Tz2>,
) -> String {
    let end = end.with_timezone(&start.timezone());
    let (start, end) = if *start > end {
        (end, start.clone())
    } else {
        (start.clone(), end)
    };

    let mut year = i64::from(end.year()) - i64::from(start.year());
    let mut month = i64::from(end.month()) - i64::from(start.month());
    let mut day = i64::from(end.day()) - i64::from(start.day());
    let mut hour = i64::from(end.hour()) - i64::from(start.hour());
    let mut minute = i64::from(end.minute()) - i64::from(start.minute());
    let mut second = i64::from(end.second()) - i64::from(start.second());

    if second < 0 {
        second += 60;
        minute -= 1;
    }
    if minute < 0 {
        minute += 60;
        hour -= 1;
    }
    if hour < 0 {
        hour += 24;
        day -= 1;
    }
    if day < 0 {
        day += days_in_month(start.year(), start.month());
        month -= 1;
    }
    if month < 0 {
        month += 12;
        year -= 1;
    }

    [
        (year, "years"),
        (month, "months"),
        (day, "days"),
        (hour, "hours"),
        (minute, "minutes"),
        (second, "seconds"),
    ]
    .into_iter()
    .filter(|(value, _)| *value > 0)
    .take(2)
    .map(|(value, unit)| format!("{value} {unit}"))
    .collect::<Vec<_>>()
    .join(" ")
}

fn days_in_month(year: i32, month: u32) -> i64 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(first), Some(next)) => (next - first).num_days(),
        _ => 30,
    }
}
