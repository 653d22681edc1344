//! Formats the current time the way the original `Time` variable did
//! (Python's `time.asctime()`, e.g. `"Wed Jun  9 04:26:40 1993"`).
//!
//! We format in UTC rather than resolving the local offset: `time`'s
//! local-offset lookup is unsound on most platforms outside a
//! single-threaded process and is gated behind a feature we don't enable
//! (see DESIGN.md).

use time::OffsetDateTime;

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

pub fn asctime_now() -> String {
    asctime(OffsetDateTime::now_utc())
}

fn asctime(now: OffsetDateTime) -> String {
    let weekday = WEEKDAYS[now.weekday().number_days_from_monday() as usize];
    let month = MONTHS[now.month() as usize - 1];
    format!(
        "{weekday} {month} {day:2} {hour:02}:{minute:02}:{second:02} {year:04}",
        day = now.day(),
        hour = now.hour(),
        minute = now.minute(),
        second = now.second(),
        year = now.year(),
    )
}
