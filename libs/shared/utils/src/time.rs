use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc, Weekday};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";
pub const MONTH_FORMAT: &str = "%Y-%m";

/// Parses a strict `HH:mm` 24-hour time.
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    if value.len() != 5 {
        return None;
    }
    NaiveTime::parse_from_str(value, TIME_FORMAT).ok()
}

pub fn format_hhmm(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parses a strict `yyyy-MM-dd` date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses a `yyyy-MM` month key into the first day of that month.
pub fn parse_month_key(value: &str) -> Option<NaiveDate> {
    if value.len() != 7 {
        return None;
    }
    NaiveDate::parse_from_str(&format!("{}-01", value), DATE_FORMAT).ok()
}

pub fn utc_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

/// Local wall-clock date and time at `offset`, as epoch milliseconds.
pub fn to_epoch_millis(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> Option<i64> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.timestamp_millis())
}

/// `yyyy-MM` of the instant as seen at `offset`.
pub fn month_key(epoch_millis: i64, offset: FixedOffset) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(epoch_millis)
        .map(|dt| dt.with_timezone(&offset).format(MONTH_FORMAT).to_string())
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Lower-case English weekday name, the key used for provider working hours.
pub fn weekday_key(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}
