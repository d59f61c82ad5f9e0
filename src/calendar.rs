//! Calendar-month arithmetic.
//!
//! Months are keyed by their first day (`NaiveDate` with `day == 1`) and mapped
//! to a dense integer index so gaps and horizons become plain integer ranges.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

/// First day of the calendar month containing `ts` (UTC).
pub fn month_start(ts: DateTime<Utc>) -> NaiveDate {
    first_of_month(ts.date_naive())
}

/// Truncates a date to the first day of its month.
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    // day 1 always exists
    date.with_day(1).unwrap_or(date)
}

/// Dense month index: `year * 12 + (month - 1)`.
pub fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

/// Inverse of [`month_index`].
pub fn from_month_index(index: i32) -> NaiveDate {
    let year = index.div_euclid(12);
    let month0 = index.rem_euclid(12) as u32;
    NaiveDate::from_ymd_opt(year, month0 + 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Shifts a month start by `months` (may be negative).
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    from_month_index(month_index(date) + months)
}

/// Midnight UTC on the given date.
pub fn to_instant(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Month starts from `from` to `to`, both inclusive. Empty when `from > to`.
pub fn month_range(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    (month_index(from)..=month_index(to))
        .map(from_month_index)
        .collect()
}

/// Month starts falling inside `[start, end]`.
pub fn month_starts_within(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let first = if start.day() == 1 {
        start
    } else {
        add_months(first_of_month(start), 1)
    };
    month_range(first, end)
}

/// `YYYY-MM` label used for month fixed effects and summaries.
pub fn month_label(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_month_start_truncates() {
        let ts = Utc.with_ymd_and_hms(2023, 7, 19, 23, 59, 59).unwrap();
        assert_eq!(month_start(ts), d(2023, 7, 1));
    }

    #[test]
    fn test_index_roundtrip_across_year() {
        assert_eq!(from_month_index(month_index(d(2023, 12, 1)) + 1), d(2024, 1, 1));
        assert_eq!(add_months(d(2024, 1, 1), -1), d(2023, 12, 1));
        assert_eq!(add_months(d(2023, 1, 1), 18), d(2024, 7, 1));
    }

    #[test]
    fn test_month_range_inclusive() {
        let r = month_range(d(2023, 11, 1), d(2024, 2, 1));
        assert_eq!(r, vec![d(2023, 11, 1), d(2023, 12, 1), d(2024, 1, 1), d(2024, 2, 1)]);
        assert!(month_range(d(2024, 2, 1), d(2023, 11, 1)).is_empty());
    }

    #[test]
    fn test_month_label() {
        assert_eq!(month_label(d(2023, 7, 1)), "2023-07");
    }

    #[test]
    fn test_month_starts_within() {
        assert_eq!(
            month_starts_within(d(2023, 1, 15), d(2023, 4, 1)),
            vec![d(2023, 2, 1), d(2023, 3, 1), d(2023, 4, 1)]
        );
        assert_eq!(month_starts_within(d(2023, 1, 1), d(2023, 1, 31)), vec![d(2023, 1, 1)]);
        assert!(month_starts_within(d(2023, 1, 2), d(2023, 1, 31)).is_empty());
    }
}
