//! Local-date helpers and the injectable clock
//!
//! Every record is keyed by the user's local calendar date. Nothing in this
//! module converts through UTC, so a session logged at 23:50 stays on the day
//! the user saw on their clock.

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Source of the current local date and time
pub trait Clock: Send + Sync {
    /// Current local wall-clock time
    fn now(&self) -> NaiveDateTime;

    /// Current instant, used for unlock timestamps
    fn now_utc(&self) -> DateTime<Utc>;

    /// Current local calendar date
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Clock backed by the operating system's local timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a fixed local time
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: NaiveDateTime,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        FixedClock { now }
    }

    /// Pin the clock to noon on the given date
    pub fn at_date(date: NaiveDate) -> Self {
        FixedClock {
            now: date
                .and_hms_opt(12, 0, 0)
                .unwrap_or_else(|| date.and_time(NaiveTime::MIN)),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.now
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.now.and_utc()
    }
}

/// Format a date as `YYYY-MM-DD`
pub fn format_local_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a `YYYY-MM-DD` local date
pub fn parse_local_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
}

/// The date `n` days before `date`
pub fn days_ago(date: NaiveDate, n: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(n)).unwrap_or(NaiveDate::MIN)
}

/// Signed number of whole days from `from` to `to`
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// 1-based ordinal of the date within its year (January 1st is day 1)
pub fn day_of_year(date: NaiveDate) -> u32 {
    date.ordinal()
}

/// Inclusive range of local dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        DateRange { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }

    /// Iterate every date in the range, oldest first
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let to = self.to;
        self.from.iter_days().take_while(move |d| *d <= to)
    }
}

/// The `days` local dates ending at (and including) `today`
pub fn trailing_window(today: NaiveDate, days: u64) -> DateRange {
    DateRange::new(days_ago(today, days.saturating_sub(1)), today)
}

/// Date filter understood by the Log Store; bounds are inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFilter {
    All,
    On(NaiveDate),
    Between(NaiveDate, NaiveDate),
}

impl DateFilter {
    pub fn matches(&self, date: NaiveDate) -> bool {
        match *self {
            DateFilter::All => true,
            DateFilter::On(d) => date == d,
            DateFilter::Between(from, to) => date >= from && date <= to,
        }
    }

    /// Whether two filters can select a common date
    pub fn overlaps(&self, other: &DateFilter) -> bool {
        let (a_from, a_to) = self.bounds();
        let (b_from, b_to) = other.bounds();
        a_from <= b_to && b_from <= a_to
    }

    fn bounds(&self) -> (NaiveDate, NaiveDate) {
        match *self {
            DateFilter::All => (NaiveDate::MIN, NaiveDate::MAX),
            DateFilter::On(d) => (d, d),
            DateFilter::Between(from, to) => (from, to),
        }
    }
}

impl From<DateRange> for DateFilter {
    fn from(range: DateRange) -> Self {
        DateFilter::Between(range.from, range.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_format_and_parse() {
        let date = d(2024, 2, 9);
        assert_eq!(format_local_date(date), "2024-02-09");
        assert_eq!(parse_local_date("2024-02-09").unwrap(), date);
        assert!(parse_local_date("09/02/2024").is_err());
    }

    #[test]
    fn test_day_arithmetic_across_month_boundary() {
        assert_eq!(days_ago(d(2024, 3, 1), 1), d(2024, 2, 29));
        assert_eq!(days_between(d(2024, 2, 25), d(2024, 3, 3)), 7);
        assert_eq!(days_between(d(2024, 3, 3), d(2024, 2, 25)), -7);
    }

    #[test]
    fn test_day_of_year_is_one_based() {
        assert_eq!(day_of_year(d(2024, 1, 1)), 1);
        assert_eq!(day_of_year(d(2024, 12, 31)), 366);
    }

    #[test]
    fn test_trailing_window_is_inclusive() {
        let window = trailing_window(d(2024, 3, 10), 7);
        assert_eq!(window.from, d(2024, 3, 4));
        assert_eq!(window.iter_days().count(), 7);
        assert!(window.contains(d(2024, 3, 10)));
        assert!(!window.contains(d(2024, 3, 3)));
    }

    #[test]
    fn test_filter_overlap() {
        let week = DateFilter::Between(d(2024, 3, 4), d(2024, 3, 10));
        assert!(week.overlaps(&DateFilter::On(d(2024, 3, 10))));
        assert!(!week.overlaps(&DateFilter::On(d(2024, 3, 11))));
        assert!(DateFilter::All.overlaps(&week));
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::at_date(d(2024, 5, 20));
        assert_eq!(clock.today(), d(2024, 5, 20));
    }
}
