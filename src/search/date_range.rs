//! Date range resolution / 日期范围解析
//!
//! Every selector resolves to an inclusive `[start, end]` pair of UTC instants, or
//! `None` when no date filtering applies. Invalid selectors (month 13, quarter 0,
//! start after end) resolve to `None` rather than an empty range.

use chrono::{DateTime, Months, NaiveDate, TimeZone, Utc};

use crate::models::DateRangeSpec;

/// Inclusive time range / 闭区间时间范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ResolvedRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }

    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

fn day_start(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn day_end(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(Utc.from_utc_datetime(&date.and_hms_milli_opt(23, 59, 59, 999)?))
}

/// First and last day of a month / 月份首尾日期
fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

fn span(first: NaiveDate, last: NaiveDate) -> Option<ResolvedRange> {
    Some(ResolvedRange { start: day_start(first)?, end: day_end(last)? })
}

/// Resolve a range selector against the current time / 根据当前时间解析范围
pub fn resolve(spec: &DateRangeSpec, now: DateTime<Utc>) -> Option<ResolvedRange> {
    let resolved = match *spec {
        DateRangeSpec::None => return None,
        DateRangeSpec::Year { year } => {
            span(NaiveDate::from_ymd_opt(year, 1, 1)?, NaiveDate::from_ymd_opt(year, 12, 31)?)
        }
        DateRangeSpec::Month { year, month } => {
            let (first, last) = month_bounds(year, month)?;
            span(first, last)
        }
        DateRangeSpec::Quarter { year, quarter } => {
            if !(1..=4).contains(&quarter) {
                tracing::debug!("Ignoring invalid quarter {}", quarter);
                return None;
            }
            let (first, _) = month_bounds(year, quarter * 3 - 2)?;
            let (_, last) = month_bounds(year, quarter * 3)?;
            span(first, last)
        }
        DateRangeSpec::Custom { start_date, end_date } => {
            if start_date > end_date {
                tracing::debug!("Ignoring custom range {} > {}", start_date, end_date);
                return None;
            }
            span(start_date, end_date)
        }
        DateRangeSpec::Recent { months } => {
            if months == 0 {
                return None;
            }
            let start = now.checked_sub_months(Months::new(months))?;
            Some(ResolvedRange { start, end: now })
        }
    };
    if resolved.is_none() {
        tracing::debug!("Date range {:?} did not resolve, no date filter applied", spec);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_year_and_month() {
        let now = at(2024, 6, 1);
        let year = resolve(&DateRangeSpec::Year { year: 2023 }, now).unwrap();
        assert_eq!(year.start, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(year.end_millis(), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp_millis() - 1);

        // 闰年二月
        let feb = resolve(&DateRangeSpec::Month { year: 2024, month: 2 }, now).unwrap();
        assert!(feb.contains(Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()));
        assert!(!feb.contains(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));

        let dec = resolve(&DateRangeSpec::Month { year: 2023, month: 12 }, now).unwrap();
        assert!(dec.contains(at(2023, 12, 31)));
    }

    #[test]
    fn test_quarter() {
        let q2 = resolve(&DateRangeSpec::Quarter { year: 2024, quarter: 2 }, at(2024, 1, 1)).unwrap();
        assert!(q2.contains(at(2024, 4, 1)));
        assert!(q2.contains(at(2024, 6, 30)));
        assert!(!q2.contains(at(2024, 7, 1)));
        assert!(!q2.contains(at(2024, 3, 31)));
    }

    #[test]
    fn test_custom_and_recent() {
        let now = at(2024, 5, 15);
        let custom = DateRangeSpec::Custom {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
        };
        let range = resolve(&custom, now).unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 1, 10, 23, 59, 59).unwrap()));

        let recent = resolve(&DateRangeSpec::Recent { months: 3 }, now).unwrap();
        assert_eq!(recent.start, at(2024, 2, 15));
        assert_eq!(recent.end, now);
    }

    #[test]
    fn test_invalid_specs_resolve_to_none() {
        let now = at(2024, 5, 15);
        assert!(resolve(&DateRangeSpec::None, now).is_none());
        assert!(resolve(&DateRangeSpec::Month { year: 2024, month: 13 }, now).is_none());
        assert!(resolve(&DateRangeSpec::Quarter { year: 2024, quarter: 5 }, now).is_none());
        assert!(resolve(&DateRangeSpec::Recent { months: 0 }, now).is_none());
        let backwards = DateRangeSpec::Custom {
            start_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        assert!(resolve(&backwards, now).is_none());
    }
}
