//! Time helpers: RFC 3339 formatting, search date parameters and
//! the relative/explicit time windows used by search and export.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime};

use crate::error::{CoreError, Result};

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub fn format_rfc3339(datetime: OffsetDateTime) -> String {
    datetime.format(&Rfc3339).unwrap_or_default()
}

/// Parses a search date parameter.
///
/// Accepts a full RFC 3339 instant or a plain `YYYY-MM-DD` date, which is
/// read as midnight UTC.
pub fn parse_date_param(value: &str) -> Result<OffsetDateTime> {
    let value = value.trim();
    if let Ok(instant) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(instant);
    }
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|e| CoreError::invalid_date_time(format!("'{value}': {e}")))
}

// ============================================================================
// Relative periods
// ============================================================================

/// Unit of a relative time window such as "the last 3 months".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePeriod {
    Days,
    Weeks,
    Months,
    Years,
}

impl TimePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Months => "months",
            Self::Years => "years",
        }
    }

    /// Moves `from` back by `count` units. Month and year arithmetic is
    /// calendar based and clamps to the last day of the target month.
    ///
    /// Returns `None` when the result falls before the earliest
    /// representable date.
    pub fn subtract_from(&self, from: OffsetDateTime, count: u32) -> Option<OffsetDateTime> {
        match self {
            Self::Days => from.checked_sub(Duration::days(i64::from(count))),
            Self::Weeks => from.checked_sub(Duration::weeks(i64::from(count))),
            Self::Months => subtract_months(from, i64::from(count)),
            Self::Years => subtract_months(from, i64::from(count) * 12),
        }
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimePeriod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "days" => Ok(Self::Days),
            "week" | "weeks" => Ok(Self::Weeks),
            "month" | "months" => Ok(Self::Months),
            "year" | "years" => Ok(Self::Years),
            _ => Err(CoreError::invalid_time_period(s)),
        }
    }
}

fn subtract_months(from: OffsetDateTime, months: i64) -> Option<OffsetDateTime> {
    let total = i64::from(from.year()) * 12 + i64::from(u8::from(from.month())) - 1 - months;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = Month::try_from((total.rem_euclid(12) + 1) as u8).ok()?;
    let day = from.day().min(month.length(year));

    Date::from_calendar_date(year, month, day)
        .ok()
        .map(|date| from.replace_date(date))
}

// ============================================================================
// Time windows
// ============================================================================

/// Inclusive `[start, end]` window on `lastUpdated`. Either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeWindow {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
}

impl TimeWindow {
    pub fn new(start: Option<OffsetDateTime>, end: Option<OffsetDateTime>) -> Self {
        Self { start, end }
    }

    /// `[now - period * count, now]`. The start is open when it would fall
    /// outside the representable range.
    pub fn relative(period: TimePeriod, count: u32, now: OffsetDateTime) -> Self {
        Self {
            start: period.subtract_from(now, count),
            end: Some(now),
        }
    }

    /// Resolves the window from explicit bounds and a relative `(period, count)`
    /// pair. Explicit bounds win. An unparsable period yields no window.
    pub fn resolve(
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
        period: Option<&str>,
        count: Option<u32>,
        now: OffsetDateTime,
    ) -> Option<Self> {
        if start.is_some() || end.is_some() {
            return Some(Self::new(start, end));
        }

        let (period, count) = (period?, count?);
        match period.parse::<TimePeriod>() {
            Ok(period) => Some(Self::relative(period, count, now)),
            Err(e) => {
                tracing::warn!(period, error = %e, "ignoring unparsable relative time period");
                None
            }
        }
    }

    pub fn contains(&self, instant: OffsetDateTime) -> bool {
        self.start.is_none_or(|start| instant >= start) && self.end.is_none_or(|end| instant <= end)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_parse_time_period() {
        assert_eq!("days".parse::<TimePeriod>().unwrap(), TimePeriod::Days);
        assert_eq!("Week".parse::<TimePeriod>().unwrap(), TimePeriod::Weeks);
        assert_eq!(" months ".parse::<TimePeriod>().unwrap(), TimePeriod::Months);
        assert_eq!("YEARS".parse::<TimePeriod>().unwrap(), TimePeriod::Years);
        assert!("fortnights".parse::<TimePeriod>().is_err());
    }

    #[test]
    fn test_subtract_days_and_weeks() {
        let now = datetime!(2024-03-15 12:00:00 UTC);
        assert_eq!(
            TimePeriod::Days.subtract_from(now, 5),
            Some(datetime!(2024-03-10 12:00:00 UTC))
        );
        assert_eq!(
            TimePeriod::Weeks.subtract_from(now, 2),
            Some(datetime!(2024-03-01 12:00:00 UTC))
        );
    }

    #[test]
    fn test_subtract_months_clamps_day() {
        let now = datetime!(2024-03-31 08:30:00 UTC);
        assert_eq!(
            TimePeriod::Months.subtract_from(now, 1),
            Some(datetime!(2024-02-29 08:30:00 UTC))
        );
        assert_eq!(
            TimePeriod::Months.subtract_from(now, 15),
            Some(datetime!(2022-12-31 08:30:00 UTC))
        );
    }

    #[test]
    fn test_subtract_years() {
        let now = datetime!(2024-02-29 00:00:00 UTC);
        assert_eq!(
            TimePeriod::Years.subtract_from(now, 1),
            Some(datetime!(2023-02-28 00:00:00 UTC))
        );
    }

    #[test]
    fn test_huge_counts_open_the_start() {
        let now = datetime!(2024-03-15 12:00:00 UTC);
        for period in [
            TimePeriod::Days,
            TimePeriod::Weeks,
            TimePeriod::Months,
            TimePeriod::Years,
        ] {
            assert_eq!(period.subtract_from(now, u32::MAX), None, "{period}");

            let window = TimeWindow::relative(period, u32::MAX, now);
            assert_eq!(window.start, None);
            assert_eq!(window.end, Some(now));
            assert!(window.contains(datetime!(1900-01-01 00:00:00 UTC)));
        }
    }

    #[test]
    fn test_resolve_explicit_wins() {
        let now = datetime!(2024-03-15 12:00:00 UTC);
        let start = datetime!(2024-01-01 00:00:00 UTC);
        let window = TimeWindow::resolve(Some(start), None, Some("days"), Some(3), now).unwrap();
        assert_eq!(window.start, Some(start));
        assert_eq!(window.end, None);
    }

    #[test]
    fn test_resolve_relative() {
        let now = datetime!(2024-03-15 12:00:00 UTC);
        let window = TimeWindow::resolve(None, None, Some("days"), Some(3), now).unwrap();
        assert_eq!(window.start, Some(datetime!(2024-03-12 12:00:00 UTC)));
        assert_eq!(window.end, Some(now));
    }

    #[test]
    fn test_resolve_unparsable_period_is_no_filter() {
        let now = datetime!(2024-03-15 12:00:00 UTC);
        assert!(TimeWindow::resolve(None, None, Some("decades"), Some(3), now).is_none());
        assert!(TimeWindow::resolve(None, None, Some("days"), None, now).is_none());
        assert!(TimeWindow::resolve(None, None, None, None, now).is_none());
    }

    #[test]
    fn test_window_contains() {
        let window = TimeWindow::new(
            Some(datetime!(2024-01-01 00:00:00 UTC)),
            Some(datetime!(2024-01-31 00:00:00 UTC)),
        );
        assert!(window.contains(datetime!(2024-01-01 00:00:00 UTC)));
        assert!(window.contains(datetime!(2024-01-15 00:00:00 UTC)));
        assert!(!window.contains(datetime!(2024-02-01 00:00:00 UTC)));
        assert!(TimeWindow::default().contains(datetime!(1999-01-01 00:00:00 UTC)));
        assert!(TimeWindow::default().is_unbounded());
    }

    #[test]
    fn test_parse_date_param() {
        assert_eq!(
            parse_date_param("2024-05-01").unwrap(),
            datetime!(2024-05-01 00:00:00 UTC)
        );
        assert_eq!(
            parse_date_param("2024-05-01T10:00:00+02:00").unwrap(),
            datetime!(2024-05-01 08:00:00 UTC)
        );
        assert!(parse_date_param("yesterday").is_err());
    }

    #[test]
    fn test_format_rfc3339() {
        assert_eq!(
            format_rfc3339(datetime!(2023-05-15 14:30:00 UTC)),
            "2023-05-15T14:30:00Z"
        );
    }
}
