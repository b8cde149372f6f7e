//! Resolution of dependency date expressions into concrete time windows.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};

use crate::types::CycleType;

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateInterval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        self.start <= instant && instant < self.end
    }

    fn day(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::MIN);
        Self::new(start, start + Duration::days(1))
    }

    fn hour(instant: NaiveDateTime) -> Self {
        let start = instant
            .date()
            .and_time(NaiveTime::MIN)
            + Duration::hours(i64::from(instant.hour()));
        Self::new(start, start + Duration::hours(1))
    }
}

impl fmt::Display for DateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Date expression of a dependency item, e.g. `today` or `last3Hours`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateValue {
    CurrentHour,
    LastHours(u32),
    Today,
    LastDays(u32),
    ThisWeek,
    LastWeek,
    LastWeekday(Weekday),
    ThisMonth,
    LastMonth,
    LastMonthBegin,
    LastMonthEnd,
}

impl DateValue {
    /// The cycle family this expression belongs to.
    pub fn cycle(self) -> CycleType {
        match self {
            DateValue::CurrentHour | DateValue::LastHours(_) => CycleType::Hour,
            DateValue::Today | DateValue::LastDays(_) => CycleType::Day,
            DateValue::ThisWeek | DateValue::LastWeek | DateValue::LastWeekday(_) => {
                CycleType::Week
            }
            DateValue::ThisMonth
            | DateValue::LastMonth
            | DateValue::LastMonthBegin
            | DateValue::LastMonthEnd => CycleType::Month,
        }
    }

    /// Expand the expression into windows relative to `reference`.
    ///
    /// Multi-period expressions yield one window per hour or per day, oldest
    /// first.
    pub fn intervals(self, reference: NaiveDateTime) -> Vec<DateInterval> {
        let today = reference.date();
        match self {
            DateValue::CurrentHour => vec![DateInterval::hour(reference)],
            DateValue::LastHours(n) => (1..=i64::from(n))
                .rev()
                .map(|i| DateInterval::hour(reference - Duration::hours(i)))
                .collect(),
            DateValue::Today => vec![DateInterval::day(today)],
            DateValue::LastDays(n) => (1..=i64::from(n))
                .rev()
                .map(|i| DateInterval::day(today - Duration::days(i)))
                .collect(),
            DateValue::ThisWeek => {
                let monday = monday_of(today);
                days_between(monday, today)
            }
            DateValue::LastWeek => {
                let monday = monday_of(today) - Duration::days(7);
                days_between(monday, monday + Duration::days(6))
            }
            DateValue::LastWeekday(weekday) => {
                let monday = monday_of(today) - Duration::days(7);
                let offset = i64::from(weekday.num_days_from_monday());
                vec![DateInterval::day(monday + Duration::days(offset))]
            }
            DateValue::ThisMonth => days_between(first_of_month(today), today),
            DateValue::LastMonth => {
                let (first, last) = last_month(today);
                days_between(first, last)
            }
            DateValue::LastMonthBegin => vec![DateInterval::day(last_month(today).0)],
            DateValue::LastMonthEnd => vec![DateInterval::day(last_month(today).1)],
        }
    }
}

impl fmt::Display for DateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateValue::CurrentHour => f.write_str("currentHour"),
            DateValue::LastHours(1) => f.write_str("last1Hour"),
            DateValue::LastHours(n) => write!(f, "last{n}Hours"),
            DateValue::Today => f.write_str("today"),
            DateValue::LastDays(n) => write!(f, "last{n}Days"),
            DateValue::ThisWeek => f.write_str("thisWeek"),
            DateValue::LastWeek => f.write_str("lastWeek"),
            DateValue::LastWeekday(day) => write!(f, "last{}", weekday_name(*day)),
            DateValue::ThisMonth => f.write_str("thisMonth"),
            DateValue::LastMonth => f.write_str("lastMonth"),
            DateValue::LastMonthBegin => f.write_str("lastMonthBegin"),
            DateValue::LastMonthEnd => f.write_str("lastMonthEnd"),
        }
    }
}

impl FromStr for DateValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = match s.trim() {
            "currentHour" => DateValue::CurrentHour,
            "last1Hour" => DateValue::LastHours(1),
            "last2Hours" => DateValue::LastHours(2),
            "last3Hours" => DateValue::LastHours(3),
            "last24Hours" => DateValue::LastHours(24),
            "today" => DateValue::Today,
            "last1Days" => DateValue::LastDays(1),
            "last2Days" => DateValue::LastDays(2),
            "last3Days" => DateValue::LastDays(3),
            "last7Days" => DateValue::LastDays(7),
            "thisWeek" => DateValue::ThisWeek,
            "lastWeek" => DateValue::LastWeek,
            "lastMonday" => DateValue::LastWeekday(Weekday::Mon),
            "lastTuesday" => DateValue::LastWeekday(Weekday::Tue),
            "lastWednesday" => DateValue::LastWeekday(Weekday::Wed),
            "lastThursday" => DateValue::LastWeekday(Weekday::Thu),
            "lastFriday" => DateValue::LastWeekday(Weekday::Fri),
            "lastSaturday" => DateValue::LastWeekday(Weekday::Sat),
            "lastSunday" => DateValue::LastWeekday(Weekday::Sun),
            "thisMonth" => DateValue::ThisMonth,
            "lastMonth" => DateValue::LastMonth,
            "lastMonthBegin" => DateValue::LastMonthBegin,
            "lastMonthEnd" => DateValue::LastMonthEnd,
            other => return Err(format!("unsupported date value '{other}'")),
        };
        Ok(value)
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

/// First and last day of the month before `date`.
fn last_month(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let last = first_of_month(date) - Duration::days(1);
    (first_of_month(last), last)
}

/// One daily window for each day in `from..=to`.
fn days_between(from: NaiveDate, to: NaiveDate) -> Vec<DateInterval> {
    from.iter_days()
        .take_while(|d| *d <= to)
        .map(DateInterval::day)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn parses_and_displays_round_trip() {
        for s in ["currentHour", "last1Hour", "last24Hours", "last7Days", "lastFriday", "lastMonthEnd"] {
            let value: DateValue = s.parse().unwrap();
            assert_eq!(value.to_string(), s);
        }
        assert!("yesterday".parse::<DateValue>().is_err());
    }

    #[test]
    fn today_is_a_single_half_open_day() {
        let windows = DateValue::Today.intervals(at("2023-03-15 10:30:00"));
        assert_eq!(windows, vec![DateInterval::new(at("2023-03-15 00:00:00"), at("2023-03-16 00:00:00"))]);
        assert!(windows[0].contains(at("2023-03-15 23:59:59")));
        assert!(!windows[0].contains(at("2023-03-16 00:00:00")));
    }

    #[test]
    fn last_hours_are_oldest_first() {
        let windows = DateValue::LastHours(2).intervals(at("2023-03-15 10:30:00"));
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start, at("2023-03-15 08:00:00"));
        assert_eq!(windows[1].end, at("2023-03-15 10:00:00"));
    }

    #[test]
    fn week_expressions() {
        // 2023-03-15 is a Wednesday.
        let reference = at("2023-03-15 12:00:00");
        let this_week = DateValue::ThisWeek.intervals(reference);
        assert_eq!(this_week.len(), 3);
        assert_eq!(this_week[0].start, at("2023-03-13 00:00:00"));

        let last_week = DateValue::LastWeek.intervals(reference);
        assert_eq!(last_week.len(), 7);
        assert_eq!(last_week[0].start, at("2023-03-06 00:00:00"));
        assert_eq!(last_week[6].end, at("2023-03-13 00:00:00"));

        let last_sunday = DateValue::LastWeekday(Weekday::Sun).intervals(reference);
        assert_eq!(last_sunday[0].start, at("2023-03-12 00:00:00"));
    }

    #[test]
    fn month_expressions_cross_year_boundary() {
        let reference = at("2023-01-10 08:00:00");
        let last_month = DateValue::LastMonth.intervals(reference);
        assert_eq!(last_month.len(), 31);
        assert_eq!(last_month[0].start, at("2022-12-01 00:00:00"));
        assert_eq!(
            DateValue::LastMonthEnd.intervals(reference)[0].start,
            at("2022-12-31 00:00:00")
        );
        assert_eq!(DateValue::ThisMonth.intervals(reference).len(), 10);
    }
}
