//! Granularity and date range alignment.
//!
//! Ranges are inclusive on both ends with millisecond precision, so a month
//! period ends at `23:59:59.999` on its last day. Weeks start on Monday.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use super::error::{SchemaError, SchemaResult};
use crate::model::Granularity;

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const DISPLAY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// An inclusive timestamp range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[String; 2]", into = "[String; 2]")]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> SchemaResult<Self> {
        if start > end {
            return Err(SchemaError::InvalidDateRange(format!(
                "start {} is after end {}",
                start.format(DISPLAY_FORMAT),
                end.format(DISPLAY_FORMAT)
            )));
        }
        Ok(Self {
            start: truncate_millis(start),
            end: truncate_millis(end),
        })
    }

    /// Parse a range from two timestamps.
    ///
    /// A date-only end covers its whole day, and an end without fractional
    /// seconds covers its whole second.
    pub fn parse(start: &str, end: &str) -> SchemaResult<Self> {
        let start = parse_timestamp(start, false)?;
        let end = parse_timestamp(end, true)?;
        Self::new(start, end)
    }

    /// Overlap of two ranges, if any.
    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(DateRange { start, end })
    }

    /// Widen this range to whole periods of `granularity`.
    pub fn align(&self, granularity: Granularity) -> CanonicalRange {
        let start = period_start(granularity, self.start);
        let end = period_end(granularity, self.end);
        CanonicalRange {
            granularity,
            range: DateRange { start, end },
            widened: start != self.start || end != self.end,
        }
    }

    /// True if the range starts and ends exactly on period boundaries.
    pub fn is_aligned(&self, granularity: Granularity) -> bool {
        period_start(granularity, self.start) == self.start
            && period_end(granularity, self.end) == self.end
    }

    /// The coarsest granularity this range is aligned to.
    pub fn granularity(&self) -> Option<Granularity> {
        Granularity::ALL
            .iter()
            .rev()
            .copied()
            .find(|g| self.is_aligned(*g))
    }

    /// The periods of `granularity` covering this range, in order.
    pub fn periods(&self, granularity: Granularity) -> Vec<DateRange> {
        let mut periods = Vec::new();
        let mut start = period_start(granularity, self.start);
        while start <= self.end {
            let next = next_period_start(granularity, start);
            periods.push(DateRange {
                start,
                end: next - Duration::milliseconds(1),
            });
            start = next;
        }
        periods
    }
}

impl TryFrom<[String; 2]> for DateRange {
    type Error = SchemaError;

    fn try_from(value: [String; 2]) -> Result<Self, Self::Error> {
        DateRange::parse(&value[0], &value[1])
    }
}

impl From<DateRange> for [String; 2] {
    fn from(range: DateRange) -> Self {
        [
            range.start.format(DISPLAY_FORMAT).to_string(),
            range.end.format(DISPLAY_FORMAT).to_string(),
        ]
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start.format(DISPLAY_FORMAT),
            self.end.format(DISPLAY_FORMAT)
        )
    }
}

/// A range widened to whole periods of a granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalRange {
    pub granularity: Granularity,
    pub range: DateRange,
    /// Whether alignment had to move either boundary.
    pub widened: bool,
}

/// The granularity a candidate stored at `candidate` would be read at.
///
/// Returns the coarsest granularity `G` such that the candidate can be
/// rolled up to `G`, `G` can be rolled up to the query granularity, and the
/// date range is aligned at `G`. `None` means the candidate cannot serve the
/// query. A missing range or query granularity constrains nothing.
pub fn common_granularity(
    query: Option<Granularity>,
    range: Option<&DateRange>,
    candidate: Granularity,
) -> Option<Granularity> {
    Granularity::ALL.iter().rev().copied().find(|g| {
        candidate.rolls_up_to(*g)
            && query.map_or(true, |q| g.rolls_up_to(q))
            && range.map_or(true, |r| r.is_aligned(*g))
    })
}

/// First instant of the period containing `ts`.
pub fn period_start(granularity: Granularity, ts: NaiveDateTime) -> NaiveDateTime {
    let sub_second = Duration::nanoseconds(ts.nanosecond() as i64);
    match granularity {
        Granularity::Second => ts - sub_second,
        Granularity::Minute => ts - sub_second - Duration::seconds(ts.second() as i64),
        Granularity::Hour => {
            ts - sub_second - Duration::seconds((ts.minute() * 60 + ts.second()) as i64)
        }
        Granularity::Day => ts.date().and_time(NaiveTime::MIN),
        Granularity::Week => {
            let monday = ts.date() - Duration::days(ts.weekday().num_days_from_monday() as i64);
            monday.and_time(NaiveTime::MIN)
        }
        Granularity::Month => first_of_month(ts.date()).and_time(NaiveTime::MIN),
        Granularity::Quarter => {
            let mut date = first_of_month(ts.date());
            while date.month0() % 3 != 0 {
                date = first_of_month(date - Duration::days(1));
            }
            date.and_time(NaiveTime::MIN)
        }
        Granularity::Year => {
            (ts.date() - Duration::days(ts.ordinal0() as i64)).and_time(NaiveTime::MIN)
        }
    }
}

/// Last millisecond of the period containing `ts`.
pub fn period_end(granularity: Granularity, ts: NaiveDateTime) -> NaiveDateTime {
    next_period_start(granularity, period_start(granularity, ts)) - Duration::milliseconds(1)
}

/// Start of the period following the one starting at `start`.
fn next_period_start(granularity: Granularity, start: NaiveDateTime) -> NaiveDateTime {
    match granularity {
        Granularity::Second => start + Duration::seconds(1),
        Granularity::Minute => start + Duration::minutes(1),
        Granularity::Hour => start + Duration::hours(1),
        Granularity::Day => start + Duration::days(1),
        Granularity::Week => start + Duration::weeks(1),
        Granularity::Month => next_month(start.date()).and_time(NaiveTime::MIN),
        Granularity::Quarter => {
            next_month(next_month(next_month(start.date()))).and_time(NaiveTime::MIN)
        }
        Granularity::Year => {
            let next = start.date() + Duration::days(366);
            (next - Duration::days(next.ordinal0() as i64)).and_time(NaiveTime::MIN)
        }
    }
}

/// Partition key for the period starting at `start`, e.g. `20200101`.
pub fn partition_key(granularity: Granularity, start: NaiveDateTime) -> String {
    let format = match granularity {
        Granularity::Second => "%Y%m%d%H%M%S",
        Granularity::Minute => "%Y%m%d%H%M",
        Granularity::Hour => "%Y%m%d%H",
        _ => "%Y%m%d",
    };
    start.format(format).to_string()
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.day0() as i64)
}

fn next_month(date: NaiveDate) -> NaiveDate {
    first_of_month(first_of_month(date) + Duration::days(32))
}

fn truncate_millis(ts: NaiveDateTime) -> NaiveDateTime {
    ts - Duration::nanoseconds((ts.nanosecond() % 1_000_000) as i64)
}

fn parse_timestamp(s: &str, is_end: bool) -> SchemaResult<NaiveDateTime> {
    let s = s.trim().trim_end_matches('Z');

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let start = date.and_time(NaiveTime::MIN);
        return Ok(if is_end {
            start + Duration::days(1) - Duration::milliseconds(1)
        } else {
            start
        });
    }

    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            let whole_second = !s.contains('.');
            return Ok(if is_end && whole_second {
                ts + Duration::milliseconds(999)
            } else {
                ts
            });
        }
    }

    Err(SchemaError::InvalidDateRange(format!(
        "cannot parse timestamp '{}'",
        s
    )))
}
