//! Recurrence intervals and calendar arithmetic.

use std::fmt;

use chrono::{DateTime, Days, Duration, FixedOffset, Months};
use serde::{Deserialize, Serialize};

/// How often a scheduled event repeats.
///
/// Years, months and days move along the calendar in the event's own
/// timezone; a month step from January 31st lands on the last day of
/// February. Hours, minutes and seconds are fixed durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "unit", content = "every")]
pub enum Recurrence {
    Years(u32),
    Months(u32),
    Days(u32),
    Hours(u32),
    Minutes(u32),
    Seconds(u32),
}

impl Recurrence {
    /// Pick the recurrence from per-unit repeat fields.
    ///
    /// Fields are examined coarsest first and the first non-zero one wins;
    /// the rest are ignored. Returns `None` when every field is absent or zero.
    pub fn from_fields(
        years: Option<u32>,
        months: Option<u32>,
        days: Option<u32>,
        hours: Option<u32>,
        minutes: Option<u32>,
        seconds: Option<u32>,
    ) -> Option<Self> {
        let candidates: [(Option<u32>, fn(u32) -> Self); 6] = [
            (years, Self::Years),
            (months, Self::Months),
            (days, Self::Days),
            (hours, Self::Hours),
            (minutes, Self::Minutes),
            (seconds, Self::Seconds),
        ];

        candidates
            .into_iter()
            .find_map(|(value, make)| value.filter(|n| *n > 0).map(make))
    }

    /// Step count of this recurrence.
    pub fn count(&self) -> u32 {
        match *self {
            Self::Years(n)
            | Self::Months(n)
            | Self::Days(n)
            | Self::Hours(n)
            | Self::Minutes(n)
            | Self::Seconds(n) => n,
        }
    }

    /// Advance `from` by exactly one step.
    ///
    /// Returns `None` if the result falls outside chrono's representable range.
    pub fn advance(&self, from: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        match *self {
            Self::Years(n) => from.checked_add_months(Months::new(n.checked_mul(12)?)),
            Self::Months(n) => from.checked_add_months(Months::new(n)),
            Self::Days(n) => from.checked_add_days(Days::new(u64::from(n))),
            Self::Hours(n) => from.checked_add_signed(Duration::hours(i64::from(n))),
            Self::Minutes(n) => from.checked_add_signed(Duration::minutes(i64::from(n))),
            Self::Seconds(n) => from.checked_add_signed(Duration::seconds(i64::from(n))),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self {
            Self::Years(_) => "year",
            Self::Months(_) => "month",
            Self::Days(_) => "day",
            Self::Hours(_) => "hour",
            Self::Minutes(_) => "minute",
            Self::Seconds(_) => "second",
        };
        let n = self.count();
        if n == 1 {
            write!(f, "every {unit}")
        } else {
            write!(f, "every {n} {unit}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
    }

    #[rstest]
    #[case((None, None, None, None, None, None), None)]
    #[case((None, None, None, None, Some(0), Some(0)), None)]
    #[case((None, None, None, None, None, Some(30)), Some(Recurrence::Seconds(30)))]
    #[case((None, None, Some(1), None, Some(5), None), Some(Recurrence::Days(1)))]
    #[case((Some(0), Some(2), None, Some(3), None, None), Some(Recurrence::Months(2)))]
    #[case((Some(1), Some(1), Some(1), Some(1), Some(1), Some(1)), Some(Recurrence::Years(1)))]
    fn test_from_fields_priority(
        #[case] fields: (
            Option<u32>,
            Option<u32>,
            Option<u32>,
            Option<u32>,
            Option<u32>,
            Option<u32>,
        ),
        #[case] expected: Option<Recurrence>,
    ) {
        let (y, mo, d, h, mi, s) = fields;
        assert_eq!(Recurrence::from_fields(y, mo, d, h, mi, s), expected);
    }

    #[rstest]
    #[case(Recurrence::Seconds(30), at(2024, 1, 1, 10, 0, 30))]
    #[case(Recurrence::Minutes(1), at(2024, 1, 1, 10, 1, 0))]
    #[case(Recurrence::Hours(25), at(2024, 1, 2, 11, 0, 0))]
    #[case(Recurrence::Days(31), at(2024, 2, 1, 10, 0, 0))]
    #[case(Recurrence::Months(1), at(2024, 2, 1, 10, 0, 0))]
    #[case(Recurrence::Years(1), at(2025, 1, 1, 10, 0, 0))]
    fn test_advance_one_step(#[case] recurrence: Recurrence, #[case] expected: DateTime<FixedOffset>) {
        assert_eq!(recurrence.advance(at(2024, 1, 1, 10, 0, 0)), Some(expected));
    }

    #[test]
    fn test_month_step_clamps_to_month_end() {
        let jan_31 = at(2024, 1, 31, 8, 0, 0);
        assert_eq!(Recurrence::Months(1).advance(jan_31), Some(at(2024, 2, 29, 8, 0, 0)));

        let leap_day = at(2024, 2, 29, 8, 0, 0);
        assert_eq!(Recurrence::Years(1).advance(leap_day), Some(at(2025, 2, 28, 8, 0, 0)));
    }

    #[test]
    fn test_day_step_keeps_local_wall_time() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let start = offset.with_ymd_and_hms(2024, 3, 30, 7, 0, 0).unwrap();
        let next = Recurrence::Days(1).advance(start).unwrap();
        assert_eq!(next, offset.with_ymd_and_hms(2024, 3, 31, 7, 0, 0).unwrap());
        assert_eq!(next.offset(), &offset);
    }

    #[test]
    fn test_display() {
        assert_eq!(Recurrence::Minutes(1).to_string(), "every minute");
        assert_eq!(Recurrence::Days(3).to_string(), "every 3 days");
    }
}
