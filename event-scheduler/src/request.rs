//! Schedule requests and fire-time resolution.

use chrono::{DateTime, Datelike, FixedOffset, Local, SubsecRound, TimeZone, Timelike};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Result, ScheduleError};
use crate::recurrence::Recurrence;

/// A request to schedule one event.
///
/// Calendar fields are all optional. A field that is absent takes the
/// current time's value when a finer field is given, and the unit's minimum
/// when only coarser fields are given. With no fields at all the event fires
/// immediately.
///
/// Requests deserialize from flat JSON objects. Keys that are not recognised
/// land in the payload and are delivered with the event; payload keys that
/// contain an underscore are treated as bookkeeping and stripped on fire.
///
/// ```
/// use event_scheduler::ScheduleRequest;
///
/// let req: ScheduleRequest = serde_json::from_str(
///     r#"{"id": "porch", "hour": 19, "day_repeat": 1, "action": "on"}"#,
/// ).unwrap();
/// assert_eq!(req.id.as_deref(), Some("porch"));
/// assert_eq!(req.payload["action"], "on");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub day: Option<u32>,
    #[serde(default)]
    pub hour: Option<u32>,
    #[serde(default)]
    pub minute: Option<u32>,
    #[serde(default)]
    pub second: Option<u32>,

    /// Offset from UTC in minutes; defaults to the offset of "now"
    #[serde(default)]
    pub tz_offset_minutes: Option<i32>,

    #[serde(default)]
    pub year_repeat: Option<u32>,
    #[serde(default)]
    pub month_repeat: Option<u32>,
    #[serde(default)]
    pub day_repeat: Option<u32>,
    #[serde(default)]
    pub hour_repeat: Option<u32>,
    #[serde(default)]
    pub minute_repeat: Option<u32>,
    #[serde(default)]
    pub second_repeat: Option<u32>,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ScheduleRequest {
    /// Empty request: fires immediately, once, with no payload.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_date(mut self, year: i32, month: u32, day: u32) -> Self {
        self.year = Some(year);
        self.month = Some(month);
        self.day = Some(day);
        self
    }

    pub fn with_time(mut self, hour: u32, minute: u32, second: u32) -> Self {
        self.hour = Some(hour);
        self.minute = Some(minute);
        self.second = Some(second);
        self
    }

    pub fn with_hour(mut self, hour: u32) -> Self {
        self.hour = Some(hour);
        self
    }

    pub fn with_minute(mut self, minute: u32) -> Self {
        self.minute = Some(minute);
        self
    }

    pub fn with_second(mut self, second: u32) -> Self {
        self.second = Some(second);
        self
    }

    pub fn with_tz_offset_minutes(mut self, minutes: i32) -> Self {
        self.tz_offset_minutes = Some(minutes);
        self
    }

    /// Set the repeat field matching `recurrence`'s unit.
    pub fn repeat(mut self, recurrence: Recurrence) -> Self {
        let slot = match recurrence {
            Recurrence::Years(_) => &mut self.year_repeat,
            Recurrence::Months(_) => &mut self.month_repeat,
            Recurrence::Days(_) => &mut self.day_repeat,
            Recurrence::Hours(_) => &mut self.hour_repeat,
            Recurrence::Minutes(_) => &mut self.minute_repeat,
            Recurrence::Seconds(_) => &mut self.second_repeat,
        };
        *slot = Some(recurrence.count());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Effective recurrence: the coarsest non-zero repeat field.
    pub fn recurrence(&self) -> Option<Recurrence> {
        Recurrence::from_fields(
            self.year_repeat,
            self.month_repeat,
            self.day_repeat,
            self.hour_repeat,
            self.minute_repeat,
            self.second_repeat,
        )
    }

    /// Timezone the calendar fields are interpreted in.
    pub fn offset(&self, now: &DateTime<FixedOffset>) -> Result<FixedOffset> {
        match self.tz_offset_minutes {
            Some(minutes) => minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or(ScheduleError::InvalidOffset(minutes)),
            None => Ok(*now.offset()),
        }
    }

    /// Resolve the calendar fields against `now`.
    ///
    /// Does not check whether the result lies in the past.
    pub fn fire_time(&self, now: DateTime<FixedOffset>) -> Result<DateTime<FixedOffset>> {
        let offset = self.offset(&now)?;
        let local_now = now.with_timezone(&offset);

        let given: [Option<i64>; 6] = [
            self.year.map(i64::from),
            self.month.map(i64::from),
            self.day.map(i64::from),
            self.hour.map(i64::from),
            self.minute.map(i64::from),
            self.second.map(i64::from),
        ];

        let Some(finest) = given.iter().rposition(Option::is_some) else {
            return Ok(local_now);
        };

        let current: [i64; 6] = [
            i64::from(local_now.year()),
            i64::from(local_now.month()),
            i64::from(local_now.day()),
            i64::from(local_now.hour()),
            i64::from(local_now.minute()),
            i64::from(local_now.second()),
        ];
        const MINIMUM: [i64; 6] = [0, 1, 1, 0, 0, 0];

        let mut resolved = [0i64; 6];
        for (i, slot) in resolved.iter_mut().enumerate() {
            *slot = match given[i] {
                Some(value) => value,
                None if i < finest => current[i],
                None => MINIMUM[i],
            };
        }

        let invalid = || {
            ScheduleError::InvalidDate(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02} {}",
                resolved[0], resolved[1], resolved[2], resolved[3], resolved[4], resolved[5], offset
            ))
        };

        let year = i32::try_from(resolved[0]).map_err(|_| invalid())?;
        let mut rest = [0u32; 5];
        for (slot, value) in rest.iter_mut().zip(&resolved[1..]) {
            *slot = u32::try_from(*value).map_err(|_| invalid())?;
        }
        let [month, day, hour, minute, second] = rest;

        offset
            .with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()
            .ok_or_else(invalid)
    }
}

/// Whether `fire_at` lies before `now` at whole-second resolution.
///
/// An event due at 10:00:00 is not past at 10:00:00.400.
pub fn is_past(fire_at: &DateTime<FixedOffset>, now: &DateTime<FixedOffset>) -> bool {
    *fire_at < now.trunc_subsecs(0)
}

/// Current wall-clock time in the local timezone.
pub fn local_now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}
