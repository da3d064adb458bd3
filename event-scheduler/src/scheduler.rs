//! Synchronous scheduling core.
//!
//! [`EventScheduler`] owns the ordered set of active events and is driven by
//! explicit `now` values, which keeps it deterministic. The async
//! [`SchedulerService`](crate::SchedulerService) wraps it with a single wake
//! timer.

use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::{Result, ScheduleError};
use crate::recurrence::Recurrence;
use crate::request::{is_past, ScheduleRequest};

/// An event waiting to fire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledEvent {
    pub id: Option<String>,
    pub fire_at: DateTime<FixedOffset>,
    pub recurrence: Option<Recurrence>,
    pub payload: Map<String, Value>,
    #[serde(skip)]
    seq: u64,
}

/// What the fire callback receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiredEvent {
    pub id: Option<String>,
    /// The fire time the event was due at, not the moment it actually ran
    pub scheduled_for: DateTime<FixedOffset>,
    /// Payload with every key containing `_` removed
    pub payload: Map<String, Value>,
}

impl ScheduledEvent {
    fn fired(&self) -> FiredEvent {
        let payload = self
            .payload
            .iter()
            .filter(|(key, _)| !key.contains('_'))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        FiredEvent {
            id: self.id.clone(),
            scheduled_for: self.fire_at,
            payload,
        }
    }

    fn sort_key(&self) -> (DateTime<FixedOffset>, u64) {
        (self.fire_at, self.seq)
    }
}

/// Ordered collection of future events.
///
/// Events with identical fire times fire in the order they were scheduled.
#[derive(Debug, Default)]
pub struct EventScheduler {
    active: Vec<ScheduledEvent>,
    next_seq: u64,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a request, resolving its fire time against `now`.
    ///
    /// A fire time in the past is advanced by one recurrence step; if it is
    /// still past (or there is no recurrence) the request is rejected. An
    /// accepted request replaces any active event with the same id.
    ///
    /// The caller is responsible for calling [`tick_at`](Self::tick_at)
    /// afterwards so that events due now fire.
    pub fn schedule_at(
        &mut self,
        request: ScheduleRequest,
        now: DateTime<FixedOffset>,
    ) -> Result<DateTime<FixedOffset>> {
        let recurrence = request.recurrence();
        let mut fire_at = match request.fire_time(now) {
            Ok(fire_at) => fire_at,
            Err(e) => {
                error!(id = ?request.id, error = %e, "Rejected schedule request");
                return Err(e);
            }
        };

        if is_past(&fire_at, &now) {
            let advanced = recurrence.and_then(|r| r.advance(fire_at));
            match advanced {
                Some(next) if !is_past(&next, &now) => {
                    debug!(id = ?request.id, from = %fire_at, to = %next, "Advanced past fire time by one step");
                    fire_at = next;
                }
                _ => {
                    warn!(id = ?request.id, fire_at = %fire_at, "Dropping event scheduled in the past");
                    return Err(ScheduleError::InPast(fire_at.to_rfc3339()));
                }
            }
        }

        if let Some(id) = request.id.as_deref() {
            if self.remove(id) {
                debug!(id, "Replaced active event");
            }
        }

        let event = ScheduledEvent {
            id: request.id,
            fire_at,
            recurrence,
            payload: request.payload,
            seq: 0,
        };
        info!(id = ?event.id, fire_at = %event.fire_at, recurrence = ?event.recurrence, "Scheduled event");
        self.insert(event);

        Ok(fire_at)
    }

    /// Remove the active event with `id`. Returns whether one was removed.
    pub fn cancel(&mut self, id: &str) -> bool {
        let removed = self.remove(id);
        if removed {
            info!(id, "Cancelled event");
        }
        removed
    }

    /// Fire every event due at `now`, reschedule recurring ones, and
    /// return the delay until the next wake (if anything is left).
    ///
    /// Each recurring event moves forward by exactly one step per firing.
    /// When that step still lands in the past the event is dropped rather
    /// than caught up.
    pub fn tick_at<F>(&mut self, now: DateTime<FixedOffset>, mut on_fire: F) -> Option<Duration>
    where
        F: FnMut(FiredEvent),
    {
        while self.active.first().is_some_and(|event| event.fire_at <= now) {
            let event = self.active.remove(0);
            debug!(id = ?event.id, fire_at = %event.fire_at, "Firing event");
            on_fire(event.fired());

            let Some(recurrence) = event.recurrence else {
                continue;
            };
            match recurrence.advance(event.fire_at) {
                Some(next) if !is_past(&next, &now) => {
                    self.insert(ScheduledEvent {
                        fire_at: next,
                        ..event
                    });
                }
                _ => {
                    warn!(id = ?event.id, %recurrence, "Recurring event fell behind, dropping it");
                }
            }
        }

        self.next_wake(now)
    }

    /// Delay from `now` until the earliest active event, zero if overdue.
    pub fn next_wake(&self, now: DateTime<FixedOffset>) -> Option<Duration> {
        self.active
            .first()
            .map(|event| (event.fire_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Fire time of the earliest active event.
    pub fn next_fire_time(&self) -> Option<DateTime<FixedOffset>> {
        self.active.first().map(|event| event.fire_at)
    }

    /// Active events in fire order.
    pub fn active(&self) -> &[ScheduledEvent] {
        &self.active
    }

    /// Number of scheduled requests.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// True when nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn insert(&mut self, mut event: ScheduledEvent) {
        event.seq = self.next_seq;
        self.next_seq += 1;
        let key = event.sort_key();
        let index = self.active.partition_point(|e| e.sort_key() <= key);
        self.active.insert(index, event);
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.active.len();
        self.active.retain(|event| event.id.as_deref() != Some(id));
        self.active.len() != before
    }
}
