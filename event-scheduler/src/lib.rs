//! Timer and alarm engine for device automations.
//!
//! Events are scheduled from calendar fields (any subset of year, month,
//! day, hour, minute and second, plus a timezone offset) and may repeat on
//! a calendar-aware interval. The engine keeps active events ordered by fire
//! time and holds a single wake timer for the earliest one.
//!
//! # Example
//!
//! ```no_run
//! use event_scheduler::{Recurrence, ScheduleRequest, SchedulerService};
//!
//! # async fn example() -> event_scheduler::Result<()> {
//! let handle = SchedulerService::spawn(|event| {
//!     tracing::info!(id = ?event.id, payload = ?event.payload, "alarm");
//! });
//!
//! handle
//!     .schedule(
//!         ScheduleRequest::new()
//!             .with_id("porch-light")
//!             .with_time(19, 30, 0)
//!             .repeat(Recurrence::Days(1))
//!             .with_payload("action", "on"),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Catch-up
//!
//! A recurring event that fires late moves forward by one step only. If that
//! step is still in the past the event is dropped; missed occurrences are
//! never replayed.

pub mod error;
pub mod recurrence;
pub mod request;
pub mod scheduler;
pub mod service;

pub use error::{Result, ScheduleError};
pub use recurrence::Recurrence;
pub use request::{is_past, local_now, ScheduleRequest};
pub use scheduler::{EventScheduler, FiredEvent, ScheduledEvent};
pub use service::{Clock, SchedulerHandle, SchedulerService, SystemClock, TokioClock};
