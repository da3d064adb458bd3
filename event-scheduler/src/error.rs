//! Error types for the scheduler.

use thiserror::Error;

/// Reasons a schedule request was not accepted.
///
/// These are reported to the caller and logged; the scheduler itself keeps
/// running and the rejected event is simply not scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The calendar fields do not name a real instant
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// The timezone offset is out of range
    #[error("Invalid timezone offset: {0} minutes")]
    InvalidOffset(i32),

    /// The fire time (after one recurrence step, if any) lies in the past
    #[error("Fire time {0} is in the past")]
    InPast(String),

    /// The scheduler service task is no longer running
    #[error("Scheduler service stopped")]
    ServiceStopped,
}

/// Convenience type alias for Results using ScheduleError.
pub type Result<T> = std::result::Result<T, ScheduleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ScheduleError::InvalidDate("2024-02-30".to_string()).to_string(),
            "Invalid date: 2024-02-30"
        );
        assert_eq!(
            ScheduleError::InvalidOffset(5000).to_string(),
            "Invalid timezone offset: 5000 minutes"
        );
        assert_eq!(ScheduleError::ServiceStopped.to_string(), "Scheduler service stopped");
    }
}
