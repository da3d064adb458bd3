use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Control point error: {0}")]
    ControlPoint(#[from] control_point::ControlPointError),

    #[error("Work queue error: {0}")]
    Queue(#[from] work_queue::QueueError),

    #[error("Scheduler error: {0}")]
    Schedule(#[from] event_scheduler::ScheduleError),

    #[error("Driver {driver} failed: {reason}")]
    Driver { driver: String, reason: String },

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl GatewayError {
    /// Failure reported by a driver implementation.
    pub fn driver(driver: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Driver {
            driver: driver.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
