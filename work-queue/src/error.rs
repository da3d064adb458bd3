//! Error types for the work queue.

use thiserror::Error;

/// Errors raised while building queues.
///
/// Running items never produce errors through the queue: a `run` body that
/// fails is expected to log and then finish its completion.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue configuration is unusable
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience type alias for Results using QueueError.
pub type Result<T> = std::result::Result<T, QueueError>;
