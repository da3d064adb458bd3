//! Queue configuration.

use crate::error::{QueueError, Result};

/// Pending depth above which every enqueue logs a warning.
pub const DEFAULT_DEPTH_WARNING: usize = 10;

/// Configuration for a [`WorkQueue`](crate::WorkQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of items running at the same time
    /// Default: 1
    pub concurrency: usize,

    /// Pending length above which a depth warning is logged
    /// Default: 10
    pub depth_warning: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            depth_warning: DEFAULT_DEPTH_WARNING,
        }
    }
}

impl QueueConfig {
    /// Create a QueueConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_depth_warning(mut self, depth: usize) -> Self {
        self.depth_warning = depth;
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(QueueError::InvalidConfig(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
