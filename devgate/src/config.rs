//! Gateway-wide configuration.

use std::time::Duration;

use control_point::ControlPointConfig;
use tracing::warn;
use work_queue::QueueConfig;

use crate::error::{GatewayError, Result};

/// Scrub age to search interval ratio below which a single missed
/// announcement may evict a healthy device.
pub const RECOMMENDED_SCRUB_RATIO: u32 = 3;

/// Configuration for a [`GatewayContext`](crate::GatewayContext).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How often the discovery loop re-issues an SSDP search
    /// Default: 60 seconds
    pub search_interval: Duration,

    /// Devices silent for longer than this are forgotten
    /// Default: 180 seconds
    pub scrub_max_age: Duration,

    /// Settings for the lazily started control point
    pub control_point: ControlPointConfig,

    /// Used by [`GatewayContext::queue`](crate::GatewayContext::queue)
    /// Default: one item at a time
    pub default_queue: QueueConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            search_interval: Duration::from_secs(60),
            scrub_max_age: Duration::from_secs(180),
            control_point: ControlPointConfig::default(),
            default_queue: QueueConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the configuration.
    ///
    /// A scrub age that does not exceed the search interval is rejected;
    /// one below three search intervals is accepted with a warning.
    pub fn validate(&self) -> Result<()> {
        if self.search_interval.is_zero() {
            return Err(GatewayError::Configuration(
                "Search interval must be greater than 0".to_string(),
            ));
        }

        if self.scrub_max_age <= self.search_interval {
            return Err(GatewayError::Configuration(format!(
                "Scrub max age ({}s) must exceed the search interval ({}s)",
                self.scrub_max_age.as_secs(),
                self.search_interval.as_secs()
            )));
        }

        if self.scrub_max_age < self.search_interval * RECOMMENDED_SCRUB_RATIO {
            warn!(
                scrub_max_age_secs = self.scrub_max_age.as_secs(),
                search_interval_secs = self.search_interval.as_secs(),
                "Scrub max age is less than {} search intervals; a missed announcement may evict a live device",
                RECOMMENDED_SCRUB_RATIO
            );
        }

        self.control_point.validate()?;
        self.default_queue.validate()?;
        Ok(())
    }

    pub fn with_search_interval(mut self, interval: Duration) -> Self {
        self.search_interval = interval;
        self
    }

    pub fn with_scrub_max_age(mut self, max_age: Duration) -> Self {
        self.scrub_max_age = max_age;
        self
    }

    pub fn with_control_point(mut self, config: ControlPointConfig) -> Self {
        self.control_point = config;
        self
    }

    pub fn with_default_queue(mut self, config: QueueConfig) -> Self {
        self.default_queue = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert_eq!(config.scrub_max_age, config.search_interval * 3);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case(60, 180, true)]
    #[case(60, 600, true)]
    #[case(60, 90, true)]
    #[case(60, 60, false)]
    #[case(60, 30, false)]
    #[case(0, 30, false)]
    fn test_scrub_must_exceed_interval(
        #[case] interval_secs: u64,
        #[case] scrub_secs: u64,
        #[case] valid: bool,
    ) {
        let config = GatewayConfig::new()
            .with_search_interval(Duration::from_secs(interval_secs))
            .with_scrub_max_age(Duration::from_secs(scrub_secs));
        assert_eq!(config.validate().is_ok(), valid);
    }

    #[test]
    fn test_nested_config_is_validated() {
        let config = GatewayConfig::new()
            .with_control_point(ControlPointConfig::default().with_callback_ports(4000, 3000));
        assert!(matches!(config.validate(), Err(GatewayError::ControlPoint(_))));

        let config = GatewayConfig::new().with_default_queue(QueueConfig::new().with_concurrency(0));
        assert!(matches!(config.validate(), Err(GatewayError::Queue(_))));
    }
}
