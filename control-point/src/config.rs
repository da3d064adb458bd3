//! Configuration for the control point.

use std::time::Duration;

use crate::error::{ControlPointError, Result};

/// Lead time before lease expiry at which a subscription is renewed.
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(5);

/// Control point configuration.
#[derive(Debug, Clone)]
pub struct ControlPointConfig {
    /// Port range for the callback server
    /// Default: (3400, 3500)
    pub callback_port_range: (u16, u16),

    /// Lease requested on SUBSCRIBE and renewal
    /// Default: 1800 seconds
    pub subscription_timeout: Duration,

    /// Renewal fires this long before the granted lease runs out
    /// Default: 5 seconds
    pub renewal_margin: Duration,

    /// Timeout for fetching a device description
    /// Default: 5 seconds
    pub description_timeout: Duration,

    /// SSDP search target used by `search()`
    /// Default: "ssdp:all"
    pub search_target: String,

    /// How long `search()` collects responses
    /// Default: 3 seconds
    pub search_timeout: Duration,

    /// Capacity of each service's event channel
    /// Default: 100
    pub event_buffer_size: usize,

    /// Capacity of the device found/lost broadcast
    /// Default: 64
    pub device_event_capacity: usize,

    /// Join the SSDP multicast group and react to NOTIFY announcements
    /// Default: true
    pub listen_for_announcements: bool,
}

impl Default for ControlPointConfig {
    fn default() -> Self {
        Self {
            callback_port_range: (3400, 3500),
            subscription_timeout: Duration::from_secs(1800),
            renewal_margin: DEFAULT_RENEWAL_MARGIN,
            description_timeout: Duration::from_secs(5),
            search_target: "ssdp:all".to_string(),
            search_timeout: Duration::from_secs(3),
            event_buffer_size: 100,
            device_event_capacity: 64,
            listen_for_announcements: true,
        }
    }
}

impl ControlPointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.callback_port_range.0 > self.callback_port_range.1 {
            return Err(ControlPointError::Configuration(
                "Invalid callback port range: start must not exceed end".to_string(),
            ));
        }

        if self.subscription_timeout <= self.renewal_margin {
            return Err(ControlPointError::Configuration(
                "Subscription timeout must exceed the renewal margin".to_string(),
            ));
        }

        if self.event_buffer_size == 0 || self.device_event_capacity == 0 {
            return Err(ControlPointError::Configuration(
                "Event buffer sizes must be greater than 0".to_string(),
            ));
        }

        if self.search_target.trim().is_empty() {
            return Err(ControlPointError::Configuration(
                "Search target must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Delay before renewing a lease of `granted`.
    ///
    /// `granted - margin`, never less than one second.
    pub fn renewal_delay(&self, granted: Duration) -> Duration {
        granted
            .saturating_sub(self.renewal_margin)
            .max(Duration::from_secs(1))
    }

    pub fn with_callback_ports(mut self, start: u16, end: u16) -> Self {
        self.callback_port_range = (start, end);
        self
    }

    pub fn with_subscription_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_timeout = timeout;
        self
    }

    pub fn with_search_target(mut self, target: impl Into<String>) -> Self {
        self.search_target = target.into();
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn with_announcement_listener(mut self, enabled: bool) -> Self {
        self.listen_for_announcements = enabled;
        self
    }
}
