//! The driver abstraction implemented by every device integration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::GatewayContext;
use crate::error::Result;

/// What a driver (or a device it found) is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverIdentity {
    /// Stable identifier, unique within the gateway
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Driver family, e.g. `upnp-light` or `alarm`
    pub kind: String,
}

impl DriverIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// A device integration.
///
/// Only [`identity`](Driver::identity) is required. The other capabilities
/// default to doing nothing, so a read-only sensor implements `pull`, an
/// actuator implements `push`, and so on. Drivers keep their own handles to
/// shared infrastructure (queues, the control point) obtained from the
/// [`GatewayContext`] passed to [`setup`](Driver::setup).
#[async_trait]
pub trait Driver: Send + Sync {
    fn identity(&self) -> DriverIdentity;

    /// Acquire resources. Called once before any other capability.
    async fn setup(&self, _context: &GatewayContext) -> Result<()> {
        Ok(())
    }

    /// Send `payload` to the device.
    async fn push(&self, _payload: Value) -> Result<()> {
        Ok(())
    }

    /// Read the device's current state, if it has any to report.
    async fn pull(&self) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Look for devices this driver can handle.
    async fn discover(&self, _context: &GatewayContext) -> Result<Vec<DriverIdentity>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    struct Minimal;

    impl Driver for Minimal {
        fn identity(&self) -> DriverIdentity {
            DriverIdentity::new("minimal-1", "Minimal", "test")
        }
    }

    #[tokio::test]
    async fn test_default_capabilities_are_no_ops() {
        let context = GatewayContext::new(GatewayConfig::default()).unwrap();
        let driver = Minimal;

        assert!(driver.setup(&context).await.is_ok());
        assert!(driver.push(serde_json::json!({"on": true})).await.is_ok());
        assert_eq!(driver.pull().await.unwrap(), None);
        assert!(driver.discover(&context).await.unwrap().is_empty());
    }

    #[test]
    fn test_identity_serializes() {
        let identity = DriverIdentity::new("lamp-1", "Desk lamp", "upnp-light");
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "lamp-1", "name": "Desk lamp", "kind": "upnp-light"})
        );
    }
}
