//! Network seam between the control point and devices.
//!
//! Everything the control point sends over the wire goes through
//! [`UpnpTransport`], so registry and subscription logic can be exercised
//! against an in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use soap_client::{SoapClient, SubscriptionResponse};
use upnp_discovery::{DeviceInfo, SsdpNotification};

use crate::error::{ControlPointError, Result};

/// Device-facing network operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpnpTransport: Send + Sync + 'static {
    /// Send an SSDP search and collect the responses.
    async fn search(&self, target: &str, timeout: Duration) -> Result<Vec<SsdpNotification>>;

    /// GET and decode a device description.
    async fn fetch_description(&self, location: &str) -> Result<DeviceInfo>;

    /// Open a subscription; the response carries the SID and granted lease.
    async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout: Duration,
    ) -> Result<SubscriptionResponse>;

    /// Renew a subscription; returns the granted lease.
    async fn renew(&self, event_url: &str, sid: &str, timeout: Duration) -> Result<Duration>;

    async fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<()>;

    /// Invoke a SOAP action and return its output arguments.
    async fn call_action(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(String, String)],
    ) -> Result<Vec<(String, String)>>;
}

/// Transport over real sockets.
///
/// The underlying clients are blocking, so every call runs on tokio's
/// blocking pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    soap: SoapClient,
    description_timeout: Duration,
}

impl HttpTransport {
    pub fn new(description_timeout: Duration) -> Self {
        Self {
            soap: SoapClient::new(),
            description_timeout,
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ControlPointError::TaskFailed(e.to_string()))?
}

#[async_trait]
impl UpnpTransport for HttpTransport {
    async fn search(&self, target: &str, timeout: Duration) -> Result<Vec<SsdpNotification>> {
        let target = target.to_string();
        blocking(move || Ok(upnp_discovery::search(&target, timeout)?)).await
    }

    async fn fetch_description(&self, location: &str) -> Result<DeviceInfo> {
        let location = location.to_string();
        let timeout = self.description_timeout;
        blocking(move || Ok(upnp_discovery::fetch_description(&location, timeout)?)).await
    }

    async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout: Duration,
    ) -> Result<SubscriptionResponse> {
        let soap = self.soap.clone();
        let event_url = event_url.to_string();
        let callback_url = callback_url.to_string();
        let secs = lease_seconds(timeout);
        blocking(move || Ok(soap.subscribe(&event_url, &callback_url, secs)?)).await
    }

    async fn renew(&self, event_url: &str, sid: &str, timeout: Duration) -> Result<Duration> {
        let soap = self.soap.clone();
        let event_url = event_url.to_string();
        let sid = sid.to_string();
        let secs = lease_seconds(timeout);
        blocking(move || {
            let granted = soap.renew_subscription(&event_url, &sid, secs)?;
            Ok(Duration::from_secs(u64::from(granted)))
        })
        .await
    }

    async fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<()> {
        let soap = self.soap.clone();
        let event_url = event_url.to_string();
        let sid = sid.to_string();
        blocking(move || Ok(soap.unsubscribe(&event_url, &sid)?)).await
    }

    async fn call_action(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        let soap = self.soap.clone();
        let control_url = control_url.to_string();
        let service_type = service_type.to_string();
        let action = action.to_string();
        let args = args.to_vec();
        blocking(move || {
            let borrowed: Vec<(&str, &str)> = args
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();
            Ok(soap.call_action(&control_url, &service_type, &action, &borrowed)?)
        })
        .await
    }
}

fn lease_seconds(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX)
}
