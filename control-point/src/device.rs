//! Live devices and their services.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};
use upnp_discovery::{DeviceDescription, DeviceInfo, ServiceEndpoint};

use crate::error::{ControlPointError, Result};
use crate::subscription::{ServiceEvent, SubscriptionManager};
use crate::transport::UpnpTransport;

/// A device whose description has been fetched.
///
/// Devices are shared as `Arc<Device>`; the registry, drivers and the
/// control point's event stream all hold the same instance. Once
/// [`forget`](Device::forget) has run the device is inert: its services
/// refuse new work and their subscriptions are closed.
pub struct Device {
    udn: String,
    location: String,
    host: String,
    port: u16,
    description: DeviceDescription,
    services: Vec<Arc<Service>>,
    last_seen: Mutex<Instant>,
    forgotten: AtomicBool,
}

impl Device {
    /// Build a device and its services from a fetched description.
    pub fn from_info(
        info: DeviceInfo,
        subscriptions: &SubscriptionManager,
        transport: Arc<dyn UpnpTransport>,
    ) -> Arc<Self> {
        let udn = info.udn().to_string();
        let services = info
            .services
            .into_iter()
            .map(|endpoint| {
                Arc::new(Service::new(
                    &udn,
                    endpoint,
                    subscriptions.clone(),
                    Arc::clone(&transport),
                ))
            })
            .collect();

        Arc::new(Self {
            udn,
            location: info.location,
            host: info.host,
            port: info.port,
            description: info.description,
            services,
            last_seen: Mutex::new(Instant::now()),
            forgotten: AtomicBool::new(false),
        })
    }

    /// Unique device name, e.g. `uuid:...`.
    pub fn udn(&self) -> &str {
        &self.udn
    }

    /// URL the description was fetched from.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Host part of the description URL.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port of the description URL.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parsed device description.
    pub fn description(&self) -> &DeviceDescription {
        &self.description
    }

    /// Human-readable name from the description.
    pub fn friendly_name(&self) -> &str {
        &self.description.friendly_name
    }

    /// UPnP device type URN.
    pub fn device_type(&self) -> &str {
        &self.description.device_type
    }

    /// Services of the device and its embedded devices.
    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    /// Look up a service by full id (`urn:upnp-org:serviceId:AVTransport`)
    /// or by its last segment (`AVTransport`).
    pub fn service(&self, id: &str) -> Option<&Arc<Service>> {
        self.services
            .iter()
            .find(|service| service.service_id == id)
            .or_else(|| {
                self.services
                    .iter()
                    .find(|service| service.service_id.rsplit(':').next() == Some(id))
            })
    }

    /// Look up a service by service type, e.g.
    /// `urn:schemas-upnp-org:service:RenderingControl:1`.
    pub fn service_by_type(&self, service_type: &str) -> Option<&Arc<Service>> {
        self.services
            .iter()
            .find(|service| service.service_type == service_type)
    }

    /// Refresh the liveness timestamp.
    pub fn seen(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// When the device last announced itself or answered a search.
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// Time since the device was last announced.
    pub fn age(&self) -> std::time::Duration {
        Instant::now().saturating_duration_since(self.last_seen())
    }

    /// True once the device has been forgotten.
    pub fn is_forgotten(&self) -> bool {
        self.forgotten.load(Ordering::SeqCst)
    }

    /// Forget every service, closing their subscriptions.
    ///
    /// Idempotent; only the first call does any work.
    pub async fn forget(&self) {
        if self.forgotten.swap(true, Ordering::SeqCst) {
            return;
        }
        for service in &self.services {
            service.forget().await;
        }
        info!(udn = %self.udn, name = %self.description.friendly_name, "Device forgotten");
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("udn", &self.udn)
            .field("friendly_name", &self.description.friendly_name)
            .field("location", &self.location)
            .field("services", &self.services.len())
            .field("forgotten", &self.is_forgotten())
            .finish()
    }
}

/// Subscription state of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SubscriptionSlot {
    Idle,
    /// A SUBSCRIBE request is in flight
    Subscribing,
    Active(String),
}

/// Puts a `Subscribing` slot back to `Idle` unless the subscribe call
/// settled it, including when the call's future is dropped mid-request.
struct SlotReservation<'a> {
    slot: &'a Mutex<SubscriptionSlot>,
    armed: bool,
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.slot.lock();
        if *slot == SubscriptionSlot::Subscribing {
            *slot = SubscriptionSlot::Idle;
        }
    }
}

/// One service of a device.
pub struct Service {
    device_udn: String,
    service_type: String,
    service_id: String,
    scpd_url: String,
    control_url: String,
    event_sub_url: String,
    slot: Mutex<SubscriptionSlot>,
    forgotten: AtomicBool,
    subscriptions: SubscriptionManager,
    transport: Arc<dyn UpnpTransport>,
}

impl Service {
    fn new(
        device_udn: &str,
        endpoint: ServiceEndpoint,
        subscriptions: SubscriptionManager,
        transport: Arc<dyn UpnpTransport>,
    ) -> Self {
        Self {
            device_udn: device_udn.to_string(),
            service_type: endpoint.service_type,
            service_id: endpoint.service_id,
            scpd_url: endpoint.scpd_url,
            control_url: endpoint.control_url,
            event_sub_url: endpoint.event_sub_url,
            slot: Mutex::new(SubscriptionSlot::Idle),
            forgotten: AtomicBool::new(false),
            subscriptions,
            transport,
        }
    }

    /// UDN of the owning device.
    pub fn device_udn(&self) -> &str {
        &self.device_udn
    }

    /// Full service type URN, e.g. `urn:schemas-upnp-org:service:RenderingControl:1`.
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Service id as written in the description.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Absolute URL of the service description (SCPD).
    pub fn scpd_url(&self) -> &str {
        &self.scpd_url
    }

    /// Absolute URL receiving SOAP actions.
    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    /// Absolute URL for event subscriptions, `None` if the service has no
    /// evented variables.
    pub fn event_sub_url(&self) -> Option<&str> {
        Some(self.event_sub_url.as_str()).filter(|url| !url.is_empty())
    }

    /// SID of the current subscription, if it is still active.
    pub fn subscription_id(&self) -> Option<String> {
        match &*self.slot.lock() {
            SubscriptionSlot::Active(sid) if self.subscriptions.is_active(sid) => Some(sid.clone()),
            _ => None,
        }
    }

    /// Whether the owning device has been forgotten.
    pub fn is_forgotten(&self) -> bool {
        self.forgotten.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_forgotten() {
            return Err(ControlPointError::DeviceForgotten(self.device_udn.clone()));
        }
        Ok(())
    }

    /// Subscribe to the service's evented state variables.
    ///
    /// State changes arrive on the returned channel. If the subscription is
    /// lost (renewal failure, device forgotten) a final
    /// [`ServiceEvent::SubscriptionLost`] is delivered and the channel closes.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<ServiceEvent>> {
        self.ensure_live()?;
        let event_url = self
            .event_sub_url()
            .ok_or_else(|| ControlPointError::NotEventable(self.service_id.clone()))?;

        {
            let mut slot = self.slot.lock();
            match &*slot {
                SubscriptionSlot::Subscribing => {
                    return Err(ControlPointError::SubscribeInProgress(self.service_id.clone()));
                }
                SubscriptionSlot::Active(sid) if self.subscriptions.is_active(sid) => {
                    return Err(ControlPointError::AlreadySubscribed {
                        service_id: self.service_id.clone(),
                        sid: sid.clone(),
                    });
                }
                _ => *slot = SubscriptionSlot::Subscribing,
            }
        }
        let mut reservation = SlotReservation {
            slot: &self.slot,
            armed: true,
        };

        let (sid, events) = self
            .subscriptions
            .subscribe(&self.device_udn, &self.service_id, event_url)
            .await?;

        let accepted = {
            let mut slot = self.slot.lock();
            reservation.armed = false;
            if self.is_forgotten() {
                *slot = SubscriptionSlot::Idle;
                false
            } else {
                *slot = SubscriptionSlot::Active(sid.clone());
                true
            }
        };

        if !accepted {
            // Forgotten while the SUBSCRIBE was in flight.
            self.subscriptions.unsubscribe(&sid).await;
            return Err(ControlPointError::DeviceForgotten(self.device_udn.clone()));
        }
        Ok(events)
    }

    /// Cancel the current subscription, if any. Failures are logged only.
    pub async fn unsubscribe(&self) {
        if let Some(sid) = self.take_active() {
            self.subscriptions.unsubscribe(&sid).await;
        }
    }

    fn take_active(&self) -> Option<String> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, SubscriptionSlot::Idle) {
            SubscriptionSlot::Active(sid) => Some(sid),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Invoke `action` with `args` and return its output arguments in
    /// response order.
    pub async fn call_action(
        &self,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<Vec<(String, String)>> {
        self.ensure_live()?;
        let args: Vec<(String, String)> = args
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        debug!(service_id = %self.service_id, action, "Calling action");
        self.transport
            .call_action(&self.control_url, &self.service_type, action, &args)
            .await
    }

    pub(crate) async fn forget(&self) {
        self.forgotten.store(true, Ordering::SeqCst);
        if let Some(sid) = self.take_active() {
            self.subscriptions.close(&sid, "device forgotten").await;
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("service_id", &self.service_id)
            .field("service_type", &self.service_type)
            .field("control_url", &self.control_url)
            .field("event_sub_url", &self.event_sub_url)
            .finish_non_exhaustive()
    }
}
