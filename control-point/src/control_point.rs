//! The control point: discovery, the device registry and device lifecycle.

use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use callback_server::{CallbackServer, EventRouter, NotificationPayload};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use upnp_discovery::SsdpNotification;

use crate::config::ControlPointConfig;
use crate::device::Device;
use crate::error::Result;
use crate::listener;
use crate::registry::{DeviceRegistry, Observation, Settled};
use crate::subscription::SubscriptionManager;
use crate::transport::{HttpTransport, UpnpTransport};

/// Device lifecycle notifications.
#[derive(Debug, Clone)]
pub enum ControlPointEvent {
    /// A device's description was fetched and it is now live.
    DeviceFound(Arc<Device>),
    /// A device left the registry (byebye, scrub or explicit forget).
    DeviceLost(String),
}

struct Inner {
    config: ControlPointConfig,
    transport: Arc<dyn UpnpTransport>,
    registry: DeviceRegistry,
    subscriptions: SubscriptionManager,
    events: broadcast::Sender<ControlPointEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    callback_server: tokio::sync::Mutex<Option<CallbackServer>>,
}

/// UPnP control point.
///
/// Cheap to clone; clones share one registry. Announcements (from
/// [`search`](ControlPoint::search) responses or the multicast listener)
/// drive each UDN through `holding -> live`, and the resulting
/// [`ControlPointEvent`]s are broadcast to every receiver from
/// [`events`](ControlPoint::events).
///
/// ```no_run
/// use control_point::{ControlPoint, ControlPointEvent};
///
/// # async fn example() -> control_point::Result<()> {
/// let control_point = ControlPoint::builder().build().await?;
/// let mut events = control_point.events();
/// control_point.search().await?;
///
/// while let Ok(event) = events.recv().await {
///     if let ControlPointEvent::DeviceFound(device) = event {
///         tracing::info!(udn = device.udn(), "found {}", device.friendly_name());
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ControlPoint {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ControlPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPoint")
            .field("devices", &self.inner.registry.len())
            .field("subscriptions", &self.inner.subscriptions)
            .finish()
    }
}

impl ControlPoint {
    pub fn builder() -> ControlPointBuilder {
        ControlPointBuilder::new()
    }

    /// Assemble a control point around an externally owned callback receiver.
    ///
    /// `router` must be the router feeding `notifications`, and
    /// `callback_url` the address devices should send NOTIFY requests to.
    /// No multicast listener is started.
    pub fn with_parts(
        config: ControlPointConfig,
        transport: Arc<dyn UpnpTransport>,
        router: Arc<EventRouter>,
        notifications: mpsc::UnboundedReceiver<NotificationPayload>,
        callback_url: impl Into<String>,
    ) -> Self {
        let subscriptions = SubscriptionManager::new(
            Arc::clone(&transport),
            router,
            callback_url,
            config.clone(),
        );
        let dispatcher = subscriptions.spawn_dispatcher(notifications);
        let (events, _) = broadcast::channel(config.device_event_capacity);

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                registry: DeviceRegistry::new(),
                subscriptions,
                events,
                tasks: Mutex::new(vec![dispatcher]),
                callback_server: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Receive device found/lost events from now on.
    pub fn events(&self) -> broadcast::Receiver<ControlPointEvent> {
        self.inner.events.subscribe()
    }

    /// Configuration the control point was built with.
    pub fn config(&self) -> &ControlPointConfig {
        &self.inner.config
    }

    /// Subscriptions held by this control point.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    /// Devices known to this control point.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    /// Live device by UDN.
    pub fn device(&self, udn: &str) -> Option<Arc<Device>> {
        self.inner.registry.get(udn)
    }

    /// Snapshot of every live device.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.inner.registry.live_devices()
    }

    /// Send an SSDP search; responses are handled like announcements.
    ///
    /// Returns how many responses arrived.
    pub async fn search(&self) -> Result<usize> {
        let config = &self.inner.config;
        let responses = self
            .inner
            .transport
            .search(&config.search_target, config.search_timeout)
            .await?;

        let count = responses.len();
        for response in responses {
            self.handle_notification(response);
        }
        debug!(responses = count, "Search complete");
        Ok(count)
    }

    /// React to one SSDP message.
    ///
    /// Presence messages refresh a live device, are ignored while its
    /// description is loading, and otherwise start a fetch; the handle of
    /// that fetch is returned. Byebye removes the device without forgetting
    /// it, so its subscriptions stay open.
    pub fn handle_notification(&self, notification: SsdpNotification) -> Option<JoinHandle<()>> {
        let udn = notification.udn();
        if udn.is_empty() {
            trace!(usn = %notification.usn, "Ignoring notification without UDN");
            return None;
        }

        if !notification.kind.is_presence() {
            self.depart(udn);
            return None;
        }

        match self.inner.registry.observe(udn) {
            Observation::Live(device) => {
                device.seen();
                None
            }
            Observation::Holding => {
                trace!(udn, "Description fetch already in flight");
                None
            }
            Observation::Claimed => {
                let udn = udn.to_string();
                let Some(location) = notification.location else {
                    debug!(udn = %udn, "Announcement without LOCATION");
                    self.inner.registry.release(&udn);
                    return None;
                };
                let control_point = self.clone();
                Some(tokio::spawn(async move {
                    control_point.load(udn, location).await;
                }))
            }
        }
    }

    async fn load(&self, udn: String, location: String) {
        let info = match self.inner.transport.fetch_description(&location).await {
            Ok(info) if info.describes(&udn) => info,
            Ok(info) => {
                warn!(udn = %udn, described = info.udn(), location = %location, "Description does not list the announced UDN");
                self.inner.registry.release(&udn);
                return;
            }
            Err(e) => {
                // The next announcement for this UDN retries.
                warn!(udn = %udn, location = %location, error = %e, "Failed to load device description");
                self.inner.registry.release(&udn);
                return;
            }
        };

        let device = Device::from_info(
            info,
            &self.inner.subscriptions,
            Arc::clone(&self.inner.transport),
        );
        match self.inner.registry.complete(&udn, Arc::clone(&device)) {
            Settled::Added => {
                info!(
                    udn = %device.udn(),
                    announced = %udn,
                    name = %device.friendly_name(),
                    services = device.services().len(),
                    "Device found"
                );
                let _ = self.inner.events.send(ControlPointEvent::DeviceFound(device));
            }
            Settled::Joined(root) => {
                debug!(udn = %udn, root = %root.udn(), "Embedded device of a live device");
                root.seen();
            }
            Settled::Deferred => {
                debug!(udn = %udn, root = %device.udn(), "Embedded device waits for its root description");
            }
            Settled::Departed => {
                debug!(udn = %udn, "Device departed while its description loaded");
            }
        }
    }

    fn depart(&self, udn: &str) {
        if self.inner.registry.remove(udn).is_some() {
            info!(udn, "Device left the network");
            let _ = self
                .inner
                .events
                .send(ControlPointEvent::DeviceLost(udn.to_string()));
        }
    }

    /// Remove `device`, announce it lost and close all its subscriptions.
    pub async fn forget(&self, device: &Arc<Device>) {
        if self.inner.registry.remove_device(device) {
            let _ = self
                .inner
                .events
                .send(ControlPointEvent::DeviceLost(device.udn().to_string()));
        }
        device.forget().await;
    }

    /// Forget every device not seen for longer than `max_age`.
    ///
    /// Returns the UDNs that were dropped.
    pub async fn scrub(&self, max_age: Duration) -> Vec<String> {
        let stale: Vec<Arc<Device>> = self
            .inner
            .registry
            .live_devices()
            .into_iter()
            .filter(|device| device.age() > max_age)
            .collect();

        let mut dropped = Vec::with_capacity(stale.len());
        for device in stale {
            debug!(udn = device.udn(), age_secs = device.age().as_secs(), "Scrubbing stale device");
            self.forget(&device).await;
            dropped.push(device.udn().to_string());
        }
        dropped
    }

    /// Stop background tasks, close subscriptions and the callback server.
    pub async fn shutdown(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.subscriptions.shutdown().await;
        if let Some(server) = self.inner.callback_server.lock().await.take() {
            server.shutdown().await;
        }
        info!("Control point stopped");
    }

    pub(crate) fn downgrade(&self) -> WeakControlPoint {
        WeakControlPoint(Arc::downgrade(&self.inner))
    }

    fn add_task(&self, task: JoinHandle<()>) {
        self.inner.tasks.lock().push(task);
    }
}

/// Non-owning handle held by background tasks.
#[derive(Clone)]
pub(crate) struct WeakControlPoint(Weak<Inner>);

impl WeakControlPoint {
    pub(crate) fn upgrade(&self) -> Option<ControlPoint> {
        self.0.upgrade().map(|inner| ControlPoint { inner })
    }
}

/// Builder for a network-backed [`ControlPoint`].
#[derive(Default)]
pub struct ControlPointBuilder {
    config: ControlPointConfig,
    transport: Option<Arc<dyn UpnpTransport>>,
    advertised_ip: Option<IpAddr>,
}

impl ControlPointBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ControlPointConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the HTTP/SSDP transport.
    pub fn with_transport(mut self, transport: Arc<dyn UpnpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Address advertised in callback URLs instead of the detected LAN IP.
    pub fn with_advertised_ip(mut self, ip: IpAddr) -> Self {
        self.advertised_ip = Some(ip);
        self
    }

    /// Start the callback server and, if enabled, the announcement listener.
    pub async fn build(self) -> Result<ControlPoint> {
        self.config.validate()?;

        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(HttpTransport::new(self.config.description_timeout)) as Arc<dyn UpnpTransport>
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let server = match self.advertised_ip {
            Some(ip) => {
                CallbackServer::with_advertised_ip(self.config.callback_port_range, ip, tx).await?
            }
            None => CallbackServer::new(self.config.callback_port_range, tx).await?,
        };

        let control_point = ControlPoint::with_parts(
            self.config,
            transport,
            Arc::clone(server.router()),
            rx,
            server.callback_url(),
        );
        *control_point.inner.callback_server.lock().await = Some(server);

        if control_point.config().listen_for_announcements {
            control_point.add_task(listener::spawn(&control_point));
        }

        info!(
            callback_url = control_point.subscriptions().callback_url(),
            "Control point started"
        );
        Ok(control_point)
    }
}
