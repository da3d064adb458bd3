//! Driver host: owns the registered drivers and the discovery loop.

use std::sync::Arc;

use tracing::{info, warn};

use crate::context::GatewayContext;
use crate::discovery::DiscoveryLoop;
use crate::driver::{Driver, DriverIdentity};
use crate::error::{GatewayError, Result};

/// A set of drivers sharing one [`GatewayContext`].
pub struct Gateway {
    context: GatewayContext,
    drivers: Vec<Arc<dyn Driver>>,
    discovery: Option<DiscoveryLoop>,
}

impl Gateway {
    pub fn new(context: GatewayContext) -> Self {
        Self {
            context,
            drivers: Vec::new(),
            discovery: None,
        }
    }

    /// Shared context handed to every driver.
    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    /// Add a driver. Ids must be unique.
    pub fn register(&mut self, driver: Arc<dyn Driver>) -> Result<()> {
        let identity = driver.identity();
        if self.driver(&identity.id).is_some() {
            return Err(GatewayError::driver(identity.id, "a driver with this id is already registered"));
        }
        self.drivers.push(driver);
        Ok(())
    }

    /// Driver registered under `id`.
    pub fn driver(&self, id: &str) -> Option<&Arc<dyn Driver>> {
        self.drivers.iter().find(|driver| driver.identity().id == id)
    }

    /// Identity of every registered driver.
    pub fn identities(&self) -> Vec<DriverIdentity> {
        self.drivers.iter().map(|driver| driver.identity()).collect()
    }

    /// Run `setup` on every driver.
    ///
    /// A driver whose setup fails is logged and removed; the rest keep
    /// running. Returns the number of drivers left.
    pub async fn start(&mut self) -> usize {
        let mut ready = Vec::with_capacity(self.drivers.len());
        for driver in self.drivers.drain(..) {
            let identity = driver.identity();
            match driver.setup(&self.context).await {
                Ok(()) => {
                    info!(driver = %identity.id, kind = %identity.kind, "Driver ready");
                    ready.push(driver);
                }
                Err(e) => warn!(driver = %identity.id, error = %e, "Driver setup failed, skipping"),
            }
        }
        self.drivers = ready;
        self.drivers.len()
    }

    /// Start the periodic UPnP search/scrub loop, starting the shared
    /// control point if needed. Calling it again is a no-op.
    pub async fn start_discovery(&mut self) -> Result<()> {
        if self.discovery.is_some() {
            return Ok(());
        }
        let control_point = self.context.control_point().await?;
        let config = self.context.config();
        self.discovery = Some(DiscoveryLoop::spawn(
            control_point,
            config.search_interval,
            config.scrub_max_age,
        ));
        Ok(())
    }

    /// Ask every driver for devices it can handle.
    ///
    /// Failing drivers are logged and contribute nothing.
    pub async fn discover_all(&self) -> Vec<DriverIdentity> {
        let mut found = Vec::new();
        for driver in &self.drivers {
            match driver.discover(&self.context).await {
                Ok(devices) => found.extend(devices),
                Err(e) => warn!(driver = %driver.identity().id, error = %e, "Driver discovery failed"),
            }
        }
        found
    }

    /// Stop discovery and the shared control point.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(discovery) = self.discovery.take() {
            discovery.shutdown().await?;
        }
        self.context.shutdown().await;
        Ok(())
    }
}
