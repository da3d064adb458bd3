//! Process-wide shared infrastructure handed to every driver.

use std::net::IpAddr;
use std::sync::Arc;

use control_point::{ControlPoint, UpnpTransport};
use tokio::sync::OnceCell;
use tracing::info;
use work_queue::{QueueConfig, QueueRegistry, WorkQueue};

use crate::config::GatewayConfig;
use crate::error::Result;

struct ContextInner {
    config: GatewayConfig,
    queues: QueueRegistry,
    control_point: OnceCell<ControlPoint>,
    transport: Option<Arc<dyn UpnpTransport>>,
    advertised_ip: Option<IpAddr>,
}

/// Shared state for all drivers in one process.
///
/// Clones share the same queues and control point. The control point is
/// started on first use, so drivers that never touch UPnP never open the
/// callback server or the SSDP socket; concurrent first calls start it
/// exactly once.
#[derive(Clone)]
pub struct GatewayContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("queues", &self.inner.queues.names())
            .field("control_point_started", &self.inner.control_point.initialized())
            .finish()
    }
}

impl GatewayContext {
    /// Context with a validated `config`.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::builder().with_config(config).build()
    }

    pub fn builder() -> GatewayContextBuilder {
        GatewayContextBuilder::default()
    }

    /// Gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Named queue with the default queue configuration.
    pub fn queue(&self, name: &str) -> Result<WorkQueue> {
        self.queue_with(name, self.inner.config.default_queue.clone())
    }

    /// Named queue, created with `config` if it does not exist yet.
    pub fn queue_with(&self, name: &str, config: QueueConfig) -> Result<WorkQueue> {
        Ok(self.inner.queues.get_or_create(name, config)?)
    }

    /// Named work queues shared by drivers.
    pub fn queues(&self) -> &QueueRegistry {
        &self.inner.queues
    }

    /// The shared control point, started on first call.
    pub async fn control_point(&self) -> Result<ControlPoint> {
        let inner = &self.inner;
        let control_point = inner
            .control_point
            .get_or_try_init(|| async {
                let mut builder = ControlPoint::builder().with_config(inner.config.control_point.clone());
                if let Some(transport) = &inner.transport {
                    builder = builder.with_transport(Arc::clone(transport));
                }
                if let Some(ip) = inner.advertised_ip {
                    builder = builder.with_advertised_ip(ip);
                }
                let control_point = builder.build().await?;
                info!("Shared control point started");
                Ok::<_, crate::error::GatewayError>(control_point)
            })
            .await?;
        Ok(control_point.clone())
    }

    /// The control point if something already started it.
    pub fn started_control_point(&self) -> Option<ControlPoint> {
        self.inner.control_point.get().cloned()
    }

    /// Shut down the control point, if it was started.
    pub async fn shutdown(&self) {
        if let Some(control_point) = self.inner.control_point.get() {
            control_point.shutdown().await;
        }
    }
}

/// Builder for [`GatewayContext`].
#[derive(Default)]
pub struct GatewayContextBuilder {
    config: GatewayConfig,
    transport: Option<Arc<dyn UpnpTransport>>,
    advertised_ip: Option<IpAddr>,
}

impl GatewayContextBuilder {
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Network transport for the control point.
    pub fn with_transport(mut self, transport: Arc<dyn UpnpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Address advertised in event callback URLs.
    pub fn with_advertised_ip(mut self, ip: IpAddr) -> Self {
        self.advertised_ip = Some(ip);
        self
    }

    pub fn build(self) -> Result<GatewayContext> {
        self.config.validate()?;
        Ok(GatewayContext {
            inner: Arc::new(ContextInner {
                config: self.config,
                queues: QueueRegistry::new(),
                control_point: OnceCell::new(),
                transport: self.transport,
                advertised_ip: self.advertised_ip,
            }),
        })
    }
}
