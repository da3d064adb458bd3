//! # devgate
//!
//! Core of a device-integration gateway. Device drivers implement the
//! [`Driver`] trait and share three pieces of infrastructure through a
//! [`GatewayContext`]:
//!
//! - named [`WorkQueue`]s that serialise outbound requests to a device or
//!   API (FIFO, at most N in flight, replaceable by id),
//! - a lazily started UPnP [`ControlPoint`] with a live device registry and
//!   self-renewing event subscriptions,
//! - the [`event_scheduler`] timer engine for alarm and timer drivers.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use devgate::{Gateway, GatewayConfig, GatewayContext};
//!
//! # async fn example(driver: Arc<dyn devgate::Driver>) -> devgate::Result<()> {
//! devgate::logging::init_logging_from_env().ok();
//!
//! let context = GatewayContext::new(GatewayConfig::default())?;
//! let mut gateway = Gateway::new(context);
//! gateway.register(driver)?;
//! gateway.start().await;
//! gateway.start_discovery().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod discovery;
mod driver;
mod error;
mod gateway;
pub mod logging;

pub use config::{GatewayConfig, RECOMMENDED_SCRUB_RATIO};
pub use context::{GatewayContext, GatewayContextBuilder};
pub use discovery::DiscoveryLoop;
pub use driver::{Driver, DriverIdentity};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;

pub use control_point::{ControlPoint, ControlPointConfig, ControlPointEvent, Device, Service, ServiceEvent};
pub use work_queue::{Completion, QueueConfig, WorkItem, WorkQueue};

pub use control_point;
pub use event_scheduler;
pub use work_queue;
