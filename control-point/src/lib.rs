//! # devgate-control-point
//!
//! UPnP control point for the device gateway.
//!
//! The [`ControlPoint`] keeps a registry of devices keyed by UDN. An
//! announcement for an unknown UDN puts it in a `holding` state while the
//! description is fetched, so repeated announcements never start a second
//! fetch. Once loaded the device is live; each further announcement only
//! refreshes its last-seen time, and [`ControlPoint::scrub`] forgets devices
//! that have gone quiet.
//!
//! Each [`Service`] of a live device can invoke SOAP actions and hold one
//! GENA subscription. Subscriptions renew themselves shortly before their
//! lease expires; a failed renewal ends the subscription and is reported on
//! the service's event channel as [`ServiceEvent::SubscriptionLost`].
//!
//! All network traffic goes through the [`UpnpTransport`] trait, with
//! [`HttpTransport`] as the real implementation.

mod config;
mod control_point;
mod device;
mod error;
mod listener;
pub mod propertyset;
mod registry;
mod subscription;
mod transport;

pub use config::{ControlPointConfig, DEFAULT_RENEWAL_MARGIN};
pub use control_point::{ControlPoint, ControlPointBuilder, ControlPointEvent};
pub use device::{Device, Service};
pub use error::{ControlPointError, Result, SubscriptionError};
pub use registry::{DeviceRegistry, Observation, Settled};
pub use subscription::{ServiceEvent, SubscriptionManager};
pub use transport::{HttpTransport, UpnpTransport};

pub use soap_client::SubscriptionResponse;
pub use upnp_discovery::{DeviceDescription, DeviceInfo, ServiceEndpoint, SsdpKind, SsdpNotification};
