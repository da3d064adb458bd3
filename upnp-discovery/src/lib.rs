//! UPnP device discovery building blocks
//!
//! This crate covers the wire-level half of discovery: sending SSDP
//! M-SEARCH requests, parsing search responses and NOTIFY announcements,
//! and decoding device description documents into absolute service
//! endpoints. Deciding what to do with a discovered device (deduplication,
//! staleness, subscriptions) belongs to the control point.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use upnp_discovery::{fetch_description, search};
//!
//! for response in search("ssdp:all", Duration::from_secs(3)).unwrap_or_default() {
//!     if let Some(location) = &response.location {
//!         if let Ok(info) = fetch_description(location, Duration::from_secs(5)) {
//!             tracing::info!(udn = info.udn(), name = %info.description.friendly_name, "found");
//!         }
//!     }
//! }
//! ```

pub mod description;
mod error;
pub mod ssdp;

pub use description::{
    fetch_description, host_port, parse_description, resolve_url, DeviceDescription, DeviceInfo,
    ServiceDescription, ServiceEndpoint,
};
pub use error::{DiscoveryError, Result};
pub use ssdp::{
    parse_message, search, search_request, udn_from_usn, SsdpClient, SsdpKind, SsdpNotification,
    SSDP_MULTICAST_ADDR, SSDP_PORT,
};
