//! UPnP callback server for receiving GENA event notifications.
//!
//! Devices deliver subscribed events as HTTP `NOTIFY` requests to the
//! callback URL given at subscription time. This crate provides:
//!
//! - [`CallbackServer`]: binds a port from a range and accepts `NOTIFY` on
//!   any path, validating the `SID`, `NT` and `NTS` headers.
//! - [`EventRouter`]: the set of subscription ids this process owns; events
//!   for other ids are answered with `412 Precondition Failed`.
//! - [`NotificationPayload`]: subscription id, sequence number and the raw
//!   property-set XML, delivered over an unbounded channel.
//!
//! Decoding the property set and mapping ids back to services happens in
//! the consumer.

mod error;
pub mod router;
mod server;

pub use error::CallbackError;
pub use router::{EventRouter, NotificationPayload};
pub use server::{detect_local_ip, CallbackServer, CALLBACK_PATH};
