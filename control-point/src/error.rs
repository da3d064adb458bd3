//! Error types for the control point.

use callback_server::CallbackError;
use soap_client::SoapError;
use upnp_discovery::DiscoveryError;

/// Errors surfaced by control point operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlPointError {
    /// Searching or fetching a description failed
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// A SOAP action or GENA request failed
    #[error("SOAP error: {0}")]
    Soap(#[from] SoapError),

    /// The callback server could not be started
    #[error("Callback server error: {0}")]
    Callback(#[from] CallbackError),

    /// The device (and so every one of its services) has been forgotten
    #[error("Device {0} has been forgotten")]
    DeviceForgotten(String),

    /// The service has no event subscription URL
    #[error("Service {0} does not publish events")]
    NotEventable(String),

    /// The service already holds a live subscription
    #[error("Service {service_id} is already subscribed as {sid}")]
    AlreadySubscribed { service_id: String, sid: String },

    /// Another subscribe call on the same service is still waiting for the device
    #[error("Service {0} is already being subscribed")]
    SubscribeInProgress(String),

    /// A NOTIFY body was not a readable property set
    #[error("Invalid event body: {0}")]
    InvalidEvent(String),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A blocking network task panicked or was cancelled
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Why a subscription ended without the owner asking for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The device refused or did not answer a renewal; the subscription is gone
    #[error("Renewal of {sid} failed: {reason}")]
    RenewalFailed { sid: String, reason: String },

    /// The owning device was forgotten or the control point shut down
    #[error("Subscription {sid} closed: {reason}")]
    Closed { sid: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ControlPointError>;
