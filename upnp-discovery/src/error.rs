//! Error types for the discovery system.

use thiserror::Error;

/// Error type for discovery operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// Socket creation, multicast send, or HTTP fetch failed
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Malformed description XML or SSDP message
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A URL in an announcement or description could not be used
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Description parsed but lacks something a control point needs
    #[error("Invalid device: {0}")]
    InvalidDevice(String),
}

/// Convenience Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
