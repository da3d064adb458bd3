//! Error types for the SOAP client

use thiserror::Error;

/// Errors that can occur during SOAP and GENA communication
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoapError {
    /// Transport failure: connection refused, timeout, bad URL
    #[error("Network error: {0}")]
    Network(String),

    /// The device answered with a non-success HTTP status
    #[error("HTTP status {status} from {method}")]
    Http { method: &'static str, status: u16 },

    /// XML parsing error
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// SOAP fault returned by the device
    #[error("SOAP fault {code}: {description}")]
    Fault { code: u16, description: String },
}

impl SoapError {
    /// UPnP error code if this is a SOAP fault.
    pub fn fault_code(&self) -> Option<u16> {
        match self {
            Self::Fault { code, .. } => Some(*code),
            _ => None,
        }
    }
}
