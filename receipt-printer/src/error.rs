//! Error types for the printer library

use thiserror::Error;

use crate::transport::{ConnectionType, HostError};

/// Printer error types
///
/// Messages are meant to be shown to the operator as-is.
#[derive(Debug, Error)]
pub enum PrintError {
    /// Neither USB nor serial access is available on this host
    #[error("Printing is not supported here: neither USB nor serial device access is available")]
    Unsupported,

    /// The requested transport has no host backend
    #[error("{0} printing is not available on this host")]
    TransportUnavailable(ConnectionType),

    /// The device picker was dismissed or found nothing
    #[error("No printer selected. Make sure the printer is plugged in and turned on, then try again")]
    Cancelled,

    /// The selected USB device exposes no bulk OUT endpoint
    #[error(
        "The selected USB device has no bulk OUT endpoint; it does not look like a compatible receipt printer"
    )]
    NoBulkEndpoint,

    /// The serial port could not be opened at any candidate baud rate
    #[error("Could not open the serial port: {0}")]
    OpenFailed(String),

    /// No open connection
    #[error("Printer not connected")]
    NotConnected,

    /// Error raised by the underlying transport
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Result type for printer operations
pub type PrintResult<T> = Result<T, PrintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_readable() {
        assert!(PrintError::NotConnected.to_string().contains("not connected"));
        assert!(PrintError::Cancelled.to_string().contains("plugged in"));
        assert_eq!(
            PrintError::TransportUnavailable(ConnectionType::Serial).to_string(),
            "serial printing is not available on this host"
        );
    }

    #[test]
    fn test_host_error_is_transparent() {
        let err: PrintError = HostError::Transfer("stall".to_string()).into();
        assert_eq!(err.to_string(), "USB transfer failed: stall");
    }
}
