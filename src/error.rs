use std::time::Duration;
use thiserror::Error;

use crate::scale_state::ConnectionState;

/// Errors returned by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Bluetooth adapter unavailable: {0}")]
    Unavailable(String),

    #[error("No matching device found")]
    NotFound,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not connected")]
    NotConnected,

    #[error("The device does not support {0}")]
    MissingCharacteristic(String),

    #[error("Transport error: {0}")]
    Other(String),
}

#[cfg(feature = "ble")]
impl From<bluest::Error> for TransportError {
    fn from(err: bluest::Error) -> Self {
        TransportError::Other(err.to_string())
    }
}

/// The errors a caller of [`ScaleClient`](crate::ScaleClient) can see.
///
/// Malformed frames, implausible readings and unexpected mid-session drops are absorbed by
/// the link and only show up in [`Diagnostics`](crate::Diagnostics).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScaleError {
    #[error("Bluetooth is not available: {0}")]
    TransportUnavailable(String),

    #[error("Scale not found. Is it switched on and not connected to another device?")]
    DeviceNotFound,

    #[error("Failed to connect to the scale: {0}")]
    ConnectFailed(String),

    #[error("Handshake with the scale failed: {0}")]
    HandshakeFailed(String),

    #[error("Not connected to the scale")]
    NotConnected,

    #[error("Write to the scale failed: {0}")]
    WriteFailed(String),

    #[error("Cannot connect while {0}")]
    InvalidState(ConnectionState),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("The scale client has shut down")]
    ClientClosed,
}

impl ScaleError {
    /// Classify a failure to find the scale
    pub(crate) fn from_scan(err: TransportError) -> Self {
        match err {
            TransportError::NotFound | TransportError::Timeout(_) => ScaleError::DeviceNotFound,
            other => ScaleError::TransportUnavailable(other.to_string()),
        }
    }
}

#[test]
fn test_scan_errors() {
    assert_eq!(
        ScaleError::from_scan(TransportError::Timeout(Duration::from_secs(30))),
        ScaleError::DeviceNotFound
    );
    assert_eq!(ScaleError::from_scan(TransportError::NotFound), ScaleError::DeviceNotFound);
    assert!(matches!(
        ScaleError::from_scan(TransportError::Unavailable("powered off".into())),
        ScaleError::TransportUnavailable(msg) if msg.contains("powered off")
    ));
}
