//! The seam between the link and the platform's radio stack.
//!
//! The link treats the radio as a byte oriented duplex channel: bytes go out through
//! [`Transport::write`] and come back through the receiver handed out by
//! [`Transport::subscribe`]. A write does not have to arrive as one notification on the
//! other side, and a notification may hold any number of bytes.

#[cfg(feature = "ble")]
mod bluest_transport;

#[cfg(feature = "ble")]
pub use bluest_transport::{BluestSession, BluestTransport};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Matches advertised device names against a list of prefixes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceFilter {
    name_prefixes: Vec<String>,
}

impl DeviceFilter {
    pub fn new(name_prefixes: Vec<String>) -> Self {
        Self { name_prefixes }
    }

    /// Case-insensitive prefix match. An empty filter matches every device.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_uppercase();
        self.name_prefixes.is_empty()
            || self
                .name_prefixes
                .iter()
                .any(|prefix| name.starts_with(&prefix.to_ascii_uppercase()))
    }
}

/// Operations the link needs from the radio stack.
///
/// Every method may take as long as the platform takes; the link applies its own timeouts.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// A discovered, not yet connected device
    type Device: Send + 'static;
    /// An open connection to a device
    type Session: Clone + Send + Sync + 'static;

    /// Wait until the radio is powered and usable
    async fn wait_available(&self) -> Result<(), TransportError>;

    /// Find the first device accepted by `filter`
    async fn scan(&self, filter: &DeviceFilter) -> Result<Self::Device, TransportError>;

    /// Connect and locate the write and notify characteristics
    async fn connect(&self, device: Self::Device) -> Result<Self::Session, TransportError>;

    async fn disconnect(&self, session: &Self::Session) -> Result<(), TransportError>;

    async fn write(&self, session: &Self::Session, bytes: &[u8]) -> Result<(), TransportError>;

    /// Start notifications. The receiver yields every notification's bytes in arrival
    /// order and closes when the connection is lost.
    async fn subscribe(
        &self,
        session: &Self::Session,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;
}

#[test]
fn test_device_filter() {
    let filter = DeviceFilter::new(vec!["ACAIA".into(), "PEARL".into()]);
    assert!(filter.matches("ACAIA123456"));
    assert!(filter.matches("pearlS-0042"));
    assert!(!filter.matches("BT_HC6172"));
    assert!(DeviceFilter::default().matches("anything"));
}
