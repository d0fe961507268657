//! Device access abstraction
//!
//! The connection layer never talks to USB or serial APIs directly. It goes
//! through two host capabilities, each of which hands out device handles
//! after a "picker" step:
//!
//! - [`UsbHost`] → [`UsbDevice`]: bulk OUT transfers to a claimed interface
//! - [`SerialHost`] → [`SerialPort`] → [`SerialWriter`]: a byte stream
//!
//! Backends: `nusb` (feature `usb`), `tokio-serial` (feature `serial`) and
//! in-memory mocks (feature `mock`).

#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(feature = "serial")]
pub mod serial;
#[cfg(feature = "usb")]
pub mod usb;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by host backends
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// The picker was dismissed or no device matched
    #[error("No device selected: {0}")]
    NotFound(String),

    /// The port is already open (treated as success when opening)
    #[error("Port is already open")]
    AlreadyOpen,

    /// Access denied by the operating system
    #[error("Access denied: {0}")]
    Security(String),

    /// The device went away
    #[error("Device disconnected")]
    Disconnected,

    #[error("Device I/O error: {0}")]
    Io(String),

    #[error("USB transfer failed: {0}")]
    Transfer(String),
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => HostError::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => HostError::Security(err.to_string()),
            ErrorKind::NotConnected | ErrorKind::BrokenPipe => HostError::Disconnected,
            _ => HostError::Io(err.to_string()),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// Which transport a connection uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Usb,
    Serial,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Usb => f.write_str("usb"),
            ConnectionType::Serial => f.write_str("serial"),
        }
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usb" => Ok(ConnectionType::Usb),
            "serial" | "com" => Ok(ConnectionType::Serial),
            other => Err(format!("Unknown transport: {}", other)),
        }
    }
}

/// Descriptor of the connected device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceInfo {
    Usb {
        product_name: Option<String>,
        manufacturer_name: Option<String>,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<String>,
    },
    Serial {
        port_name: String,
        vendor_id: Option<u16>,
        product_id: Option<u16>,
    },
}

// ============================================================================
// USB
// ============================================================================

/// Device picker filter. Unset fields match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub class_code: Option<u8>,
}

impl UsbDeviceFilter {
    /// Matches every device. ESC/POS printers ship under many vendor ids.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn vendor(vendor_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            ..Self::default()
        }
    }

    /// Whether a device with these ids and interface classes passes the filter
    pub fn matches(&self, vendor_id: u16, product_id: u16, classes: &[u8]) -> bool {
        self.vendor_id.is_none_or(|v| v == vendor_id)
            && self.product_id.is_none_or(|p| p == product_id)
            && self.class_code.is_none_or(|c| classes.contains(&c))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbEndpoint {
    /// Endpoint address as passed to `transfer_out`
    pub address: u8,
    pub direction: EndpointDirection,
    pub kind: EndpointKind,
    pub max_packet_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbAlternate {
    pub setting: u8,
    pub class_code: u8,
    pub endpoints: Vec<UsbEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbInterface {
    pub number: u8,
    pub alternates: Vec<UsbAlternate>,
}

/// Snapshot of the active configuration descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbConfiguration {
    pub value: u8,
    pub interfaces: Vec<UsbInterface>,
}

/// Location of a bulk OUT endpoint inside a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOut {
    pub interface: u8,
    pub alternate: u8,
    pub endpoint: u8,
}

impl UsbConfiguration {
    /// First bulk OUT endpoint across all interfaces and alternates
    pub fn find_bulk_out(&self) -> Option<BulkOut> {
        self.interfaces.iter().find_map(|iface| {
            iface.alternates.iter().find_map(|alt| {
                alt.endpoints
                    .iter()
                    .find(|ep| {
                        ep.direction == EndpointDirection::Out && ep.kind == EndpointKind::Bulk
                    })
                    .map(|ep| BulkOut {
                        interface: iface.number,
                        alternate: alt.setting,
                        endpoint: ep.address,
                    })
            })
        })
    }
}

/// Source of USB devices (the device picker)
#[async_trait]
pub trait UsbHost: Send + Sync {
    /// Let the host pick one device matching any of the filters
    ///
    /// Fails with [`HostError::NotFound`] when nothing was picked.
    async fn request_device(&self, filters: &[UsbDeviceFilter]) -> HostResult<Box<dyn UsbDevice>>;
}

/// A picked USB device
#[async_trait]
pub trait UsbDevice: Send {
    async fn open(&mut self) -> HostResult<()>;

    /// Active configuration, `None` while unconfigured or closed
    fn configuration(&self) -> Option<UsbConfiguration>;

    async fn select_configuration(&mut self, value: u8) -> HostResult<()>;

    async fn claim_interface(&mut self, interface: u8) -> HostResult<()>;

    async fn select_alternate(&mut self, interface: u8, alternate: u8) -> HostResult<()>;

    async fn release_interface(&mut self, interface: u8) -> HostResult<()>;

    /// Bulk OUT transfer; returns the number of bytes written
    async fn transfer_out(&mut self, endpoint: u8, data: &[u8]) -> HostResult<usize>;

    async fn close(&mut self) -> HostResult<()>;

    fn info(&self) -> DeviceInfo;
}

// ============================================================================
// Serial
// ============================================================================

/// Source of serial ports (the port picker)
#[async_trait]
pub trait SerialHost: Send + Sync {
    /// Fails with [`HostError::NotFound`] when nothing was picked.
    async fn request_port(&self) -> HostResult<Box<dyn SerialPort>>;
}

/// A picked serial port
#[async_trait]
pub trait SerialPort: Send {
    /// Open at the given baud rate. [`HostError::AlreadyOpen`] if it is open.
    async fn open(&mut self, baud_rate: u32) -> HostResult<()>;

    /// Acquire the writable side of an open port
    async fn writer(&mut self) -> HostResult<Box<dyn SerialWriter>>;

    async fn close(&mut self) -> HostResult<()>;

    fn info(&self) -> DeviceInfo;
}

#[async_trait]
pub trait SerialWriter: Send {
    /// Write the whole buffer
    async fn write(&mut self, data: &[u8]) -> HostResult<()>;

    async fn flush(&mut self) -> HostResult<()>;

    /// Give the stream back to the port
    async fn release(&mut self) -> HostResult<()>;
}
