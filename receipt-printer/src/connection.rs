//! Printer connection state machine
//!
//! A [`PrinterConnection`] owns at most one open link to a printer, over
//! either USB (claimed interface + bulk OUT endpoint) or serial (port +
//! writer), and exposes a single [`send`](PrinterConnection::send) primitive
//! for both.
//!
//! ```text
//! Disconnected ──connect_usb──▶ ConnectingUsb ──ok──▶ ConnectedUsb
//!      ▲  ▲                          │ err                  │
//!      │  └──────────────────────────┘                      │
//!      │  (same for serial)                     disconnect  │
//!      └────────────────────────────────────────────────────┘
//! ```
//!
//! There is no presence polling and no automatic reconnection: a printer
//! unplugged while connected is noticed by the next failing `send`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{PrintError, PrintResult};
use crate::transport::{
    ConnectionType, DeviceInfo, HostError, SerialHost, SerialPort, SerialWriter, UsbDevice,
    UsbDeviceFilter, UsbHost,
};

/// USB full-speed bulk packet size
pub const DEFAULT_USB_CHUNK_SIZE: usize = 64;

/// Baud rates tried in order when opening a serial port
pub const DEFAULT_BAUD_RATES: [u32; 4] = [115_200, 9_600, 19_200, 38_400];

/// Configuration applied when (re)connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Transports `connect()` tries, in order
    pub transport_order: Vec<ConnectionType>,
    pub baud_rates: Vec<u32>,
    pub usb_chunk_size: usize,
    pub usb_filters: Vec<UsbDeviceFilter>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            transport_order: vec![ConnectionType::Usb, ConnectionType::Serial],
            baud_rates: DEFAULT_BAUD_RATES.to_vec(),
            usb_chunk_size: DEFAULT_USB_CHUNK_SIZE,
            usb_filters: vec![UsbDeviceFilter::any()],
        }
    }
}

/// Lifecycle phase of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkPhase {
    Disconnected,
    ConnectingUsb,
    ConnectingSerial,
    ConnectedUsb,
    ConnectedSerial,
}

/// Snapshot handed to state listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub connected: bool,
    pub connection_type: Option<ConnectionType>,
    pub device_info: Option<DeviceInfo>,
}

impl ConnectionState {
    fn disconnected() -> Self {
        Self {
            connected: false,
            connection_type: None,
            device_info: None,
        }
    }
}

/// The open device handle. Exactly one transport at a time.
enum Link {
    Usb {
        device: Box<dyn UsbDevice>,
        interface: u8,
        endpoint: u8,
    },
    Serial {
        port: Box<dyn SerialPort>,
        writer: Box<dyn SerialWriter>,
    },
}

impl Link {
    fn connection_type(&self) -> ConnectionType {
        match self {
            Link::Usb { .. } => ConnectionType::Usb,
            Link::Serial { .. } => ConnectionType::Serial,
        }
    }

    fn device_info(&self) -> DeviceInfo {
        match self {
            Link::Usb { device, .. } => device.info(),
            Link::Serial { port, .. } => port.info(),
        }
    }

    /// Best-effort teardown, never fails
    async fn release(self) {
        match self {
            Link::Usb {
                mut device,
                interface,
                ..
            } => {
                release_quietly(device.as_mut(), interface).await;
                close_quietly(device.as_mut()).await;
            }
            Link::Serial {
                mut port,
                mut writer,
            } => {
                if let Err(e) = writer.release().await {
                    warn!(error = %e, "release serial writer failed");
                }
                close_port_quietly(port.as_mut()).await;
            }
        }
    }
}

type Listener = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl Listeners {
    fn entries(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries().push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.entries().retain(|(entry, _)| *entry != id);
    }

    fn notify(&self, state: &ConnectionState) {
        // Call outside the lock so listeners may (un)subscribe
        let listeners: Vec<Listener> = self.entries().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(state);
        }
    }

    fn len(&self) -> usize {
        self.entries().len()
    }
}

/// Handle returned by [`PrinterConnection::on_state_change`]
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Remove the listener
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(self.id);
        }
    }
}

/// Stateful link to one receipt printer
pub struct PrinterConnection {
    usb: Option<Arc<dyn UsbHost>>,
    serial: Option<Arc<dyn SerialHost>>,
    options: ConnectionOptions,
    link: AsyncMutex<Option<Link>>,
    phase: Mutex<LinkPhase>,
    state: Mutex<ConnectionState>,
    listeners: Arc<Listeners>,
}

impl PrinterConnection {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            usb: None,
            serial: None,
            options,
            link: AsyncMutex::new(None),
            phase: Mutex::new(LinkPhase::Disconnected),
            state: Mutex::new(ConnectionState::disconnected()),
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Enable USB printing through the given host
    pub fn with_usb_host(mut self, host: impl UsbHost + 'static) -> Self {
        self.usb = Some(Arc::new(host));
        self
    }

    /// Enable serial printing through the given host
    pub fn with_serial_host(mut self, host: impl SerialHost + 'static) -> Self {
        self.serial = Some(Arc::new(host));
        self
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    // === Capabilities ===

    pub fn has_usb(&self) -> bool {
        self.usb.is_some()
    }

    pub fn has_serial(&self) -> bool {
        self.serial.is_some()
    }

    pub fn is_supported(&self) -> bool {
        self.has_usb() || self.has_serial()
    }

    // === State ===

    pub fn phase(&self) -> LinkPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn connection_type(&self) -> Option<ConnectionType> {
        self.state().connection_type
    }

    /// Descriptor of the connected device, `None` when disconnected
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.state().device_info
    }

    /// Register a listener called after every settled state change
    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let id = self.listeners.add(Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn set_phase(&self, phase: LinkPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    fn publish(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        self.listeners.notify(&state);
    }

    fn settle(&self, link: &Option<Link>) {
        let (phase, state) = match link {
            Some(l) => (
                match l.connection_type() {
                    ConnectionType::Usb => LinkPhase::ConnectedUsb,
                    ConnectionType::Serial => LinkPhase::ConnectedSerial,
                },
                ConnectionState {
                    connected: true,
                    connection_type: Some(l.connection_type()),
                    device_info: Some(l.device_info()),
                },
            ),
            None => (LinkPhase::Disconnected, ConnectionState::disconnected()),
        };
        self.set_phase(phase);
        self.publish(state);
    }

    // === Connect ===

    /// Connect over the first transport in `transport_order` that works
    ///
    /// A dismissed picker stops immediately instead of prompting again on the
    /// next transport. Other failures fall back to the next transport.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> PrintResult<()> {
        let candidates: Vec<ConnectionType> = self
            .options
            .transport_order
            .iter()
            .copied()
            .filter(|t| match t {
                ConnectionType::Usb => self.has_usb(),
                ConnectionType::Serial => self.has_serial(),
            })
            .collect();

        if candidates.is_empty() {
            return Err(PrintError::Unsupported);
        }

        let mut last_error = None;
        for transport in candidates {
            let result = match transport {
                ConnectionType::Usb => self.connect_usb().await,
                ConnectionType::Serial => self.connect_serial().await,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(PrintError::Cancelled) => return Err(PrintError::Cancelled),
                Err(e) => {
                    warn!(transport = %transport, error = %e, "Connect failed, trying next transport");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(PrintError::Unsupported))
    }

    /// Pick a USB device, claim its bulk OUT interface, and mark connected
    #[instrument(skip(self))]
    pub async fn connect_usb(&self) -> PrintResult<()> {
        let host = self
            .usb
            .clone()
            .ok_or(PrintError::TransportUnavailable(ConnectionType::Usb))?;

        let mut link = self.link.lock().await;
        if let Some(previous) = link.take() {
            info!("Releasing current link before reconnecting");
            previous.release().await;
            self.settle(&link);
        }

        self.set_phase(LinkPhase::ConnectingUsb);
        match self.open_usb(host.as_ref()).await {
            Ok(opened) => {
                *link = Some(opened);
                self.settle(&link);
                info!(device = ?self.device_info(), "Printer connected over USB");
                Ok(())
            }
            Err(e) => {
                self.set_phase(LinkPhase::Disconnected);
                Err(e)
            }
        }
    }

    async fn open_usb(&self, host: &dyn UsbHost) -> PrintResult<Link> {
        let mut device = host
            .request_device(&self.options.usb_filters)
            .await
            .map_err(picker_error)?;

        device.open().await?;

        if device.configuration().is_none() {
            debug!("Device unconfigured, selecting configuration 1");
            if let Err(e) = device.select_configuration(1).await {
                close_quietly(device.as_mut()).await;
                return Err(e.into());
            }
        }

        let Some(bulk) = device.configuration().and_then(|c| c.find_bulk_out()) else {
            close_quietly(device.as_mut()).await;
            return Err(PrintError::NoBulkEndpoint);
        };
        debug!(?bulk, "Bulk OUT endpoint found");

        if let Err(e) = device.claim_interface(bulk.interface).await {
            close_quietly(device.as_mut()).await;
            return Err(e.into());
        }
        if bulk.alternate != 0 {
            if let Err(e) = device.select_alternate(bulk.interface, bulk.alternate).await {
                release_quietly(device.as_mut(), bulk.interface).await;
                close_quietly(device.as_mut()).await;
                return Err(e.into());
            }
        }

        Ok(Link::Usb {
            device,
            interface: bulk.interface,
            endpoint: bulk.endpoint,
        })
    }

    /// Pick a serial port, negotiate a baud rate, and mark connected
    #[instrument(skip(self))]
    pub async fn connect_serial(&self) -> PrintResult<()> {
        let host = self
            .serial
            .clone()
            .ok_or(PrintError::TransportUnavailable(ConnectionType::Serial))?;

        let mut link = self.link.lock().await;
        if let Some(previous) = link.take() {
            info!("Releasing current link before reconnecting");
            previous.release().await;
            self.settle(&link);
        }

        self.set_phase(LinkPhase::ConnectingSerial);
        match self.open_serial(host.as_ref()).await {
            Ok(opened) => {
                *link = Some(opened);
                self.settle(&link);
                info!(device = ?self.device_info(), "Printer connected over serial");
                Ok(())
            }
            Err(e) => {
                self.set_phase(LinkPhase::Disconnected);
                Err(e)
            }
        }
    }

    async fn open_serial(&self, host: &dyn SerialHost) -> PrintResult<Link> {
        let mut port = host.request_port().await.map_err(picker_error)?;

        let mut opened = false;
        let mut last_error: Option<HostError> = None;
        for &baud in &self.options.baud_rates {
            match port.open(baud).await {
                Ok(()) => {
                    debug!(baud, "Serial port opened");
                    opened = true;
                    break;
                }
                Err(HostError::AlreadyOpen) => {
                    debug!(baud, "Serial port already open");
                    opened = true;
                    break;
                }
                Err(e) => {
                    debug!(baud, error = %e, "Baud rate rejected");
                    last_error = Some(e);
                }
            }
        }

        if !opened {
            close_port_quietly(port.as_mut()).await;
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no baud rate configured".to_string());
            return Err(PrintError::OpenFailed(reason));
        }

        let writer = match port.writer().await {
            Ok(w) => w,
            Err(e) => {
                close_port_quietly(port.as_mut()).await;
                return Err(e.into());
            }
        };

        Ok(Link::Serial { port, writer })
    }

    // === Disconnect ===

    /// Release the link and reset state. Safe to call at any time.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        if let Some(current) = link.take() {
            current.release().await;
            info!("Printer disconnected");
        }
        self.settle(&link);
    }

    // === I/O ===

    /// Write bytes to the printer
    ///
    /// USB data goes out in `usb_chunk_size` packets, each awaited before the
    /// next. Serial data is written in one call. Transport errors propagate
    /// unchanged and leave the connection state as it is.
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub async fn send(&self, data: &[u8]) -> PrintResult<()> {
        let mut link = self.link.lock().await;
        match link.as_mut() {
            None => Err(PrintError::NotConnected),
            Some(Link::Usb {
                device, endpoint, ..
            }) => {
                let chunk_size = self.options.usb_chunk_size.max(1);
                for chunk in data.chunks(chunk_size) {
                    device.transfer_out(*endpoint, chunk).await?;
                }
                debug!(chunks = data.len().div_ceil(chunk_size), "USB send complete");
                Ok(())
            }
            Some(Link::Serial { writer, .. }) => {
                writer.write(data).await?;
                debug!("Serial send complete");
                Ok(())
            }
        }
    }

    /// Cheap liveness probe: zero-length bulk transfer or writer flush
    ///
    /// Does not change the connection state.
    pub async fn ping(&self) -> PrintResult<()> {
        let mut link = self.link.lock().await;
        match link.as_mut() {
            None => Err(PrintError::NotConnected),
            Some(Link::Usb {
                device, endpoint, ..
            }) => {
                device.transfer_out(*endpoint, &[]).await?;
                Ok(())
            }
            Some(Link::Serial { writer, .. }) => {
                writer.flush().await?;
                Ok(())
            }
        }
    }
}

impl Default for PrinterConnection {
    fn default() -> Self {
        Self::new(ConnectionOptions::default())
    }
}

fn picker_error(err: HostError) -> PrintError {
    match err {
        HostError::NotFound(_) => PrintError::Cancelled,
        other => PrintError::Host(other),
    }
}

async fn release_quietly(device: &mut dyn UsbDevice, interface: u8) {
    if let Err(e) = device.release_interface(interface).await {
        warn!(error = %e, interface, "release USB interface failed");
    }
}

async fn close_quietly(device: &mut dyn UsbDevice) {
    if let Err(e) = device.close().await {
        warn!(error = %e, "close USB device failed");
    }
}

async fn close_port_quietly(port: &mut dyn SerialPort) {
    if let Err(e) = port.close().await {
        warn!(error = %e, "close serial port failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockSerialHost, MockUsbHost};
    use crate::transport::{
        EndpointDirection, EndpointKind, UsbAlternate, UsbConfiguration, UsbEndpoint, UsbInterface,
    };
    use std::sync::atomic::AtomicUsize;

    fn usb_connection(host: &MockUsbHost) -> PrinterConnection {
        PrinterConnection::default().with_usb_host(host.clone())
    }

    #[tokio::test]
    async fn test_connect_usb_claims_bulk_interface() {
        let host = MockUsbHost::printer();
        let conn = usb_connection(&host);

        conn.connect_usb().await.unwrap();

        assert_eq!(
            host.calls(),
            vec!["open", "select_configuration(1)", "claim_interface(0)"]
        );
        assert!(conn.is_connected());
        assert_eq!(conn.connection_type(), Some(ConnectionType::Usb));
        assert_eq!(conn.phase(), LinkPhase::ConnectedUsb);
        assert!(matches!(conn.device_info(), Some(DeviceInfo::Usb { .. })));
    }

    #[tokio::test]
    async fn test_usb_send_chunks_64_bytes() {
        let host = MockUsbHost::printer();
        let conn = usb_connection(&host);
        conn.connect_usb().await.unwrap();

        let data: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        conn.send(&data).await.unwrap();

        let transfers = host.transfers();
        assert_eq!(transfers.len(), 4);
        assert!(transfers.iter().all(|(ep, _)| *ep == 0x01));
        assert_eq!(
            transfers.iter().map(|(_, c)| c.len()).collect::<Vec<_>>(),
            vec![64, 64, 64, 8]
        );
        assert_eq!(host.sent_bytes(), data);
    }

    #[tokio::test]
    async fn test_usb_send_exact_multiple() {
        let host = MockUsbHost::printer();
        let conn = usb_connection(&host);
        conn.connect_usb().await.unwrap();

        conn.send(&[0xAA; 128]).await.unwrap();
        assert_eq!(host.transfers().len(), 2);
    }

    #[tokio::test]
    async fn test_no_bulk_endpoint_closes_device() {
        let host = MockUsbHost::with_configuration(UsbConfiguration {
            value: 1,
            interfaces: vec![UsbInterface {
                number: 0,
                alternates: vec![UsbAlternate {
                    setting: 0,
                    class_code: 3,
                    endpoints: vec![UsbEndpoint {
                        address: 0x81,
                        direction: EndpointDirection::In,
                        kind: EndpointKind::Interrupt,
                        max_packet_size: 8,
                    }],
                }],
            }],
        });
        let conn = usb_connection(&host);

        let err = conn.connect_usb().await.unwrap_err();

        assert!(matches!(err, PrintError::NoBulkEndpoint));
        assert_eq!(host.calls().last().map(String::as_str), Some("close"));
        assert!(!conn.is_connected());
        assert_eq!(conn.phase(), LinkPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_alternate_setting_selected() {
        let host = MockUsbHost::with_configuration(UsbConfiguration {
            value: 1,
            interfaces: vec![UsbInterface {
                number: 2,
                alternates: vec![UsbAlternate {
                    setting: 1,
                    class_code: 7,
                    endpoints: vec![UsbEndpoint {
                        address: 0x03,
                        direction: EndpointDirection::Out,
                        kind: EndpointKind::Bulk,
                        max_packet_size: 64,
                    }],
                }],
            }],
        });
        let conn = usb_connection(&host);
        conn.connect_usb().await.unwrap();

        assert!(host.calls().contains(&"select_alternate(2, 1)".to_string()));
        conn.send(b"x").await.unwrap();
        assert_eq!(host.transfers()[0].0, 0x03);
    }

    #[tokio::test]
    async fn test_serial_baud_negotiation_order() {
        let host = MockSerialHost::port().accept_only(19_200);
        let conn = PrinterConnection::default().with_serial_host(host.clone());

        conn.connect_serial().await.unwrap();

        assert_eq!(host.open_attempts(), vec![115_200, 9_600, 19_200]);
        assert_eq!(conn.connection_type(), Some(ConnectionType::Serial));
        assert_eq!(conn.phase(), LinkPhase::ConnectedSerial);
    }

    #[tokio::test]
    async fn test_serial_already_open_counts_as_success() {
        let host = MockSerialHost::port().already_open();
        let conn = PrinterConnection::default().with_serial_host(host.clone());

        conn.connect_serial().await.unwrap();

        assert_eq!(host.open_attempts(), vec![115_200]);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_serial_all_rates_fail() {
        let host = MockSerialHost::port().reject_all();
        let conn = PrinterConnection::default().with_serial_host(host.clone());

        let err = conn.connect_serial().await.unwrap_err();

        assert!(matches!(err, PrintError::OpenFailed(_)));
        assert_eq!(host.open_attempts().len(), 4);
        assert_eq!(host.calls(), vec!["close"]);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_serial_send_writes_whole_buffer() {
        let host = MockSerialHost::port();
        let conn = PrinterConnection::default().with_serial_host(host.clone());
        conn.connect_serial().await.unwrap();

        let data = vec![0x41; 500];
        conn.send(&data).await.unwrap();

        assert_eq!(host.writes(), vec![data]);
    }

    #[tokio::test]
    async fn test_send_when_disconnected() {
        let host = MockUsbHost::printer();
        let conn = usb_connection(&host);

        let err = conn.send(b"hello").await.unwrap_err();

        assert!(err.to_string().contains("not connected"));
        assert_eq!(host.requests(), 0);
        assert!(host.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_connect_unsupported() {
        let conn = PrinterConnection::default();
        assert!(!conn.is_supported());
        assert!(matches!(conn.connect().await, Err(PrintError::Unsupported)));
    }

    #[tokio::test]
    async fn test_explicit_transport_unavailable() {
        let conn = PrinterConnection::default().with_usb_host(MockUsbHost::printer());
        assert!(matches!(
            conn.connect_serial().await,
            Err(PrintError::TransportUnavailable(ConnectionType::Serial))
        ));
    }

    #[tokio::test]
    async fn test_connect_cancel_does_not_fall_back() {
        let usb = MockUsbHost::cancelled();
        let serial = MockSerialHost::port();
        let conn = PrinterConnection::default()
            .with_usb_host(usb.clone())
            .with_serial_host(serial.clone());

        let err = conn.connect().await.unwrap_err();

        assert!(err.to_string().contains("plugged in"));
        assert!(serial.open_attempts().is_empty());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_falls_back_to_serial() {
        let usb = MockUsbHost::failing(HostError::Security("access denied".to_string()));
        let serial = MockSerialHost::port();
        let conn = PrinterConnection::default()
            .with_usb_host(usb.clone())
            .with_serial_host(serial.clone());

        conn.connect().await.unwrap();

        assert_eq!(usb.requests(), 1);
        assert_eq!(conn.connection_type(), Some(ConnectionType::Serial));
    }

    #[tokio::test]
    async fn test_connect_respects_transport_order() {
        let usb = MockUsbHost::printer();
        let serial = MockSerialHost::port();
        let options = ConnectionOptions {
            transport_order: vec![ConnectionType::Serial, ConnectionType::Usb],
            ..Default::default()
        };
        let conn = PrinterConnection::new(options)
            .with_usb_host(usb.clone())
            .with_serial_host(serial.clone());

        conn.connect().await.unwrap();

        assert_eq!(conn.connection_type(), Some(ConnectionType::Serial));
        assert_eq!(usb.requests(), 0);
    }

    #[tokio::test]
    async fn test_connect_returns_last_error_when_all_fail() {
        let usb = MockUsbHost::failing(HostError::Io("usb busy".to_string()));
        let serial = MockSerialHost::port().reject_all();
        let conn = PrinterConnection::default()
            .with_usb_host(usb)
            .with_serial_host(serial);

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, PrintError::OpenFailed(_)));
    }

    #[tokio::test]
    async fn test_disconnect_releases_and_resets() {
        let host = MockUsbHost::printer();
        let conn = usb_connection(&host);
        conn.connect_usb().await.unwrap();

        conn.disconnect().await;

        let calls = host.calls();
        assert_eq!(&calls[calls.len() - 2..], &["release_interface(0)", "close"]);
        assert_eq!(conn.state(), ConnectionState::disconnected());
        assert_eq!(conn.device_info(), None);
        assert!(matches!(conn.send(b"x").await, Err(PrintError::NotConnected)));

        // Redundant disconnect is harmless
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_reconnect_releases_previous_link() {
        let usb = MockUsbHost::printer();
        let serial = MockSerialHost::port();
        let conn = PrinterConnection::default()
            .with_usb_host(usb.clone())
            .with_serial_host(serial.clone());

        conn.connect_usb().await.unwrap();
        conn.connect_serial().await.unwrap();

        assert!(usb.calls().ends_with(&["release_interface(0)".to_string(), "close".to_string()]));
        assert_eq!(conn.connection_type(), Some(ConnectionType::Serial));
    }

    #[tokio::test]
    async fn test_listeners_and_unsubscribe() {
        let host = MockUsbHost::printer();
        let conn = usb_connection(&host);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = conn.on_state_change(move |s| sink.lock().unwrap().push(s.clone()));
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _other = conn.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        conn.connect_usb().await.unwrap();
        conn.disconnect().await;

        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert!(seen[0].connected);
            assert_eq!(seen[0].connection_type, Some(ConnectionType::Usb));
            assert!(seen[0].device_info.is_some());
            assert!(!seen[1].connected);
        }

        sub.unsubscribe();
        assert_eq!(conn.listener_count(), 1);
        conn.connect_usb().await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_connect_does_not_notify() {
        let conn = PrinterConnection::default().with_usb_host(MockUsbHost::cancelled());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _sub = conn.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(conn.connect_usb().await.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_write_failure_propagates() {
        let host = MockUsbHost::printer();
        let conn = usb_connection(&host);
        conn.connect_usb().await.unwrap();
        host.fail_transfers_with(HostError::Disconnected);

        let err = conn.send(b"data").await.unwrap_err();

        assert!(matches!(err, PrintError::Host(HostError::Disconnected)));
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_failed_cleanup_does_not_mask_error() {
        let host = MockUsbHost::with_configuration(UsbConfiguration {
            value: 1,
            interfaces: vec![UsbInterface {
                number: 1,
                alternates: vec![UsbAlternate {
                    setting: 2,
                    class_code: 7,
                    endpoints: vec![UsbEndpoint {
                        address: 0x02,
                        direction: EndpointDirection::Out,
                        kind: EndpointKind::Bulk,
                        max_packet_size: 64,
                    }],
                }],
            }],
        });
        host.fail_call("select_alternate", HostError::Io("stall".to_string()));
        host.fail_call("release_interface", HostError::Disconnected);
        host.fail_call("close", HostError::Disconnected);
        let conn = usb_connection(&host);

        let err = conn.connect_usb().await.unwrap_err();

        assert!(matches!(err, PrintError::Host(HostError::Io(_))));
        assert!(host.calls().ends_with(&["release_interface(1)".to_string(), "close".to_string()]));
        assert_eq!(conn.phase(), LinkPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_port_close_does_not_mask_error() {
        let host = MockSerialHost::port();
        host.fail_call("writer", HostError::Io("busy".to_string()));
        host.fail_call("close", HostError::Disconnected);
        let conn = PrinterConnection::default().with_serial_host(host.clone());

        let err = conn.connect_serial().await.unwrap_err();

        assert!(matches!(err, PrintError::Host(HostError::Io(_))));
        assert_eq!(host.calls(), vec!["open(115200)", "writer", "close"]);
        assert!(!conn.is_connected());

        let host = MockSerialHost::port().reject_all();
        host.fail_call("close", HostError::Disconnected);
        let conn = PrinterConnection::default().with_serial_host(host.clone());
        assert!(matches!(
            conn.connect_serial().await,
            Err(PrintError::OpenFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_survives_cleanup_failures() {
        let host = MockUsbHost::printer();
        let conn = usb_connection(&host);
        conn.connect_usb().await.unwrap();
        host.fail_call("release_interface", HostError::Disconnected);
        host.fail_call("close", HostError::Disconnected);

        conn.disconnect().await;

        assert!(host.calls().ends_with(&["release_interface(0)".to_string(), "close".to_string()]));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_ping() {
        let host = MockUsbHost::printer();
        let conn = usb_connection(&host);
        assert!(matches!(conn.ping().await, Err(PrintError::NotConnected)));

        conn.connect_usb().await.unwrap();
        conn.ping().await.unwrap();
        assert_eq!(host.transfers(), vec![(0x01, Vec::new())]);

        host.fail_transfers_with(HostError::Disconnected);
        assert!(conn.ping().await.is_err());
    }
}
