//! In-memory hosts for tests
//!
//! Every call made through a mock device is recorded on the host, so tests
//! can assert on transfers, writes and the exact open/claim/close sequence.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    DeviceInfo, EndpointDirection, EndpointKind, HostError, HostResult, SerialHost, SerialPort,
    SerialWriter, UsbAlternate, UsbConfiguration, UsbDevice, UsbDeviceFilter, UsbEndpoint, UsbHost,
    UsbInterface,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn record_serial(state: &Mutex<SerialState>, method: &'static str) -> HostResult<()> {
    let mut state = lock(state);
    state.calls.push(method.to_string());
    match state.failing_calls.get(method) {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

// ============================================================================
// USB
// ============================================================================

struct UsbState {
    pick: Result<(DeviceInfo, UsbConfiguration), HostError>,
    requests: usize,
    calls: Vec<String>,
    transfers: Vec<(u8, Vec<u8>)>,
    transfer_error: Option<HostError>,
    failing_calls: HashMap<&'static str, HostError>,
}

/// Mock USB host handing out one scripted device
#[derive(Clone)]
pub struct MockUsbHost {
    state: Arc<Mutex<UsbState>>,
}

impl MockUsbHost {
    /// A printer with a single bulk OUT endpoint (0x01) on interface 0
    pub fn printer() -> Self {
        Self::with_configuration(UsbConfiguration {
            value: 1,
            interfaces: vec![UsbInterface {
                number: 0,
                alternates: vec![UsbAlternate {
                    setting: 0,
                    class_code: 7,
                    endpoints: vec![
                        UsbEndpoint {
                            address: 0x01,
                            direction: EndpointDirection::Out,
                            kind: EndpointKind::Bulk,
                            max_packet_size: 64,
                        },
                        UsbEndpoint {
                            address: 0x82,
                            direction: EndpointDirection::In,
                            kind: EndpointKind::Bulk,
                            max_packet_size: 64,
                        },
                    ],
                }],
            }],
        })
    }

    /// A device exposing the given configuration once configured
    pub fn with_configuration(configuration: UsbConfiguration) -> Self {
        let info = DeviceInfo::Usb {
            product_name: Some("LR2000E".to_string()),
            manufacturer_name: Some("Logic Controls".to_string()),
            vendor_id: 0x0FA8,
            product_id: 0xA030,
            serial_number: Some("LC0001".to_string()),
        };
        Self::new(Ok((info, configuration)))
    }

    /// A host whose picker always fails with `err`
    pub fn failing(err: HostError) -> Self {
        Self::new(Err(err))
    }

    /// A host whose picker is dismissed by the user
    pub fn cancelled() -> Self {
        Self::failing(HostError::NotFound("No device selected.".to_string()))
    }

    fn new(pick: Result<(DeviceInfo, UsbConfiguration), HostError>) -> Self {
        Self {
            state: Arc::new(Mutex::new(UsbState {
                pick,
                requests: 0,
                calls: Vec::new(),
                transfers: Vec::new(),
                transfer_error: None,
                failing_calls: HashMap::new(),
            })),
        }
    }

    /// Make every following transfer fail
    pub fn fail_transfers_with(&self, err: HostError) {
        lock(&self.state).transfer_error = Some(err);
    }

    /// Make a device method (`open`, `claim_interface`, `close`, ...) fail.
    /// The call is still recorded.
    pub fn fail_call(&self, method: &'static str, err: HostError) {
        lock(&self.state).failing_calls.insert(method, err);
    }

    pub fn requests(&self) -> usize {
        lock(&self.state).requests
    }

    /// Device calls in order, e.g. `claim_interface(0)`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Recorded bulk transfers as (endpoint, bytes)
    pub fn transfers(&self) -> Vec<(u8, Vec<u8>)> {
        lock(&self.state).transfers.clone()
    }

    /// All transferred bytes concatenated
    pub fn sent_bytes(&self) -> Vec<u8> {
        lock(&self.state)
            .transfers
            .iter()
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }
}

#[async_trait]
impl UsbHost for MockUsbHost {
    async fn request_device(&self, _filters: &[UsbDeviceFilter]) -> HostResult<Box<dyn UsbDevice>> {
        let mut state = lock(&self.state);
        state.requests += 1;
        let (info, configuration) = state.pick.clone()?;
        Ok(Box::new(MockUsbDevice {
            state: self.state.clone(),
            info,
            configuration,
            opened: false,
            configured: false,
        }))
    }
}

struct MockUsbDevice {
    state: Arc<Mutex<UsbState>>,
    info: DeviceInfo,
    configuration: UsbConfiguration,
    opened: bool,
    configured: bool,
}

impl MockUsbDevice {
    fn record(&self, method: &'static str, call: String) -> HostResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        match state.failing_calls.get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl UsbDevice for MockUsbDevice {
    async fn open(&mut self) -> HostResult<()> {
        self.record("open", "open".to_string())?;
        self.opened = true;
        Ok(())
    }

    fn configuration(&self) -> Option<UsbConfiguration> {
        (self.opened && self.configured).then(|| self.configuration.clone())
    }

    async fn select_configuration(&mut self, value: u8) -> HostResult<()> {
        self.record("select_configuration", format!("select_configuration({})", value))?;
        self.configured = true;
        Ok(())
    }

    async fn claim_interface(&mut self, interface: u8) -> HostResult<()> {
        self.record("claim_interface", format!("claim_interface({})", interface))
    }

    async fn select_alternate(&mut self, interface: u8, alternate: u8) -> HostResult<()> {
        self.record(
            "select_alternate",
            format!("select_alternate({}, {})", interface, alternate),
        )
    }

    async fn release_interface(&mut self, interface: u8) -> HostResult<()> {
        self.record("release_interface", format!("release_interface({})", interface))
    }

    async fn transfer_out(&mut self, endpoint: u8, data: &[u8]) -> HostResult<usize> {
        let mut state = lock(&self.state);
        if let Some(err) = state.transfer_error.clone() {
            return Err(err);
        }
        state.transfers.push((endpoint, data.to_vec()));
        Ok(data.len())
    }

    async fn close(&mut self) -> HostResult<()> {
        self.opened = false;
        self.record("close", "close".to_string())
    }

    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }
}

// ============================================================================
// Serial
// ============================================================================

struct SerialState {
    pick: Result<DeviceInfo, HostError>,
    accepted_baud: Option<u32>,
    reject_all: bool,
    already_open: bool,
    open_attempts: Vec<u32>,
    calls: Vec<String>,
    writes: Vec<Vec<u8>>,
    write_error: Option<HostError>,
    failing_calls: HashMap<&'static str, HostError>,
}

/// Mock serial host handing out one scripted port
#[derive(Clone)]
pub struct MockSerialHost {
    state: Arc<Mutex<SerialState>>,
}

impl MockSerialHost {
    /// A USB-serial adapter that opens at any baud rate
    pub fn port() -> Self {
        Self::new(Ok(DeviceInfo::Serial {
            port_name: "/dev/ttyUSB0".to_string(),
            vendor_id: Some(0x067B),
            product_id: Some(0x2303),
        }))
    }

    pub fn failing(err: HostError) -> Self {
        Self::new(Err(err))
    }

    pub fn cancelled() -> Self {
        Self::failing(HostError::NotFound("No port selected.".to_string()))
    }

    fn new(pick: Result<DeviceInfo, HostError>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SerialState {
                pick,
                accepted_baud: None,
                reject_all: false,
                already_open: false,
                open_attempts: Vec::new(),
                calls: Vec::new(),
                writes: Vec::new(),
                write_error: None,
                failing_calls: HashMap::new(),
            })),
        }
    }

    /// Only this baud rate opens
    pub fn accept_only(self, baud: u32) -> Self {
        lock(&self.state).accepted_baud = Some(baud);
        self
    }

    /// Every open attempt fails
    pub fn reject_all(self) -> Self {
        lock(&self.state).reject_all = true;
        self
    }

    /// Report the port as already open on every attempt
    pub fn already_open(self) -> Self {
        lock(&self.state).already_open = true;
        self
    }

    pub fn fail_writes_with(&self, err: HostError) {
        lock(&self.state).write_error = Some(err);
    }

    /// Make `writer`, `close` or `release` fail. The call is still recorded.
    pub fn fail_call(&self, method: &'static str, err: HostError) {
        lock(&self.state).failing_calls.insert(method, err);
    }

    pub fn open_attempts(&self) -> Vec<u32> {
        lock(&self.state).open_attempts.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state).writes.clone()
    }
}

#[async_trait]
impl SerialHost for MockSerialHost {
    async fn request_port(&self) -> HostResult<Box<dyn SerialPort>> {
        let info = lock(&self.state).pick.clone()?;
        Ok(Box::new(MockSerialPort {
            state: self.state.clone(),
            info,
        }))
    }
}

struct MockSerialPort {
    state: Arc<Mutex<SerialState>>,
    info: DeviceInfo,
}

#[async_trait]
impl SerialPort for MockSerialPort {
    async fn open(&mut self, baud_rate: u32) -> HostResult<()> {
        let mut state = lock(&self.state);
        state.open_attempts.push(baud_rate);
        if state.already_open {
            return Err(HostError::AlreadyOpen);
        }
        let accepted = !state.reject_all && state.accepted_baud.is_none_or(|b| b == baud_rate);
        if !accepted {
            return Err(HostError::Io(format!("cannot open at {} baud", baud_rate)));
        }
        state.calls.push(format!("open({})", baud_rate));
        Ok(())
    }

    async fn writer(&mut self) -> HostResult<Box<dyn SerialWriter>> {
        record_serial(&self.state, "writer")?;
        Ok(Box::new(MockSerialWriter {
            state: self.state.clone(),
        }))
    }

    async fn close(&mut self) -> HostResult<()> {
        record_serial(&self.state, "close")
    }

    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }
}

struct MockSerialWriter {
    state: Arc<Mutex<SerialState>>,
}

#[async_trait]
impl SerialWriter for MockSerialWriter {
    async fn write(&mut self, data: &[u8]) -> HostResult<()> {
        let mut state = lock(&self.state);
        if let Some(err) = state.write_error.clone() {
            return Err(err);
        }
        state.writes.push(data.to_vec());
        Ok(())
    }

    async fn flush(&mut self) -> HostResult<()> {
        let mut state = lock(&self.state);
        if let Some(err) = state.write_error.clone() {
            return Err(err);
        }
        state.calls.push("flush".to_string());
        Ok(())
    }

    async fn release(&mut self) -> HostResult<()> {
        record_serial(&self.state, "release")
    }
}
