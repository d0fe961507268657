//! Serial / virtual COM port transport using `tokio-serial`
//!
//! The "picker" takes the configured port path when one is set, otherwise
//! the first USB serial adapter, otherwise the first port the OS reports.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_serial::{SerialPortBuilderExt, SerialPortInfo, SerialPortType, SerialStream};
use tracing::{debug, info, instrument};

use super::{DeviceInfo, HostError, HostResult, SerialHost, SerialPort, SerialWriter};

impl From<tokio_serial::Error> for HostError {
    fn from(err: tokio_serial::Error) -> Self {
        match err.kind() {
            tokio_serial::ErrorKind::NoDevice => HostError::NotFound(err.to_string()),
            tokio_serial::ErrorKind::Io(kind) => HostError::from(std::io::Error::new(kind, err)),
            _ => HostError::Io(err.to_string()),
        }
    }
}

/// Serial host backed by the operating system's serial ports
#[derive(Debug, Clone, Default)]
pub struct TokioSerialHost {
    port_path: Option<String>,
}

impl TokioSerialHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always pick this port (e.g. `/dev/ttyUSB0`, `COM3`)
    pub fn with_port(mut self, path: impl Into<String>) -> Self {
        self.port_path = Some(path.into());
        self
    }

    fn pick(&self, ports: Vec<SerialPortInfo>) -> Option<SerialPortInfo> {
        if let Some(path) = &self.port_path {
            return Some(
                ports
                    .into_iter()
                    .find(|p| &p.port_name == path)
                    .unwrap_or_else(|| SerialPortInfo {
                        port_name: path.clone(),
                        port_type: SerialPortType::Unknown,
                    }),
            );
        }

        let usb = ports
            .iter()
            .position(|p| matches!(p.port_type, SerialPortType::UsbPort(_)));
        match usb {
            Some(idx) => ports.into_iter().nth(idx),
            None => ports.into_iter().next(),
        }
    }
}

#[async_trait]
impl SerialHost for TokioSerialHost {
    #[instrument(skip(self))]
    async fn request_port(&self) -> HostResult<Box<dyn SerialPort>> {
        let ports = tokio_serial::available_ports()?;
        let picked = self
            .pick(ports)
            .ok_or_else(|| HostError::NotFound("no serial port available".to_string()))?;

        info!(port = %picked.port_name, "Serial port picked");
        Ok(Box::new(TokioSerialPort {
            info: picked,
            stream: None,
            lent: false,
        }))
    }
}

struct TokioSerialPort {
    info: SerialPortInfo,
    stream: Option<SerialStream>,
    lent: bool,
}

#[async_trait]
impl SerialPort for TokioSerialPort {
    async fn open(&mut self, baud_rate: u32) -> HostResult<()> {
        if self.stream.is_some() || self.lent {
            return Err(HostError::AlreadyOpen);
        }
        let stream = tokio_serial::new(&self.info.port_name, baud_rate).open_native_async()?;
        debug!(port = %self.info.port_name, baud_rate, "Serial port opened");
        self.stream = Some(stream);
        Ok(())
    }

    async fn writer(&mut self) -> HostResult<Box<dyn SerialWriter>> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| HostError::Io("serial port is not open".to_string()))?;
        self.lent = true;
        Ok(Box::new(TokioSerialWriter {
            stream: Some(stream),
        }))
    }

    async fn close(&mut self) -> HostResult<()> {
        self.stream = None;
        self.lent = false;
        Ok(())
    }

    fn info(&self) -> DeviceInfo {
        let (vendor_id, product_id) = match &self.info.port_type {
            SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid)),
            _ => (None, None),
        };
        DeviceInfo::Serial {
            port_name: self.info.port_name.clone(),
            vendor_id,
            product_id,
        }
    }
}

/// Owns the stream while lent out; dropping it closes the OS handle
struct TokioSerialWriter {
    stream: Option<SerialStream>,
}

impl TokioSerialWriter {
    fn stream(&mut self) -> HostResult<&mut SerialStream> {
        self.stream.as_mut().ok_or(HostError::Disconnected)
    }
}

#[async_trait]
impl SerialWriter for TokioSerialWriter {
    async fn write(&mut self, data: &[u8]) -> HostResult<()> {
        let stream = self.stream()?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn flush(&mut self) -> HostResult<()> {
        self.stream()?.flush().await?;
        Ok(())
    }

    async fn release(&mut self) -> HostResult<()> {
        self.stream = None;
        Ok(())
    }
}
