//! Print station
//!
//! Prints package lists for school orders on an ESC/POS receipt printer
//! attached over USB or serial.

pub mod config;
pub mod printing;
pub mod utils;

pub use config::Config;
pub use printing::{PackageListRenderer, ReceiptFormat, ReceiptPrinterService, ServiceError};

use receipt_printer::PrinterConnection;

/// Build the service from configuration, with the operating system's USB and
/// serial stacks as device hosts
pub fn build_service(config: &Config) -> ReceiptPrinterService {
    use receipt_printer::transport::{serial::TokioSerialHost, usb::NusbHost};

    let serial = match &config.serial_port {
        Some(path) => TokioSerialHost::new().with_port(path.clone()),
        None => TokioSerialHost::new(),
    };
    let printer = PrinterConnection::new(config.connection_options())
        .with_usb_host(NusbHost::new())
        .with_serial_host(serial);

    ReceiptPrinterService::new(printer, config.renderer())
        .with_batch_interval(config.batch_interval())
}
