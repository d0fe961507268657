//! # receipt-printer
//!
//! ESC/POS thermal receipt printer driver (LR2000E class, 58 mm / 32 columns).
//!
//! ## Scope
//!
//! This crate handles HOW to print:
//! - Device access over USB bulk or serial, behind host traits
//! - Connection lifecycle with transport fallback
//! - ESC/POS command building and text encoding
//! - Generic receipt documents (title, sections, footer)
//!
//! Business logic (WHAT to print) stays in application code:
//! - Package list rendering → print-station
//!
//! ## Example
//!
//! ```ignore
//! use receipt_printer::{PrinterConnection, ReceiptDocument, Row, Section, encode_receipt};
//! use receipt_printer::transport::{serial::TokioSerialHost, usb::NusbHost};
//!
//! let printer = PrinterConnection::default()
//!     .with_usb_host(NusbHost::new())
//!     .with_serial_host(TokioSerialHost::new());
//! printer.connect().await?;
//!
//! let doc = ReceiptDocument {
//!     title: Some("BOOK FAIR".into()),
//!     sections: vec![Section::new("ITEMS (1)").row(Row::pair("1x Atlas", "$9.99"))],
//!     ..Default::default()
//! };
//! printer.send(&encode_receipt(&doc)).await?;
//! ```

mod connection;
mod encoding;
mod error;
mod escpos;
mod receipt;
pub mod transport;

// Re-exports
pub use connection::{
    ConnectionOptions, ConnectionState, DEFAULT_BAUD_RATES, DEFAULT_USB_CHUNK_SIZE, LinkPhase,
    PrinterConnection, Subscription,
};
pub use encoding::{REPLACEMENT, TextEncoding, encode_latin1, text_width};
pub use error::{PrintError, PrintResult};
pub use escpos::{DEFAULT_WIDTH, EscPosBuilder, cmd, pad_width};
pub use receipt::{
    ReceiptDocument, ReceiptEncoder, Row, Section, encode_receipt, encode_text_page,
};
pub use transport::{ConnectionType, DeviceInfo, HostError, UsbDeviceFilter};
