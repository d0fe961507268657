//! Package list printing
//!
//! - Renderer: turns an order into a receipt document
//! - Service: owns the printer connection and prints rendered receipts

pub mod renderer;
pub mod service;

pub use renderer::{DEFAULT_FOOTER, DEFAULT_TITLE, PackageListRenderer, ReceiptFormat};
pub use service::{DEFAULT_BATCH_INTERVAL, ReceiptPrinterService, ServiceError, ServiceResult};
