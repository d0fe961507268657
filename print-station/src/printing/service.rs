//! Receipt printer service
//!
//! The one object callers talk to: owns the printer connection and the
//! renderer, and turns orders into printed receipts.

use receipt_printer::{
    ConnectionState, DeviceInfo, PrintError, PrinterConnection, ReceiptEncoder, Subscription,
};
use shared::{Order, OrderPayload};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::renderer::{PackageListRenderer, ReceiptFormat};

/// Pause between receipts of a batch so the print head can catch up
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Print(#[from] PrintError),

    #[error("Invalid order payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Receipt printer service
///
/// Built once by the composition root and shared by reference (or `Arc`).
pub struct ReceiptPrinterService {
    printer: PrinterConnection,
    renderer: PackageListRenderer,
    batch_interval: Duration,
}

impl ReceiptPrinterService {
    pub fn new(printer: PrinterConnection, renderer: PackageListRenderer) -> Self {
        Self {
            printer,
            renderer,
            batch_interval: DEFAULT_BATCH_INTERVAL,
        }
    }

    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    pub fn printer(&self) -> &PrinterConnection {
        &self.printer
    }

    fn encoder(&self) -> &ReceiptEncoder {
        self.renderer.encoder()
    }

    // === Capabilities & state ===

    pub fn is_supported(&self) -> bool {
        self.printer.is_supported()
    }

    pub fn has_usb(&self) -> bool {
        self.printer.has_usb()
    }

    pub fn has_serial(&self) -> bool {
        self.printer.has_serial()
    }

    pub fn state(&self) -> ConnectionState {
        self.printer.state()
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.printer.device_info()
    }

    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.printer.on_state_change(listener)
    }

    // === Connection ===

    pub async fn connect(&self) -> ServiceResult<()> {
        Ok(self.printer.connect().await?)
    }

    pub async fn connect_usb(&self) -> ServiceResult<()> {
        Ok(self.printer.connect_usb().await?)
    }

    pub async fn connect_serial(&self) -> ServiceResult<()> {
        Ok(self.printer.connect_serial().await?)
    }

    pub async fn disconnect(&self) {
        self.printer.disconnect().await;
    }

    /// Probe the device before a batch; the cached state alone does not prove
    /// the printer is still there
    pub async fn check_alive(&self) -> bool {
        match self.printer.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Printer liveness check failed");
                false
            }
        }
    }

    // === Printing ===

    /// Render and print one package list
    #[instrument(skip_all, fields(order_id = %order.order_id))]
    pub async fn print_order(&self, order: &Order, format: &ReceiptFormat) -> ServiceResult<()> {
        let data = self.renderer.render(order, format);
        self.printer.send(&data).await?;
        info!(bytes = data.len(), "Package list printed");
        Ok(())
    }

    /// Print orders one after another, pausing between receipts
    ///
    /// Stops at the first failure; receipts already printed stay printed.
    #[instrument(skip_all, fields(count = orders.len()))]
    pub async fn print_orders(&self, orders: &[Order], format: &ReceiptFormat) -> ServiceResult<()> {
        for (i, order) in orders.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.batch_interval).await;
            }
            self.print_order(order, format).await?;
        }
        Ok(())
    }

    /// Print a raw upstream order payload
    pub async fn print_payload(
        &self,
        payload: serde_json::Value,
        format: &ReceiptFormat,
    ) -> ServiceResult<()> {
        let order: Order = serde_json::from_value::<OrderPayload>(payload)?.into();
        self.print_order(&order, format).await
    }

    /// Print a batch of raw payloads; all are validated before the first print
    pub async fn print_payloads(
        &self,
        payloads: Vec<serde_json::Value>,
        format: &ReceiptFormat,
    ) -> ServiceResult<()> {
        let orders = payloads
            .into_iter()
            .map(|p| serde_json::from_value::<OrderPayload>(p).map(Order::from))
            .collect::<Result<Vec<_>, _>>()?;
        self.print_orders(&orders, format).await
    }

    /// Print a plain text diagnostic page
    #[instrument(skip_all)]
    pub async fn print_text(&self, text: &str) -> ServiceResult<()> {
        let data = self.encoder().encode_text_page(text);
        self.printer.send(&data).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ReceiptPrinterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptPrinterService")
            .field("state", &self.printer.state())
            .field("batch_interval", &self.batch_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use receipt_printer::ConnectionOptions;
    use receipt_printer::transport::mock::MockUsbHost;
    use serde_json::json;

    fn service(host: &MockUsbHost) -> ReceiptPrinterService {
        let printer = PrinterConnection::new(ConnectionOptions::default()).with_usb_host(host.clone());
        ReceiptPrinterService::new(printer, PackageListRenderer::default())
    }

    #[tokio::test]
    async fn test_print_text_requires_connection() {
        let host = MockUsbHost::printer();
        let svc = service(&host);

        let err = svc.print_text("hello").await.unwrap_err();

        assert!(err.to_string().contains("not connected"));
        assert_eq!(host.requests(), 0);
    }

    #[tokio::test]
    async fn test_print_text_bytes() {
        let host = MockUsbHost::printer();
        let svc = service(&host);
        svc.connect().await.unwrap();

        svc.print_text("hello").await.unwrap();

        assert_eq!(
            host.sent_bytes(),
            [
                &[0x1B, 0x40][..],
                b"hello\n",
                &[0x1B, 0x64, 0x03, 0x1D, 0x56, 0x01]
            ]
            .concat()
        );
    }

    #[tokio::test]
    async fn test_invalid_payload_prints_nothing() {
        let host = MockUsbHost::printer();
        let svc = service(&host);
        svc.connect().await.unwrap();

        let err = svc
            .print_payloads(
                vec![json!({"student_name": "Ana"}), json!({"items": "not a list"})],
                &ReceiptFormat::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidPayload(_)));
        assert!(host.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_check_alive() {
        let host = MockUsbHost::printer();
        let svc = service(&host);
        assert!(!svc.check_alive().await);

        svc.connect().await.unwrap();
        assert!(svc.check_alive().await);
        assert!(svc.state().connected);
    }
}
