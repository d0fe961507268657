use receipt_printer::{
    ConnectionOptions, ConnectionType, DEFAULT_BAUD_RATES, DEFAULT_USB_CHUNK_SIZE, DEFAULT_WIDTH,
    TextEncoding, UsbDeviceFilter,
};
use std::time::Duration;

use crate::printing::{DEFAULT_FOOTER, DEFAULT_TITLE, PackageListRenderer, ReceiptFormat};

/// Print station configuration
///
/// # Environment variables
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | PRINTER_TRANSPORT_ORDER | usb,serial | Transports tried by `connect()` |
/// | PRINTER_BAUD_RATES | 115200,9600,19200,38400 | Serial negotiation order |
/// | PRINTER_USB_CHUNK_SIZE | 64 | Bulk transfer packet size |
/// | PRINTER_USB_VENDOR_ID | - | Narrow the USB picker (hex) |
/// | PRINTER_USB_PRODUCT_ID | - | Narrow the USB picker (hex) |
/// | PRINTER_SERIAL_PORT | - | Serial port to pick, e.g. /dev/ttyUSB0 |
/// | PRINTER_LINE_WIDTH | 32 | Characters per line |
/// | PRINTER_CODEPAGE | latin1 | latin1, cp437 or windows1252 |
/// | PRINTER_BATCH_INTERVAL_MS | 300 | Pause between receipts in a batch |
/// | RECEIPT_TITLE | PACKAGE LIST | Receipt title |
/// | RECEIPT_FOOTER | Thank you! | Receipt footer |
/// | LOG_LEVEL | info | Used when RUST_LOG is unset |
/// | LOG_FORMAT | text | text or json |
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub transport_order: Vec<ConnectionType>,
    pub baud_rates: Vec<u32>,
    pub usb_chunk_size: usize,
    pub usb_vendor_id: Option<u16>,
    pub usb_product_id: Option<u16>,
    pub serial_port: Option<String>,
    pub line_width: usize,
    pub codepage: TextEncoding,
    pub batch_interval_ms: u64,
    pub receipt_title: String,
    pub receipt_footer: String,
    pub log_level: String,
    pub log_json: bool,
}

impl Config {
    /// Load from process environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ConnectionOptions::default();

        Self {
            transport_order: get("PRINTER_TRANSPORT_ORDER")
                .map(|v| parse_list(&v))
                .filter(|v: &Vec<ConnectionType>| !v.is_empty())
                .unwrap_or(defaults.transport_order),
            baud_rates: get("PRINTER_BAUD_RATES")
                .map(|v| parse_list(&v))
                .filter(|v: &Vec<u32>| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_BAUD_RATES.to_vec()),
            usb_chunk_size: get("PRINTER_USB_CHUNK_SIZE")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_USB_CHUNK_SIZE),
            usb_vendor_id: get("PRINTER_USB_VENDOR_ID").and_then(|v| parse_hex(&v)),
            usb_product_id: get("PRINTER_USB_PRODUCT_ID").and_then(|v| parse_hex(&v)),
            serial_port: get("PRINTER_SERIAL_PORT").filter(|v| !v.trim().is_empty()),
            line_width: get("PRINTER_LINE_WIDTH")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_WIDTH),
            codepage: get("PRINTER_CODEPAGE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            batch_interval_ms: get("PRINTER_BATCH_INTERVAL_MS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(300),
            receipt_title: get("RECEIPT_TITLE")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.into()),
            receipt_footer: get("RECEIPT_FOOTER")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FOOTER.into()),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            log_json: get("LOG_FORMAT").is_some_and(|v| v.trim().eq_ignore_ascii_case("json")),
        }
    }

    /// Connection options for the printer link
    pub fn connection_options(&self) -> ConnectionOptions {
        let usb_filters = if self.usb_vendor_id.is_some() || self.usb_product_id.is_some() {
            vec![UsbDeviceFilter {
                vendor_id: self.usb_vendor_id,
                product_id: self.usb_product_id,
                class_code: None,
            }]
        } else {
            vec![UsbDeviceFilter::any()]
        };

        ConnectionOptions {
            transport_order: self.transport_order.clone(),
            baud_rates: self.baud_rates.clone(),
            usb_chunk_size: self.usb_chunk_size,
            usb_filters,
        }
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn renderer(&self) -> PackageListRenderer {
        PackageListRenderer::new(self.line_width, self.codepage)
    }

    /// Default receipt format (subtitle left to the current timestamp)
    pub fn receipt_format(&self) -> ReceiptFormat {
        ReceiptFormat {
            title: Some(self.receipt_title.clone()),
            subtitle: None,
            footer: Some(self.receipt_footer.clone()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_list<T: std::str::FromStr>(value: &str) -> Vec<T> {
    value
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

fn parse_hex(value: &str) -> Option<u16> {
    let v = value.trim();
    let digits = v
        .strip_prefix("0x")
        .or_else(|| v.strip_prefix("0X"))
        .unwrap_or(v);
    u16::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.transport_order, vec![ConnectionType::Usb, ConnectionType::Serial]);
        assert_eq!(c.baud_rates, vec![115_200, 9_600, 19_200, 38_400]);
        assert_eq!(c.usb_chunk_size, 64);
        assert_eq!(c.line_width, 32);
        assert_eq!(c.codepage, TextEncoding::Latin1);
        assert_eq!(c.batch_interval(), Duration::from_millis(300));
        assert_eq!(c.receipt_format().title.as_deref(), Some("PACKAGE LIST"));
        assert_eq!(c.receipt_format().footer.as_deref(), Some("Thank you!"));
        assert!(!c.log_json);
        assert_eq!(c.connection_options(), ConnectionOptions::default());
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("PRINTER_TRANSPORT_ORDER", "serial, usb"),
            ("PRINTER_BAUD_RATES", "9600,abc,19200"),
            ("PRINTER_USB_VENDOR_ID", "0x0FA8"),
            ("PRINTER_USB_PRODUCT_ID", "a030"),
            ("PRINTER_CODEPAGE", "cp437"),
            ("PRINTER_BATCH_INTERVAL_MS", "50"),
            ("LOG_FORMAT", "JSON"),
        ]);
        assert_eq!(c.transport_order, vec![ConnectionType::Serial, ConnectionType::Usb]);
        assert_eq!(c.baud_rates, vec![9_600, 19_200]);
        assert_eq!(c.codepage, TextEncoding::Cp437);
        assert_eq!(c.batch_interval_ms, 50);
        assert!(c.log_json);

        let options = c.connection_options();
        assert_eq!(options.usb_filters.len(), 1);
        assert!(options.usb_filters[0].matches(0x0FA8, 0xA030, &[]));
        assert!(!options.usb_filters[0].matches(0x0FA8, 0x0001, &[]));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let c = config(&[
            ("PRINTER_TRANSPORT_ORDER", "bluetooth"),
            ("PRINTER_USB_CHUNK_SIZE", "0"),
            ("PRINTER_LINE_WIDTH", "wide"),
            ("PRINTER_USB_VENDOR_ID", "zz"),
            ("PRINTER_SERIAL_PORT", "  "),
        ]);
        assert_eq!(c.transport_order, vec![ConnectionType::Usb, ConnectionType::Serial]);
        assert_eq!(c.usb_chunk_size, 64);
        assert_eq!(c.line_width, 32);
        assert_eq!(c.usb_vendor_id, None);
        assert_eq!(c.serial_port, None);
    }

    #[test]
    fn test_empty_receipt_text_falls_back() {
        let c = config(&[("RECEIPT_TITLE", ""), ("RECEIPT_FOOTER", "   ")]);
        assert_eq!(c.receipt_title, "PACKAGE LIST");
        assert_eq!(c.receipt_footer, "Thank you!");

        let c = config(&[("RECEIPT_TITLE", "BOOK FAIR")]);
        assert_eq!(c.receipt_format().title.as_deref(), Some("BOOK FAIR"));
    }
}
