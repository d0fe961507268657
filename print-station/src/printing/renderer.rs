//! Package list renderer
//!
//! Renders an [`Order`] into the receipt handed to students with their
//! package: who it is for, what is in it, and what it cost.

use chrono::Local;
use receipt_printer::{DEFAULT_WIDTH, ReceiptDocument, ReceiptEncoder, Row, Section, TextEncoding};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use shared::Order;

/// Characters of the order id shown on the receipt
const ORDER_ID_CHARS: usize = 8;

pub const DEFAULT_TITLE: &str = "PACKAGE LIST";
pub const DEFAULT_FOOTER: &str = "Thank you!";

/// Optional overrides for the receipt header and footer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptFormat {
    #[serde(default)]
    pub title: Option<String>,
    /// Defaults to the local time of printing
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
}

/// Package list renderer
pub struct PackageListRenderer {
    encoder: ReceiptEncoder,
}

impl PackageListRenderer {
    /// Create a renderer for the given paper width and code page
    ///
    /// Common widths:
    /// - 58mm paper: 32 characters
    /// - 80mm paper: 48 characters
    pub fn new(width: usize, encoding: TextEncoding) -> Self {
        Self {
            encoder: ReceiptEncoder::new(width, encoding),
        }
    }

    pub fn encoder(&self) -> &ReceiptEncoder {
        &self.encoder
    }

    /// Build the receipt document for an order
    pub fn document(&self, order: &Order, format: &ReceiptFormat) -> ReceiptDocument {
        let mut sections = vec![
            Section::new("STUDENT INFO")
                .row(Row::pair("Name:", order.student_name.as_str()))
                .row(Row::pair("Grade:", order.grade.as_str()))
                .row(Row::pair("Order:", short_order_id(&order.order_id))),
        ];

        if !order.items.is_empty() {
            let mut items = Section::new(format!("ITEMS ({})", order.items.len()));
            for item in &order.items {
                let price = item.price.map(format_money).unwrap_or_default();
                items = items.row(Row::pair(format!("{}x {}", item.quantity, item.name), price));
            }
            sections.push(items);
        }

        // An overflowing total is left off rather than printed wrong
        if let Some(total) = order.total().filter(|t| *t > Decimal::ZERO) {
            sections.push(Section {
                heading: None,
                rows: vec![Row::pair("TOTAL:", format_money(total))],
            });
        }

        ReceiptDocument {
            title: Some(non_blank(&format.title).unwrap_or_else(|| DEFAULT_TITLE.to_string())),
            subtitle: Some(non_blank(&format.subtitle).unwrap_or_else(timestamp)),
            separator: None,
            sections,
            footer: Some(non_blank(&format.footer).unwrap_or_else(|| DEFAULT_FOOTER.to_string())),
        }
    }

    /// Render an order to ESC/POS bytes
    pub fn render(&self, order: &Order, format: &ReceiptFormat) -> Vec<u8> {
        self.encoder.encode(&self.document(order, format))
    }
}

impl Default for PackageListRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, TextEncoding::default())
    }
}

/// Blank overrides count as unset
fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

/// Last 8 characters of the order id
fn short_order_id(order_id: &str) -> String {
    let count = order_id.chars().count();
    order_id
        .chars()
        .skip(count.saturating_sub(ORDER_ID_CHARS))
        .collect()
}

/// `$` plus two decimals, rounded half away from zero
fn format_money(amount: Decimal) -> String {
    format!(
        "${:.2}",
        amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    )
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
