//! Receipt document encoder
//!
//! Turns a structured [`ReceiptDocument`] (title, sections of rows, footer)
//! into a flat ESC/POS byte stream. Pure and infallible: missing fields fall
//! back to defaults.

use serde::{Deserialize, Serialize};

use crate::encoding::TextEncoding;
use crate::escpos::{DEFAULT_WIDTH, EscPosBuilder, cmd};

/// One receipt line. A `right` value switches to the two-column layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub left: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
}

impl Row {
    /// Single-column row
    pub fn text(left: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: None,
        }
    }

    /// Two-column row, right text right-aligned
    pub fn pair(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: Some(right.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Section {
    pub fn new(heading: impl Into<String>) -> Self {
        Self {
            heading: Some(heading.into()),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }
}

/// Intermediate representation of a receipt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Separator line, defaults to a full line of dashes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

/// Receipt encoder bound to a paper width and code page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptEncoder {
    width: usize,
    encoding: TextEncoding,
}

impl ReceiptEncoder {
    pub fn new(width: usize, encoding: TextEncoding) -> Self {
        Self { width, encoding }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Encode a full receipt
    pub fn encode(&self, doc: &ReceiptDocument) -> Vec<u8> {
        let mut b = EscPosBuilder::with_encoding(self.width, self.encoding);
        let separator = doc
            .separator
            .clone()
            .unwrap_or_else(|| "-".repeat(self.width));

        if let Some(title) = non_blank(&doc.title) {
            b.center().double_size().bold();
            b.line(title);
            b.bold_off().reset_size();
        }

        if let Some(subtitle) = non_blank(&doc.subtitle) {
            b.center().line(subtitle);
        }

        b.left().line(&separator);

        for section in &doc.sections {
            if let Some(heading) = &section.heading {
                b.bold().line(heading).bold_off();
            }
            for row in &section.rows {
                match &row.right {
                    Some(right) => b.line_lr(&row.left, right),
                    None => b.line(&row.left),
                };
            }
            b.line(&separator);
        }

        if let Some(footer) = non_blank(&doc.footer) {
            b.newline().center().line(footer);
        }

        b.raw(&cmd::FEED_5).raw(&cmd::CUT_PARTIAL);
        b.build()
    }

    /// Encode a minimal diagnostic page: text, feed, cut
    pub fn encode_text_page(&self, text: &str) -> Vec<u8> {
        let mut b = EscPosBuilder::with_encoding(self.width, self.encoding);
        b.line(text).raw(&cmd::FEED_3).raw(&cmd::CUT_PARTIAL);
        b.build()
    }
}

impl Default for ReceiptEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, TextEncoding::default())
    }
}

/// Encode a receipt at 32 columns with the Latin-1 mapping
pub fn encode_receipt(doc: &ReceiptDocument) -> Vec<u8> {
    ReceiptEncoder::default().encode(doc)
}

/// Encode a diagnostic text page at 32 columns with the Latin-1 mapping
pub fn encode_text_page(text: &str) -> Vec<u8> {
    ReceiptEncoder::default().encode_text_page(text)
}

/// Blank header and footer text is skipped like a missing one
fn non_blank(text: &Option<String>) -> Option<&str> {
    text.as_deref().filter(|t| !t.trim().is_empty())
}
