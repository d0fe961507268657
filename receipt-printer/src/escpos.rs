//! ESC/POS command builder
//!
//! Provides the command vocabulary and a fluent API for building ESC/POS print data.

use crate::encoding::{TextEncoding, text_width};

/// Default line width: 58mm paper at Font A
pub const DEFAULT_WIDTH: usize = 32;

/// ESC/POS opcodes
pub mod cmd {
    /// ESC @ - Initialize printer
    pub const INIT: [u8; 2] = [0x1B, 0x40];

    pub const ALIGN_LEFT: [u8; 3] = [0x1B, 0x61, 0x00];
    pub const ALIGN_CENTER: [u8; 3] = [0x1B, 0x61, 0x01];
    pub const ALIGN_RIGHT: [u8; 3] = [0x1B, 0x61, 0x02];

    pub const BOLD_ON: [u8; 3] = [0x1B, 0x45, 0x01];
    pub const BOLD_OFF: [u8; 3] = [0x1B, 0x45, 0x00];

    /// GS ! 0x11 - Double width and height
    pub const DOUBLE_ON: [u8; 3] = [0x1D, 0x21, 0x11];
    pub const DOUBLE_OFF: [u8; 3] = [0x1D, 0x21, 0x00];

    pub const UNDERLINE_ON: [u8; 3] = [0x1B, 0x2D, 0x01];
    pub const UNDERLINE_OFF: [u8; 3] = [0x1B, 0x2D, 0x00];

    /// GS V 1 - Partial cut (leave a small connection)
    pub const CUT_PARTIAL: [u8; 3] = [0x1D, 0x56, 0x01];
    /// GS V 0 - Full cut
    pub const CUT_FULL: [u8; 3] = [0x1D, 0x56, 0x00];

    /// ESC d 3 - Print and feed 3 lines
    pub const FEED_3: [u8; 3] = [0x1B, 0x64, 0x03];
    /// ESC d 5 - Print and feed 5 lines
    pub const FEED_5: [u8; 3] = [0x1B, 0x64, 0x05];

    pub const LF: u8 = 0x0A;
}

/// ESC/POS command builder
///
/// Builds ESC/POS byte sequences for thermal printers.
/// Text is encoded immediately with the configured code page.
pub struct EscPosBuilder {
    buf: Vec<u8>,
    width: usize,
    encoding: TextEncoding,
}

impl EscPosBuilder {
    /// Create a new builder with the specified paper width in characters
    ///
    /// Common widths:
    /// - 58mm paper: 32 characters
    /// - 80mm paper: 48 characters
    pub fn new(width: usize) -> Self {
        Self::with_encoding(width, TextEncoding::default())
    }

    /// Create a builder that encodes text with the given code page
    ///
    /// Emits INIT, followed by the code page select when one is needed.
    pub fn with_encoding(width: usize, encoding: TextEncoding) -> Self {
        let mut buf = Vec::with_capacity(1024);
        buf.extend_from_slice(&cmd::INIT);
        if let Some(select) = encoding.select_command() {
            buf.extend_from_slice(&select);
        }
        Self {
            buf,
            width,
            encoding,
        }
    }

    /// Get the configured paper width
    pub fn width(&self) -> usize {
        self.width
    }

    // === Text Output ===

    /// Write encoded text
    pub fn text(&mut self, s: &str) -> &mut Self {
        let bytes = self.encoding.encode(s);
        self.buf.extend_from_slice(&bytes);
        self
    }

    /// Write text followed by newline
    pub fn line(&mut self, s: &str) -> &mut Self {
        self.text(s);
        self.buf.push(cmd::LF);
        self
    }

    /// Write empty line
    pub fn newline(&mut self) -> &mut Self {
        self.buf.push(cmd::LF);
        self
    }

    /// Print and feed n lines
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        // ESC d n
        self.buf.extend_from_slice(&[0x1B, 0x64, lines]);
        self
    }

    // === Alignment ===

    /// Align text to center
    pub fn center(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::ALIGN_CENTER);
        self
    }

    /// Align text to left (default)
    pub fn left(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::ALIGN_LEFT);
        self
    }

    /// Align text to right
    pub fn right(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::ALIGN_RIGHT);
        self
    }

    // === Text Style ===

    /// Enable bold text
    pub fn bold(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::BOLD_ON);
        self
    }

    /// Disable bold text
    pub fn bold_off(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::BOLD_OFF);
        self
    }

    /// Double width and height
    pub fn double_size(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::DOUBLE_ON);
        self
    }

    /// Reset to normal size
    pub fn reset_size(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::DOUBLE_OFF);
        self
    }

    pub fn underline(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::UNDERLINE_ON);
        self
    }

    pub fn underline_off(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::UNDERLINE_OFF);
        self
    }

    // === Separators ===

    /// Print a line of '-' characters
    pub fn sep_single(&mut self) -> &mut Self {
        self.line(&"-".repeat(self.width))
    }

    // === Layout Helpers ===

    /// Print left and right text on the same line
    ///
    /// Right text is right-aligned within the line width. At least one space
    /// separates the columns; overlong content is not truncated and wraps on paper.
    pub fn line_lr(&mut self, left: &str, right: &str) -> &mut Self {
        let spaces = pad_width(self.width, left, right);
        self.text(left);
        self.text(&" ".repeat(spaces));
        self.line(right)
    }

    // === Paper Control ===

    /// Cut paper (full cut)
    pub fn cut(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::CUT_FULL);
        self
    }

    /// Partial cut (leave a small connection)
    pub fn cut_partial(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&cmd::CUT_PARTIAL);
        self
    }

    // === Raw Commands ===

    /// Write raw bytes directly
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    // === Build ===

    /// Return the final byte buffer
    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH)
    }
}

/// Spaces between the two columns of a `width`-wide line (minimum 1)
pub fn pad_width(width: usize, left: &str, right: &str) -> usize {
    width
        .saturating_sub(text_width(left) + text_width(right))
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_basic() {
        let mut b = EscPosBuilder::new(32);
        b.center().double_size().line("TITLE").reset_size().left().line("body");

        let data = b.build();
        assert_eq!(&data[..2], &cmd::INIT);
        assert_eq!(&data[2..5], &cmd::ALIGN_CENTER);
        assert_eq!(&data[5..8], &cmd::DOUBLE_ON);
        assert_eq!(&data[8..14], b"TITLE\n");
    }

    #[test]
    fn test_codepage_select_follows_init() {
        let data = EscPosBuilder::with_encoding(32, TextEncoding::Cp437).build();
        assert_eq!(data, vec![0x1B, 0x40, 0x1B, 0x74, 0x00]);
    }

    #[test]
    fn test_line_lr_fills_width() {
        let mut b = EscPosBuilder::new(20);
        b.line_lr("Name:", "Ana");

        let data = b.build();
        let line = &data[2..];
        assert_eq!(line.len(), 21);
        assert_eq!(&line[..20], b"Name:            Ana");
        assert_eq!(line[20], cmd::LF);
    }

    #[test]
    fn test_line_lr_overflow_keeps_one_space() {
        let mut b = EscPosBuilder::new(10);
        b.line_lr("abcdefgh", "xyz");

        let data = b.build();
        assert_eq!(&data[2..], b"abcdefgh xyz\n");
    }

    #[test]
    fn test_separator() {
        let mut b = EscPosBuilder::new(10);
        b.sep_single();

        let data = b.build();
        assert_eq!(&data[2..], b"----------\n");
    }

    #[test]
    fn test_pad_width() {
        assert_eq!(pad_width(32, "2x Math Book", "$20.00"), 14);
        assert_eq!(pad_width(32, &"a".repeat(25), "123456"), 1);
        assert_eq!(pad_width(32, &"a".repeat(40), "x"), 1);
    }
}
