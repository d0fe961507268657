//! Text encoding for single-byte thermal printer code pages
//!
//! Printers only understand one byte per glyph. This module maps UTF-8 text
//! onto the selected code page:
//! - `Latin1`: code points up to U+00FF pass through, everything else is `?`
//! - `Cp437`: accented Latin and currency characters mapped to the IBM PC table
//! - `Windows1252`: mapped through `encoding_rs`
//!
//! Unmappable characters always degrade to `?` (0x3F), never fail.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Replacement byte for characters the code page cannot represent
pub const REPLACEMENT: u8 = b'?';

/// Code page used to encode receipt text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// Raw code point bytes, lossy above U+00FF (printer default table untouched)
    #[default]
    Latin1,
    /// IBM Code Page 437 (`ESC t 0`)
    Cp437,
    /// Windows-1252 (`ESC t 16`)
    Windows1252,
}

impl TextEncoding {
    /// ESC t n command selecting this code page on the printer.
    ///
    /// `Latin1` sends nothing so existing receipts stay byte-identical.
    pub fn select_command(self) -> Option<[u8; 3]> {
        match self {
            TextEncoding::Latin1 => None,
            TextEncoding::Cp437 => Some([0x1B, 0x74, 0]),
            TextEncoding::Windows1252 => Some([0x1B, 0x74, 16]),
        }
    }

    /// Encode a string into printer bytes
    pub fn encode(self, s: &str) -> Vec<u8> {
        match self {
            TextEncoding::Latin1 => encode_latin1(s),
            TextEncoding::Cp437 => s.chars().map(cp437_byte).collect(),
            TextEncoding::Windows1252 => encode_windows1252(s),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latin1" | "latin-1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            "cp437" | "pc437" => Ok(TextEncoding::Cp437),
            "windows1252" | "windows-1252" | "cp1252" => Ok(TextEncoding::Windows1252),
            other => Err(format!("Unknown code page: {}", other)),
        }
    }
}

/// Display width of a string in printer columns
///
/// Every encoding here is single-byte, so one character is one column.
pub fn text_width(s: &str) -> usize {
    s.chars().count()
}

/// Map each character to its code point byte, `?` above U+00FF
pub fn encode_latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(REPLACEMENT))
        .collect()
}

fn encode_windows1252(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let mut tmp = [0u8; 4];
    for c in s.chars() {
        if c.is_ascii() {
            out.push(c as u8);
            continue;
        }
        let (bytes, _, had_errors) = encoding_rs::WINDOWS_1252.encode(c.encode_utf8(&mut tmp));
        if had_errors || bytes.len() != 1 {
            out.push(REPLACEMENT);
        } else {
            out.push(bytes[0]);
        }
    }
    out
}

fn cp437_byte(c: char) -> u8 {
    if c.is_ascii() {
        return c as u8;
    }
    match c {
        'Ç' => 0x80,
        'ü' => 0x81,
        'é' => 0x82,
        'â' => 0x83,
        'ä' => 0x84,
        'à' => 0x85,
        'å' => 0x86,
        'ç' => 0x87,
        'ê' => 0x88,
        'ë' => 0x89,
        'è' => 0x8A,
        'ï' => 0x8B,
        'î' => 0x8C,
        'ì' => 0x8D,
        'Ä' => 0x8E,
        'Å' => 0x8F,
        'É' => 0x90,
        'æ' => 0x91,
        'Æ' => 0x92,
        'ô' => 0x93,
        'ö' => 0x94,
        'ò' => 0x95,
        'û' => 0x96,
        'ù' => 0x97,
        'ÿ' => 0x98,
        'Ö' => 0x99,
        'Ü' => 0x9A,
        '¢' => 0x9B,
        '£' => 0x9C,
        '¥' => 0x9D,
        '₧' => 0x9E,
        'ƒ' => 0x9F,
        'á' => 0xA0,
        'í' => 0xA1,
        'ó' => 0xA2,
        'ú' => 0xA3,
        'ñ' => 0xA4,
        'Ñ' => 0xA5,
        'ª' => 0xA6,
        'º' => 0xA7,
        '¿' => 0xA8,
        '¬' => 0xAA,
        '½' => 0xAB,
        '¼' => 0xAC,
        '¡' => 0xAD,
        '«' => 0xAE,
        '»' => 0xAF,
        'ß' => 0xE1,
        'µ' => 0xE6,
        '±' => 0xF1,
        '÷' => 0xF6,
        '°' => 0xF8,
        '·' => 0xFA,
        '²' => 0xFD,
        '\u{00A0}' => 0xFF,
        _ => REPLACEMENT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1_passes_code_points_through() {
        let s = "Caf\u{e9} 10\u{b0} A";
        let bytes = encode_latin1(s);
        assert_eq!(bytes.len(), s.chars().count());
        for (b, c) in bytes.iter().zip(s.chars()) {
            assert_eq!(*b as u32, c as u32);
        }
    }

    #[test]
    fn test_latin1_replaces_wide_characters() {
        assert_eq!(encode_latin1("你好"), vec![0x3F, 0x3F]);
        assert_eq!(encode_latin1("a€b"), vec![b'a', 0x3F, b'b']);
    }

    #[test]
    fn test_cp437_spanish() {
        assert_eq!(TextEncoding::Cp437.encode("Niño"), vec![b'N', b'i', 0xA4, b'o']);
        assert_eq!(TextEncoding::Cp437.encode("¿Qué?"), vec![0xA8, b'Q', b'u', 0x82, b'?']);
        assert_eq!(TextEncoding::Cp437.encode("中"), vec![REPLACEMENT]);
    }

    #[test]
    fn test_windows1252() {
        assert_eq!(TextEncoding::Windows1252.encode("€5"), vec![0x80, b'5']);
        assert_eq!(TextEncoding::Windows1252.encode("ñ"), vec![0xF1]);
        assert_eq!(TextEncoding::Windows1252.encode("中"), vec![REPLACEMENT]);
    }

    #[test]
    fn test_select_command() {
        assert_eq!(TextEncoding::Latin1.select_command(), None);
        assert_eq!(TextEncoding::Cp437.select_command(), Some([0x1B, 0x74, 0]));
        assert_eq!(TextEncoding::Windows1252.select_command(), Some([0x1B, 0x74, 16]));
    }

    #[test]
    fn test_parse() {
        assert_eq!("CP437".parse::<TextEncoding>(), Ok(TextEncoding::Cp437));
        assert_eq!("latin1".parse::<TextEncoding>(), Ok(TextEncoding::Latin1));
        assert!("ebcdic".parse::<TextEncoding>().is_err());
    }

    #[test]
    fn test_text_width() {
        assert_eq!(text_width("hello"), 5);
        assert_eq!(text_width("niño"), 4);
    }
}
