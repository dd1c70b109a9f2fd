//! # Hex Helpers
//!
//! Parsing and formatting for the CLI: addresses given as `0x…` or decimal,
//! byte strings given as hex, and classic 16-byte-per-line dumps.
//!
//! ```rust
//! use crossmem_utils::hex::{format_hexdump, parse_address, parse_hex_bytes};
//!
//! assert_eq!(parse_address("0x40_0010").unwrap(), 0x40_0010);
//! assert_eq!(parse_hex_bytes("de ad be ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
//! assert!(format_hexdump(0x1000, b"hi").starts_with("0x0000000000001000"));
//! ```

use std::fmt::Write;

/// Bytes per hexdump line.
pub const BYTES_PER_LINE: usize = 16;

/// Input the CLI could not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError
{
    /// Empty input
    #[error("empty input")]
    Empty,

    /// Not a valid address
    #[error("invalid address '{0}': expected 0x-prefixed hex or decimal")]
    InvalidAddress(String),

    /// Not a valid hex byte string
    #[error("invalid hex byte string at offset {offset}: '{found}'")]
    InvalidHex
    {
        /// Offset of the bad digit pair in the cleaned input
        offset: usize,
        /// What was found there
        found: String,
    },

    /// Hex string with an odd number of digits
    #[error("hex byte string has an odd number of digits ({0})")]
    OddLength(usize),
}

/// Parse an address: `0x`-prefixed hex or plain decimal. Underscores are
/// ignored.
///
/// ## Errors
///
/// `ParseError::Empty` or `ParseError::InvalidAddress`.
pub fn parse_address(input: &str) -> Result<u64, ParseError>
{
    let cleaned: String = input.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return Err(ParseError::Empty);
    }
    let parsed = match cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse::<u64>(),
    };
    parsed.map_err(|_| ParseError::InvalidAddress(input.to_string()))
}

/// Parse a byte string written as hex digit pairs, optionally separated by
/// whitespace, `:` or `,` and optionally prefixed with `0x`.
///
/// ## Errors
///
/// `ParseError::Empty`, `ParseError::OddLength` or `ParseError::InvalidHex`.
pub fn parse_hex_bytes(input: &str) -> Result<Vec<u8>, ParseError>
{
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: Vec<char> = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();

    if digits.is_empty() {
        return Err(ParseError::Empty);
    }
    if digits.len() % 2 != 0 {
        return Err(ParseError::OddLength(digits.len()));
    }

    digits
        .chunks(2)
        .enumerate()
        .map(|(index, pair)| {
            let text: String = pair.iter().collect();
            u8::from_str_radix(&text, 16).map_err(|_| ParseError::InvalidHex {
                offset: index * 2,
                found: text,
            })
        })
        .collect()
}

/// Render `bytes` as a hexdump, labelling lines from `base`.
///
/// Each line is the address, up to 16 hex bytes (with an extra space after
/// the eighth) and the printable-ASCII column.
pub fn format_hexdump(base: u64, bytes: &[u8]) -> String
{
    let mut out = String::new();
    for (line, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let address = base.wrapping_add((line * BYTES_PER_LINE) as u64);
        let _ = write!(out, "0x{address:016x}  ");

        for column in 0..BYTES_PER_LINE {
            match chunk.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
            if column == 7 {
                out.push(' ');
            }
        }

        out.push_str(" |");
        out.extend(chunk.iter().map(|b| if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '.' }));
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_address_forms()
    {
        assert_eq!(parse_address("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_address("0X7fff_0000").unwrap(), 0x7fff_0000);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert_eq!(parse_address("  0xdead  ").unwrap(), 0xdead);
    }

    #[test]
    fn test_parse_address_rejects_garbage()
    {
        assert_eq!(parse_address(""), Err(ParseError::Empty));
        assert_eq!(parse_address("0xzz"), Err(ParseError::InvalidAddress("0xzz".into())));
        assert!(parse_address("0x1_0000_0000_0000_0000").is_err());
        assert!(parse_address("-5").is_err());
    }

    #[test]
    fn test_parse_hex_bytes_separators()
    {
        assert_eq!(parse_hex_bytes("11223344").unwrap(), vec![0x11, 0x22, 0x33, 0x44]);
        assert_eq!(parse_hex_bytes("0xCAFE").unwrap(), vec![0xca, 0xfe]);
        assert_eq!(parse_hex_bytes("de:ad, be ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_parse_hex_bytes_errors()
    {
        assert_eq!(parse_hex_bytes("   "), Err(ParseError::Empty));
        assert_eq!(parse_hex_bytes("abc"), Err(ParseError::OddLength(3)));
        assert_eq!(
            parse_hex_bytes("00zz"),
            Err(ParseError::InvalidHex {
                offset: 2,
                found: "zz".into()
            })
        );
    }

    #[test]
    fn test_hexdump_layout()
    {
        let bytes: Vec<u8> = (0u8..20).map(|b| b + 0x41).collect();
        let dump = format_hexdump(0x40_0010, &bytes);
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0x0000000000400010  41 42 43 44 45 46 47 48  49 4a"));
        assert!(lines[0].ends_with("|ABCDEFGHIJKLMNOP|"));
        assert!(lines[1].starts_with("0x0000000000400020  51 52 53 54 "));
        assert!(lines[1].ends_with("|QRST|"));
        // Short lines keep the ASCII column aligned
        assert_eq!(lines[0].find('|'), lines[1].find('|'));
    }

    #[test]
    fn test_hexdump_non_printable()
    {
        let dump = format_hexdump(0, &[0x00, b'a', 0xff, b' ']);
        assert!(dump.trim_end().ends_with("|.a. |"));
    }

    #[test]
    fn test_hexdump_empty()
    {
        assert_eq!(format_hexdump(0x1000, &[]), "");
    }
}
