//! Text to bit stream conversion
//!
//! Each character becomes one 8-bit group, most significant bit first.
//! Only 7-bit ASCII is accepted on the way in.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModemError, Result};

pub const BITS_PER_CHAR: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bit {
    Zero,
    One,
}

impl Bit {
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '0' => Some(Bit::Zero),
            '1' => Some(Bit::One),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Bit::Zero => '0',
            Bit::One => '1',
        }
    }
}

impl From<bool> for Bit {
    fn from(value: bool) -> Self {
        if value {
            Bit::One
        } else {
            Bit::Zero
        }
    }
}

impl fmt::Display for Bit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

pub type BitStream = Vec<Bit>;

/// Encode text into a bit stream, 8 bits per character, MSB first.
///
/// Characters outside 7-bit ASCII are rejected rather than truncated.
pub fn encode(text: &str) -> Result<BitStream> {
    let mut bits = Vec::with_capacity(text.len() * BITS_PER_CHAR);
    for (position, character) in text.chars().enumerate() {
        if !character.is_ascii() {
            return Err(ModemError::EncodingError { character, position });
        }
        push_byte(&mut bits, character as u8);
    }
    Ok(bits)
}

fn push_byte(bits: &mut BitStream, byte: u8) {
    for shift in (0..BITS_PER_CHAR).rev() {
        bits.push(Bit::from((byte >> shift) & 1 == 1));
    }
}

/// Decode a bit stream back into text.
///
/// A trailing group shorter than 8 bits is dropped without error, so a
/// partial final character is lost.
pub fn decode(bits: &[Bit]) -> String {
    bits.chunks_exact(BITS_PER_CHAR).map(byte_to_char).collect()
}

/// Decode exactly one 8-bit group.
pub(crate) fn byte_to_char(group: &[Bit]) -> char {
    let byte = group
        .iter()
        .fold(0u8, |acc, &bit| (acc << 1) | (bit == Bit::One) as u8);
    char::from(byte)
}

/// Parse the textual `0`/`1` form of a bit stream.
pub fn parse_bits(text: &str) -> Result<BitStream> {
    text.chars()
        .enumerate()
        .map(|(position, symbol)| {
            Bit::from_symbol(symbol).ok_or(ModemError::DecodingError { symbol, position })
        })
        .collect()
}

/// Parse and decode the textual form in one step.
pub fn decode_str(text: &str) -> Result<String> {
    parse_bits(text).map(|bits| decode(&bits))
}

pub fn format_bits(bits: &[Bit]) -> String {
    bits.iter().map(|bit| bit.symbol()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_hi() {
        let bits = encode("Hi").unwrap();
        assert_eq!(bits.len(), 16);
        assert_eq!(format_bits(&bits), "0100100001101001");
    }

    #[test]
    fn test_decode_hi() {
        assert_eq!(decode_str("0100100001101001").unwrap(), "Hi");
    }

    #[test]
    fn test_round_trip_ascii() {
        let printable: String = (0u8..128).map(char::from).collect();
        for text in ["", "a", "Hello, Audio Modem!", "\t\n\r", printable.as_str()] {
            let bits = encode(text).unwrap();
            assert_eq!(bits.len(), text.len() * BITS_PER_CHAR);
            assert_eq!(decode(&bits), text);
        }
    }

    #[test]
    fn test_encode_zero_pads_small_codes() {
        // '\u{1}' is a single set bit in the last position
        let bits = encode("\u{1}").unwrap();
        assert_eq!(format_bits(&bits), "00000001");
    }

    #[test]
    fn test_encode_rejects_non_ascii() {
        let err = encode("ab\u{e9}c").unwrap_err();
        assert_eq!(
            err,
            ModemError::EncodingError { character: '\u{e9}', position: 2 }
        );
        assert!(encode("\u{1F600}").is_err());
    }

    #[test]
    fn test_decode_drops_trailing_partial_group() {
        let mut bits = encode("Hi").unwrap();
        bits.extend_from_slice(&[Bit::One, Bit::Zero, Bit::One]);
        assert_eq!(decode(&bits), "Hi");

        assert_eq!(decode(&bits[..7]), "");
    }

    #[test]
    fn test_parse_bits_rejects_other_symbols() {
        let err = parse_bits("0102").unwrap_err();
        assert_eq!(err, ModemError::DecodingError { symbol: '2', position: 3 });
        assert!(decode_str("0100 1000").is_err());
    }

    #[test]
    fn test_bit_display() {
        assert_eq!(Bit::One.to_string(), "1");
        assert_eq!(Bit::from(false), Bit::Zero);
    }
}
