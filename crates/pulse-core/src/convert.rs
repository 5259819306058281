// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Word/value codec per byte order and word-swap configuration.
//!
//! Modbus registers and FINS memory words are both 16-bit quantities;
//! multi-word values are assembled according to the device's byte/word
//! ordering convention. For a 32-bit value with bytes `A B C D` (A most
//! significant):
//!
//! - `ABCD`: big-endian bytes, high word first: `[AB, CD]`
//! - `BADC`: bytes swapped within words: `[BA, DC]`
//! - `CDAB`: low word first: `[CD, AB]`
//! - `DCBA`: full little-endian: `[DC, BA]`
//!
//! The word-swap flag exchanges the two words *after* byte ordering is
//! applied, matching gateways that expose the options independently.

use crate::types::{ByteOrder, DataType};

fn swap_bytes(word: u16) -> u16 {
    word.rotate_left(8)
}

/// Assembles the raw 32-bit pattern from two received registers.
fn to_u32_bits(words: [u16; 2], byte_order: ByteOrder, word_swap: bool) -> u32 {
    let [mut w0, mut w1] = words;
    if word_swap {
        std::mem::swap(&mut w0, &mut w1);
    }
    match byte_order {
        ByteOrder::Abcd => ((w0 as u32) << 16) | w1 as u32,
        ByteOrder::Badc => ((swap_bytes(w0) as u32) << 16) | swap_bytes(w1) as u32,
        ByteOrder::Cdab => ((w1 as u32) << 16) | w0 as u32,
        ByteOrder::Dcba => ((swap_bytes(w1) as u32) << 16) | swap_bytes(w0) as u32,
    }
}

/// Splits a 32-bit pattern back into two registers for transmission.
fn from_u32_bits(bits: u32, byte_order: ByteOrder, word_swap: bool) -> [u16; 2] {
    let high = (bits >> 16) as u16;
    let low = (bits & 0xFFFF) as u16;
    let (mut w0, mut w1) = match byte_order {
        ByteOrder::Abcd => (high, low),
        ByteOrder::Badc => (swap_bytes(high), swap_bytes(low)),
        ByteOrder::Cdab => (low, high),
        ByteOrder::Dcba => (swap_bytes(low), swap_bytes(high)),
    };
    if word_swap {
        std::mem::swap(&mut w0, &mut w1);
    }
    [w0, w1]
}

/// Interprets a single register per the byte order.
///
/// The within-word orders (`BADC`, `DCBA`) swap the bytes of 16-bit values
/// too; the word-level orders leave them as transmitted.
fn to_u16_bits(word: u16, byte_order: ByteOrder) -> u16 {
    match byte_order {
        ByteOrder::Abcd | ByteOrder::Cdab => word,
        ByteOrder::Badc | ByteOrder::Dcba => swap_bytes(word),
    }
}

/// Decodes received registers into a numeric value per the configured type.
///
/// String registers are decoded as big-endian ASCII pairs, NUL-trimmed, and
/// coerced to a number; coercion failure returns `None` (the caller logs it
/// as a parse anomaly, not an error).
pub fn decode_registers(
    registers: &[u16],
    data_type: DataType,
    byte_order: ByteOrder,
    word_swap: bool,
) -> Option<f64> {
    match data_type {
        DataType::Bool => registers.first().map(|w| if *w != 0 { 1.0 } else { 0.0 }),
        DataType::Int16 => registers
            .first()
            .map(|w| f64::from(to_u16_bits(*w, byte_order) as i16)),
        DataType::UInt16 => registers
            .first()
            .map(|w| f64::from(to_u16_bits(*w, byte_order))),
        DataType::Int32 => {
            let words = [*registers.first()?, *registers.get(1)?];
            Some(f64::from(to_u32_bits(words, byte_order, word_swap) as i32))
        }
        DataType::UInt32 => {
            let words = [*registers.first()?, *registers.get(1)?];
            Some(f64::from(to_u32_bits(words, byte_order, word_swap)))
        }
        DataType::Float => {
            let words = [*registers.first()?, *registers.get(1)?];
            let value = f32::from_bits(to_u32_bits(words, byte_order, word_swap));
            if value.is_finite() {
                Some(f64::from(value))
            } else {
                None
            }
        }
        DataType::String => {
            let mut bytes = Vec::with_capacity(registers.len() * 2);
            for word in registers {
                bytes.push((word >> 8) as u8);
                bytes.push((word & 0xFF) as u8);
            }
            let text = String::from_utf8_lossy(&bytes);
            let trimmed = text.trim_matches(|c: char| c == '\0' || c == ' ');
            trimmed.parse::<f64>().ok()
        }
    }
}

/// Encodes a numeric value into registers for a typed write.
///
/// Returns `None` when the value does not fit the target type.
pub fn encode_registers(
    value: f64,
    data_type: DataType,
    byte_order: ByteOrder,
    word_swap: bool,
) -> Option<Vec<u16>> {
    match data_type {
        DataType::Bool => Some(vec![u16::from(value != 0.0)]),
        DataType::Int16 => {
            let v = value.round();
            if !(f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&v) {
                return None;
            }
            Some(vec![to_u16_bits(v as i16 as u16, byte_order)])
        }
        DataType::UInt16 => {
            let v = value.round();
            if !(0.0..=f64::from(u16::MAX)).contains(&v) {
                return None;
            }
            Some(vec![to_u16_bits(v as u16, byte_order)])
        }
        DataType::Int32 => {
            let v = value.round();
            if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&v) {
                return None;
            }
            Some(from_u32_bits(v as i32 as u32, byte_order, word_swap).to_vec())
        }
        DataType::UInt32 => {
            let v = value.round();
            if !(0.0..=f64::from(u32::MAX)).contains(&v) {
                return None;
            }
            Some(from_u32_bits(v as u32, byte_order, word_swap).to_vec())
        }
        DataType::Float => {
            Some(from_u32_bits((value as f32).to_bits(), byte_order, word_swap).to_vec())
        }
        DataType::String => None,
    }
}

/// Number of registers a typed read occupies, honoring string lengths.
pub fn register_count(data_type: DataType, string_length: Option<u16>) -> u16 {
    match data_type {
        DataType::String => {
            let chars = string_length.unwrap_or(10).max(1);
            chars.div_ceil(2)
        }
        other => other.register_count(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // 0x41C80000 == 25.0_f32; bytes A=0x41 B=0xC8 C=0x00 D=0x00.
    const FLOAT_BITS: u32 = 0x41C8_0000;

    #[test]
    fn test_float_decode_all_orders() {
        let cases = [
            (ByteOrder::Abcd, [0x41C8u16, 0x0000]),
            (ByteOrder::Badc, [0xC841, 0x0000]),
            (ByteOrder::Cdab, [0x0000, 0x41C8]),
            (ByteOrder::Dcba, [0x0000, 0xC841]),
        ];
        for (order, words) in cases {
            let value = decode_registers(&words, DataType::Float, order, false).unwrap();
            assert_eq!(value, 25.0, "byte order {:?}", order);
        }
    }

    #[test]
    fn test_word_swap_applies_after_ordering() {
        let words = [0x0000u16, 0x41C8];
        // CDAB with word swap behaves like ABCD on this input.
        let value = decode_registers(&words, DataType::Float, ByteOrder::Abcd, true).unwrap();
        assert_eq!(value, 25.0);
    }

    #[test]
    fn test_int16_decode() {
        assert_eq!(
            decode_registers(&[0xFFFF], DataType::Int16, ByteOrder::Cdab, false),
            Some(-1.0)
        );
        assert_eq!(
            decode_registers(&[0xFFFF], DataType::UInt16, ByteOrder::Cdab, false),
            Some(65_535.0)
        );
        // DCBA swaps bytes of single registers too.
        assert_eq!(
            decode_registers(&[0x3412], DataType::UInt16, ByteOrder::Dcba, false),
            Some(f64::from(0x1234u16))
        );
    }

    #[test]
    fn test_int32_roundtrip() {
        for order in [
            ByteOrder::Abcd,
            ByteOrder::Badc,
            ByteOrder::Cdab,
            ByteOrder::Dcba,
        ] {
            for word_swap in [false, true] {
                let regs =
                    encode_registers(-123_456.0, DataType::Int32, order, word_swap).unwrap();
                let back = decode_registers(&regs, DataType::Int32, order, word_swap).unwrap();
                assert_eq!(back, -123_456.0, "{:?} swap={}", order, word_swap);
            }
        }
    }

    #[test]
    fn test_float_encode_matches_bits() {
        let regs = encode_registers(25.0, DataType::Float, ByteOrder::Abcd, false).unwrap();
        let bits = ((regs[0] as u32) << 16) | regs[1] as u32;
        assert_eq!(bits, FLOAT_BITS);
    }

    #[test]
    fn test_string_numeric_coercion() {
        // "123.5" padded with NULs across three registers.
        let regs = [0x3132u16, 0x332E, 0x3500];
        assert_eq!(
            decode_registers(&regs, DataType::String, ByteOrder::Cdab, false),
            Some(123.5)
        );

        // Non-numeric text coerces to None, not an error.
        let regs = [0x4142u16, 0x4344];
        assert_eq!(
            decode_registers(&regs, DataType::String, ByteOrder::Cdab, false),
            None
        );
    }

    #[test]
    fn test_encode_range_checks() {
        assert!(encode_registers(70_000.0, DataType::UInt16, ByteOrder::Cdab, false).is_none());
        assert!(encode_registers(-1.0, DataType::UInt16, ByteOrder::Cdab, false).is_none());
        assert!(encode_registers(40_000.0, DataType::Int16, ByteOrder::Cdab, false).is_none());
        assert!(encode_registers(3e9, DataType::UInt32, ByteOrder::Cdab, false).is_some());
        assert!(encode_registers(5e9, DataType::Int32, ByteOrder::Cdab, false).is_none());
    }

    #[test]
    fn test_register_count() {
        assert_eq!(register_count(DataType::Float, None), 2);
        assert_eq!(register_count(DataType::Int16, None), 1);
        assert_eq!(register_count(DataType::String, None), 5);
        assert_eq!(register_count(DataType::String, Some(7)), 4);
        assert_eq!(register_count(DataType::String, Some(8)), 4);
    }

    #[test]
    fn test_bool_decode() {
        assert_eq!(
            decode_registers(&[1], DataType::Bool, ByteOrder::Cdab, false),
            Some(1.0)
        );
        assert_eq!(
            decode_registers(&[0], DataType::Bool, ByteOrder::Cdab, false),
            Some(0.0)
        );
    }

    #[test]
    fn test_short_register_slice() {
        assert_eq!(
            decode_registers(&[0x41C8], DataType::Float, ByteOrder::Abcd, false),
            None
        );
        assert_eq!(decode_registers(&[], DataType::Int16, ByteOrder::Cdab, false), None);
    }
}
