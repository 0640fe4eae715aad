//! CRC-24 validation for Mode S messages.
//!
//! ICAO standard polynomial: x^24 + x^23 + x^22 + ... + x^10 + x^3 + 1
//! Generator: 0xFFF409
//!
//! For DF17/18 (ADS-B): last 24 bits are pure CRC. Valid frames → remainder 0.
//! For DF0/4/5/16/20/21: last 24 bits are CRC XOR'd with ICAO address.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::types::{hex_decode, hex_encode, Icao};

const GENERATOR: u32 = 0xFFF409;

// ---------------------------------------------------------------------------
// CRC lookup table (compile-time)
// ---------------------------------------------------------------------------

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ GENERATOR;
            } else {
                crc <<= 1;
            }
            crc &= 0xFFFFFF;
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

// ---------------------------------------------------------------------------
// Core CRC functions
// ---------------------------------------------------------------------------

/// Mode S CRC-24 check.
///
/// Polynomial division of the first (n-3) bytes, then XOR with the last 3
/// bytes (PI/CRC field).
///
/// - DF17/18: returns 0 when valid.
/// - DF0/4/5/16/20/21: returns ICAO address.
pub fn crc24(data: &[u8]) -> u32 {
    if data.len() <= 3 {
        let mut val = 0u32;
        for &b in data {
            val = (val << 8) | b as u32;
        }
        return val & 0xFFFFFF;
    }

    let payload_len = data.len() - 3;
    let mut crc = 0u32;

    for &byte in &data[..payload_len] {
        crc = ((crc << 8) ^ CRC_TABLE[((crc >> 16) ^ byte as u32) as usize & 0xFF]) & 0xFFFFFF;
    }

    // XOR with PI field (last 3 bytes)
    crc ^= (data[payload_len] as u32) << 16
        | (data[payload_len + 1] as u32) << 8
        | data[payload_len + 2] as u32;
    crc
}

/// Pure CRC-24 polynomial division of all bytes.
/// Used internally for syndrome table building.
fn crc24_raw(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc = ((crc << 8) ^ CRC_TABLE[((crc >> 16) ^ byte as u32) as usize & 0xFF]) & 0xFFFFFF;
    }
    crc
}

/// Compute CRC-24 of payload bytes (all except last 3).
pub fn crc24_payload(data: &[u8]) -> u32 {
    if data.len() <= 3 {
        return 0;
    }
    crc24_raw(&data[..data.len() - 3])
}

/// Validate a Mode S message (hex string). Returns true if CRC remainder is 0.
pub fn validate(msg_hex: &str) -> bool {
    match hex_decode(msg_hex) {
        Some(data) => crc24(&data) == 0,
        None => false,
    }
}

/// Get CRC residual of a full message.
///
/// For DF17/18: returns 0 if valid.
/// For DF0/4/5/16/20/21: returns the ICAO address.
pub fn residual(msg_hex: &str) -> Option<u32> {
    hex_decode(msg_hex).map(|data| crc24(&data))
}

/// Extract ICAO address from a Mode S message hex string.
///
/// - DF11/17/18: ICAO is bytes 1-3 (explicit).
/// - DF0/4/5/16/20/21: ICAO recovered from CRC residual.
pub fn extract_icao(msg_hex: &str) -> Option<Icao> {
    let data = hex_decode(msg_hex)?;
    if data.is_empty() {
        return None;
    }
    let df = (data[0] >> 3) & 0x1F;

    match df {
        11 | 17 | 18 => {
            if data.len() < 4 {
                return None;
            }
            Some([data[1], data[2], data[3]])
        }
        0 | 4 | 5 | 16 | 20 | 21 => {
            let icao_val = crc24(&data);
            Some([
                ((icao_val >> 16) & 0xFF) as u8,
                ((icao_val >> 8) & 0xFF) as u8,
                (icao_val & 0xFF) as u8,
            ])
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Syndrome tables for error correction
// ---------------------------------------------------------------------------

/// Single-bit syndrome table for 112-bit frames: CRC of an all-zero message
/// with exactly one bit set, keyed by the resulting syndrome. Two-bit (or
/// worse) corruption never lands in this table, so it is never "corrected".
fn build_syndrome_table() -> HashMap<u32, usize> {
    let mut table = HashMap::with_capacity(112);
    for bit in 0..112 {
        let mut msg = [0u8; 14];
        msg[bit / 8] |= 1 << (7 - (bit % 8));
        table.insert(crc24(&msg), bit);
    }
    table
}

static SYNDROME_TABLE: OnceLock<HashMap<u32, usize>> = OnceLock::new();

/// Double-checked initialization: the common case after startup is a lock-free
/// read of an already-populated table; only the first caller(s) pay for the
/// build, and `OnceLock` guarantees at most one build runs even if several
/// threads race into this function before it's filled.
fn syndrome_table() -> &'static HashMap<u32, usize> {
    if let Some(table) = SYNDROME_TABLE.get() {
        return table;
    }
    SYNDROME_TABLE.get_or_init(build_syndrome_table)
}

/// Attempt to correct a single-bit error in a 112-bit Mode S message.
///
/// Looks up the CRC syndrome in the precomputed table. If found, flips the
/// identified bit and re-validates. Never corrects bits 0-4 (DF field) to
/// avoid turning one message type into another. Short (56-bit) frames are
/// never corrected.
///
/// Returns corrected hex string if fixable, `None` otherwise.
pub fn try_fix(msg_hex: &str) -> Option<String> {
    let data = hex_decode(msg_hex)?;
    if data.len() * 8 != 112 {
        return None;
    }
    let syndrome = crc24(&data);
    if syndrome == 0 {
        return Some(msg_hex.to_uppercase());
    }

    let bit = *syndrome_table().get(&syndrome)?;
    if bit < 5 {
        return None;
    }

    let mut fixed = data;
    fixed[bit / 8] ^= 1 << (7 - (bit % 8));
    if crc24(&fixed) != 0 {
        return None;
    }
    Some(hex_encode(&fixed))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // Test vectors from known_frames.py
    const VALID_FRAMES: &[&str] = &[
        "8D4840D6202CC371C32CE0576098",
        "8D40621D58C382D690C8AC2863A7",
        "8D485020994409940838175B284F",
    ];

    #[test]
    fn test_crc_table_entry_zero() {
        assert_eq!(CRC_TABLE[0], 0);
    }

    #[test]
    fn test_crc_table_entry_one() {
        // First byte = 1: manual polynomial division
        // 0x010000 -> shift left 8 times with XOR
        assert_ne!(CRC_TABLE[1], 0);
    }

    #[test]
    fn test_valid_df17_remainder_zero() {
        for hex in VALID_FRAMES {
            let data = hex_decode(hex).unwrap();
            assert_eq!(crc24(&data), 0, "CRC should be 0 for valid DF17: {hex}");
        }
    }

    #[test]
    fn test_validate_hex() {
        for hex in VALID_FRAMES {
            assert!(validate(hex), "validate() should return true for: {hex}");
        }
    }

    #[test]
    fn test_validate_corrupted() {
        // Flip one bit in a valid frame
        let mut data = hex_decode(VALID_FRAMES[0]).unwrap();
        data[5] ^= 0x01;
        let corrupted = hex_encode(&data);
        assert!(!validate(&corrupted));
    }

    #[test]
    fn test_residual() {
        for hex in VALID_FRAMES {
            assert_eq!(residual(hex), Some(0));
        }
    }

    #[test]
    fn test_extract_icao_df17() {
        // "8D4840D6..." -> DF=17, ICAO=4840D6
        let icao = extract_icao("8D4840D6202CC371C32CE0576098").unwrap();
        assert_eq!(icao, [0x48, 0x40, 0xD6]);
    }

    #[test]
    fn test_extract_icao_df17_second() {
        let icao = extract_icao("8D40621D58C382D690C8AC2863A7").unwrap();
        assert_eq!(icao, [0x40, 0x62, 0x1D]);
    }

    #[test]
    fn test_crc24_payload() {
        let data = hex_decode(VALID_FRAMES[0]).unwrap();
        let payload_crc = crc24_payload(&data);
        // For DF17, payload CRC should equal the last 3 bytes
        let pi = (data[11] as u32) << 16 | (data[12] as u32) << 8 | data[13] as u32;
        assert_eq!(payload_crc, pi);
    }

    #[test]
    fn test_try_fix_already_valid() {
        let fixed = try_fix(VALID_FRAMES[0]).unwrap();
        assert_eq!(fixed, VALID_FRAMES[0]);
    }

    #[test]
    fn test_try_fix_single_bit_error() {
        // Corrupt bit 40 (byte 5, bit 0) — well past the DF field
        let mut data = hex_decode(VALID_FRAMES[0]).unwrap();
        data[5] ^= 0x01;
        let corrupted = hex_encode(&data);

        let fixed = try_fix(&corrupted);
        assert!(fixed.is_some(), "Should fix single-bit error");
        assert_eq!(fixed.unwrap(), VALID_FRAMES[0]);
    }

    #[test]
    fn test_try_fix_df_field_protection() {
        // Corrupt bit 0 (DF field) — should refuse to fix
        let mut data = hex_decode(VALID_FRAMES[0]).unwrap();
        data[0] ^= 0x80; // bit 0
        let corrupted = hex_encode(&data);

        assert!(try_fix(&corrupted).is_none());
    }

    #[test]
    fn test_syndrome_table_size() {
        let table = syndrome_table();
        assert!(!table.is_empty());
        assert!(table.len() > 100);
    }

    #[test]
    fn test_try_fix_short_frame_never_corrected() {
        // 56-bit frame with a flipped bit: short frames are never corrected,
        // even if the syndrome happens to collide with a 112-bit table entry.
        let mut data = vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        data[3] ^= 0x01;
        let corrupted = hex_encode(&data);
        assert!(try_fix(&corrupted).is_none());
    }

    #[test]
    fn test_try_fix_two_bit_error_not_corrected() {
        // Flipping two bits should not be "fixed" into a different valid
        // message; the syndrome table only ever maps a single flipped bit.
        let mut data = hex_decode(VALID_FRAMES[0]).unwrap();
        data[5] ^= 0x01;
        data[6] ^= 0x01;
        let corrupted = hex_encode(&data);
        assert_ne!(try_fix(&corrupted), Some(VALID_FRAMES[0].to_string()));
    }
}
