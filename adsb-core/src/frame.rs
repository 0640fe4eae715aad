//! Parse raw hex strings into structured Mode S frames.
//!
//! Responsibilities:
//! - Classify Downlink Format (DF) from first 5 bits
//! - Extract ICAO address (bytes 1-3 for DF11/17/18, or via AP-field recovery
//!   against a candidate set for DF0/4/5/16/20/21)
//! - Package into `ModeFrame`
//! - Reject frames that fail CRC validation
//! - Attempt single-bit error correction on long-frame CRC failures

use std::sync::atomic::{AtomicU64, Ordering};

use crate::crc;
use crate::icao;
use crate::types::{df_info, hex_decode, Icao};

// DFs where ICAO is explicit in bytes 1-3
const DF_EXPLICIT_ICAO: &[u8] = &[11, 17, 18];

// DFs where ICAO is recovered from the AP/PI field against a candidate set
const DF_RECOVERED_ICAO: &[u8] = &[0, 4, 5, 16, 20, 21];

// Only 1-in-N unrecoverable DF17/18 CRC failures are logged, so a noisy
// channel can't flood the log at the per-frame rate.
const CRC_FAILURE_LOG_INTERVAL: u64 = 100;
static UNRECOVERABLE_CRC_FAILURES: AtomicU64 = AtomicU64::new(0);

fn record_unrecoverable_crc_failure(df: u8) {
    let total = UNRECOVERABLE_CRC_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
    if total % CRC_FAILURE_LOG_INTERVAL == 1 {
        tracing::debug!(df, total, "unrecoverable squitter CRC failure");
    }
}

// ---------------------------------------------------------------------------
// ModeFrame
// ---------------------------------------------------------------------------

/// A parsed Mode S frame.
#[derive(Debug, Clone)]
pub struct ModeFrame {
    /// Downlink Format (0-24)
    pub df: u8,
    /// 3-byte ICAO address
    pub icao: Icao,
    /// Full message bytes
    pub raw: Vec<u8>,
    /// Unix timestamp
    pub timestamp: f64,
    /// Signal strength if available
    pub signal_level: Option<f64>,
    /// Message length in bits (56 or 112)
    pub msg_bits: usize,
    /// CRC validation passed (or ICAO recovery succeeded, for short frames)
    pub crc_ok: bool,
    /// True if single-bit error correction was applied
    pub corrected: bool,
    /// True if this frame's ICAO came from AP-field recovery rather than
    /// being read directly from the bits
    pub icao_recovered: bool,
}

impl ModeFrame {
    /// Human-readable Downlink Format name.
    pub fn df_name(&self) -> &'static str {
        df_info(self.df)
            .map(|info| info.name)
            .unwrap_or("Unknown")
    }

    /// True if this is an ADS-B extended squitter (DF17).
    pub fn is_adsb(&self) -> bool {
        self.df == 17
    }

    /// True if this is a 112-bit (long) message.
    pub fn is_long(&self) -> bool {
        self.msg_bits == 112
    }

    /// Message Extended field (bytes 4-10, 56 bits) for DF17/18.
    /// Returns empty slice for short frames.
    pub fn me(&self) -> &[u8] {
        if self.is_long() && self.raw.len() >= 11 {
            &self.raw[4..11]
        } else {
            &[]
        }
    }

    /// Comm-B MB field (bytes 4-10, 56 bits) for DF20/21.
    /// Identical layout to `me()`, named separately for clarity at call sites.
    pub fn mb(&self) -> &[u8] {
        self.me()
    }

    /// ADS-B Type Code (first 5 bits of ME field). None for non-ADS-B.
    pub fn type_code(&self) -> Option<u8> {
        if (self.df != 17 && self.df != 18) || !self.is_long() {
            return None;
        }
        if self.raw.len() < 5 {
            return None;
        }
        Some((self.raw[4] >> 3) & 0x1F)
    }
}

// ---------------------------------------------------------------------------
// Frame parsing
// ---------------------------------------------------------------------------

/// Parse a hex string into a ModeFrame.
///
/// `candidates` is the set of ICAOs to try for short-frame (and DF20/21)
/// address recovery; pass an empty slice if no candidates are known yet
/// (such frames are dropped). Long DF17/18 frames carry an explicit ICAO and
/// ignore `candidates` entirely.
pub fn parse_frame(hex_str: &str, timestamp: f64, signal_level: Option<f64>, candidates: &[Icao]) -> Option<ModeFrame> {
    let hex_str = hex_str.trim();

    // Validate length: 14 hex chars (56 bits) or 28 hex chars (112 bits)
    if hex_str.len() != 14 && hex_str.len() != 28 {
        return None;
    }

    let raw = hex_decode(hex_str)?;
    let msg_bits = raw.len() * 8;
    let df = (raw[0] >> 3) & 0x1F;

    // Check if DF is recognized
    let info = df_info(df)?;

    // Validate message length matches expected for this DF
    if msg_bits != info.bits {
        return None;
    }

    let crc_remainder = crc::crc24(&raw);
    let mut corrected = false;
    let mut raw = raw;

    let (icao, crc_ok, icao_recovered) = if DF_EXPLICIT_ICAO.contains(&df) {
        let mut crc_ok = crc_remainder == 0;
        if !crc_ok {
            crate::demod::record_crc_failure();
        }

        // Attempt single-bit error correction for DF17/18 if CRC fails
        if !crc_ok && (df == 17 || df == 18) {
            let hex_upper = hex_str.to_uppercase();
            if let Some(fixed_hex) = crc::try_fix(&hex_upper) {
                if let Some(fixed_raw) = hex_decode(&fixed_hex) {
                    raw = fixed_raw;
                    crc_ok = true;
                    corrected = true;
                    crate::demod::record_crc_fixed();
                }
            }
        }

        if !crc_ok {
            if df == 17 || df == 18 {
                record_unrecoverable_crc_failure(df);
            }
            return None;
        }

        let icao: Icao = [raw[1], raw[2], raw[3]];
        (icao, true, false)
    } else if DF_RECOVERED_ICAO.contains(&df) {
        let Some(icao) = icao::recover(&raw, candidates) else {
            crate::demod::record_message_filtered();
            return None;
        };
        (icao, true, true)
    } else {
        return None;
    };

    Some(ModeFrame {
        df,
        icao,
        raw,
        timestamp,
        signal_level,
        msg_bits,
        crc_ok,
        corrected,
        icao_recovered,
    })
}

/// Parse a hex string without ICAO candidates.
/// Convenience for decoding standalone DF17/18/11 frames (e.g. test vectors)
/// whose ICAO is explicit; short frames always fail without candidates.
pub fn parse_frame_uncached(hex_str: &str, timestamp: f64, signal_level: Option<f64>) -> Option<ModeFrame> {
    parse_frame(hex_str, timestamp, signal_level, &[])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{hex_decode, hex_encode, icao_to_string};

    #[test]
    fn test_parse_df17_identification() {
        let frame = parse_frame_uncached("8D4840D6202CC371C32CE0576098", 1.0, None);
        assert!(frame.is_some());
        let frame = frame.unwrap();
        assert_eq!(frame.df, 17);
        assert_eq!(icao_to_string(&frame.icao), "4840D6");
        assert!(frame.crc_ok);
        assert!(!frame.corrected);
        assert_eq!(frame.msg_bits, 112);
        assert!(frame.is_adsb());
        assert!(frame.is_long());
    }

    #[test]
    fn test_parse_df17_position() {
        let frame = parse_frame_uncached("8D40621D58C382D690C8AC2863A7", 1.0, None).unwrap();
        assert_eq!(frame.df, 17);
        assert_eq!(icao_to_string(&frame.icao), "40621D");
        assert!(frame.crc_ok);

        // TC should be 11 (airborne position with barometric altitude)
        let tc = frame.type_code().unwrap();
        assert!(tc >= 9 && tc <= 18, "TC={tc} should be airborne position");
    }

    #[test]
    fn test_parse_df17_velocity() {
        let frame = parse_frame_uncached("8D485020994409940838175B284F", 1.0, None).unwrap();
        assert_eq!(frame.df, 17);
        assert_eq!(icao_to_string(&frame.icao), "485020");
        assert_eq!(frame.type_code(), Some(19));
    }

    #[test]
    fn test_parse_invalid_length() {
        assert!(parse_frame_uncached("8D4840D6", 0.0, None).is_none());
        assert!(parse_frame_uncached("", 0.0, None).is_none());
    }

    #[test]
    fn test_parse_invalid_hex() {
        assert!(parse_frame_uncached("ZZZZZZZZZZZZZZ", 0.0, None).is_none());
    }

    #[test]
    fn test_me_field() {
        let frame = parse_frame_uncached("8D4840D6202CC371C32CE0576098", 1.0, None).unwrap();
        let me = frame.me();
        assert_eq!(me.len(), 7); // 56 bits = 7 bytes
    }

    #[test]
    fn test_type_code_identification() {
        let frame = parse_frame_uncached("8D4840D6202CC371C32CE0576098", 1.0, None).unwrap();
        let tc = frame.type_code().unwrap();
        assert!(tc >= 1 && tc <= 4, "TC={tc} should be identification");
    }

    #[test]
    fn test_short_frame_without_candidates_is_dropped() {
        // A DF4 reply (14 hex chars = 56 bits) with no candidate ICAOs can
        // never be resolved, regardless of what its AP field contains.
        assert!(parse_frame("20001234567890", 1.0, None, &[]).is_none());
    }

    #[test]
    fn test_short_frame_recovered_with_matching_candidate() {
        // Build a DF4 reply whose AP field matches a known candidate.
        let target: Icao = [0x48, 0x40, 0xD6];
        let mut data = vec![0x20u8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let crc = crc::crc24_payload(&data);
        let ap = crc ^ crate::types::icao_to_u32(&target);
        data[4] = ((ap >> 16) & 0xFF) as u8;
        data[5] = ((ap >> 8) & 0xFF) as u8;
        data[6] = (ap & 0xFF) as u8;
        let hex = hex_encode(&data);

        let frame = parse_frame(&hex, 1.0, None, &[target]).unwrap();
        assert_eq!(frame.icao, target);
        assert!(frame.icao_recovered);
        assert!(frame.crc_ok);
    }

    #[test]
    fn test_error_correction() {
        // Corrupt a bit in a valid frame (bit 40, well past DF field)
        let mut data = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        data[5] ^= 0x01;
        let corrupted = hex_encode(&data);

        let frame = parse_frame_uncached(&corrupted, 1.0, None);
        assert!(frame.is_some(), "Error correction should fix single-bit error");
        let frame = frame.unwrap();
        assert!(frame.crc_ok);
        assert!(frame.corrected);
    }

    #[test]
    fn test_error_correction_records_crc_failure_and_fixed() {
        crate::demod::reset_stats();
        let mut data = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        data[5] ^= 0x01;
        let corrupted = hex_encode(&data);

        assert!(parse_frame_uncached(&corrupted, 1.0, None).is_some());
        let stats = crate::demod::stats_snapshot();
        assert_eq!(stats.crc_failures, 1);
        assert_eq!(stats.crc_fixed, 1);
    }

    #[test]
    fn test_unrecoverable_long_frame_records_crc_failure_without_fix() {
        crate::demod::reset_stats();
        // Two corrupted bits defeat single-bit correction.
        let mut data = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        data[5] ^= 0x01;
        data[8] ^= 0x01;
        let corrupted = hex_encode(&data);

        assert!(parse_frame_uncached(&corrupted, 1.0, None).is_none());
        let stats = crate::demod::stats_snapshot();
        assert_eq!(stats.crc_failures, 1);
        assert_eq!(stats.crc_fixed, 0);
    }

    #[test]
    fn test_short_frame_without_candidates_records_message_filtered() {
        crate::demod::reset_stats();
        assert!(parse_frame("20001234567890", 1.0, None, &[]).is_none());
        let stats = crate::demod::stats_snapshot();
        assert_eq!(stats.messages_filtered, 1);
    }
}
