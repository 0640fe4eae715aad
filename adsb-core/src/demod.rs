//! IQ sample demodulation — convert raw radio samples to ADS-B bitstreams.
//!
//! Pipeline:
//! 1. IQ to magnitude: lookup table for normalized |z| per sample pair.
//! 2. Preamble detection: fixed pulse-pattern check against a flat signal floor.
//! 3. Bit recovery: PPM with phase correction and a previous-bit fallback for
//!    low-confidence transitions.
//!
//! At 2 MHz sample rate:
//! - 1 bit = 2 samples (1 µs per bit)
//! - Preamble = 16 samples (8 µs)
//! - Short message (56 bits) = 112 samples after preamble
//! - Long message (112 bits) = 224 samples after preamble

use std::sync::{LazyLock, Mutex};

use crate::types::df_info;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const SAMPLE_RATE_HZ: f64 = 2_000_000.0;
const SAMPLES_PER_BIT: usize = 2;
const PREAMBLE_SAMPLES: usize = 16;
pub const SHORT_MSG_BITS: usize = 56;
pub const LONG_MSG_BITS: usize = 112;
const SHORT_MSG_SAMPLES: usize = SHORT_MSG_BITS * SAMPLES_PER_BIT; // 112
const LONG_MSG_SAMPLES: usize = LONG_MSG_BITS * SAMPLES_PER_BIT; // 224

/// Total window needed: preamble + longest message.
pub const WINDOW_SIZE: usize = PREAMBLE_SAMPLES + LONG_MSG_SAMPLES; // 240

/// Minimum average pulse level for a preamble to be considered present.
pub const MIN_SIGNAL_LEVEL: f32 = 0.008;
/// Below this confidence delta, a bit copies the previous bit's value.
pub const LOW_CONFIDENCE_BIT_THRESHOLD: f32 = 0.004;
/// A frame whose average per-bit confidence falls below this is rejected outright.
pub const MIN_BIT_DELTA: f32 = 0.003;

const PHASE_CORRECTION_ONE: f32 = 1.25;
const PHASE_CORRECTION_ZERO: f32 = 0.8;

// ---------------------------------------------------------------------------
// Magnitude Lookup Table
// ---------------------------------------------------------------------------

/// Pre-computed normalized magnitude for all 256×256 IQ combinations.
/// `MAG_LUT[i * 256 + q] = sqrt(((i-127.5)/127.5)^2 + ((q-127.5)/127.5)^2)`
static MAG_LUT: LazyLock<Vec<f32>> = LazyLock::new(|| {
    let mut lut = vec![0.0f32; 256 * 256];
    for i in 0..256u32 {
        let iv = (i as f32 - 127.5) / 127.5;
        let i_sq = iv * iv;
        for q in 0..256u32 {
            let qv = (q as f32 - 127.5) / 127.5;
            lut[(i * 256 + q) as usize] = (i_sq + qv * qv).sqrt();
        }
    }
    lut
});

/// Convert interleaved uint8 IQ pairs to magnitude.
///
/// Input: flat slice `[I0, Q0, I1, Q1, ...]` from an SDR device.
/// Output: one f32 per sample pair.
pub fn iq_to_magnitude(raw: &[u8]) -> Vec<f32> {
    let n = raw.len() / 2;
    record_samples_processed(n as u64);
    let lut = &*MAG_LUT;
    let mut mag = Vec::with_capacity(n);
    for i in 0..n {
        let idx = raw[i * 2] as usize * 256 + raw[i * 2 + 1] as usize;
        mag.push(lut[idx]);
    }
    mag
}

// ---------------------------------------------------------------------------
// Demod stats
// ---------------------------------------------------------------------------

/// Running counters for a capture/decode session, behind a small mutex since
/// they're updated far less often than the per-sample hot path. Spans the
/// whole pipeline, not just this module: `frame.rs` and `tracker.rs` record
/// into the same counters so a single snapshot covers demod, CRC, and
/// filtering in one place.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemodStats {
    pub preambles_checked: u64,
    pub frames_found: u64,
    pub frames_rejected_low_confidence: u64,
    pub samples_processed: u64,
    pub crc_failures: u64,
    pub crc_fixed: u64,
    pub messages_filtered: u64,
}

static STATS: Mutex<DemodStats> = Mutex::new(DemodStats {
    preambles_checked: 0,
    frames_found: 0,
    frames_rejected_low_confidence: 0,
    samples_processed: 0,
    crc_failures: 0,
    crc_fixed: 0,
    messages_filtered: 0,
});

/// Snapshot of the process-wide demod counters.
pub fn stats_snapshot() -> DemodStats {
    *STATS.lock().unwrap()
}

/// Reset all counters to zero. Exposed for tests and for CLI `--reset-stats`.
pub fn reset_stats() {
    *STATS.lock().unwrap() = DemodStats::default();
}

fn record_preamble_check() {
    STATS.lock().unwrap().preambles_checked += 1;
}

fn record_frame_found() {
    STATS.lock().unwrap().frames_found += 1;
}

fn record_low_confidence_reject() {
    STATS.lock().unwrap().frames_rejected_low_confidence += 1;
}

/// Count `n` freshly-ingested IQ samples. Called once per `iq_to_magnitude`
/// call, which is the sample-ingest boundary for both file and live capture.
fn record_samples_processed(n: u64) {
    STATS.lock().unwrap().samples_processed += n;
}

/// A long frame's CRC did not validate on first check (before any
/// single-bit correction attempt).
pub fn record_crc_failure() {
    STATS.lock().unwrap().crc_failures += 1;
}

/// A long frame's CRC failure was repaired by single-bit correction.
pub fn record_crc_fixed() {
    STATS.lock().unwrap().crc_fixed += 1;
}

/// A parsed message was dropped after decode: short-frame ICAO recovery
/// found no matching candidate, or a `show_only` filter rejected it.
pub fn record_message_filtered() {
    STATS.lock().unwrap().messages_filtered += 1;
}

// ---------------------------------------------------------------------------
// Preamble Detection
// ---------------------------------------------------------------------------

/// Check if a valid ADS-B preamble starts at position `pos`.
///
/// Pulses at offsets 0, 2, 7, 9; low at 1, 3, 4, 5, 6, 8 and 10-15.
/// Returns the reported signal level (`high`) if valid, `None` otherwise.
pub fn check_preamble(mag: &[f32], pos: usize) -> Option<f32> {
    if pos + WINDOW_SIZE > mag.len() {
        return None;
    }
    record_preamble_check();

    let m = |off: usize| mag[pos + off];

    if !(m(0) > m(1) && m(1) < m(2) && m(2) > m(3) && m(3) < m(0)) {
        return None;
    }
    for off in 4..7 {
        if m(off) >= m(0) {
            return None;
        }
    }
    if !(m(7) > m(8) && m(8) < m(9) && m(9) > m(6)) {
        return None;
    }

    let high = (m(0) + m(2) + m(7) + m(9)) / 6.0;
    if high < MIN_SIGNAL_LEVEL {
        return None;
    }

    if m(4) >= high || m(5) >= high {
        return None;
    }
    for off in 11..16 {
        if m(off) >= high {
            return None;
        }
    }

    Some(high)
}

// ---------------------------------------------------------------------------
// Bit Recovery
// ---------------------------------------------------------------------------

/// Recover bits from a magnitude buffer using PPM with phase correction.
///
/// Pulse in the first half of a bit period = 1, second half = 0. Returns
/// `None` if the average per-bit confidence falls below `MIN_BIT_DELTA`.
pub fn recover_bits(mag: &[f32], pos: usize, n_bits: usize) -> Option<Vec<u8>> {
    let mut bits = Vec::with_capacity(n_bits);
    let mut phase_correction = 1.0f32;
    let mut delta_sum = 0.0f32;
    let mut prev_bit = 0u8;

    for k in 0..n_bits {
        let base = pos + k * SAMPLES_PER_BIT;
        if base + 1 >= mag.len() {
            return None;
        }

        let first = mag[base] * phase_correction;
        let second = mag[base + 1];
        let delta = (first - second).abs();
        delta_sum += delta;

        let bit = if k > 0 && delta < LOW_CONFIDENCE_BIT_THRESHOLD {
            prev_bit
        } else if first > second {
            1
        } else {
            0
        };

        phase_correction = if bit == 1 {
            PHASE_CORRECTION_ONE
        } else {
            PHASE_CORRECTION_ZERO
        };

        bits.push(bit);
        prev_bit = bit;
    }

    if delta_sum < MIN_BIT_DELTA * n_bits as f32 {
        record_low_confidence_reject();
        return None;
    }

    Some(bits)
}

/// Convert bit slice to uppercase hex string.
pub fn bits_to_hex(bits: &[u8]) -> String {
    let mut hex = String::with_capacity(bits.len() / 4);
    for chunk in bits.chunks(4) {
        if chunk.len() < 4 {
            break;
        }
        let value = (chunk[0] << 3) | (chunk[1] << 2) | (chunk[2] << 1) | chunk[3];
        hex.push(
            char::from_digit(value as u32, 16)
                .unwrap()
                .to_ascii_uppercase(),
        );
    }
    hex
}

/// True if `hex` decodes to a frame whose length matches a recognized DF.
fn looks_like_valid_frame(bits: &[u8]) -> bool {
    if bits.len() < 5 {
        return false;
    }
    let df = (bits[0] << 4) | (bits[1] << 3) | (bits[2] << 2) | (bits[3] << 1) | bits[4];
    df_info(df).is_some_and(|info| info.bits == bits.len())
}

// ---------------------------------------------------------------------------
// Demodulate Buffer
// ---------------------------------------------------------------------------

/// A raw demodulated frame before CRC/parse validation.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub hex_str: String,
    pub timestamp: f64,
    pub signal_level: f32,
}

/// Scan a magnitude buffer for ADS-B messages.
///
/// Slides through the buffer looking for valid preambles, attempts a 112-bit
/// recovery first, falls back to 56-bit at the same offset, and produces hex
/// frame strings. The cursor advances by a full preamble+long-message window
/// after any detection (long or short) and by one sample otherwise.
pub fn demodulate_buffer(mag: &[f32], timestamp: f64) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    let mut i = 0;

    while i + WINDOW_SIZE <= mag.len() {
        let signal_level = match check_preamble(mag, i) {
            Some(s) => s,
            None => {
                i += 1;
                continue;
            }
        };

        let msg_start = i + PREAMBLE_SAMPLES;
        let frame_time = timestamp + i as f64 / SAMPLE_RATE_HZ;

        if let Some(bits) = recover_bits(mag, msg_start, LONG_MSG_BITS) {
            if looks_like_valid_frame(&bits) {
                record_frame_found();
                frames.push(RawFrame {
                    hex_str: bits_to_hex(&bits),
                    timestamp: frame_time,
                    signal_level,
                });
                i += WINDOW_SIZE;
                continue;
            }
        }

        if let Some(bits) = recover_bits(mag, msg_start, SHORT_MSG_BITS) {
            if looks_like_valid_frame(&bits) {
                record_frame_found();
                frames.push(RawFrame {
                    hex_str: bits_to_hex(&bits),
                    timestamp: frame_time,
                    signal_level,
                });
                i += WINDOW_SIZE;
                continue;
            }
        }

        i += WINDOW_SIZE;
    }

    frames
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mag_lut_center() {
        let lut = &*MAG_LUT;
        let val = lut[127 * 256 + 128];
        assert!(val < 0.02, "center value should be near 0, got {val}");
    }

    #[test]
    fn test_mag_lut_corner() {
        let lut = &*MAG_LUT;
        let val = lut[0];
        assert!(
            (val - std::f32::consts::SQRT_2).abs() < 0.01,
            "corner value should be ~sqrt(2), got {val}"
        );
    }

    #[test]
    fn test_iq_to_magnitude_length() {
        let raw = vec![128u8; 200]; // 100 IQ pairs
        let mag = iq_to_magnitude(&raw);
        assert_eq!(mag.len(), 100);
    }

    #[test]
    fn test_bits_to_hex_simple() {
        let bits = vec![1, 0, 0, 0, 1, 1, 0, 1]; // 0x8D
        assert_eq!(bits_to_hex(&bits), "8D");
    }

    #[test]
    fn test_bits_to_hex_full_byte() {
        let bits = vec![1, 1, 1, 1, 0, 0, 0, 0];
        assert_eq!(bits_to_hex(&bits), "F0");
    }

    fn synthetic_preamble(mag: &mut [f32]) {
        for &p in &[0usize, 2, 7, 9] {
            mag[p] = 1.0;
        }
        for off in 4..7 {
            mag[off] = 0.0;
        }
        for off in 11..16 {
            mag[off] = 0.0;
        }
    }

    #[test]
    fn test_check_preamble_no_signal() {
        let mag = vec![0.0f32; WINDOW_SIZE + 10];
        assert!(check_preamble(&mag, 0).is_none());
    }

    #[test]
    fn test_check_preamble_valid() {
        let mut mag = vec![0.05f32; WINDOW_SIZE + 10];
        synthetic_preamble(&mut mag);
        assert!(check_preamble(&mag, 0).is_some());
    }

    #[test]
    fn test_check_preamble_too_short() {
        let mag = vec![1.0f32; WINDOW_SIZE - 1];
        assert!(check_preamble(&mag, 0).is_none());
    }

    #[test]
    fn test_check_preamble_below_min_signal_level() {
        // Pulses present but far too weak.
        let mut mag = vec![0.0001f32; WINDOW_SIZE + 10];
        synthetic_preamble(&mut mag);
        mag[0] = 0.001;
        mag[2] = 0.001;
        mag[7] = 0.001;
        mag[9] = 0.001;
        assert!(check_preamble(&mag, 0).is_none());
    }

    #[test]
    fn test_recover_bits_clear_signal() {
        let mut mag = vec![0.0f32; 20];
        mag[0] = 1.0;
        mag[1] = 0.01; // bit 1
        mag[2] = 0.01;
        mag[3] = 1.0; // bit 0
        mag[4] = 1.0;
        mag[5] = 0.01; // bit 1
        mag[6] = 0.01;
        mag[7] = 1.0; // bit 0

        let bits = recover_bits(&mag, 0, 4).unwrap();
        assert_eq!(bits, vec![1, 0, 1, 0]);
    }

    #[test]
    fn test_recover_bits_low_confidence_rejected() {
        let mag = vec![0.001f32; 20];
        assert!(recover_bits(&mag, 0, 8).is_none());
    }

    #[test]
    fn test_recover_bits_weak_transition_copies_previous() {
        let mut mag = vec![0.0f32; 10];
        mag[0] = 1.0;
        mag[1] = 0.01; // clear bit 1
        mag[2] = 0.5;
        mag[3] = 0.499; // weak transition, below LOW_CONFIDENCE_BIT_THRESHOLD

        let bits = recover_bits(&mag, 0, 2).unwrap();
        assert_eq!(bits[0], 1);
        assert_eq!(bits[1], 1); // continuity from prev_bit
    }

    #[test]
    fn test_demodulate_buffer_empty() {
        let mag = vec![0.0f32; 1000];
        let frames = demodulate_buffer(&mag, 0.0);
        assert!(frames.is_empty());
    }

    #[test]
    fn test_demodulate_buffer_noise() {
        let mag: Vec<f32> = (0..2000).map(|i| ((i * 37) % 100) as f32 / 5000.0).collect();
        let frames = demodulate_buffer(&mag, 0.0);
        assert!(frames.is_empty(), "noise should not produce frames");
    }

    #[test]
    fn test_stats_snapshot_counts_preamble_checks() {
        reset_stats();
        let mag = vec![0.0f32; WINDOW_SIZE + 10];
        check_preamble(&mag, 0);
        let stats = stats_snapshot();
        assert_eq!(stats.preambles_checked, 1);
    }

    #[test]
    fn test_stats_snapshot_counts_samples_processed() {
        reset_stats();
        let raw = vec![128u8; 200]; // 100 IQ pairs
        iq_to_magnitude(&raw);
        let stats = stats_snapshot();
        assert_eq!(stats.samples_processed, 100);
    }

    #[test]
    fn test_record_crc_failure_and_fixed_and_filtered() {
        reset_stats();
        record_crc_failure();
        record_crc_failure();
        record_crc_fixed();
        record_message_filtered();
        let stats = stats_snapshot();
        assert_eq!(stats.crc_failures, 2);
        assert_eq!(stats.crc_fixed, 1);
        assert_eq!(stats.messages_filtered, 1);
    }
}
