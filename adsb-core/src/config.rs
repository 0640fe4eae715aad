//! Receiver configuration.
//!
//! A single `clap`-derived struct shared by every binary in the workspace.
//! Each field is a CLI flag with an `ADSB_<NAME>` environment fallback
//! (clap's `env` feature); there is no file-based config and no runtime
//! reload — options are parsed once at process start and threaded through
//! by reference.

use clap::Parser;

use crate::types::{AdsbError, Result};

/// Default gain applied when the device reports autogain as unsupported.
const MAX_GAIN_TENTHS_DB: i32 = 496;

#[derive(Debug, Clone, Parser)]
#[command(name = "adsb", about = "1090MHz ADS-B / Mode S receiver")]
pub struct ReceiverConfig {
    /// Which SDR device to open.
    #[arg(long, env = "ADSB_DEVICE_INDEX", default_value_t = 0)]
    pub device_index: u32,

    /// Tuner frequency in Hz.
    #[arg(long, env = "ADSB_FREQUENCY", default_value_t = 1_090_000_000)]
    pub frequency: u64,

    /// Gain: "max" or a decibel value (e.g. "40.2").
    #[arg(long, env = "ADSB_GAIN", default_value = "max")]
    pub gain: String,

    /// Receiver latitude, for range gating and coverage analysis.
    #[arg(long, env = "ADSB_RECEIVER_LAT")]
    pub receiver_lat: Option<f64>,

    /// Receiver longitude, for range gating and coverage analysis.
    #[arg(long, env = "ADSB_RECEIVER_LON")]
    pub receiver_lon: Option<f64>,

    /// Discard decoded positions beyond this distance from the anchor.
    #[arg(long, env = "ADSB_MAX_RANGE_NM", default_value_t = 300.0)]
    pub max_range_nm: f64,

    /// Enable single-bit CRC correction.
    #[arg(long, env = "ADSB_FIX_ERRORS", default_value_t = true)]
    pub fix_errors: bool,

    /// Enable CRC validation (disabling accepts all frames; discouraged).
    #[arg(long, env = "ADSB_CRC_CHECK", default_value_t = true)]
    pub crc_check: bool,

    /// Keep only messages for this ICAO (uppercase hex).
    #[arg(long, env = "ADSB_SHOW_ONLY")]
    pub show_only: Option<String>,

    /// Drop samples whose magnitude is below this threshold before demod.
    #[arg(long, env = "ADSB_SNIP_LEVEL")]
    pub snip_level: Option<f32>,

    /// Path to write raw I/Q samples for replay.
    #[arg(long, env = "ADSB_DUMP_RAW")]
    pub dump_raw: Option<std::path::PathBuf>,
}

impl ReceiverConfig {
    /// True if both halves of the receiver anchor are present.
    pub fn has_anchor(&self) -> bool {
        self.receiver_lat.is_some() && self.receiver_lon.is_some()
    }

    pub fn anchor(&self) -> Option<(f64, f64)> {
        match (self.receiver_lat, self.receiver_lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Parse `gain` into tenths-of-a-dB, resolving "max" to the device ceiling.
    pub fn gain_tenths_db(&self) -> i32 {
        if self.gain.eq_ignore_ascii_case("max") {
            return MAX_GAIN_TENTHS_DB;
        }
        self.gain
            .parse::<f64>()
            .map(|db| (db * 10.0).round() as i32)
            .unwrap_or(MAX_GAIN_TENTHS_DB)
    }

    /// Reject configurations that can never produce a usable receiver:
    /// an anchor half-set, an out-of-range anchor, a non-positive max
    /// range, or a malformed `show_only` ICAO filter.
    pub fn validate(&self) -> Result<()> {
        match (self.receiver_lat, self.receiver_lon) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(AdsbError::Config(
                    "receiver_lat and receiver_lon must both be set or both be omitted".into(),
                ));
            }
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) {
                    return Err(AdsbError::Config(format!(
                        "receiver_lat {lat} out of range [-90, 90]"
                    )));
                }
                if !(-180.0..=180.0).contains(&lon) {
                    return Err(AdsbError::Config(format!(
                        "receiver_lon {lon} out of range [-180, 180]"
                    )));
                }
            }
            (None, None) => {}
        }

        if self.max_range_nm <= 0.0 {
            return Err(AdsbError::Config(format!(
                "max_range_nm must be positive, got {}",
                self.max_range_nm
            )));
        }

        if let Some(show_only) = &self.show_only {
            if crate::types::icao_from_hex(show_only).is_none() {
                return Err(AdsbError::Config(format!(
                    "show_only {show_only:?} is not a valid 6-hex-digit ICAO address"
                )));
            }
        }

        Ok(())
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            device_index: 0,
            frequency: 1_090_000_000,
            gain: "max".into(),
            receiver_lat: None,
            receiver_lon: None,
            max_range_nm: 300.0,
            fix_errors: true,
            crc_check: true,
            show_only: None,
            snip_level: None,
            dump_raw: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReceiverConfig::default();
        assert_eq!(config.device_index, 0);
        assert_eq!(config.frequency, 1_090_000_000);
        assert!(config.fix_errors);
        assert!(config.crc_check);
        assert!(!config.has_anchor());
    }

    #[test]
    fn test_gain_max() {
        let config = ReceiverConfig::default();
        assert_eq!(config.gain_tenths_db(), MAX_GAIN_TENTHS_DB);
    }

    #[test]
    fn test_gain_explicit_value() {
        let mut config = ReceiverConfig::default();
        config.gain = "40.2".into();
        assert_eq!(config.gain_tenths_db(), 402);
    }

    #[test]
    fn test_anchor_requires_both_coordinates() {
        let mut config = ReceiverConfig::default();
        config.receiver_lat = Some(35.5);
        assert!(!config.has_anchor());
        config.receiver_lon = Some(-82.5);
        assert!(config.has_anchor());
        assert_eq!(config.anchor(), Some((35.5, -82.5)));
    }

    #[test]
    fn test_validate_accepts_default() {
        assert!(ReceiverConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_full_anchor() {
        let mut config = ReceiverConfig::default();
        config.receiver_lat = Some(35.5);
        config.receiver_lon = Some(-82.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_half_anchor() {
        let mut config = ReceiverConfig::default();
        config.receiver_lat = Some(35.5);
        assert!(config.validate().is_err());

        let mut config = ReceiverConfig::default();
        config.receiver_lon = Some(-82.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_lat() {
        let mut config = ReceiverConfig::default();
        config.receiver_lat = Some(95.0);
        config.receiver_lon = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_lon() {
        let mut config = ReceiverConfig::default();
        config.receiver_lat = Some(0.0);
        config.receiver_lon = Some(200.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_max_range() {
        let mut config = ReceiverConfig::default();
        config.max_range_nm = -10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_invalid_show_only() {
        let mut config = ReceiverConfig::default();
        config.show_only = Some("not-an-icao".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_valid_show_only() {
        let mut config = ReceiverConfig::default();
        config.show_only = Some("4840D6".into());
        assert!(config.validate().is_ok());
    }
}
