//! Capture/ingest error type. File and device I/O are the feeder's only
//! exceptional boundary; demod/decode stay `Option`-based per the core
//! crate's own propagation policy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device error: {0}")]
    Device(String),

    #[error("config error: {0}")]
    Config(#[from] adsb_core::types::AdsbError),
}
