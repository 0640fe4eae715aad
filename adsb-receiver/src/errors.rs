//! Error type for the receiver daemon. Capture failures propagate from
//! `adsb-feeder`; everything past that is local I/O or the outbound upload.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("capture error: {0}")]
    Capture(#[from] adsb_feeder::errors::CaptureError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] adsb_core::types::AdsbError),
}
