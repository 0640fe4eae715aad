//! Capture and file I/O for ADS-B data.
//!
//! Input modes:
//! - `FrameReader`:  Pre-demodulated hex frame strings (one per line)
//! - `IQReader`:     Raw IQ samples from RTL-SDR (.iq files, interleaved uint8)
//!
//! Live RTL-SDR capture will be added when `rtlsdr_mt` integration is done.

#![allow(dead_code)]

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use adsb_core::demod::{self, RawFrame, WINDOW_SIZE};

use crate::errors::CaptureError;

/// Live capture reads this many samples per chunk (100ms at 2 MS/s).
const LIVE_CHUNK_SAMPLES: usize = 200_000;

// ---------------------------------------------------------------------------
// Hex Frame Reader
// ---------------------------------------------------------------------------

/// Read pre-demodulated hex frames from a file.
///
/// Accepts hex strings from tools like rtl_adsb, dump1090 --raw, or
/// any source that produces one hex frame per line.
pub struct FrameReader {
    path: String,
}

impl FrameReader {
    pub fn new(path: &str) -> Self {
        FrameReader {
            path: path.to_string(),
        }
    }

    /// Read all frames from the file.
    pub fn read_all(&self) -> io::Result<Vec<RawFrame>> {
        let content = fs::read_to_string(&self.path)?;
        let mut frames = Vec::new();
        let t0 = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs_f64();

        for (i, line) in content.lines().enumerate() {
            if let Some(hex) = clean_hex_line(line) {
                frames.push(RawFrame {
                    hex_str: hex,
                    timestamp: t0 + i as f64 * 0.001,
                    signal_level: 0.0,
                });
            }
        }

        Ok(frames)
    }
}

/// Extract a valid Mode S hex string from a line.
///
/// Handles plain hex, dump1090 format (`*hex;`), and whitespace.
pub fn clean_hex_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    // Try dump1090 format: *<hex>;
    if line.starts_with('*') && line.ends_with(';') {
        let inner = &line[1..line.len() - 1];
        if is_valid_hex(inner) {
            return Some(inner.to_ascii_uppercase());
        }
    }

    // Try plain hex
    if is_valid_hex(line) {
        return Some(line.to_ascii_uppercase());
    }

    None
}

fn is_valid_hex(s: &str) -> bool {
    (s.len() == 14 || s.len() == 28) && s.chars().all(|c| c.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// IQ File Reader
// ---------------------------------------------------------------------------

/// Read raw IQ samples from a binary file and demodulate.
///
/// RTL-SDR produces interleaved unsigned 8-bit IQ pairs:
/// `[I0, Q0, I1, Q1, I2, Q2, ...]`
pub struct IQReader {
    path: String,
    sample_rate: u32,
}

impl IQReader {
    pub fn new(path: &str, sample_rate: u32) -> Self {
        IQReader {
            path: path.to_string(),
            sample_rate,
        }
    }

    /// File size in bytes.
    pub fn file_size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Number of IQ sample pairs.
    pub fn n_samples(&self) -> io::Result<u64> {
        Ok(self.file_size()? / 2)
    }

    /// Duration of the recording in seconds.
    pub fn duration_seconds(&self) -> io::Result<f64> {
        Ok(self.n_samples()? as f64 / self.sample_rate as f64)
    }

    /// Demodulate the entire IQ file into ADS-B frames.
    ///
    /// Reads in chunks to manage memory. Each chunk overlaps the
    /// previous by WINDOW_SIZE samples to avoid missing frames.
    pub fn demodulate(&self) -> io::Result<Vec<RawFrame>> {
        let file_size = self.file_size()? as usize;
        let total_samples = file_size / 2;
        let chunk_samples = self.sample_rate as usize; // 1 second per chunk

        let mut all_frames = Vec::new();
        let overlap = WINDOW_SIZE;
        let mut offset = 0usize;

        let mut file = fs::File::open(&self.path)?;

        while offset < total_samples {
            let byte_offset = offset * 2;
            let byte_count = (chunk_samples * 2).min(file_size - byte_offset);

            if byte_count < WINDOW_SIZE * 2 {
                break;
            }

            let mut raw = vec![0u8; byte_count];
            // Seek to position and read
            use std::io::Seek;
            file.seek(io::SeekFrom::Start(byte_offset as u64))?;
            file.read_exact(&mut raw)?;

            let mag = demod::iq_to_magnitude(&raw);
            let chunk_time = offset as f64 / self.sample_rate as f64;
            let frames = demod::demodulate_buffer(&mag, chunk_time);
            all_frames.extend(frames);

            offset += chunk_samples - overlap;
        }

        Ok(all_frames)
    }
}

// ---------------------------------------------------------------------------
// Live capture
// ---------------------------------------------------------------------------

/// Zero out magnitude samples below `snip_level`, if configured. Applied
/// before demodulation so the preamble search skips known-quiet stretches.
pub fn apply_snip(mag: &mut [f32], snip_level: Option<f32>) {
    if let Some(floor) = snip_level {
        for sample in mag.iter_mut() {
            if *sample < floor {
                *sample = 0.0;
            }
        }
    }
}

/// Open the byte source live capture reads from.
///
/// Native SDR hardware access lives behind the `native-sdr` feature
/// (`rtlsdr_mt`); that path isn't wired to this generic reader yet, the
/// same gap the demodulation side of this crate already carried forward.
/// Without it (the default), `pipe_path` names a FIFO or regular file of
/// raw interleaved I/Q bytes to read from, or `stdin` if absent — enough
/// to exercise the threading and shutdown contract without hardware.
pub fn open_live_source(pipe_path: Option<&Path>) -> Result<Box<dyn Read + Send>, CaptureError> {
    #[cfg(feature = "native-sdr")]
    tracing::warn!(
        "native-sdr feature is enabled but device acquisition is not implemented; \
         falling back to pipe/stdin ingestion"
    );

    match pipe_path {
        Some(path) => Ok(Box::new(fs::File::open(path)?)),
        None => Ok(Box::new(io::stdin())),
    }
}

/// Handle to a live-capture thread. Dropping it requests a stop and joins,
/// so a `LiveCapture` going out of scope never leaves the thread running.
pub struct LiveCapture {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl LiveCapture {
    /// Spawn a dedicated thread that reads interleaved uint8 I/Q pairs from
    /// `source`, demodulates them in `LIVE_CHUNK_SAMPLES`-sample chunks
    /// (carrying the last `WINDOW_SIZE` samples forward as overlap, since a
    /// stream can't be re-read like a file), and forwards decoded frames
    /// over `tx`. The shutdown flag is checked once per chunk boundary, so
    /// a requested stop drains the in-flight buffer instead of aborting
    /// mid-frame; the thread also exits cleanly on EOF or once `tx`'s
    /// receiver is dropped.
    pub fn spawn(
        source: Box<dyn Read + Send>,
        sample_rate: u32,
        snip_level: Option<f32>,
        dump_raw: Option<fs::File>,
        tx: mpsc::Sender<RawFrame>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = Arc::clone(&shutdown);

        let thread = thread::spawn(move || {
            run_live_capture(source, sample_rate, snip_level, dump_raw, tx, shutdown_thread);
        });

        LiveCapture {
            shutdown,
            thread: Some(thread),
        }
    }

    /// Request a stop and block until the capture thread has exited.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LiveCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_live_capture(
    mut source: Box<dyn Read + Send>,
    sample_rate: u32,
    snip_level: Option<f32>,
    mut dump_raw: Option<fs::File>,
    tx: mpsc::Sender<RawFrame>,
    shutdown: Arc<AtomicBool>,
) {
    let overlap_bytes = WINDOW_SIZE * 2;
    let chunk_bytes = (LIVE_CHUNK_SAMPLES * 2).max(overlap_bytes + 2);

    let mut carry: Vec<u8> = Vec::new();
    let mut offset_samples: u64 = 0;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let mut buf = vec![0u8; chunk_bytes];
        let carry_len = carry.len();
        buf[..carry_len].copy_from_slice(&carry);

        let n = match source.read(&mut buf[carry_len..]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };

        let total = carry_len + n;
        let data = &buf[..total];

        if let Some(f) = dump_raw.as_mut() {
            let _ = f.write_all(&data[carry_len..total]);
        }

        let mut mag = demod::iq_to_magnitude(data);
        apply_snip(&mut mag, snip_level);

        let chunk_time = offset_samples as f64 / sample_rate as f64;
        for frame in demod::demodulate_buffer(&mag, chunk_time) {
            if tx.send(frame).is_err() {
                return;
            }
        }

        let new_sample_count = (total - carry_len) / 2;
        offset_samples += new_sample_count as u64;

        carry = if total >= overlap_bytes {
            data[total - overlap_bytes..].to_vec()
        } else {
            data.to_vec()
        };
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
