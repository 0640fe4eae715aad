//! adsb-feeder: edge-device binary for ADS-B capture and demodulation.
//!
//! Supports:
//! - Demodulating a recorded raw IQ file into hex frames
//! - Reading pre-demodulated hex frame files
//! - Live capture from a named pipe/stdin of raw I/Q bytes (or, with the
//!   `native-sdr` feature, real SDR hardware — not yet wired up)

use std::path::PathBuf;
use std::sync::mpsc;

use clap::{Parser, Subcommand};

use adsb_core::config::ReceiverConfig;
use adsb_core::{decode, frame};

use adsb_feeder::capture;
use adsb_feeder::errors::CaptureError;

#[derive(Parser)]
#[command(name = "adsb-feeder", version, about = "ADS-B capture and demodulation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Demodulate a raw IQ file into ADS-B frames.
    Demod {
        /// Path to raw IQ binary file (.iq or .bin), interleaved uint8 pairs.
        file: PathBuf,

        #[arg(long, default_value = "2000000")]
        sample_rate: u32,

        /// Parse and decode frames (not just print hex).
        #[arg(short, long)]
        decode: bool,
    },

    /// Continuously demodulate a live I/Q stream until EOF or Ctrl-C.
    Listen {
        /// Named pipe or file of raw I/Q bytes; omit to read stdin.
        #[arg(long)]
        pipe: Option<PathBuf>,

        #[arg(long, default_value = "2000000")]
        sample_rate: u32,

        #[command(flatten)]
        config: ReceiverConfig,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Demod { file, sample_rate, decode } => cmd_demod(&file, sample_rate, decode),
        Commands::Listen { pipe, sample_rate, config } => cmd_listen(pipe, sample_rate, &config),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "adsb-feeder exiting");
        std::process::exit(1);
    }
}

fn cmd_demod(file: &PathBuf, sample_rate: u32, do_decode: bool) -> Result<(), CaptureError> {
    let path_str = file.display().to_string();
    let reader = capture::IQReader::new(&path_str, sample_rate);

    let duration = reader.duration_seconds().unwrap_or(0.0);
    let n_samples = reader.n_samples().unwrap_or(0);

    tracing::info!(
        file = %file.display(),
        n_samples,
        duration_s = duration,
        sample_rate,
        "demodulating"
    );

    let frames = reader.demodulate()?;
    tracing::info!(frame_count = frames.len(), "found raw frames");

    if do_decode {
        let mut candidates = Vec::new();
        let mut decoded_count = 0u64;

        for raw in &frames {
            let Some(parsed) = frame::parse_frame(&raw.hex_str, raw.timestamp, None, &candidates)
            else {
                continue;
            };
            if !candidates.contains(&parsed.icao) {
                candidates.push(parsed.icao);
            }
            if let Some(msg) = decode::decode(&parsed) {
                decoded_count += 1;
                println!("{:.6} {}", raw.timestamp, raw.hex_str);
                println!("  {msg:?}");
            }
        }
        tracing::info!(decoded_count, "decode complete");
    } else {
        for raw in &frames {
            println!("{:.6} {} signal={:.0}", raw.timestamp, raw.hex_str, raw.signal_level);
        }
    }

    Ok(())
}

fn cmd_listen(
    pipe: Option<PathBuf>,
    sample_rate: u32,
    config: &ReceiverConfig,
) -> Result<(), CaptureError> {
    config.validate()?;

    let source = capture::open_live_source(pipe.as_deref())?;

    let dump_raw = match &config.dump_raw {
        Some(path) => Some(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?,
        ),
        None => None,
    };

    let (tx, rx) = mpsc::channel();
    let mut live = capture::LiveCapture::spawn(source, sample_rate, config.snip_level, dump_raw, tx);

    tracing::info!(sample_rate, pipe = ?pipe, "listening for live I/Q stream");

    let mut candidates = Vec::new();
    let mut frame_count = 0u64;
    let mut decoded_count = 0u64;

    for raw in rx.iter() {
        let Some(parsed) = frame::parse_frame(&raw.hex_str, raw.timestamp, None, &candidates)
        else {
            continue;
        };
        frame_count += 1;
        if !candidates.contains(&parsed.icao) {
            candidates.push(parsed.icao);
        }

        if let Some(show_only) = &config.show_only {
            if adsb_core::types::icao_to_string(&parsed.icao) != *show_only {
                continue;
            }
        }

        if let Some(msg) = decode::decode(&parsed) {
            decoded_count += 1;
            println!("{:.6} {}", raw.timestamp, raw.hex_str);
            println!("  {msg:?}");
        }
    }

    live.stop();
    tracing::info!(frame_count, decoded_count, "listen stream ended");
    Ok(())
}
