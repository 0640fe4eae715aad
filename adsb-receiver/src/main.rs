//! adsb-receiver: thin remote-feeder daemon.
//!
//! Runs `adsb-feeder`'s live capture and demodulation locally, decodes
//! frames with `adsb-core`, and periodically uploads the decoded batch to
//! a remote `adsb-server` over HTTP. Intended for distributed deployments
//! where the radio sits at the edge and storage/querying lives elsewhere.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::Serialize;

use adsb_core::config::ReceiverConfig;
use adsb_core::types::DecodedMsg;
use adsb_core::{decode, frame};
use adsb_feeder::capture;

mod errors;
use errors::ReceiverError;

/// Decoded messages pile up here between uploads; if the server falls
/// behind, the oldest messages are dropped rather than blocking capture.
const UPLOAD_QUEUE_DEPTH: usize = 4096;

#[derive(Parser)]
#[command(name = "adsb-receiver", version, about = "Capture, decode, and forward ADS-B frames to a remote server")]
struct Cli {
    /// Named pipe or file of raw I/Q bytes; omit to read stdin.
    #[arg(long)]
    pipe: Option<PathBuf>,

    #[arg(long, default_value = "2000000")]
    sample_rate: u32,

    /// Base URL of the remote adsb-server ingest endpoint, e.g.
    /// `https://collector.example.com/ingest`.
    #[arg(long, env = "ADSB_SERVER_URL")]
    server_url: String,

    /// Seconds between upload batches.
    #[arg(long, env = "ADSB_BATCH_INTERVAL_SEC", default_value_t = 5.0)]
    batch_interval_sec: f64,

    /// Identifies this receiver to the remote server (defaults to hostname-less "default").
    #[arg(long, env = "ADSB_STATION_ID", default_value = "default")]
    station_id: String,

    #[command(flatten)]
    config: ReceiverConfig,
}

/// Upload payload: a batch of decoded messages tagged with the station
/// that observed them.
#[derive(Debug, Serialize)]
struct UploadBatch<'a> {
    station_id: &'a str,
    messages: &'a [DecodedMsg],
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "adsb-receiver exiting");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ReceiverError> {
    cli.config.validate()?;

    let source = capture::open_live_source(cli.pipe.as_deref())?;

    let dump_raw = match &cli.config.dump_raw {
        Some(path) => Some(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?,
        ),
        None => None,
    };

    let (raw_tx, raw_rx) = std_mpsc::channel();
    let mut live = capture::LiveCapture::spawn(
        source,
        cli.sample_rate,
        cli.config.snip_level,
        dump_raw,
        raw_tx,
    );

    let queue: Arc<Mutex<VecDeque<DecodedMsg>>> = Arc::new(Mutex::new(VecDeque::new()));
    let decode_queue = Arc::clone(&queue);
    let show_only = cli.config.show_only.clone();

    tracing::info!(
        sample_rate = cli.sample_rate,
        pipe = ?cli.pipe,
        server_url = %cli.server_url,
        station_id = %cli.station_id,
        "adsb-receiver starting"
    );

    // Decoding runs on a blocking thread alongside the capture thread; the
    // channel it reads from is a plain std::sync::mpsc, so there's no async
    // runtime to hop into here.
    let mut decode_handle = tokio::task::spawn_blocking(move || {
        decode_loop(raw_rx, decode_queue, show_only.as_deref())
    });

    let client = reqwest::Client::new();
    let batch_interval = Duration::from_secs_f64(cli.batch_interval_sec.max(0.1));
    let mut ticker = tokio::time::interval(batch_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut total_uploaded: u64 = 0;
    let mut decode_done = false;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let batch = drain_batch(&queue);
                if !batch.is_empty() {
                    total_uploaded += batch.len() as u64;
                    upload_batch(&client, &cli.server_url, &cli.station_id, &batch).await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            result = &mut decode_handle, if !decode_done => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "decode task panicked");
                }
                decode_done = true;
                tracing::info!("capture stream ended");
                break;
            }
        }
    }

    live.stop();
    if !decode_done {
        let _ = decode_handle.await;
    }
    let final_batch = drain_batch(&queue);
    if !final_batch.is_empty() {
        total_uploaded += final_batch.len() as u64;
        upload_batch(&client, &cli.server_url, &cli.station_id, &final_batch).await;
    }

    tracing::info!(total_uploaded, "adsb-receiver stopped");
    Ok(())
}

fn decode_loop(
    raw_rx: std_mpsc::Receiver<adsb_core::demod::RawFrame>,
    queue: Arc<Mutex<VecDeque<DecodedMsg>>>,
    show_only: Option<&str>,
) {
    let mut candidates = Vec::new();

    for raw in raw_rx.iter() {
        let Some(parsed) = frame::parse_frame(&raw.hex_str, raw.timestamp, None, &candidates)
        else {
            continue;
        };
        if !candidates.contains(&parsed.icao) {
            candidates.push(parsed.icao);
        }

        if let Some(filter) = show_only {
            if adsb_core::types::icao_to_string(&parsed.icao) != filter {
                continue;
            }
        }

        let Some(msg) = decode::decode(&parsed) else {
            continue;
        };

        let mut q = queue.lock().unwrap();
        if q.len() >= UPLOAD_QUEUE_DEPTH {
            q.pop_front();
        }
        q.push_back(msg);
    }
}

fn drain_batch(queue: &Arc<Mutex<VecDeque<DecodedMsg>>>) -> Vec<DecodedMsg> {
    let mut q = queue.lock().unwrap();
    q.drain(..).collect()
}

async fn upload_batch(client: &reqwest::Client, server_url: &str, station_id: &str, batch: &[DecodedMsg]) {
    let payload = UploadBatch {
        station_id,
        messages: batch,
    };

    match client.post(server_url).json(&payload).send().await {
        Ok(resp) if !resp.status().is_success() => {
            tracing::warn!(status = %resp.status(), count = batch.len(), "server rejected batch");
        }
        Ok(_) => {
            tracing::debug!(count = batch.len(), "batch uploaded");
        }
        Err(e) => {
            tracing::warn!(error = %e, count = batch.len(), "batch upload failed");
        }
    }
}
