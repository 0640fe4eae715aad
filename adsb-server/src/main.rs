//! adsb-server: decode/track/stats/serve CLI, history-store persistence,
//! and the subscriber plumbing a future HTTP/websocket surface would
//! consume. Installs a `tracing-subscriber` `EnvFilter` driven by `RUST_LOG`.

use std::io::{self, BufRead};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};

use adsb_core::config::ReceiverConfig;
use adsb_core::tracker::{AircraftSnapshot, TrackEvent, Tracker};
use adsb_core::types::{icao_to_string, Icao};
use adsb_core::{decode, frame};

mod db;
#[cfg(feature = "timescaledb")]
mod db_pg;
mod error;
mod history;

use db::Database;
use error::Result;
use history::{HistoryStore, SightingWrite};

/// How often the short-frame ICAO-recovery candidate set is widened beyond
/// the tracker's currently-live keys.
const ICAO_CANDIDATE_REFRESH_SEC: f64 = 60.0;

/// How far back `recent_icaos` looks when widening the candidate set.
const ICAO_CANDIDATE_HOURS: f64 = 2.0;

/// Union the tracker's live keys with the history store's recently-seen
/// ICAOs, so a short frame from an aircraft that just dropped off
/// `live_icaos()` (but was active in the last `ICAO_CANDIDATE_HOURS`) can
/// still resolve via AP-field recovery.
fn widen_candidates(tracker: &Tracker, database: &Database) -> Vec<Icao> {
    let mut candidates = tracker.live_icaos();
    match database.recent_icaos(ICAO_CANDIDATE_HOURS) {
        Ok(recent) => {
            for icao in recent {
                if !candidates.contains(&icao) {
                    candidates.push(icao);
                }
            }
        }
        Err(e) => tracing::warn!(error = ?e, "failed to widen ICAO candidate set from history"),
    }
    candidates
}

#[derive(Parser)]
#[command(name = "adsb", version, about = "ADS-B decoder and tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode hex frames from a file and print an aircraft summary table.
    Decode {
        /// Path to a file of hex frames, one per line (`-` for stdin).
        file: PathBuf,

        /// Print each decoded message instead of the summary table.
        #[arg(short, long)]
        raw: bool,
    },

    /// Track aircraft from a capture file, persisting sightings to a database.
    Track {
        file: PathBuf,

        #[arg(long, default_value = "data/adsb.db")]
        db_path: String,

        #[command(flatten)]
        config: ReceiverConfig,
    },

    /// Print history-store statistics and coverage analysis.
    Stats {
        #[arg(long, default_value = "data/adsb.db")]
        db_path: String,

        /// Window, in hours, for the coverage/busiest-hours queries.
        #[arg(long, default_value_t = 24.0)]
        hours: f64,
    },

    /// Continuously track from stdin (a live hex-frame stream) until EOF.
    Serve {
        #[arg(long, default_value = "data/adsb.db")]
        db_path: String,

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
        Commands::Decode { file, raw } => cmd_decode(&file, raw),
        Commands::Track { file, db_path, config } => cmd_track(&file, &db_path, &config),
        Commands::Stats { db_path, hours } => cmd_stats(&db_path, hours),
        Commands::Serve { db_path, config } => cmd_serve(&db_path, &config),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

fn open_reader(file: &PathBuf) -> io::Result<Box<dyn BufRead>> {
    if file.to_str() == Some("-") {
        Ok(Box::new(io::stdin().lock()))
    } else {
        let f = std::fs::File::open(file)?;
        Ok(Box::new(io::BufReader::new(f)))
    }
}

/// Split a "hex" or "hex;timestamp" line, auto-incrementing a synthetic
/// clock for inputs that omit timestamps.
fn split_line(line: &str, clock: &mut f64) -> Option<(String, f64)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (hex, ts) = if let Some((h, t)) = line.split_once(';') {
        (h.trim(), t.trim().parse::<f64>().unwrap_or(*clock))
    } else {
        (line, *clock)
    };
    *clock = ts + 0.1;
    Some((hex.to_string(), ts))
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

fn cmd_decode(file: &PathBuf, raw: bool) -> io::Result<()> {
    let reader = open_reader(file)?;

    let mut candidates: Vec<Icao> = Vec::new();
    let mut aircraft: std::collections::HashMap<Icao, AircraftSnapshot> = Default::default();
    let mut total_frames = 0u64;
    let mut decoded_frames = 0u64;
    let mut clock = 0.0;

    // Decode runs without a live tracker, so a tiny growing candidate list
    // stands in for the tracker's recent-ICAO refresh: every long frame we
    // see (which carries its ICAO explicitly) seeds recovery for later
    // short frames from the same aircraft.
    for line in reader.lines() {
        let Some((hex, ts)) = split_line(&line?, &mut clock) else {
            continue;
        };

        let Some(parsed) = frame::parse_frame(&hex, ts, None, &candidates) else {
            continue;
        };
        total_frames += 1;

        if !candidates.contains(&parsed.icao) {
            candidates.push(parsed.icao);
        }

        if let Some(msg) = decode::decode(&parsed) {
            decoded_frames += 1;
            if raw {
                println!("{msg:?}");
            }
            merge_into_table(&mut aircraft, &msg, parsed.icao);
        }
    }

    if !raw {
        print_summary(&aircraft, total_frames, decoded_frames);
    }
    Ok(())
}

/// Fold a single decoded message into the CLI's own scratch table, used
/// only by `decode` (which has no tracker to merge for it).
fn merge_into_table(
    table: &mut std::collections::HashMap<Icao, AircraftSnapshot>,
    msg: &adsb_core::types::DecodedMsg,
    icao: Icao,
) {
    use adsb_core::types::DecodedMsg;

    let entry = table.entry(icao).or_insert_with(|| AircraftSnapshot {
        icao,
        callsign: None,
        lat: None,
        lon: None,
        altitude_ft: None,
        speed_kts: None,
        heading_deg: None,
        vertical_rate_fpm: None,
        squawk: None,
        signal_strength: None,
        last_seen: 0.0,
        messages: 0,
        selected_altitude_ft: None,
        roll_deg: None,
        magnetic_heading_deg: None,
        ias_kt: None,
        distance_nm: None,
    });
    entry.messages += 1;
    entry.last_seen = msg.timestamp();

    match msg {
        DecodedMsg::Identification(m) => entry.callsign = Some(m.callsign.trim().to_string()),
        DecodedMsg::Position(m) => {
            if m.altitude_ft.is_some() {
                entry.altitude_ft = m.altitude_ft;
            }
        }
        DecodedMsg::Velocity(m) => {
            entry.speed_kts = m.speed_kts;
            entry.heading_deg = m.heading_deg;
            entry.vertical_rate_fpm = m.vertical_rate_fpm;
        }
        DecodedMsg::Altitude(m) => entry.altitude_ft = m.altitude_ft,
        DecodedMsg::Squawk(m) => entry.squawk = Some(m.squawk.clone()),
        DecodedMsg::CommB(_) => {}
    }
}

// ---------------------------------------------------------------------------
// track
// ---------------------------------------------------------------------------

fn cmd_track(file: &PathBuf, db_path: &str, config: &ReceiverConfig) -> Result<()> {
    config.validate()?;

    let mut database = Database::open(db_path)?;
    let tracker = Tracker::new(config);

    let reader = open_reader(file)?;
    let mut clock = 0.0;
    let mut total_frames = 0u64;
    let mut decoded_frames = 0u64;
    let mut candidates = widen_candidates(&tracker, &database);
    let mut next_refresh = ICAO_CANDIDATE_REFRESH_SEC;

    for line in reader.lines() {
        let line = line?;
        let Some((hex, ts)) = split_line(&line, &mut clock) else {
            continue;
        };

        if ts >= next_refresh {
            candidates = widen_candidates(&tracker, &database);
            next_refresh = ts + ICAO_CANDIDATE_REFRESH_SEC;
        }

        let Some(parsed) = frame::parse_frame(&hex, ts, None, &candidates) else {
            continue;
        };
        total_frames += 1;

        let (msg, events) = tracker.update(&parsed);
        if msg.is_some() {
            decoded_frames += 1;
        }
        persist_events(&mut database, &events);
    }

    tracker.prune_stale(clock);

    println!();
    println!("Track complete: {}", file.display());
    println!("  Frames: {total_frames} parsed, {decoded_frames} decoded");
    println!("  Aircraft: {}", tracker.len());

    print_snapshots(&tracker.snapshots(clock));
    Ok(())
}

fn persist_events(database: &mut Database, events: &[TrackEvent]) {
    for event in events {
        if let TrackEvent::Persist(snapshot) = event {
            let sighting = SightingWrite {
                icao: icao_to_string(&snapshot.icao),
                callsign: snapshot.callsign.clone(),
                latitude: snapshot.lat,
                longitude: snapshot.lon,
                altitude: snapshot.altitude_ft,
                speed: snapshot.speed_kts,
                heading: snapshot.heading_deg,
                squawk: snapshot.squawk.clone(),
                signal_strength: snapshot.signal_strength,
                seen_at: snapshot.last_seen,
            };
            if let Err(e) = database.record_sighting(&sighting) {
                tracing::warn!(error = ?e, icao = %icao_to_string(&snapshot.icao), "failed to persist sighting");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// stats
// ---------------------------------------------------------------------------

fn cmd_stats(db_path: &str, hours: f64) -> Result<()> {
    let database = Database::open(db_path)?;
    let stats = database.stats()?;

    println!();
    println!("Database: {db_path}");
    println!();
    println!("  Aircraft:  {}", stats.aircraft);
    println!("  Sightings: {}", stats.sightings);

    let busiest = database.busiest_hours(7.0, 5)?;
    if !busiest.is_empty() {
        println!();
        println!("  Busiest hours (last 7 days):");
        for (hour, count) in busiest {
            println!("    {hour:02}:00  {count} sightings");
        }
    }

    if let Some((rx_lat, rx_lon)) = config_anchor_from_env() {
        let report = database.coverage_analysis(rx_lat, rx_lon, hours)?;
        println!();
        println!("  Coverage ({hours}h, {} samples):", report.sample_count);
        println!("    Max range: {:.1} nm", report.max_range_nm);
        println!("    Avg range: {:.1} nm", report.avg_range_nm);
        for band in &report.altitude_bands {
            println!(
                "    {:<8} {:>5} sightings, max {:.1} nm, avg {:.1} nm",
                band.label, band.count, band.max_range_nm, band.avg_range_nm
            );
        }
    }

    println!();
    Ok(())
}

/// `stats`'s coverage report needs a receiver anchor; rather than duplicate
/// `ReceiverConfig`'s two lat/lon flags on this subcommand, read the same
/// `ADSB_RECEIVER_LAT`/`ADSB_RECEIVER_LON` environment fallbacks directly.
fn config_anchor_from_env() -> Option<(f64, f64)> {
    let lat: f64 = std::env::var("ADSB_RECEIVER_LAT").ok()?.parse().ok()?;
    let lon: f64 = std::env::var("ADSB_RECEIVER_LON").ok()?.parse().ok()?;
    Some((lat, lon))
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

fn cmd_serve(db_path: &str, config: &ReceiverConfig) -> Result<()> {
    config.validate()?;

    let mut database = Database::open(db_path)?;
    let tracker = Tracker::new(config);
    let subscription = tracker.subscribe();

    tracing::info!(db_path, "serve: reading hex frames from stdin");

    let stdin = io::stdin();
    let mut clock = 0.0;
    let mut candidates = widen_candidates(&tracker, &database);
    let mut next_refresh = ICAO_CANDIDATE_REFRESH_SEC;

    for line in stdin.lock().lines() {
        let line = line?;
        let Some((hex, ts)) = split_line(&line, &mut clock) else {
            continue;
        };

        if ts >= next_refresh {
            candidates = widen_candidates(&tracker, &database);
            next_refresh = ts + ICAO_CANDIDATE_REFRESH_SEC;
        }

        let Some(parsed) = frame::parse_frame(&hex, ts, None, &candidates) else {
            continue;
        };

        let (_msg, events) = tracker.update(&parsed);
        persist_events(&mut database, &events);

        for event in subscription.drain() {
            if let TrackEvent::Updated(snapshot) = event {
                tracing::debug!(icao = %icao_to_string(&snapshot.icao), "updated");
            }
        }

        if tracker.len() > 0 && tracker.len() % 50 == 0 {
            tracing::info!(aircraft = tracker.len(), "live snapshot");
        }
    }

    let pruned = tracker.prune_stale(clock + adsb_core::tracker::AIRCRAFT_TIMEOUT_SEC);
    tracing::info!(pruned, "serve: stdin closed, shutting down");
    Ok(())
}

// ---------------------------------------------------------------------------
// table rendering
// ---------------------------------------------------------------------------

fn print_summary(
    aircraft: &std::collections::HashMap<Icao, AircraftSnapshot>,
    total_frames: u64,
    decoded_frames: u64,
) {
    println!();
    println!(
        "Frames: {total_frames} parsed, {decoded_frames} decoded, {} aircraft",
        aircraft.len()
    );
    println!();

    if aircraft.is_empty() {
        return;
    }

    let mut sorted: Vec<_> = aircraft.values().collect();
    sorted.sort_by_key(|a| std::cmp::Reverse(a.messages));
    let snapshots: Vec<AircraftSnapshot> = sorted.into_iter().cloned().collect();
    print_snapshots(&snapshots);
}

fn print_snapshots(snapshots: &[AircraftSnapshot]) {
    if snapshots.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "ICAO", "Callsign", "Squawk", "Alt (ft)", "Speed (kts)", "Hdg", "VRate", "Lat", "Lon",
        "Msgs",
    ]);

    for ac in snapshots {
        table.add_row(vec![
            Cell::new(icao_to_string(&ac.icao)),
            Cell::new(ac.callsign.as_deref().unwrap_or("-")),
            Cell::new(ac.squawk.as_deref().unwrap_or("-")),
            Cell::new(ac.altitude_ft.map(|a| a.to_string()).unwrap_or("-".into())),
            Cell::new(ac.speed_kts.map(|s| format!("{s:.0}")).unwrap_or("-".into())),
            Cell::new(ac.heading_deg.map(|h| format!("{h:.1}")).unwrap_or("-".into())),
            Cell::new(
                ac.vertical_rate_fpm
                    .map(|v| format!("{v:+}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(ac.lat.map(|l| format!("{l:.4}")).unwrap_or("-".into())),
            Cell::new(ac.lon.map(|l| format!("{l:.4}")).unwrap_or("-".into())),
            Cell::new(ac.messages),
        ]);
    }

    println!("{table}");
}
