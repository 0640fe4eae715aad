//! SQLite persistence — WAL mode, 2 tables, indexed aggregate queries.
//!
//! Schema: `aircraft` (one row per ICAO, counters) and `sightings` (one row
//! per persisted snapshot). No registration/country/military columns and no
//! separate receivers/captures/events tables — those belonged to the
//! FAA-registry enrichment and multi-receiver bookkeeping this crate doesn't
//! carry.

use rusqlite::{params, Connection, Result as SqlResult};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use adsb_core::geo::{bearing_sector, haversine_nm, initial_bearing_deg, BEARING_SECTOR_COUNT};
use adsb_core::types::{icao_from_hex, Icao};

use crate::history::{
    AltitudeBandStat, CoverageReport, CoverageSample, DbStats, HistoryStore, HourlyCount,
    PositionCount, SightingRow, SightingWrite, ALTITUDE_BANDS, RANGE_BUCKET_COUNT,
    RANGE_BUCKET_NM,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS aircraft (
    icao TEXT PRIMARY KEY,
    callsign TEXT,
    first_seen REAL NOT NULL,
    last_seen REAL NOT NULL,
    sighting_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sightings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    icao TEXT NOT NULL REFERENCES aircraft(icao),
    callsign TEXT,
    latitude REAL,
    longitude REAL,
    altitude INTEGER,
    speed REAL,
    heading REAL,
    squawk TEXT,
    signal_strength REAL,
    seen_at REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_aircraft_last_seen ON aircraft(last_seen);
CREATE INDEX IF NOT EXISTS idx_sightings_icao ON sightings(icao);
CREATE INDEX IF NOT EXISTS idx_sightings_seen_at ON sightings(seen_at);
CREATE INDEX IF NOT EXISTS idx_sightings_icao_seen_at ON sightings(icao, seen_at);
CREATE INDEX IF NOT EXISTS idx_sightings_lat_lon ON sightings(latitude, longitude);
CREATE INDEX IF NOT EXISTS idx_sightings_position_seen_at
    ON sightings(seen_at, latitude, longitude)
    WHERE latitude IS NOT NULL AND longitude IS NOT NULL;
"#;

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

/// SQLite-backed [`HistoryStore`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path. `:memory:` opens a
    /// private in-memory database, used by tests.
    pub fn open(path: &str) -> SqlResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Database { conn })
    }

    /// Atomic aircraft upsert: try the update first, insert on zero rows
    /// affected, and retry the update once if the insert loses a race to a
    /// concurrent writer.
    fn upsert_aircraft(
        &self,
        icao: &str,
        callsign: Option<&str>,
        seen_at: f64,
    ) -> SqlResult<()> {
        let updated = self.conn.execute(
            "UPDATE aircraft SET last_seen = ?2, callsign = COALESCE(?3, callsign),
                sighting_count = sighting_count + 1
             WHERE icao = ?1",
            params![icao, seen_at, callsign],
        )?;

        if updated > 0 {
            return Ok(());
        }

        let inserted = self.conn.execute(
            "INSERT INTO aircraft (icao, callsign, first_seen, last_seen, sighting_count)
             VALUES (?1, ?2, ?3, ?3, 1)
             ON CONFLICT(icao) DO NOTHING",
            params![icao, callsign, seen_at],
        )?;

        if inserted == 0 {
            // Lost the race: another writer inserted first, retry the update.
            self.conn.execute(
                "UPDATE aircraft SET last_seen = ?2, callsign = COALESCE(?3, callsign),
                    sighting_count = sighting_count + 1
                 WHERE icao = ?1",
                params![icao, seen_at, callsign],
            )?;
        }

        Ok(())
    }
}

impl HistoryStore for Database {
    type Error = rusqlite::Error;

    fn record_sighting(&mut self, sighting: &SightingWrite) -> SqlResult<()> {
        self.upsert_aircraft(
            &sighting.icao,
            sighting.callsign.as_deref(),
            sighting.seen_at,
        )?;

        self.conn.execute(
            "INSERT INTO sightings
                (icao, callsign, latitude, longitude, altitude, speed, heading,
                 squawk, signal_strength, seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                sighting.icao,
                sighting.callsign,
                sighting.latitude,
                sighting.longitude,
                sighting.altitude,
                sighting.speed,
                sighting.heading,
                sighting.squawk,
                sighting.signal_strength,
                sighting.seen_at,
            ],
        )?;

        Ok(())
    }

    fn recent_icaos(&self, hours: f64) -> SqlResult<Vec<Icao>> {
        let cutoff = now() - hours * 3600.0;
        let mut stmt = self
            .conn
            .prepare("SELECT icao FROM aircraft WHERE last_seen > ?1")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for hex in rows {
            if let Some(icao) = icao_from_hex(&hex?) {
                out.push(icao);
            }
        }
        Ok(out)
    }

    fn positions(&self, hours: f64, limit: i64) -> SqlResult<Vec<PositionCount>> {
        let cutoff = now() - hours * 3600.0;
        let mut stmt = self.conn.prepare(
            "SELECT ROUND(latitude, 2) AS lat, ROUND(longitude, 2) AS lon, COUNT(*) AS n
             FROM sightings
             WHERE seen_at > ?1 AND latitude IS NOT NULL AND longitude IS NOT NULL
             GROUP BY lat, lon
             ORDER BY n DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cutoff, limit], |row| {
            Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?, row.get::<_, i64>(2)?))
        })?;
        rows.collect()
    }

    fn aircraft_history(&self, icao: &str, limit: i64) -> SqlResult<Vec<SightingRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT icao, callsign, latitude, longitude, altitude, speed, heading,
                    squawk, signal_strength, seen_at
             FROM sightings
             WHERE icao = ?1
             ORDER BY seen_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![icao, limit], row_to_sighting)?;
        rows.collect()
    }

    fn coverage_analysis(&self, rx_lat: f64, rx_lon: f64, hours: f64) -> SqlResult<CoverageReport> {
        let cutoff = now() - hours * 3600.0;
        let mut stmt = self.conn.prepare(
            "SELECT icao, callsign, latitude, longitude, altitude, speed, heading,
                    squawk, signal_strength, seen_at
             FROM sightings
             WHERE seen_at > ?1 AND latitude IS NOT NULL AND longitude IS NOT NULL",
        )?;
        let rows: Vec<SightingRow> = stmt
            .query_map(params![cutoff], row_to_sighting)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(build_coverage_report(&rows, rx_lat, rx_lon))
    }

    fn busiest_hours(&self, days: f64, limit: i64) -> SqlResult<Vec<HourlyCount>> {
        let cutoff = now() - days * 86_400.0;
        let mut stmt = self.conn.prepare(
            "SELECT CAST(strftime('%H', seen_at, 'unixepoch') AS INTEGER) AS hr, COUNT(*) AS n
             FROM sightings
             WHERE seen_at > ?1
             GROUP BY hr
             ORDER BY n DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cutoff, limit], |row| {
            Ok((row.get::<_, i64>(0)? as u8, row.get::<_, i64>(1)?))
        })?;
        rows.collect()
    }

    fn stats(&self) -> SqlResult<DbStats> {
        let aircraft: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM aircraft", [], |r| r.get(0))?;
        let sightings: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sightings", [], |r| r.get(0))?;
        Ok(DbStats { aircraft, sightings })
    }
}

fn row_to_sighting(row: &rusqlite::Row) -> SqlResult<SightingRow> {
    Ok(SightingRow {
        icao: row.get(0)?,
        callsign: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        altitude: row.get(4)?,
        speed: row.get(5)?,
        heading: row.get(6)?,
        squawk: row.get(7)?,
        signal_strength: row.get(8)?,
        seen_at: row.get(9)?,
    })
}

/// Shared between the SQLite and Postgres backends: project sightings into
/// range/bearing/altitude buckets. Pure function over already-fetched rows
/// so both backends compute identical reports from their native query result.
pub fn build_coverage_report(rows: &[SightingRow], rx_lat: f64, rx_lon: f64) -> CoverageReport {
    let mut report = CoverageReport {
        sample_count: rows.len(),
        ..CoverageReport::default()
    };

    if rows.is_empty() {
        report.altitude_bands = ALTITUDE_BANDS
            .iter()
            .map(|(label, _, _)| AltitudeBandStat {
                label,
                count: 0,
                max_range_nm: 0.0,
                avg_range_nm: 0.0,
            })
            .collect();
        return report;
    }

    let mut samples: Vec<CoverageSample> = Vec::with_capacity(rows.len());
    let mut range_sum = 0.0;
    let mut max_range: f64 = 0.0;
    let mut bearing_max = [0.0f64; BEARING_SECTOR_COUNT];
    let mut band_sums = [(0i64, 0.0f64, 0.0f64); ALTITUDE_BANDS.len()];
    let mut histogram = [0u64; RANGE_BUCKET_COUNT];

    for row in rows {
        let (lat, lon) = match (row.latitude, row.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => continue,
        };

        let distance = haversine_nm(rx_lat, rx_lon, lat, lon);
        let bearing = initial_bearing_deg(rx_lat, rx_lon, lat, lon);

        range_sum += distance;
        max_range = max_range.max(distance);

        let sector = bearing_sector(bearing);
        bearing_max[sector] = bearing_max[sector].max(distance);

        if let Some(alt) = row.altitude {
            for (i, (_, lo, hi)) in ALTITUDE_BANDS.iter().enumerate() {
                if alt >= *lo && alt < *hi {
                    band_sums[i].0 += 1;
                    band_sums[i].1 = band_sums[i].1.max(distance);
                    band_sums[i].2 += distance;
                    break;
                }
            }
        }

        let bucket = ((distance / RANGE_BUCKET_NM) as usize).min(RANGE_BUCKET_COUNT - 1);
        histogram[bucket] += 1;

        samples.push(CoverageSample {
            icao: row.icao.clone(),
            callsign: row.callsign.clone(),
            distance_nm: distance,
            bearing_deg: bearing,
            altitude: row.altitude,
            signal_strength: row.signal_strength,
        });
    }

    samples.sort_by(|a, b| b.distance_nm.partial_cmp(&a.distance_nm).unwrap());
    samples.truncate(10);

    report.max_range_nm = max_range;
    report.avg_range_nm = if report.sample_count > 0 {
        range_sum / report.sample_count as f64
    } else {
        0.0
    };
    report.top = samples;
    report.bearing_max_nm = bearing_max;
    report.histogram = histogram;
    report.altitude_bands = ALTITUDE_BANDS
        .iter()
        .zip(band_sums.iter())
        .map(|((label, _, _), (count, max_r, sum_r))| AltitudeBandStat {
            label,
            count: *count,
            max_range_nm: *max_r,
            avg_range_nm: if *count > 0 { sum_r / *count as f64 } else { 0.0 },
        })
        .collect();

    report
}
