//! Shared `HistoryStore` trait implemented by the SQLite (default) and
//! TimescaleDB (`timescaledb` feature) backends.
//!
//! Keeping the trait here, independent of either backend module, lets
//! `main.rs` depend on "a history store" without caring which one is wired
//! in, and keeps `db.rs`/`db_pg.rs` free to diverge on connection handling.

use adsb_core::types::Icao;

/// A durable row in the `aircraft` table.
#[derive(Debug, Clone, PartialEq)]
pub struct AircraftRow {
    pub icao: String,
    pub callsign: Option<String>,
    pub first_seen: f64,
    pub last_seen: f64,
    pub sighting_count: i64,
}

/// A durable row in the `sightings` table.
#[derive(Debug, Clone, PartialEq)]
pub struct SightingRow {
    pub icao: String,
    pub callsign: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub squawk: Option<String>,
    pub signal_strength: Option<f64>,
    pub seen_at: f64,
}

/// Everything needed to persist one `TrackEvent::Persist` snapshot.
#[derive(Debug, Clone)]
pub struct SightingWrite {
    pub icao: String,
    pub callsign: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub squawk: Option<String>,
    pub signal_strength: Option<f64>,
    pub seen_at: f64,
}

/// `(round(lat, 2), round(lon, 2), count)`, ordered by count descending.
pub type PositionCount = (f64, f64, i64);

/// `(hour_of_day 0-23, sighting_count)`, ordered by count descending.
pub type HourlyCount = (u8, i64);

/// Per-altitude-band breakdown within a [`CoverageReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct AltitudeBandStat {
    pub label: &'static str,
    pub count: i64,
    pub max_range_nm: f64,
    pub avg_range_nm: f64,
}

/// One entry in a [`CoverageReport`]'s top-range list.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSample {
    pub icao: String,
    pub callsign: Option<String>,
    pub distance_nm: f64,
    pub bearing_deg: f64,
    pub altitude: Option<i32>,
    pub signal_strength: Option<f64>,
}

/// The fixed altitude bands `coverage_analysis` reports over, in order.
pub const ALTITUDE_BANDS: [(&str, i32, i32); 5] = [
    ("0-10k", 0, 10_000),
    ("10-20k", 10_000, 20_000),
    ("20-30k", 20_000, 30_000),
    ("30-40k", 30_000, 40_000),
    ("40k+", 40_000, i32::MAX),
];

/// Width and count of the range histogram's buckets; the last bucket
/// absorbs everything at or beyond its nominal upper edge.
pub const RANGE_BUCKET_NM: f64 = 10.0;
pub const RANGE_BUCKET_COUNT: usize = 30;

/// Aggregate result of `coverage_analysis`.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub sample_count: usize,
    pub max_range_nm: f64,
    pub avg_range_nm: f64,
    pub top: Vec<CoverageSample>,
    /// Maximum observed range per [`adsb_core::geo::BEARING_SECTOR_COUNT`] sector.
    pub bearing_max_nm: [f64; adsb_core::geo::BEARING_SECTOR_COUNT],
    pub altitude_bands: Vec<AltitudeBandStat>,
    /// `histogram[i]` counts sightings in `[i*10, (i+1)*10)` nm, except the
    /// final bucket which absorbs everything `>= 290` nm.
    pub histogram: [u64; RANGE_BUCKET_COUNT],
}

impl Default for CoverageReport {
    fn default() -> Self {
        CoverageReport {
            sample_count: 0,
            max_range_nm: 0.0,
            avg_range_nm: 0.0,
            top: Vec::new(),
            bearing_max_nm: [0.0; adsb_core::geo::BEARING_SECTOR_COUNT],
            altitude_bands: Vec::new(),
            histogram: [0; RANGE_BUCKET_COUNT],
        }
    }
}

/// Coarse counts for the `stats` CLI command.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbStats {
    pub aircraft: i64,
    pub sightings: i64,
}

/// Backend-agnostic durable storage for aircraft and sightings.
///
/// Implemented by the SQLite-backed [`crate::db::Database`] (default) and,
/// behind the `timescaledb` feature, the Postgres-backed
/// [`crate::db_pg::TimescaleDb`].
pub trait HistoryStore {
    type Error: std::fmt::Debug;

    /// Upsert the aircraft row and insert a sighting row in one logical
    /// write. Concrete implementations must make the aircraft upsert half
    /// atomic under concurrent writers.
    fn record_sighting(&mut self, sighting: &SightingWrite) -> Result<(), Self::Error>;

    fn recent_icaos(&self, hours: f64) -> Result<Vec<Icao>, Self::Error>;

    fn positions(&self, hours: f64, limit: i64) -> Result<Vec<PositionCount>, Self::Error>;

    fn aircraft_history(&self, icao: &str, limit: i64) -> Result<Vec<SightingRow>, Self::Error>;

    fn coverage_analysis(
        &self,
        rx_lat: f64,
        rx_lon: f64,
        hours: f64,
    ) -> Result<CoverageReport, Self::Error>;

    fn busiest_hours(&self, days: f64, limit: i64) -> Result<Vec<HourlyCount>, Self::Error>;

    fn stats(&self) -> Result<DbStats, Self::Error>;
}
