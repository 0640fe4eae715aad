//! TimescaleDB (PostgreSQL) backend — production-scale time-series storage.
//!
//! Requires the `timescaledb` feature flag and a PostgreSQL server with the
//! TimescaleDB extension installed. Shares the trimmed `aircraft`/`sightings`
//! schema with the SQLite backend (see `db.rs`); the differences are all in
//! storage engine concerns:
//!
//! - `sightings` is a TimescaleDB hypertable, chunked on `seen_at`
//! - automatic compression on chunks older than 7 days
//! - retention policy drops raw sightings older than 90 days

#![cfg(feature = "timescaledb")]

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use adsb_core::types::{icao_from_hex, Icao};

use crate::db::build_coverage_report;
use crate::history::{
    CoverageReport, DbStats, HourlyCount, PositionCount, SightingRow, SightingWrite,
};

const TIMESCALE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS aircraft (
    icao TEXT PRIMARY KEY,
    callsign TEXT,
    first_seen TIMESTAMPTZ NOT NULL,
    last_seen TIMESTAMPTZ NOT NULL,
    sighting_count BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sightings (
    id BIGSERIAL,
    icao TEXT NOT NULL REFERENCES aircraft(icao),
    callsign TEXT,
    latitude DOUBLE PRECISION,
    longitude DOUBLE PRECISION,
    altitude INTEGER,
    speed DOUBLE PRECISION,
    heading DOUBLE PRECISION,
    squawk TEXT,
    signal_strength DOUBLE PRECISION,
    seen_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (id, seen_at)
);

CREATE INDEX IF NOT EXISTS idx_aircraft_last_seen ON aircraft(last_seen DESC);
CREATE INDEX IF NOT EXISTS idx_sightings_icao ON sightings(icao);
CREATE INDEX IF NOT EXISTS idx_sightings_seen_at ON sightings(seen_at DESC);
CREATE INDEX IF NOT EXISTS idx_sightings_icao_seen_at ON sightings(icao, seen_at DESC);
CREATE INDEX IF NOT EXISTS idx_sightings_lat_lon ON sightings(latitude, longitude);
CREATE INDEX IF NOT EXISTS idx_sightings_position_seen_at
    ON sightings(seen_at, latitude, longitude)
    WHERE latitude IS NOT NULL AND longitude IS NOT NULL;
"#;

/// TimescaleDB-specific setup (hypertable, compression, retention).
/// Idempotent — safe to run on every startup.
const TIMESCALE_SETUP: &str = r#"
SELECT create_hypertable('sightings', 'seen_at', if_not_exists => TRUE);

ALTER TABLE sightings SET (
    timescaledb.compress,
    timescaledb.compress_segmentby = 'icao',
    timescaledb.compress_orderby = 'seen_at DESC'
);
SELECT add_compression_policy('sightings', INTERVAL '7 days', if_not_exists => TRUE);
SELECT add_retention_policy('sightings', INTERVAL '90 days', if_not_exists => TRUE);
"#;

/// PostgreSQL/TimescaleDB backend with connection pooling.
pub struct TimescaleDb {
    pool: PgPool,
}

impl TimescaleDb {
    /// Connect to PostgreSQL, create the schema, and attempt TimescaleDB
    /// setup. Falls back to plain PostgreSQL (no compression/retention) if
    /// the extension isn't installed.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;

        sqlx::raw_sql(TIMESCALE_SCHEMA).execute(&pool).await?;

        if let Err(e) = sqlx::raw_sql(TIMESCALE_SETUP).execute(&pool).await {
            tracing::warn!(error = %e, "TimescaleDB setup failed, falling back to plain PostgreSQL");
        }

        Ok(TimescaleDb { pool })
    }

    /// Atomic aircraft upsert via `ON CONFLICT DO UPDATE`, the single-round-
    /// trip Postgres equivalent of `db.rs`'s update-then-insert-then-retry.
    async fn upsert_aircraft(
        &self,
        icao: &str,
        callsign: Option<&str>,
        seen_at: f64,
    ) -> Result<(), sqlx::Error> {
        let seen_at = epoch_to_pg(seen_at);
        sqlx::query(
            "INSERT INTO aircraft (icao, callsign, first_seen, last_seen, sighting_count)
             VALUES ($1, $2, $3, $3, 1)
             ON CONFLICT (icao) DO UPDATE SET
                last_seen = EXCLUDED.last_seen,
                callsign = COALESCE(EXCLUDED.callsign, aircraft.callsign),
                sighting_count = aircraft.sighting_count + 1",
        )
        .bind(icao)
        .bind(callsign)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn epoch_to_pg(ts: f64) -> chrono::DateTime<chrono::Utc> {
    use chrono::{TimeZone, Utc};
    Utc.timestamp_opt(ts as i64, ((ts.fract()) * 1_000_000_000.0) as u32)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

fn pg_to_epoch(dt: chrono::DateTime<chrono::Utc>) -> f64 {
    dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
}

fn row_to_sighting(row: &sqlx::postgres::PgRow) -> SightingRow {
    SightingRow {
        icao: row.get("icao"),
        callsign: row.get("callsign"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        altitude: row.get("altitude"),
        speed: row.get("speed"),
        heading: row.get("heading"),
        squawk: row.get("squawk"),
        signal_strength: row.get("signal_strength"),
        seen_at: pg_to_epoch(row.get("seen_at")),
    }
}

/// `sqlx` is async and the rest of this crate's `HistoryStore` trait is
/// synchronous; this mirrors it one-for-one so callers already running
/// inside a tokio runtime (the `serve` command) can await these methods
/// directly instead of going through `futures::executor::block_on`.
#[async_trait::async_trait]
pub trait AsyncHistoryStore {
    async fn record_sighting(&self, sighting: &SightingWrite) -> Result<(), sqlx::Error>;
    async fn recent_icaos(&self, hours: f64) -> Result<Vec<Icao>, sqlx::Error>;
    async fn positions(&self, hours: f64, limit: i64) -> Result<Vec<PositionCount>, sqlx::Error>;
    async fn aircraft_history(
        &self,
        icao: &str,
        limit: i64,
    ) -> Result<Vec<SightingRow>, sqlx::Error>;
    async fn coverage_analysis(
        &self,
        rx_lat: f64,
        rx_lon: f64,
        hours: f64,
    ) -> Result<CoverageReport, sqlx::Error>;
    async fn busiest_hours(&self, days: f64, limit: i64) -> Result<Vec<HourlyCount>, sqlx::Error>;
    async fn stats(&self) -> Result<DbStats, sqlx::Error>;
}

#[async_trait::async_trait]
impl AsyncHistoryStore for TimescaleDb {
    async fn record_sighting(&self, sighting: &SightingWrite) -> Result<(), sqlx::Error> {
        self.upsert_aircraft(&sighting.icao, sighting.callsign.as_deref(), sighting.seen_at)
            .await?;

        sqlx::query(
            "INSERT INTO sightings
                (icao, callsign, latitude, longitude, altitude, speed, heading,
                 squawk, signal_strength, seen_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&sighting.icao)
        .bind(&sighting.callsign)
        .bind(sighting.latitude)
        .bind(sighting.longitude)
        .bind(sighting.altitude)
        .bind(sighting.speed)
        .bind(sighting.heading)
        .bind(&sighting.squawk)
        .bind(sighting.signal_strength)
        .bind(epoch_to_pg(sighting.seen_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_icaos(&self, hours: f64) -> Result<Vec<Icao>, sqlx::Error> {
        let cutoff = epoch_to_pg(pg_to_epoch(chrono::Utc::now()) - hours * 3600.0);
        let rows = sqlx::query("SELECT icao FROM aircraft WHERE last_seen > $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| icao_from_hex(&r.get::<String, _>("icao")))
            .collect())
    }

    async fn positions(&self, hours: f64, limit: i64) -> Result<Vec<PositionCount>, sqlx::Error> {
        let cutoff = epoch_to_pg(pg_to_epoch(chrono::Utc::now()) - hours * 3600.0);
        let rows = sqlx::query(
            "SELECT ROUND(latitude::numeric, 2)::float8 AS lat,
                    ROUND(longitude::numeric, 2)::float8 AS lon,
                    COUNT(*) AS n
             FROM sightings
             WHERE seen_at > $1 AND latitude IS NOT NULL AND longitude IS NOT NULL
             GROUP BY lat, lon
             ORDER BY n DESC
             LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get("lat"), r.get("lon"), r.get::<i64, _>("n")))
            .collect())
    }

    async fn aircraft_history(
        &self,
        icao: &str,
        limit: i64,
    ) -> Result<Vec<SightingRow>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT icao, callsign, latitude, longitude, altitude, speed, heading,
                    squawk, signal_strength, seen_at
             FROM sightings
             WHERE icao = $1
             ORDER BY seen_at DESC
             LIMIT $2",
        )
        .bind(icao)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_sighting).collect())
    }

    async fn coverage_analysis(
        &self,
        rx_lat: f64,
        rx_lon: f64,
        hours: f64,
    ) -> Result<CoverageReport, sqlx::Error> {
        let cutoff = epoch_to_pg(pg_to_epoch(chrono::Utc::now()) - hours * 3600.0);
        let rows = sqlx::query(
            "SELECT icao, callsign, latitude, longitude, altitude, speed, heading,
                    squawk, signal_strength, seen_at
             FROM sightings
             WHERE seen_at > $1 AND latitude IS NOT NULL AND longitude IS NOT NULL",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let sightings: Vec<SightingRow> = rows.iter().map(row_to_sighting).collect();
        Ok(build_coverage_report(&sightings, rx_lat, rx_lon))
    }

    async fn busiest_hours(&self, days: f64, limit: i64) -> Result<Vec<HourlyCount>, sqlx::Error> {
        let cutoff = epoch_to_pg(pg_to_epoch(chrono::Utc::now()) - days * 86_400.0);
        let rows = sqlx::query(
            "SELECT EXTRACT(HOUR FROM seen_at)::int AS hr, COUNT(*) AS n
             FROM sightings
             WHERE seen_at > $1
             GROUP BY hr
             ORDER BY n DESC
             LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<i32, _>("hr") as u8, r.get::<i64, _>("n")))
            .collect())
    }

    async fn stats(&self) -> Result<DbStats, sqlx::Error> {
        let aircraft: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM aircraft")
            .fetch_one(&self.pool)
            .await?;
        let sightings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sightings")
            .fetch_one(&self.pool)
            .await?;
        Ok(DbStats { aircraft, sightings })
    }
}
