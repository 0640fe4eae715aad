//! Geodesy: great-circle distance, bearing, and bearing-sector classification.
//!
//! Used by the tracker for `max_range_nm` gating and by the history store's
//! `coverage_analysis` aggregate query.

const EARTH_RADIUS_NM: f64 = 3440.065;

/// Great-circle distance in nautical miles (Haversine formula).
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_NM * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial bearing in degrees [0, 360) from (lat1, lon1) to (lat2, lon2).
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let y = dlon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// 8 bearing sectors of 45° each, sector 0 is North (straddles the 0°/360°
/// seam: `[337.5, 360) ∪ [0, 22.5)`).
pub const BEARING_SECTOR_COUNT: usize = 8;

/// Classify a bearing into one of [`BEARING_SECTOR_COUNT`] sectors.
///
/// Sector `i` covers `[i*45 - 22.5, i*45 + 22.5) mod 360`.
pub fn bearing_sector(bearing_deg: f64) -> usize {
    let shifted = (bearing_deg + 22.5).rem_euclid(360.0);
    (shifted / 45.0) as usize % BEARING_SECTOR_COUNT
}
