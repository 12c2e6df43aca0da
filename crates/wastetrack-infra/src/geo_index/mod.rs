//! Geospatial index backends

mod memory;
mod redis_geo;

pub use self::memory::MemoryGeoIndex;
pub use self::redis_geo::RedisGeoIndex;

use wastetrack_types::{Error, GeoPoint, Result};

/// Mean Earth radius used by Redis GEO distance calculations, in meters
pub const EARTH_RADIUS_M: f64 = 6_372_797.560_856;

/// Latitude limit of the Web-Mercator projection Redis GEO indexes with
pub const MAX_INDEXABLE_LAT: f64 = 85.051_128_78;

/// Great-circle distance between two points, in meters
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let u = ((b.lat - a.lat).to_radians() / 2.0).sin();
    let v = ((b.lon - a.lon).to_radians() / 2.0).sin();
    2.0 * EARTH_RADIUS_M * (u * u + lat1.cos() * lat2.cos() * v * v).sqrt().asin()
}

pub(crate) fn check_indexable(code: &str, point: GeoPoint) -> Result<()> {
    if code.trim().is_empty() {
        return Err(Error::InvalidInput("empty code".into()));
    }
    if !point.is_valid() || point.lat.abs() > MAX_INDEXABLE_LAT {
        return Err(Error::InvalidInput(format!(
            "coordinate ({}, {}) for {code} cannot be indexed",
            point.lat, point.lon
        )));
    }
    Ok(())
}
