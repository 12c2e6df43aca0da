//! Cities and their collection boundaries

use rand::Rng;
use serde::{Deserialize, Serialize};
use wastetrack_types::{Error, GeoPoint, Result};

/// Rectangular lat/lon boundary. Non-degenerate on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    lat_min: f64,
    lat_max: f64,
    lon_min: f64,
    lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Result<Self> {
        let finite = [lat_min, lat_max, lon_min, lon_max]
            .iter()
            .all(|v| v.is_finite());
        if !finite || lat_min >= lat_max || lon_min >= lon_max {
            return Err(Error::InvalidInput(format!(
                "degenerate bounding box: lat [{lat_min}, {lat_max}], lon [{lon_min}, {lon_max}]"
            )));
        }
        Ok(Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        })
    }

    pub fn lat_min(&self) -> f64 {
        self.lat_min
    }

    pub fn lat_max(&self) -> f64 {
        self.lat_max
    }

    pub fn lon_min(&self) -> f64 {
        self.lon_min
    }

    pub fn lon_max(&self) -> f64 {
        self.lon_max
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.lat_min..=self.lat_max).contains(&point.lat)
            && (self.lon_min..=self.lon_max).contains(&point.lon)
    }
}

/// A city served by the fleet
#[derive(Debug, Clone, PartialEq)]
pub struct City {
    name: String,
    bounds: BoundingBox,
}

/// name, lat min, lat max, lon min, lon max
const BUILTIN_BOUNDARIES: [(&str, f64, f64, f64, f64); 5] = [
    ("glasgow", 55.800818, 55.905653, -4.457350, -4.118427),
    ("edinburgh", 55.897569, 55.973145, -3.306988, -3.091925),
    ("dundee", 56.456193, 56.481492, -3.049765, -2.974970),
    ("inverness", 57.453927, 57.489870, -4.250410, -4.195785),
    ("aberdeen", 57.127780, 57.174114, -2.167156, -2.088483),
];

impl City {
    pub fn new(name: impl Into<String>, bounds: BoundingBox) -> Result<Self> {
        let name = name.into();
        if name.chars().count() < 3 {
            return Err(Error::InvalidInput(format!(
                "city name '{name}' is too short to derive truck ids"
            )));
        }
        Ok(Self { name, bounds })
    }

    /// Look up one of the built-in cities by name (case-insensitive)
    pub fn builtin(name: &str) -> Option<City> {
        let wanted = name.to_lowercase();
        BUILTIN_BOUNDARIES
            .iter()
            .find(|(n, ..)| *n == wanted)
            .map(|&(n, lat_min, lat_max, lon_min, lon_max)| City {
                name: n.to_string(),
                bounds: BoundingBox {
                    lat_min,
                    lat_max,
                    lon_min,
                    lon_max,
                },
            })
    }

    /// Built-in city names in fleet order
    pub fn builtin_names() -> impl Iterator<Item = &'static str> {
        BUILTIN_BOUNDARIES.iter().map(|(n, ..)| *n)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Three-letter prefix used in truck identifiers
    pub fn code(&self) -> String {
        self.name.chars().take(3).collect::<String>().to_lowercase()
    }

    /// Uniformly random position inside the boundary, rounded to 6 dp.
    ///
    /// Rounding is clamped so the result never leaves the box.
    pub fn random_boundary_position<R: Rng + ?Sized>(&self, rng: &mut R) -> GeoPoint {
        let b = &self.bounds;
        let lat = round_dp(rng.gen_range(b.lat_min..=b.lat_max), 6).clamp(b.lat_min, b.lat_max);
        let lon = round_dp(rng.gen_range(b.lon_min..=b.lon_max), 6).clamp(b.lon_min, b.lon_max);
        GeoPoint::new(lat, lon)
    }
}

pub(crate) fn round_dp(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_builtin_glasgow() {
        let city = City::builtin("Glasgow").unwrap();
        assert_eq!(city.name(), "glasgow");
        assert_eq!(city.code(), "gla");
        assert!((city.bounds().lat_min() - 55.800818).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(City::builtin("paris").is_none());
    }

    #[test]
    fn test_degenerate_box_rejected() {
        assert!(BoundingBox::new(55.0, 55.0, -4.0, -3.0).is_err());
        assert!(BoundingBox::new(55.0, 56.0, -3.0, -4.0).is_err());
        assert!(BoundingBox::new(f64::NAN, 56.0, -4.0, -3.0).is_err());
    }

    #[test]
    fn test_random_position_inside_box() {
        let city = City::builtin("inverness").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let p = city.random_boundary_position(&mut rng);
            assert!(city.bounds().contains(p), "{p:?} outside box");
        }
    }

    #[test]
    fn test_round_dp() {
        assert_eq!(round_dp(55.1234567, 6), 55.123457);
        assert_eq!(round_dp(3.14159, 2), 3.14);
    }
}
