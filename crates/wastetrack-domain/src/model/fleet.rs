//! Fleet sizes per city
//!
//! Fleet files are TOML:
//!
//! ```toml
//! [[city]]
//! name = "glasgow"
//! trucks = 41
//!
//! [[city]]
//! name = "perth"
//! trucks = 5
//! lat_min = 56.37
//! lat_max = 56.42
//! lon_min = -3.48
//! lon_max = -3.40
//! ```
//!
//! Bounds may be omitted for the built-in cities.

use std::path::Path;

use rand::Rng;
use serde::Deserialize;
use wastetrack_types::{ConfigError, Error, Result};

use super::{BoundingBox, City, Truck};

/// Default truck count for each built-in city, in fleet order
const DEFAULT_FLEET: [(&str, u32); 5] = [
    ("glasgow", 41),
    ("edinburgh", 32),
    ("dundee", 20),
    ("inverness", 20),
    ("aberdeen", 20),
];

#[derive(Debug, Clone, PartialEq)]
pub struct CityFleet {
    pub city: City,
    pub trucks: u32,
}

/// Which cities are simulated and how many trucks each runs
#[derive(Debug, Clone, PartialEq)]
pub struct FleetConfig {
    cities: Vec<CityFleet>,
}

#[derive(Debug, Deserialize)]
struct FleetFile {
    #[serde(default)]
    city: Vec<FleetFileEntry>,
}

#[derive(Debug, Deserialize)]
struct FleetFileEntry {
    name: String,
    trucks: u32,
    lat_min: Option<f64>,
    lat_max: Option<f64>,
    lon_min: Option<f64>,
    lon_max: Option<f64>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        let cities = DEFAULT_FLEET
            .iter()
            .filter_map(|(name, trucks)| {
                City::builtin(name).map(|city| CityFleet {
                    city,
                    trucks: *trucks,
                })
            })
            .collect();
        Self { cities }
    }
}

impl FleetConfig {
    pub fn new(cities: Vec<CityFleet>) -> Self {
        Self { cities }
    }

    /// A fleet of `trucks` trucks in one city
    pub fn single(city: City, trucks: u32) -> Self {
        Self {
            cities: vec![CityFleet { city, trucks }],
        }
    }

    pub fn cities(&self) -> &[CityFleet] {
        &self.cities
    }

    pub fn total_trucks(&self) -> usize {
        self.cities.iter().map(|c| c.trucks as usize).sum()
    }

    /// Parse a TOML fleet description
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: FleetFile =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        if file.city.is_empty() {
            return Err(ConfigError::Invalid("fleet file lists no cities".into()).into());
        }

        let mut cities = Vec::with_capacity(file.city.len());
        for entry in file.city {
            let city = match (entry.lat_min, entry.lat_max, entry.lon_min, entry.lon_max) {
                (Some(lat_min), Some(lat_max), Some(lon_min), Some(lon_max)) => City::new(
                    entry.name.as_str(),
                    BoundingBox::new(lat_min, lat_max, lon_min, lon_max)?,
                )?,
                (None, None, None, None) => City::builtin(&entry.name).ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "city '{}' is not built in and has no bounds",
                        entry.name
                    ))
                })?,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "city '{}' must give all four bounds or none",
                        entry.name
                    ))
                    .into())
                }
            };
            cities.push(CityFleet {
                city,
                trucks: entry.trucks,
            });
        }
        Ok(Self { cities })
    }

    /// Load a TOML fleet description from disk
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(ConfigError::ParseError(format!(
                "failed to read fleet file {}: {e}",
                path.display()
            )))
        })?;
        Self::from_toml(&content)
    }

    /// Create every truck of the fleet at a random starting position
    pub fn build_trucks<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Truck> {
        let mut trucks = Vec::with_capacity(self.total_trucks());
        for fleet in &self.cities {
            for sequence in 1..=fleet.trucks {
                let id = Truck::make_id(&fleet.city, sequence);
                trucks.push(Truck::new(id, fleet.city.clone(), rng));
            }
        }
        trucks
    }
}
