//! Record types shared across the pipeline

use std::collections::BTreeMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Postcode substituted when no postcode can be resolved for a reading
pub const SENTINEL_POSTCODE: &str = "XX99 9ZZ";

/// Outcode substituted when no outcode can be resolved for a reading
pub const SENTINEL_OUTCODE: &str = "XX99";

/// Coordinate substituted alongside the sentinel codes
pub const SENTINEL_POINT: GeoPoint = GeoPoint {
    lat: 56.816918399,
    lon: -4.1826492694,
};

/// Message attribute carrying the originating time slot of a telemetry batch
pub const TIMESLOT_ATTRIBUTE: &str = "timeslot";

/// Message attribute naming the reference file of a geocode batch
pub const CSV_ATTRIBUTE: &str = "csv";

/// Format of the `timeslot` attribute (ISO-8601 without offset)
pub const TIMESLOT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Kind of postal code held in the geospatial index
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    Postcode,
    Outcode,
}

impl CodeKind {
    pub const ALL: [CodeKind; 2] = [CodeKind::Outcode, CodeKind::Postcode];

    /// Key of the geo set holding codes of this kind
    pub fn index_key(&self) -> &'static str {
        match self {
            CodeKind::Postcode => "postcodes",
            CodeKind::Outcode => "outcodes",
        }
    }

    /// Reference data file name the codes are loaded from
    pub fn reference_file(&self) -> &'static str {
        match self {
            CodeKind::Postcode => "postcodes.csv",
            CodeKind::Outcode => "outcodes.csv",
        }
    }

    /// Column holding the code in the reference file
    pub fn code_column(&self) -> &'static str {
        match self {
            CodeKind::Postcode => "postcode",
            CodeKind::Outcode => "outcode",
        }
    }

    pub fn from_reference_file(name: &str) -> Option<Self> {
        let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        match file_name {
            "postcodes.csv" => Some(CodeKind::Postcode),
            "outcodes.csv" => Some(CodeKind::Outcode),
            _ => None,
        }
    }
}

impl std::fmt::Display for CodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeKind::Postcode => write!(f, "postcode"),
            CodeKind::Outcode => write!(f, "outcode"),
        }
    }
}

/// Distance unit for radius queries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Meters,
    Kilometers,
    #[default]
    Miles,
    Feet,
}

impl DistanceUnit {
    /// Unit argument understood by Redis GEO commands
    pub fn redis_arg(&self) -> &'static str {
        match self {
            DistanceUnit::Meters => "m",
            DistanceUnit::Kilometers => "km",
            DistanceUnit::Miles => "mi",
            DistanceUnit::Feet => "ft",
        }
    }

    pub fn meters_per_unit(&self) -> f64 {
        match self {
            DistanceUnit::Meters => 1.0,
            DistanceUnit::Kilometers => 1000.0,
            DistanceUnit::Miles => 1609.34,
            DistanceUnit::Feet => 0.3048,
        }
    }

    pub fn from_meters(&self, meters: f64) -> f64 {
        meters / self.meters_per_unit()
    }

    pub fn to_meters(&self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }
}

impl std::fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.redis_arg())
    }
}

/// Reference coordinate for a postcode or outcode.
///
/// Serialized as `{postcode, lon, lat}` regardless of kind, which is the shape
/// of a geocode batch message entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCode {
    #[serde(rename = "postcode")]
    pub code: String,
    pub lon: f64,
    pub lat: f64,
}

impl GeoCode {
    pub fn new(code: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            code: code.into(),
            lon,
            lat,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// A single truck reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Epoch milliseconds of the originating time slot
    pub timestamp: i64,
    pub truck_id: String,
    pub lat: f64,
    pub lon: f64,
    /// Collected load in kg
    pub load: f64,
}

impl TelemetryEvent {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// A reading with its nearest postcode and outcode attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    #[serde(flatten)]
    pub event: TelemetryEvent,
    pub postcode: String,
    pub postcode_lat: f64,
    pub postcode_lon: f64,
    pub outcode: String,
    pub outcode_lat: f64,
    pub outcode_lon: f64,
}

impl EnrichedEvent {
    pub fn is_sentinel_postcode(&self) -> bool {
        self.postcode == SENTINEL_POSTCODE
    }
}

/// Message handed to a queue
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueMessage {
    pub body: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl QueueMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Message taken from a queue, pending deletion by its receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt: String,
    pub message: QueueMessage,
}

/// Listing entry of an object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_kind_from_reference_file() {
        assert_eq!(
            CodeKind::from_reference_file("outcodes.csv"),
            Some(CodeKind::Outcode)
        );
        assert_eq!(
            CodeKind::from_reference_file("refdata/postcodes.csv"),
            Some(CodeKind::Postcode)
        );
        assert_eq!(CodeKind::from_reference_file("towns.csv"), None);
    }

    #[test]
    fn test_geocode_wire_shape() {
        let code = GeoCode::new("G1 1AA", 55.86, -4.25);
        let json = serde_json::to_value(&code).unwrap();
        assert_eq!(json["postcode"], "G1 1AA");
        assert_eq!(json["lat"], 55.86);
        assert_eq!(json["lon"], -4.25);
    }

    #[test]
    fn test_enriched_event_is_flat() {
        let enriched = EnrichedEvent {
            event: TelemetryEvent {
                timestamp: 1546214460000,
                truck_id: "gla0001".into(),
                lat: 55.85,
                lon: -4.25,
                load: 3.5,
            },
            postcode: "G1 1AA".into(),
            postcode_lat: 55.86,
            postcode_lon: -4.25,
            outcode: "G1".into(),
            outcode_lat: 55.86,
            outcode_lon: -4.24,
        };
        let json = serde_json::to_value(&enriched).unwrap();
        assert_eq!(json["truck_id"], "gla0001");
        assert_eq!(json["outcode"], "G1");
        assert!(json.get("event").is_none());
    }

    #[test]
    fn test_distance_unit_conversion() {
        let meters = DistanceUnit::Miles.to_meters(2.0);
        assert!((DistanceUnit::Miles.from_meters(meters) - 2.0).abs() < 1e-9);
        assert!((DistanceUnit::Kilometers.from_meters(1500.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_point_validity() {
        assert!(GeoPoint::new(55.86, -4.25).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }
}
