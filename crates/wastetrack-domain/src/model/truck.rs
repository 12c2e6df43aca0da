//! Bin lorries and their positions

use rand::Rng;
use wastetrack_types::GeoPoint;

use super::City;

/// A collection truck, alive for the whole simulation run
#[derive(Debug, Clone)]
pub struct Truck {
    id: String,
    city: City,
    position: GeoPoint,
}

impl Truck {
    /// Place a new truck at a random position inside its city
    pub fn new<R: Rng + ?Sized>(id: impl Into<String>, city: City, rng: &mut R) -> Self {
        let position = city.random_boundary_position(rng);
        Self {
            id: id.into(),
            city,
            position,
        }
    }

    /// Identifier for the `sequence`-th truck (1-based) of a city, e.g. `gla0007`
    pub fn make_id(city: &City, sequence: u32) -> String {
        format!("{}{:04}", city.code(), sequence)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn city(&self) -> &City {
        &self.city
    }

    pub fn position(&self) -> GeoPoint {
        self.position
    }

    /// Jump to a fresh random position in the city; the previous one is not used.
    pub fn move_down_road<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.position = self.city.random_boundary_position(rng);
    }
}
