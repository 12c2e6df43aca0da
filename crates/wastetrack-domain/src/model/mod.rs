//! Domain model types

pub mod city;
pub mod fleet;
pub mod time_slot;
pub mod truck;

pub use city::{BoundingBox, City};
pub use fleet::{CityFleet, FleetConfig};
pub use time_slot::TimeSlot;
pub use truck::Truck;
