//! Domain layer: cities, trucks and time slots, the simulation and
//! enrichment services, and the storage traits they run against.

pub mod model;
pub mod repository;
pub mod service;
