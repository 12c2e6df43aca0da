//! Domain services

pub mod enrichment;
pub mod proximity;
pub mod simulation;

pub use enrichment::{derive_outcode, Enricher};
pub use proximity::{NearestCode, ProximityResolver, SearchPolicy};
pub use simulation::{collection_topic, TruckSimulation, LOAD_MAX_KG, LOAD_MIN_KG};
