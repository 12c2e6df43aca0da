//! Fleet simulation: one reading per truck per tick

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wastetrack_types::{Error, Result, TelemetryEvent};

use crate::model::city::round_dp;
use crate::model::{FleetConfig, TimeSlot, Truck};

/// Smallest load a truck reports before weighting, in kg
pub const LOAD_MIN_KG: f64 = 0.1;
/// Largest load a truck reports before weighting, in kg
pub const LOAD_MAX_KG: f64 = 15.0;

/// Topic a truck's live readings are published on
pub fn collection_topic(truck_id: &str) -> String {
    format!("waste/household/{truck_id}/collection")
}

pub struct TruckSimulation<R: Rng = StdRng> {
    trucks: Vec<Truck>,
    weighting: f64,
    rng: R,
}

impl TruckSimulation<StdRng> {
    pub fn new(fleet: &FleetConfig, weighting: f64) -> Result<Self> {
        Self::with_rng(fleet, weighting, StdRng::from_entropy())
    }

    /// Reproducible simulation for tests and replays
    pub fn with_seed(fleet: &FleetConfig, weighting: f64, seed: u64) -> Result<Self> {
        Self::with_rng(fleet, weighting, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> TruckSimulation<R> {
    pub fn with_rng(fleet: &FleetConfig, weighting: f64, mut rng: R) -> Result<Self> {
        if !weighting.is_finite() || weighting < 0.0 {
            return Err(Error::InvalidInput(format!(
                "weighting must be a non-negative number, got {weighting}"
            )));
        }
        let trucks = fleet.build_trucks(&mut rng);
        Ok(Self {
            trucks,
            weighting,
            rng,
        })
    }

    pub fn trucks(&self) -> &[Truck] {
        &self.trucks
    }

    pub fn weighting(&self) -> f64 {
        self.weighting
    }

    /// Move every truck and emit its reading for `slot`
    pub fn tick(&mut self, slot: &TimeSlot) -> Vec<TelemetryEvent> {
        let timestamp = slot.timestamp_ms();
        let mut events = Vec::with_capacity(self.trucks.len());
        for truck in &mut self.trucks {
            truck.move_down_road(&mut self.rng);
            let load = round_dp(
                self.rng.gen_range(LOAD_MIN_KG..=LOAD_MAX_KG) * self.weighting,
                2,
            );
            let position = truck.position();
            events.push(TelemetryEvent {
                timestamp,
                truck_id: truck.id().to_string(),
                lat: position.lat,
                lon: position.lon,
                load,
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::City;

    fn slot() -> TimeSlot {
        TimeSlot::parse("2019-01-01T08:30:00").unwrap()
    }

    #[test]
    fn test_tick_one_event_per_truck() {
        let mut sim = TruckSimulation::with_seed(&FleetConfig::default(), 1.0, 3).unwrap();
        let events = sim.tick(&slot());
        assert_eq!(events.len(), 133);
        assert!(events.iter().all(|e| e.timestamp == slot().timestamp_ms()));
        assert_eq!(events[0].truck_id, "gla0001");
    }

    #[test]
    fn test_load_range_and_rounding() {
        let mut sim = TruckSimulation::with_seed(&FleetConfig::default(), 1.0, 5).unwrap();
        for _ in 0..20 {
            for e in sim.tick(&slot()) {
                assert!((LOAD_MIN_KG..=LOAD_MAX_KG).contains(&e.load), "{}", e.load);
                assert!(((e.load * 100.0).round() - e.load * 100.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_weighting_scales_load() {
        let mut sim = TruckSimulation::with_seed(&FleetConfig::default(), 0.5, 9).unwrap();
        let max = sim
            .tick(&slot())
            .iter()
            .map(|e| e.load)
            .fold(0.0, f64::max);
        assert!(max <= LOAD_MAX_KG * 0.5 + 0.005);
    }

    #[test]
    fn test_positions_stay_in_city() {
        let city = City::builtin("aberdeen").unwrap();
        let fleet = FleetConfig::single(city.clone(), 4);
        let mut sim = TruckSimulation::with_seed(&fleet, 1.0, 2).unwrap();
        for e in sim.tick(&slot()) {
            assert!(city.bounds().contains(e.point()));
        }
    }

    #[test]
    fn test_negative_weighting_rejected() {
        assert!(TruckSimulation::with_seed(&FleetConfig::default(), -1.0, 1).is_err());
        assert!(TruckSimulation::with_seed(&FleetConfig::default(), f64::NAN, 1).is_err());
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let fleet = FleetConfig::default();
        let mut a = TruckSimulation::with_seed(&fleet, 1.0, 42).unwrap();
        let mut b = TruckSimulation::with_seed(&fleet, 1.0, 42).unwrap();
        assert_eq!(a.tick(&slot()), b.tick(&slot()));
    }

    #[test]
    fn test_collection_topic() {
        assert_eq!(collection_topic("gla0007"), "waste/household/gla0007/collection");
    }
}
