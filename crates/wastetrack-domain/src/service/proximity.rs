//! Nearest-code lookup by growing-radius search
//!
//! Dense areas resolve on the first small query; sparse areas keep widening
//! until something appears or the radius bound is passed.

use serde::{Deserialize, Serialize};
use tracing::trace;
use wastetrack_types::{CodeKind, DistanceUnit, Error, GeoPoint, Result};

use crate::repository::GeoIndex;

/// Radius schedule for the proximity search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchPolicy {
    #[serde(default = "default_initial_radius")]
    pub initial_radius: f64,
    #[serde(default = "default_radius_step")]
    pub radius_step: f64,
    /// Largest radius queried before giving up
    #[serde(default = "default_max_radius")]
    pub max_radius: f64,
    #[serde(default)]
    pub unit: DistanceUnit,
}

fn default_initial_radius() -> f64 {
    1.0
}

fn default_radius_step() -> f64 {
    1.0
}

fn default_max_radius() -> f64 {
    1000.0
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            initial_radius: default_initial_radius(),
            radius_step: default_radius_step(),
            max_radius: default_max_radius(),
            unit: DistanceUnit::default(),
        }
    }
}

impl SearchPolicy {
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.initial_radius) || !positive(self.radius_step) {
            return Err(Error::InvalidInput(format!(
                "search radius and step must be positive (got {} / {})",
                self.initial_radius, self.radius_step
            )));
        }
        if !self.max_radius.is_finite() || self.max_radius < self.initial_radius {
            return Err(Error::InvalidInput(format!(
                "max search radius {} is below the initial radius {}",
                self.max_radius, self.initial_radius
            )));
        }
        Ok(())
    }
}

/// Closest code found by the resolver
#[derive(Debug, Clone, PartialEq)]
pub struct NearestCode {
    pub code: String,
    /// Distance from the query point, in the policy's unit
    pub distance: f64,
    /// Radius of the query that produced the match
    pub radius: f64,
}

pub struct ProximityResolver<'a> {
    index: &'a dyn GeoIndex,
    policy: SearchPolicy,
}

impl<'a> ProximityResolver<'a> {
    pub fn new(index: &'a dyn GeoIndex, policy: SearchPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { index, policy })
    }

    pub fn policy(&self) -> &SearchPolicy {
        &self.policy
    }

    /// Nearest code of `kind` to `point`, or `None` once the radius bound is passed.
    ///
    /// Ties at equal distance keep the index's return order.
    pub fn resolve_nearest(&self, point: GeoPoint, kind: CodeKind) -> Result<Option<NearestCode>> {
        let mut radius = self.policy.initial_radius;
        while radius <= self.policy.max_radius {
            let found = self
                .index
                .query_radius(kind, point, radius, self.policy.unit)?;
            if let Some((code, distance)) = found.into_iter().next() {
                trace!(%kind, %code, radius, "proximity match");
                return Ok(Some(NearestCode {
                    code,
                    distance,
                    radius,
                }));
            }
            radius += self.policy.radius_step;
        }
        trace!(%kind, lat = point.lat, lon = point.lon, "no match within search bound");
        Ok(None)
    }
}
