//! Attach nearest postcode and outcode to raw readings

use tracing::debug;
use wastetrack_types::{
    CodeKind, EnrichedEvent, Error, GeoPoint, Result, TelemetryEvent, SENTINEL_OUTCODE,
    SENTINEL_POINT, SENTINEL_POSTCODE,
};

use super::proximity::{ProximityResolver, SearchPolicy};
use crate::repository::GeoIndex;

/// Outcode of a postcode: its first whitespace-delimited token
pub fn derive_outcode(postcode: &str) -> Option<&str> {
    postcode.split_whitespace().next()
}

pub struct Enricher<'a> {
    index: &'a dyn GeoIndex,
    resolver: ProximityResolver<'a>,
}

impl<'a> Enricher<'a> {
    pub fn new(index: &'a dyn GeoIndex, policy: SearchPolicy) -> Result<Self> {
        Ok(Self {
            index,
            resolver: ProximityResolver::new(index, policy)?,
        })
    }

    /// Enrich one reading.
    ///
    /// A code that cannot be resolved or has no stored coordinate is replaced
    /// by the sentinel; only index failures and unusable coordinates are errors.
    pub fn enrich(&self, event: TelemetryEvent) -> Result<EnrichedEvent> {
        let point = event.point();
        if !point.is_valid() {
            return Err(Error::InvalidRecord(format!(
                "truck {} reported invalid coordinate ({}, {})",
                event.truck_id, event.lat, event.lon
            )));
        }
        if !event.load.is_finite() || event.load < 0.0 {
            return Err(Error::InvalidRecord(format!(
                "truck {} reported invalid load {}",
                event.truck_id, event.load
            )));
        }

        let nearest = self.resolver.resolve_nearest(point, CodeKind::Postcode)?;
        let (postcode, postcode_point) = match nearest {
            Some(found) => self.canonical(CodeKind::Postcode, found.code, SENTINEL_POSTCODE)?,
            None => {
                debug!(truck_id = %event.truck_id, "no postcode in range, using sentinel");
                (SENTINEL_POSTCODE.to_string(), SENTINEL_POINT)
            }
        };

        let (outcode, outcode_point) = match derive_outcode(&postcode) {
            Some(outcode) => {
                self.canonical(CodeKind::Outcode, outcode.to_string(), SENTINEL_OUTCODE)?
            }
            None => (SENTINEL_OUTCODE.to_string(), SENTINEL_POINT),
        };

        Ok(EnrichedEvent {
            event,
            postcode,
            postcode_lat: postcode_point.lat,
            postcode_lon: postcode_point.lon,
            outcode,
            outcode_lat: outcode_point.lat,
            outcode_lon: outcode_point.lon,
        })
    }

    /// Stored coordinate of `code`, or the sentinel pair when it has none
    fn canonical(
        &self,
        kind: CodeKind,
        code: String,
        sentinel: &str,
    ) -> Result<(String, GeoPoint)> {
        match self.index.lookup(kind, &code)? {
            Some(point) => Ok((code, point)),
            None => {
                debug!(%kind, %code, "code has no stored coordinate, using sentinel");
                Ok((sentinel.to_string(), SENTINEL_POINT))
            }
        }
    }
}
