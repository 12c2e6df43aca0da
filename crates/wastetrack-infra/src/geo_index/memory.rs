//! In-process geospatial index

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use wastetrack_domain::repository::GeoIndex;
use wastetrack_types::{CodeKind, DistanceUnit, GeoPoint, Result};

use super::{check_indexable, haversine_m};

/// Linear-scan index over an ordered map.
///
/// Codes at exactly the same distance come back in ascending code order.
#[derive(Default)]
pub struct MemoryGeoIndex {
    sets: RwLock<HashMap<CodeKind, BTreeMap<String, GeoPoint>>>,
}

impl MemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GeoIndex for MemoryGeoIndex {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn add(&self, kind: CodeKind, code: &str, point: GeoPoint) -> Result<()> {
        check_indexable(code, point)?;
        self.sets
            .write()
            .entry(kind)
            .or_default()
            .insert(code.to_string(), point);
        Ok(())
    }

    fn query_radius(
        &self,
        kind: CodeKind,
        point: GeoPoint,
        radius: f64,
        unit: DistanceUnit,
    ) -> Result<Vec<(String, f64)>> {
        let limit_m = unit.to_meters(radius);
        let sets = self.sets.read();
        let Some(set) = sets.get(&kind) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(String, f64)> = set
            .iter()
            .filter_map(|(code, p)| {
                let d = haversine_m(point, *p);
                (d <= limit_m).then(|| (code.clone(), unit.from_meters(d)))
            })
            .collect();
        // stable: equal distances keep map (code) order
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(hits)
    }

    fn lookup(&self, kind: CodeKind, code: &str) -> Result<Option<GeoPoint>> {
        Ok(self
            .sets
            .read()
            .get(&kind)
            .and_then(|set| set.get(code))
            .copied())
    }

    fn count(&self, kind: CodeKind) -> Result<usize> {
        Ok(self.sets.read().get(&kind).map_or(0, BTreeMap::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wastetrack_domain::service::{ProximityResolver, SearchPolicy};

    fn glasgow_index() -> MemoryGeoIndex {
        let index = MemoryGeoIndex::new();
        index
            .add(CodeKind::Postcode, "G1 1AA", GeoPoint::new(55.86, -4.25))
            .unwrap();
        index
            .add(CodeKind::Postcode, "G2 2BB", GeoPoint::new(55.87, -4.26))
            .unwrap();
        index
            .add(CodeKind::Postcode, "G51 4XX", GeoPoint::new(55.85, -4.33))
            .unwrap();
        index
    }

    #[test]
    fn test_query_radius_sorted() {
        let index = glasgow_index();
        let hits = index
            .query_radius(
                CodeKind::Postcode,
                GeoPoint::new(55.861, -4.251),
                10.0,
                DistanceUnit::Miles,
            )
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, "G1 1AA");
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_query_radius_excludes_far_codes() {
        let index = glasgow_index();
        let hits = index
            .query_radius(
                CodeKind::Postcode,
                GeoPoint::new(55.86, -4.25),
                1.0,
                DistanceUnit::Kilometers,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "G1 1AA");
    }

    #[test]
    fn test_kinds_are_separate() {
        let index = glasgow_index();
        assert_eq!(index.count(CodeKind::Postcode).unwrap(), 3);
        assert_eq!(index.count(CodeKind::Outcode).unwrap(), 0);
        assert!(index.lookup(CodeKind::Outcode, "G1 1AA").unwrap().is_none());
    }

    #[test]
    fn test_add_is_upsert() {
        let index = glasgow_index();
        index
            .add(CodeKind::Postcode, "G1 1AA", GeoPoint::new(55.0, -4.0))
            .unwrap();
        assert_eq!(index.count(CodeKind::Postcode).unwrap(), 3);
        assert_eq!(
            index.lookup(CodeKind::Postcode, "G1 1AA").unwrap(),
            Some(GeoPoint::new(55.0, -4.0))
        );
    }

    #[test]
    fn test_ties_in_code_order() {
        let index = MemoryGeoIndex::new();
        let p = GeoPoint::new(57.0, -2.0);
        index.add(CodeKind::Outcode, "AB2", p).unwrap();
        index.add(CodeKind::Outcode, "AB1", p).unwrap();
        let hits = index
            .query_radius(CodeKind::Outcode, p, 1.0, DistanceUnit::Miles)
            .unwrap();
        assert_eq!(hits[0].0, "AB1");
        assert_eq!(hits[1].0, "AB2");
    }

    #[test]
    fn test_resolver_exact_hit_at_radius_one() {
        let index = glasgow_index();
        let resolver = ProximityResolver::new(&index, SearchPolicy::default()).unwrap();
        let nearest = resolver
            .resolve_nearest(GeoPoint::new(55.86, -4.25), CodeKind::Postcode)
            .unwrap()
            .unwrap();
        assert_eq!(nearest.code, "G1 1AA");
        assert_eq!(nearest.radius, 1.0);
        assert!(nearest.distance < 1e-9);
    }

    #[test]
    fn test_resolver_empty_index_no_match() {
        let index = MemoryGeoIndex::new();
        let resolver = ProximityResolver::new(&index, SearchPolicy::default()).unwrap();
        assert!(resolver
            .resolve_nearest(GeoPoint::new(55.86, -4.25), CodeKind::Postcode)
            .unwrap()
            .is_none());
    }
}
