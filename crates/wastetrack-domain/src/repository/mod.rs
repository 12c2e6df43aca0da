//! Storage and messaging contracts the services run against
//!
//! Implementations live in `wastetrack-store` (object storage, queues) and
//! `wastetrack-infra` (geospatial index).

use wastetrack_types::{
    CodeKind, DistanceUnit, GeoCode, GeoPoint, ObjectMeta, QueueMessage, ReceivedMessage, Result,
    TelemetryEvent,
};

/// Code → coordinate store supporting radius queries.
///
/// Written by the cache warmer, read by the resolver. Readers must tolerate a
/// cold or partially warmed index.
pub trait GeoIndex: Send + Sync {
    /// Check the backing store is reachable
    fn ping(&self) -> Result<()>;

    /// Insert or replace the coordinate for `code`
    fn add(&self, kind: CodeKind, code: &str, point: GeoPoint) -> Result<()>;

    /// Insert a batch of codes, returning how many were written
    fn add_many(&self, kind: CodeKind, codes: &[GeoCode]) -> Result<usize> {
        for code in codes {
            self.add(kind, &code.code, code.point())?;
        }
        Ok(codes.len())
    }

    /// Codes within `radius` of `point`, nearest first, with their distance in `unit`
    fn query_radius(
        &self,
        kind: CodeKind,
        point: GeoPoint,
        radius: f64,
        unit: DistanceUnit,
    ) -> Result<Vec<(String, f64)>>;

    /// Stored coordinate of `code`
    fn lookup(&self, kind: CodeKind, code: &str) -> Result<Option<GeoPoint>>;

    /// Number of codes of `kind` currently stored
    fn count(&self, kind: CodeKind) -> Result<usize>;
}

/// At-least-once message queue
pub trait MessageQueue: Send + Sync {
    /// Enqueue a message; `Ok(None)` means the send was not confirmed
    fn send(&self, message: &QueueMessage) -> Result<Option<String>>;

    /// Take up to `max` visible messages. They stay pending until deleted.
    fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>>;

    /// Acknowledge a received message
    fn delete(&self, receipt: &str) -> Result<()>;
}

/// Flat key/value object storage with `/`-separated keys
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Write only if `key` does not exist yet; returns whether the write happened
    fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<bool>;

    /// Replace the object only while it still holds `expected`; `None` deletes
    /// it. Returns whether the swap happened. A missing object never matches.
    fn replace_if_matches(&self, key: &str, expected: &[u8], data: Option<&[u8]>)
        -> Result<bool>;

    /// Fails with `Error::ObjectNotFound` for a missing key
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    fn delete(&self, key: &str) -> Result<()>;

    /// All objects under `prefix`, sorted by key
    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;
}

/// Destination for live telemetry, one topic per truck
pub trait TelemetrySink {
    fn publish(&self, topic: &str, event: &TelemetryEvent) -> Result<()>;

    /// Push out anything buffered
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
