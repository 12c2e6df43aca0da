//! Backend adapters opened from configuration

use wastetrack_infra::geo_index::RedisGeoIndex;
use wastetrack_store::{LocalObjectStore, SpoolQueue};
use wastetrack_types::Result;

use crate::config::Config;

/// Open the filesystem-backed object store
pub fn open_object_store(config: &Config) -> Result<LocalObjectStore> {
    LocalObjectStore::open(config.storage_root()?)
}

/// Open the queue carrying telemetry batches
pub fn open_telemetry_queue(config: &Config) -> Result<SpoolQueue> {
    SpoolQueue::open(config.telemetry_queue_dir()?)
}

/// Open the queue carrying geocode batches
pub fn open_geocode_queue(config: &Config) -> Result<SpoolQueue> {
    SpoolQueue::open(config.geocode_queue_dir()?)
}

/// Connect to the geospatial cache. Fails fast with
/// `Error::IndexUnavailable` when it cannot be reached.
pub fn open_geo_index(config: &Config) -> Result<RedisGeoIndex> {
    RedisGeoIndex::connect(&config.redis_url, config.redis_timeout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wastetrack_domain::repository::{MessageQueue, ObjectStore};
    use wastetrack_types::{Error, QueueMessage};

    #[test]
    fn test_open_local_backends() {
        let dir = tempdir().unwrap();
        let config = Config {
            storage_root: Some(dir.path().join("storage")),
            telemetry_queue_dir: Some(dir.path().join("telemetry")),
            geocode_queue_dir: Some(dir.path().join("geocodes")),
            ..Config::default()
        };
        let store = open_object_store(&config).unwrap();
        store.put("raw/a", b"x").unwrap();
        assert!(dir.path().join("storage").join("raw").join("a").exists());

        let queue = open_telemetry_queue(&config).unwrap();
        queue.send(&QueueMessage::new("x")).unwrap();
        assert_eq!(open_geocode_queue(&config).unwrap().len().unwrap(), 0);
    }

    #[test]
    fn test_unreachable_index_is_fatal() {
        let config = Config {
            redis_url: "redis://127.0.0.1:1/2".into(),
            redis_timeout_ms: 200,
            ..Config::default()
        };
        let err = open_geo_index(&config).err().unwrap();
        assert!(matches!(err, Error::IndexUnavailable(_)));
        assert!(err.is_fatal());
    }
}
