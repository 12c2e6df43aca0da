//! Object key layout
//!
//! ```text
//! raw/YYYY/MM/DD/HH/WasteCollectionDeliveryStream-1-YYYY-MM-DD-HH-MM-SS-<uuid>
//! processed/YYYY/MM/DD/HH/part-<uuid>.parquet
//! processed/YYYY/MM/DD/HH/compacted-<uuid>.parquet
//! dead-letter/YYYY/MM/DD/HH/<raw name>.jsonl
//! locks/compaction/YYYY/MM/DD/HH.lock
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;
use wastetrack_types::{Error, Result};

pub const RAW_PREFIX: &str = "raw/";
pub const PROCESSED_PREFIX: &str = "processed/";
pub const DEAD_LETTER_PREFIX: &str = "dead-letter/";
pub const LOCK_PREFIX: &str = "locks/";

const STREAM_NAME: &str = "WasteCollectionDeliveryStream-1";

fn hour_path(at: NaiveDateTime) -> String {
    at.format("%Y/%m/%d/%H").to_string()
}

/// Key of a raw object holding readings for `at`
pub fn raw_key(at: NaiveDateTime) -> String {
    format!(
        "{RAW_PREFIX}{}/{STREAM_NAME}-{}-{}",
        hour_path(at),
        at.format("%Y-%m-%d-%H-%M-%S"),
        Uuid::new_v4()
    )
}

/// An hourly `YYYY/MM/DD/HH` partition under one of the top-level areas
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition {
    date: NaiveDate,
    hour: u32,
}

impl Partition {
    /// Partition of a key `<area>/YYYY/MM/DD/HH/<name>`
    pub fn of_key(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() != 6 {
            return Err(Error::InvalidInput(format!(
                "key '{key}' is not laid out as <area>/YYYY/MM/DD/HH/<name>"
            )));
        }
        let date = NaiveDate::parse_from_str(&parts[1..4].join("-"), "%Y-%m-%d")
            .map_err(|e| Error::InvalidInput(format!("key '{key}' has no valid date: {e}")))?;
        let hour = parts[4]
            .parse::<u32>()
            .ok()
            .filter(|h| *h < 24)
            .ok_or_else(|| Error::InvalidInput(format!("key '{key}' has no valid hour")))?;
        Ok(Self { date, hour })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    fn path(&self) -> String {
        format!("{}/{:02}", self.date.format("%Y/%m/%d"), self.hour)
    }

    /// `processed/YYYY/MM/DD/HH/`
    pub fn processed_prefix(&self) -> String {
        format!("{PROCESSED_PREFIX}{}/", self.path())
    }

    pub fn enriched_key(&self) -> String {
        format!("{}part-{}.parquet", self.processed_prefix(), Uuid::new_v4())
    }

    pub fn compacted_key(&self) -> String {
        format!("{}compacted-{}.parquet", self.processed_prefix(), Uuid::new_v4())
    }

    pub fn dead_letter_key(&self, raw_name: &str) -> String {
        format!("{DEAD_LETTER_PREFIX}{}/{raw_name}.jsonl", self.path())
    }

    pub fn lock_key(&self) -> String {
        format!("{LOCK_PREFIX}compaction/{}.lock", self.path())
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Last path segment of a key
pub fn object_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn test_raw_key_layout() {
        let key = raw_key(at("2019-01-02T07:05:00"));
        assert!(key.starts_with(
            "raw/2019/01/02/07/WasteCollectionDeliveryStream-1-2019-01-02-07-05-00-"
        ));
        let partition = Partition::of_key(&key).unwrap();
        assert_eq!(partition.hour(), 7);
        assert_eq!(partition.to_string(), "2019/01/02/07");
    }

    #[test]
    fn test_derived_keys() {
        let partition = Partition::of_key("raw/2018/12/31/00/x").unwrap();
        assert!(partition
            .enriched_key()
            .starts_with("processed/2018/12/31/00/part-"));
        assert!(partition.enriched_key().ends_with(".parquet"));
        assert!(partition
            .compacted_key()
            .starts_with("processed/2018/12/31/00/compacted-"));
        assert_eq!(
            partition.dead_letter_key("x"),
            "dead-letter/2018/12/31/00/x.jsonl"
        );
        assert_eq!(partition.lock_key(), "locks/compaction/2018/12/31/00.lock");
    }

    #[test]
    fn test_rejects_foreign_keys() {
        assert!(Partition::of_key("raw/file").is_err());
        assert!(Partition::of_key("raw/2019/13/01/00/x").is_err());
        assert!(Partition::of_key("raw/2019/01/01/24/x").is_err());
    }

    #[test]
    fn test_object_name() {
        assert_eq!(object_name("raw/2019/01/01/00/abc"), "abc");
        assert_eq!(object_name("abc"), "abc");
    }
}
