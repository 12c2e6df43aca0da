//! Merge the Parquet files of each hourly partition into one
//!
//! Partitions dated today are still being written to and are skipped. Each
//! partition is compacted under a lease so two sweeps never merge the same
//! files, and its file list is re-read once the lease is held.
//!
//! A compacted file records the keys it replaced. Originals that survive a
//! sweep interrupted while deleting them are removed by the next sweep
//! instead of being merged a second time.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use bytes::Bytes;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use wastetrack_domain::repository::ObjectStore;
use wastetrack_infra::parquet_codec::{merged_sources, read_enriched, write_compacted};
use wastetrack_types::{Error, Result};

use crate::layout::{object_name, Partition, PROCESSED_PREFIX};
use crate::lease::Lease;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactedPartition {
    pub partition: String,
    pub output_key: String,
    pub merged_files: usize,
    pub rows: usize,
    /// Originals of an earlier compaction found and removed
    pub leftovers_removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub compacted: Vec<CompactedPartition>,
    pub skipped_today: usize,
    pub skipped_leased: usize,
    /// Partitions another sweep had already compacted by the time the lease was held
    pub skipped_unchanged: usize,
}

pub struct Compactor<'a> {
    store: &'a dyn ObjectStore,
    lease_ttl: Duration,
    holder: String,
}

fn is_compacted(key: &str) -> bool {
    object_name(key).starts_with("compacted-")
}

impl<'a> Compactor<'a> {
    pub fn new(store: &'a dyn ObjectStore, lease_ttl: Duration) -> Self {
        Self {
            store,
            lease_ttl,
            holder: format!("compactor-{}", Uuid::new_v4().simple()),
        }
    }

    /// Data files under `prefix`, grouped by partition
    fn partitions(&self, prefix: &str) -> Result<BTreeMap<Partition, Vec<String>>> {
        let mut partitions: BTreeMap<Partition, Vec<String>> = BTreeMap::new();
        for meta in self.store.list(prefix)? {
            if !meta.key.ends_with(".parquet") {
                continue;
            }
            match Partition::of_key(&meta.key) {
                Ok(partition) => partitions.entry(partition).or_default().push(meta.key),
                Err(e) => warn!(key = %meta.key, error = %e, "ignoring object outside the partition layout"),
            }
        }
        Ok(partitions)
    }

    /// Compact every partition with more than one file, except those dated `today`
    pub fn compact_all(&self, today: NaiveDate) -> Result<CompactionReport> {
        let mut report = CompactionReport::default();
        for (partition, keys) in self.partitions(PROCESSED_PREFIX)? {
            if keys.len() < 2 {
                continue;
            }
            if partition.date() == today {
                info!(%partition, "partition is still being written today, skipping");
                report.skipped_today += 1;
                continue;
            }
            match self.compact_partition(&partition) {
                Ok(Some(done)) => report.compacted.push(done),
                Ok(None) => report.skipped_unchanged += 1,
                Err(Error::LeaseHeld { holder, .. }) => {
                    info!(%partition, %holder, "partition is being compacted elsewhere");
                    report.skipped_leased += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Current files of `partition`, with originals already merged into a
    /// compacted file removed. Must run under the partition lease.
    fn live_files(&self, partition: &Partition) -> Result<(Vec<String>, usize)> {
        let keys = self
            .partitions(&partition.processed_prefix())?
            .remove(partition)
            .unwrap_or_default();

        let mut merged = BTreeSet::new();
        for key in keys.iter().filter(|k| is_compacted(k)) {
            match self.store.get(key) {
                Ok(data) => merged.extend(merged_sources(&Bytes::from(data))?),
                Err(Error::ObjectNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let mut live = Vec::new();
        let mut removed = 0;
        for key in keys {
            if merged.contains(&key) {
                warn!(%key, "removing original left behind by an interrupted compaction");
                self.store.delete(&key)?;
                removed += 1;
            } else {
                live.push(key);
            }
        }
        Ok((live, removed))
    }

    /// Merge the files of `partition` into one compacted file and delete them.
    ///
    /// Returns `None` when, once the lease is held, fewer than two files
    /// remain or a file has vanished: another sweep got there first.
    pub fn compact_partition(&self, partition: &Partition) -> Result<Option<CompactedPartition>> {
        let lease = Lease::acquire(self.store, &partition.lock_key(), &self.holder, self.lease_ttl)?;

        let (keys, leftovers_removed) = self.live_files(partition)?;
        if keys.len() < 2 {
            info!(%partition, leftovers_removed, "nothing left to merge");
            lease.release()?;
            return Ok(None);
        }

        let mut rows = Vec::new();
        for key in &keys {
            match self.store.get(key) {
                Ok(data) => rows.extend(read_enriched(&Bytes::from(data))?),
                Err(Error::ObjectNotFound(_)) => {
                    warn!(%partition, %key, "partition changed during compaction, skipping");
                    lease.release()?;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
        rows.sort_by(|a, b| {
            a.event
                .timestamp
                .cmp(&b.event.timestamp)
                .then_with(|| a.event.truck_id.cmp(&b.event.truck_id))
        });

        let output_key = partition.compacted_key();
        self.store.put(&output_key, &write_compacted(&rows, &keys)?)?;
        for key in &keys {
            self.store.delete(key)?;
        }
        lease.release()?;

        info!(%partition, output = %output_key, files = keys.len(), rows = rows.len(), "partition compacted");
        Ok(Some(CompactedPartition {
            partition: partition.to_string(),
            output_key,
            merged_files: keys.len(),
            rows: rows.len(),
            leftovers_removed,
        }))
    }
}
