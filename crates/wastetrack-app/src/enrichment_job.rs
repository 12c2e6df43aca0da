//! Raw object → enriched Parquet
//!
//! Every record is enriched against the geospatial index and the result is
//! written as one Parquet object in the matching `processed/` partition.
//! Nothing is written until the whole object has been enriched, so an index
//! failure never leaves partial output behind.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use wastetrack_domain::repository::{GeoIndex, ObjectStore};
use wastetrack_domain::service::{Enricher, SearchPolicy};
use wastetrack_infra::parquet_codec::write_enriched;
use wastetrack_infra::wire::{decode_telemetry_records, RejectedRecord};
use wastetrack_types::{CodeKind, Error, Result};

use crate::layout::{object_name, Partition, RAW_PREFIX};

/// What happens to records that cannot be enriched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnrichmentPolicy {
    /// Bad records go to a dead-letter object; the rest are written
    #[default]
    Isolate,
    /// Any bad record fails the whole object
    FailBatch,
}

impl std::fmt::Display for EnrichmentPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrichmentPolicy::Isolate => write!(f, "isolate"),
            EnrichmentPolicy::FailBatch => write!(f, "fail-batch"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentOutcome {
    pub source_key: String,
    pub output_key: Option<String>,
    pub enriched: usize,
    pub sentinel_postcodes: usize,
    pub dead_letter_key: Option<String>,
    pub dead_lettered: usize,
}

/// Check the index holds codes of both kinds.
///
/// A cold index is an error when `require_warm` is set, otherwise a warning:
/// every record would get the sentinel.
pub fn check_index_ready(index: &dyn GeoIndex, require_warm: bool) -> Result<()> {
    for kind in CodeKind::ALL {
        if index.count(kind)? == 0 {
            if require_warm {
                return Err(Error::IndexUnavailable(format!(
                    "no {kind}s loaded; warm the cache first"
                )));
            }
            warn!(%kind, "geospatial index holds no codes of this kind");
        }
    }
    Ok(())
}

pub struct EnrichmentJob<'a> {
    store: &'a dyn ObjectStore,
    enricher: Enricher<'a>,
    policy: EnrichmentPolicy,
}

impl<'a> EnrichmentJob<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        index: &'a dyn GeoIndex,
        search: SearchPolicy,
        policy: EnrichmentPolicy,
    ) -> Result<Self> {
        Ok(Self {
            store,
            enricher: Enricher::new(index, search)?,
            policy,
        })
    }

    /// Enrich one raw object
    pub fn enrich_object(&self, raw_key: &str) -> Result<EnrichmentOutcome> {
        let partition = Partition::of_key(raw_key)?;
        let data = self.store.get(raw_key)?;
        let text = String::from_utf8(data)
            .map_err(|e| Error::InvalidRecord(format!("{raw_key} is not UTF-8: {e}")))?;

        let mut outcome = EnrichmentOutcome {
            source_key: raw_key.to_string(),
            ..Default::default()
        };
        let mut enriched = Vec::new();
        let mut rejected: Vec<RejectedRecord> = Vec::new();

        for record in decode_telemetry_records(&text) {
            let result = match record {
                Ok(event) => {
                    let value = serde_json::to_value(&event)?;
                    self.enricher.enrich(event).map_err(|e| (value, e))
                }
                Err(bad) => Err((bad.value, Error::InvalidRecord(bad.reason))),
            };
            match result {
                Ok(event) => enriched.push(event),
                Err((_, e)) if e.is_fatal() => return Err(e),
                Err((value, e)) => {
                    if self.policy == EnrichmentPolicy::FailBatch {
                        return Err(e);
                    }
                    warn!(key = raw_key, error = %e, "record dead-lettered");
                    rejected.push(RejectedRecord {
                        value,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !rejected.is_empty() {
            let key = partition.dead_letter_key(object_name(raw_key));
            let mut body = String::new();
            for bad in &rejected {
                body.push_str(&json!({ "reason": bad.reason, "record": bad.value }).to_string());
                body.push('\n');
            }
            self.store.put(&key, body.as_bytes())?;
            outcome.dead_lettered = rejected.len();
            outcome.dead_letter_key = Some(key);
        }

        if !enriched.is_empty() {
            let key = partition.enriched_key();
            self.store.put(&key, &write_enriched(&enriched)?)?;
            outcome.enriched = enriched.len();
            outcome.sentinel_postcodes = enriched.iter().filter(|e| e.is_sentinel_postcode()).count();
            outcome.output_key = Some(key);
        }

        info!(
            source = raw_key,
            output = outcome.output_key.as_deref().unwrap_or("-"),
            enriched = outcome.enriched,
            sentinel = outcome.sentinel_postcodes,
            dead_lettered = outcome.dead_lettered,
            "raw object enriched"
        );
        Ok(outcome)
    }

    /// Enrich every raw object under `prefix` (relative keys get `raw/` prepended)
    pub fn enrich_prefix(&self, prefix: &str) -> Result<Vec<EnrichmentOutcome>> {
        let prefix = if prefix.starts_with(RAW_PREFIX) {
            prefix.to_string()
        } else {
            format!("{RAW_PREFIX}{prefix}")
        };
        self.store
            .list(&prefix)?
            .iter()
            .map(|meta| self.enrich_object(&meta.key))
            .collect()
    }
}
