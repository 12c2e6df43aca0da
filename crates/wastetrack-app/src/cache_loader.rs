//! Loading reference codes into the geospatial index
//!
//! Two routes: reference CSVs are chunked into geocode batch messages and a
//! warmer consumes them, or a CSV is loaded straight into the index.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use wastetrack_domain::repository::{GeoIndex, MessageQueue};
use wastetrack_infra::reference_csv::{load_reference_codes, read_reference_codes};
use wastetrack_infra::wire::{decode_geocode_batch, encode_geocode_batch};
use wastetrack_types::{CodeKind, Error, GeoCode, QueueMessage, Result, CSV_ATTRIBUTE};

use crate::retry::{publish_with_retry, RetryPolicy};

/// Largest number of codes in one geocode batch message
pub const DEFAULT_GEOCODE_BATCH_SIZE: usize = 400;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueReport {
    pub messages: usize,
    pub codes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub outcodes: usize,
    pub postcodes: usize,
    /// Messages left on the queue because they could not be applied
    pub rejected: usize,
}

impl WarmReport {
    fn record(&mut self, kind: CodeKind, written: usize) {
        match kind {
            CodeKind::Outcode => self.outcodes += written,
            CodeKind::Postcode => self.postcodes += written,
        }
    }
}

/// Chunk codes into batch messages tagged with their reference file
pub fn geocode_batches(
    codes: &[GeoCode],
    kind: CodeKind,
    batch_size: usize,
) -> Result<Vec<QueueMessage>> {
    if batch_size == 0 {
        return Err(Error::InvalidInput("geocode batch size must be positive".into()));
    }
    codes
        .chunks(batch_size)
        .map(|chunk| {
            Ok(QueueMessage::new(encode_geocode_batch(chunk)?)
                .with_attribute(CSV_ATTRIBUTE, kind.reference_file()))
        })
        .collect()
}

/// Queue `outcodes.csv` then `postcodes.csv` from `reference_dir`
pub fn queue_geocodes(
    queue: &dyn MessageQueue,
    reference_dir: &Path,
    batch_size: usize,
    retry: &RetryPolicy,
) -> Result<QueueReport> {
    let mut report = QueueReport::default();
    for kind in CodeKind::ALL {
        let path = reference_dir.join(kind.reference_file());
        let file = std::fs::File::open(&path).map_err(|e| {
            Error::InvalidInput(format!("cannot open {}: {e}", path.display()))
        })?;
        let codes = read_reference_codes(file, kind)?;
        for (i, message) in geocode_batches(&codes, kind, batch_size)?
            .iter()
            .enumerate()
        {
            publish_with_retry(queue, message, retry)?;
            info!(file = kind.reference_file(), start = i * batch_size, "geocode batch queued");
            report.messages += 1;
        }
        report.codes += codes.len();
    }
    Ok(report)
}

/// Apply one geocode batch message to the index
pub fn warm_message(index: &dyn GeoIndex, message: &QueueMessage) -> Result<(CodeKind, usize)> {
    let csv = message
        .attribute(CSV_ATTRIBUTE)
        .ok_or_else(|| Error::InvalidRecord(format!("geocode batch without '{CSV_ATTRIBUTE}' attribute")))?;
    let kind = CodeKind::from_reference_file(csv)
        .ok_or_else(|| Error::InvalidRecord(format!("unknown reference file '{csv}'")))?;
    let codes = decode_geocode_batch(&message.body)?;
    let written = index.add_many(kind, &codes)?;
    Ok((kind, written))
}

/// Drain the geocode queue into the index.
///
/// A message is deleted once applied. Malformed messages are left on the
/// queue; index failures stop the drain.
pub fn warm_from_queue(
    index: &dyn GeoIndex,
    queue: &dyn MessageQueue,
    receive_batch: usize,
) -> Result<WarmReport> {
    let mut report = WarmReport::default();
    loop {
        let received = queue.receive(receive_batch.max(1))?;
        if received.is_empty() {
            break;
        }
        for item in received {
            match warm_message(index, &item.message) {
                Ok((kind, written)) => {
                    queue.delete(&item.receipt)?;
                    report.record(kind, written);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(message_id = %item.message_id, error = %e, "geocode batch rejected");
                    report.rejected += 1;
                }
            }
        }
    }
    info!(
        outcodes = report.outcodes,
        postcodes = report.postcodes,
        rejected = report.rejected,
        "geospatial index warmed from queue"
    );
    Ok(report)
}

/// Load a reference CSV directly into the index
pub fn warm_from_csv(
    index: &dyn GeoIndex,
    path: &Path,
    kind: Option<CodeKind>,
    batch_size: usize,
) -> Result<WarmReport> {
    let (kind, codes) = load_reference_codes(path, kind)?;
    let mut report = WarmReport::default();
    for chunk in codes.chunks(batch_size.max(1)) {
        report.record(kind, index.add_many(kind, chunk)?);
    }
    info!(file = %path.display(), kind = %kind, codes = codes.len(), "geospatial index warmed from file");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wastetrack_infra::geo_index::MemoryGeoIndex;
    use wastetrack_store::MemoryQueue;
    use wastetrack_types::GeoPoint;

    fn codes(n: usize) -> Vec<GeoCode> {
        (0..n)
            .map(|i| GeoCode::new(format!("G{i} 1AA"), 55.8 + i as f64 * 1e-4, -4.25))
            .collect()
    }

    #[test]
    fn test_batches_hold_at_most_batch_size() {
        let messages = geocode_batches(&codes(801), CodeKind::Postcode, 400).unwrap();
        assert_eq!(messages.len(), 3);
        let sizes: Vec<usize> = messages
            .iter()
            .map(|m| decode_geocode_batch(&m.body).unwrap().len())
            .collect();
        assert_eq!(sizes, [400, 400, 1]);
        assert_eq!(messages[0].attribute(CSV_ATTRIBUTE), Some("postcodes.csv"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(geocode_batches(&codes(1), CodeKind::Outcode, 0).is_err());
    }

    #[test]
    fn test_queue_then_warm() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("outcodes.csv"),
            "outcode,latitude,longitude\nG1,55.86,-4.25\nEH1,55.95,-3.19\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("postcodes.csv"),
            "postcode,latitude,longitude\nG1 1AA,55.861,-4.250\n",
        )
        .unwrap();

        let queue = MemoryQueue::new();
        let report = queue_geocodes(&queue, dir.path(), 1, &RetryPolicy::immediate(1)).unwrap();
        assert_eq!(report, QueueReport { messages: 3, codes: 3 });
        assert_eq!(queue.messages()[0].attribute(CSV_ATTRIBUTE), Some("outcodes.csv"));

        let index = MemoryGeoIndex::new();
        let warmed = warm_from_queue(&index, &queue, 10).unwrap();
        assert_eq!(warmed.outcodes, 2);
        assert_eq!(warmed.postcodes, 1);
        assert!(queue.is_empty());
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(
            index.lookup(CodeKind::Postcode, "G1 1AA").unwrap(),
            Some(GeoPoint::new(55.861, -4.25))
        );
    }

    #[test]
    fn test_malformed_message_stays_on_queue() {
        let queue = MemoryQueue::new();
        queue
            .send(&QueueMessage::new("[]").with_attribute(CSV_ATTRIBUTE, "towns.csv"))
            .unwrap();
        let index = MemoryGeoIndex::new();
        let report = warm_from_queue(&index, &queue, 10).unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(queue.in_flight(), 1);
    }

    #[test]
    fn test_warm_from_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("postcodes.csv");
        std::fs::write(&path, "postcode,latitude,longitude\nAB10 1AB,57.14,-2.10\nAB10 1AF,57.15,-2.09\n")
            .unwrap();
        let index = MemoryGeoIndex::new();
        let report = warm_from_csv(&index, &path, None, 400).unwrap();
        assert_eq!(report.postcodes, 2);
        assert_eq!(index.count(CodeKind::Postcode).unwrap(), 2);
    }
}
