//! Telemetry batch messages → raw objects
//!
//! The object is keyed by the message's `timeslot` attribute. A message is
//! deleted only after its object is written, so a crash in between means the
//! batch is written twice rather than lost.

use serde::Serialize;
use tracing::{error, info, warn};

use wastetrack_domain::model::TimeSlot;
use wastetrack_domain::repository::{MessageQueue, ObjectStore};
use wastetrack_types::{Error, QueueMessage, Result, TIMESLOT_ATTRIBUTE};

use crate::layout::raw_key;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterReport {
    pub written: usize,
    /// Messages left on the queue for redelivery
    pub failed: usize,
    pub keys: Vec<String>,
}

/// Write one telemetry batch message as a raw object, returning its key
pub fn write_message(store: &dyn ObjectStore, message: &QueueMessage) -> Result<String> {
    let slot = message.attribute(TIMESLOT_ATTRIBUTE).ok_or_else(|| {
        Error::InvalidRecord(format!("telemetry batch without '{TIMESLOT_ATTRIBUTE}' attribute"))
    })?;
    let slot = TimeSlot::parse(slot)?;
    let key = raw_key(slot.current());
    store.put(&key, message.body.as_bytes())?;
    info!(key = %key, bytes = message.body.len(), "raw object written");
    Ok(key)
}

/// Drain the telemetry queue into raw storage
pub fn drain_to_raw(
    store: &dyn ObjectStore,
    queue: &dyn MessageQueue,
    receive_batch: usize,
) -> Result<WriterReport> {
    let mut report = WriterReport::default();
    loop {
        let received = queue.receive(receive_batch.max(1))?;
        if received.is_empty() {
            break;
        }
        for item in received {
            match write_message(store, &item.message) {
                Ok(key) => {
                    queue.delete(&item.receipt)?;
                    report.written += 1;
                    report.keys.push(key);
                }
                Err(e) if e.is_fatal() => {
                    error!(message_id = %item.message_id, error = %e, "raw write failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(message_id = %item.message_id, error = %e, "telemetry batch left on queue");
                    report.failed += 1;
                }
            }
        }
    }
    Ok(report)
}
