//! Live generation: one tick at the current minute
//!
//! Readings go to a [`TelemetrySink`] one topic per truck. The default sink
//! buffers them and writes newline-delimited JSON into the raw area on flush,
//! one object per hour of readings.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use wastetrack_domain::model::TimeSlot;
use wastetrack_domain::repository::{ObjectStore, TelemetrySink};
use wastetrack_domain::service::{collection_topic, TruckSimulation};
use wastetrack_infra::wire::encode_json_lines;
use wastetrack_types::{Error, Result, TelemetryEvent};

use crate::layout::raw_key;

/// Sink writing buffered readings to raw storage, delivery-stream style
pub struct DeliveryStreamSink<'a> {
    store: &'a dyn ObjectStore,
    buffer: Mutex<Vec<TelemetryEvent>>,
}

impl<'a> DeliveryStreamSink<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }
}

fn event_time(event: &TelemetryEvent) -> Result<NaiveDateTime> {
    DateTime::<Utc>::from_timestamp_millis(event.timestamp)
        .map(|t| t.naive_utc())
        .ok_or_else(|| Error::InvalidRecord(format!("timestamp {} out of range", event.timestamp)))
}

impl TelemetrySink for DeliveryStreamSink<'_> {
    fn publish(&self, topic: &str, event: &TelemetryEvent) -> Result<()> {
        debug!(topic, truck_id = %event.truck_id, "reading buffered");
        self.buffer.lock().push(event.clone());
        Ok(())
    }

    /// Write one raw object per hour of buffered readings. A reading leaves
    /// the buffer only once its object is written; a failed write keeps it
    /// for the next flush.
    fn flush(&self) -> Result<()> {
        let mut buffer = self.buffer.lock();
        let mut done = vec![false; buffer.len()];
        let mut unreadable = None;
        let mut by_hour: BTreeMap<NaiveDateTime, Vec<(NaiveDateTime, usize)>> = BTreeMap::new();
        for (i, event) in buffer.iter().enumerate() {
            match event_time(event) {
                Ok(t) => {
                    let hour = t
                        .with_minute(0)
                        .and_then(|h| h.with_second(0))
                        .unwrap_or(t);
                    by_hour.entry(hour).or_default().push((t, i));
                }
                Err(e) => {
                    // Can never be keyed, so it is dropped rather than retried
                    warn!(truck_id = %event.truck_id, error = %e, "dropping unreadable reading");
                    done[i] = true;
                    unreadable.get_or_insert(e);
                }
            }
        }

        let mut outcome = Ok(());
        for entries in by_hour.values() {
            let Some(&(stamp, _)) = entries.first() else { continue };
            let batch: Vec<TelemetryEvent> = entries.iter().map(|&(_, i)| buffer[i].clone()).collect();
            let key = raw_key(stamp);
            if let Err(e) = encode_json_lines(&batch).and_then(|body| self.store.put(&key, body.as_bytes())) {
                warn!(key = %key, error = %e, "raw object not delivered, readings stay buffered");
                outcome = Err(e);
                break;
            }
            info!(key = %key, events = batch.len(), "raw object delivered");
            for &(_, i) in entries {
                done[i] = true;
            }
        }

        let mut position = 0;
        buffer.retain(|_| {
            let keep = !done[position];
            position += 1;
            keep
        });
        outcome?;
        unreadable.map_or(Ok(()), Err)
    }
}

/// Minute slot for a wall-clock time
pub fn slot_for(now: NaiveDateTime) -> TimeSlot {
    TimeSlot::new(
        now.with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now),
    )
}

/// Run one live tick at `now`. Outside the working window nothing is
/// generated and `Ok(0)` is returned.
pub fn run_live_tick<R: Rng>(
    simulation: &mut TruckSimulation<R>,
    now: NaiveDateTime,
    sink: &dyn TelemetrySink,
) -> Result<usize> {
    if !TimeSlot::in_work_day(now) {
        info!(now = %now, "outside the working day, nothing to collect");
        return Ok(0);
    }
    let slot = slot_for(now);
    let events = simulation.tick(&slot);
    for event in &events {
        sink.publish(&collection_topic(&event.truck_id), event)?;
    }
    sink.flush()?;
    info!(slot = %slot, events = events.len(), "live tick published");
    Ok(events.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wastetrack_domain::model::{City, FleetConfig};
    use wastetrack_infra::wire::decode_telemetry_records;
    use wastetrack_store::MemoryObjectStore;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    struct RecordingSink(Mutex<Vec<String>>);

    impl TelemetrySink for RecordingSink {
        fn publish(&self, topic: &str, _event: &TelemetryEvent) -> Result<()> {
            self.0.lock().push(topic.to_string());
            Ok(())
        }
    }

    fn fleet() -> FleetConfig {
        FleetConfig::single(City::builtin("dundee").unwrap(), 3)
    }

    #[test]
    fn test_live_tick_publishes_per_truck_topics() {
        let mut sim = TruckSimulation::with_seed(&fleet(), 1.0, 1).unwrap();
        let sink = RecordingSink(Mutex::new(Vec::new()));
        let n = run_live_tick(&mut sim, at("2020-06-01T12:30:45"), &sink).unwrap();
        assert_eq!(n, 3);
        assert_eq!(sink.0.lock()[0], "waste/household/dun0001/collection");
    }

    #[test]
    fn test_live_tick_outside_window() {
        let mut sim = TruckSimulation::with_seed(&fleet(), 1.0, 1).unwrap();
        let sink = RecordingSink(Mutex::new(Vec::new()));
        assert_eq!(run_live_tick(&mut sim, at("2020-06-01T23:59:10"), &sink).unwrap(), 0);
        assert_eq!(run_live_tick(&mut sim, at("2020-06-01T00:00:30"), &sink).unwrap(), 0);
        assert!(sink.0.lock().is_empty());
    }

    #[test]
    fn test_delivery_stream_sink_writes_raw_object() {
        let store = MemoryObjectStore::new();
        let sink = DeliveryStreamSink::new(&store);
        let mut sim = TruckSimulation::with_seed(&fleet(), 1.0, 1).unwrap();
        run_live_tick(&mut sim, at("2020-06-01T12:30:45"), &sink).unwrap();

        assert_eq!(sink.buffered(), 0);
        let keys = store.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with(
            "raw/2020/06/01/12/WasteCollectionDeliveryStream-1-2020-06-01-12-30-00-"
        ));
        let body = String::from_utf8(store.get(&keys[0]).unwrap()).unwrap();
        let records = decode_telemetry_records(&body);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.is_ok()));
    }

    /// Store whose `put` fails on the given call
    struct FailingPut {
        inner: MemoryObjectStore,
        fail_on: usize,
        puts: Mutex<usize>,
    }

    impl ObjectStore for FailingPut {
        fn put(&self, key: &str, data: &[u8]) -> Result<()> {
            let mut puts = self.puts.lock();
            *puts += 1;
            if *puts == self.fail_on {
                return Err(Error::Storage("bucket unavailable".into()));
            }
            self.inner.put(key, data)
        }
        fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
            self.inner.put_if_absent(key, data)
        }
        fn replace_if_matches(&self, key: &str, expected: &[u8], data: Option<&[u8]>) -> Result<bool> {
            self.inner.replace_if_matches(key, expected, data)
        }
        fn get(&self, key: &str) -> Result<Vec<u8>> {
            self.inner.get(key)
        }
        fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key)
        }
        fn list(&self, prefix: &str) -> Result<Vec<wastetrack_types::ObjectMeta>> {
            self.inner.list(prefix)
        }
    }

    fn reading(truck: &str, t: &str) -> TelemetryEvent {
        TelemetryEvent {
            timestamp: at(t).and_utc().timestamp_millis(),
            truck_id: truck.into(),
            lat: 56.46,
            lon: -2.97,
            load: 1.5,
        }
    }

    #[test]
    fn test_failed_write_keeps_readings_buffered() {
        let store = FailingPut {
            inner: MemoryObjectStore::new(),
            fail_on: 2,
            puts: Mutex::new(0),
        };
        let sink = DeliveryStreamSink::new(&store);
        sink.publish("t", &reading("dun0001", "2020-06-01T10:15:00")).unwrap();
        sink.publish("t", &reading("dun0002", "2020-06-01T11:15:00")).unwrap();
        sink.publish("t", &reading("dun0003", "2020-06-01T11:16:00")).unwrap();

        assert!(matches!(sink.flush(), Err(Error::Storage(_))));
        assert_eq!(store.inner.len(), 1);
        assert!(store.inner.keys()[0].starts_with("raw/2020/06/01/10/"));
        assert_eq!(sink.buffered(), 2);

        sink.flush().unwrap();
        assert_eq!(sink.buffered(), 0);
        let later = store.inner.list("raw/2020/06/01/11/").unwrap();
        assert_eq!(later.len(), 1);
        let body = String::from_utf8(store.inner.get(&later[0].key).unwrap()).unwrap();
        assert_eq!(decode_telemetry_records(&body).len(), 2);
    }

    #[test]
    fn test_unreadable_timestamp_does_not_cost_good_readings() {
        let store = MemoryObjectStore::new();
        let sink = DeliveryStreamSink::new(&store);
        sink.publish("t", &reading("dun0001", "2020-06-01T10:15:00")).unwrap();
        let mut broken = reading("dun0002", "2020-06-01T10:15:00");
        broken.timestamp = i64::MAX;
        sink.publish("t", &broken).unwrap();

        assert!(matches!(sink.flush(), Err(Error::InvalidRecord(_))));
        assert_eq!(sink.buffered(), 0);
        assert_eq!(store.len(), 1);
        let body = String::from_utf8(store.get(&store.keys()[0]).unwrap()).unwrap();
        assert!(body.contains("dun0001"));
        assert!(!body.contains("dun0002"));
    }

    #[test]
    fn test_slot_truncates_to_minute() {
        assert_eq!(slot_for(at("2020-06-01T12:30:45")).to_iso(), "2020-06-01T12:30:00");
    }
}
