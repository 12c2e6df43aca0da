//! End-to-end runs of the pipeline over filesystem-backed stores

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use tempfile::tempdir;

use wastetrack_app::backfill::BackfillScheduler;
use wastetrack_app::cache_loader::warm_from_csv;
use wastetrack_app::compaction::Compactor;
use wastetrack_app::enrichment_job::{check_index_ready, EnrichmentJob, EnrichmentPolicy};
use wastetrack_app::historical_writer::drain_to_raw;
use wastetrack_app::retry::RetryPolicy;
use wastetrack_domain::model::{City, FleetConfig, TimeSlot};
use wastetrack_domain::repository::ObjectStore;
use wastetrack_domain::service::{SearchPolicy, TruckSimulation};
use wastetrack_infra::geo_index::MemoryGeoIndex;
use wastetrack_infra::parquet_codec::read_enriched;
use wastetrack_infra::wire::decode_telemetry_records;
use wastetrack_store::{LocalObjectStore, MemoryQueue, SpoolQueue};
use wastetrack_types::{Error, TIMESLOT_ATTRIBUTE};

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
}

fn glasgow(trucks: u32) -> FleetConfig {
    FleetConfig::single(City::builtin("glasgow").unwrap(), trucks)
}

#[test]
fn test_three_minute_backfill_end_to_end() {
    let dir = tempdir().unwrap();
    let store = LocalObjectStore::open(dir.path().join("bucket")).unwrap();
    let queue = SpoolQueue::open(dir.path().join("queue")).unwrap();

    let sim = TruckSimulation::with_seed(&glasgow(1), 1.0, 42).unwrap();
    let mut scheduler = BackfillScheduler::new(sim, &queue, RetryPolicy::immediate(3)).unwrap();
    let report = scheduler
        .run(at("2018-12-31T00:00:00"), at("2018-12-31T00:03:00"))
        .unwrap();
    assert_eq!(report.batches, 2);
    assert_eq!(queue.len().unwrap(), 2);

    let written = drain_to_raw(&store, &queue, 10).unwrap();
    assert_eq!(written.written, 2);
    assert!(queue.is_empty().unwrap());

    let raw = store.list("raw/").unwrap();
    assert_eq!(raw.len(), 2);
    let mut timestamps = Vec::new();
    for meta in &raw {
        let body = String::from_utf8(store.get(&meta.key).unwrap()).unwrap();
        let records = decode_telemetry_records(&body);
        assert_eq!(records.len(), 1);
        let event = records[0].as_ref().unwrap();
        assert_eq!(event.truck_id, "gla0001");
        assert!(City::builtin("glasgow").unwrap().bounds().contains(event.point()));
        timestamps.push(event.timestamp);
    }
    timestamps.sort();
    assert_eq!(timestamps, [1_546_214_460_000, 1_546_214_520_000]);

    // Warm a tiny index around the Glasgow box
    let refdata = dir.path().join("refdata");
    std::fs::create_dir_all(&refdata).unwrap();
    std::fs::write(
        refdata.join("postcodes.csv"),
        "postcode,latitude,longitude\nG1 1AA,55.8611,-4.2502\nG51 1AA,55.8530,-4.3300\n",
    )
    .unwrap();
    std::fs::write(
        refdata.join("outcodes.csv"),
        "outcode,latitude,longitude\nG1,55.8600,-4.2500\nG51,55.8520,-4.3310\n",
    )
    .unwrap();
    let index = MemoryGeoIndex::new();
    warm_from_csv(&index, &refdata.join("postcodes.csv"), None, 400).unwrap();
    warm_from_csv(&index, &refdata.join("outcodes.csv"), None, 400).unwrap();
    check_index_ready(&index, true).unwrap();

    let job = EnrichmentJob::new(
        &store,
        &index,
        SearchPolicy::default(),
        EnrichmentPolicy::Isolate,
    )
    .unwrap();
    let outcomes = job.enrich_prefix("2018/12/31/").unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.enriched == 1 && o.dead_lettered == 0));

    let processed = store.list("processed/2018/12/31/00/").unwrap();
    assert_eq!(processed.len(), 2);
    let rows = read_enriched(&Bytes::from(store.get(&processed[0].key).unwrap())).unwrap();
    assert!(rows[0].postcode == "G1 1AA" || rows[0].postcode == "G51 1AA");
    assert!(rows[0].postcode.starts_with(&rows[0].outcode));

    let compaction = Compactor::new(&store, std::time::Duration::from_secs(60))
        .compact_all(NaiveDate::from_ymd_opt(2019, 6, 1).unwrap())
        .unwrap();
    assert_eq!(compaction.compacted.len(), 1);
    assert_eq!(compaction.compacted[0].rows, 2);
    let processed = store.list("processed/").unwrap();
    assert_eq!(processed.len(), 1);
    assert!(processed[0].key.contains("/compacted-"));
    assert!(store.list("locks/").unwrap().is_empty());
}

#[test]
fn test_batch_count_matches_tick_count() {
    let begin = at("2019-01-01T00:00:00");
    let end = at("2019-01-02T00:00:00");
    let queue = MemoryQueue::new();
    let sim = TruckSimulation::with_seed(&glasgow(2), 0.5, 3).unwrap();
    let mut scheduler = BackfillScheduler::new(sim, &queue, RetryPolicy::immediate(1)).unwrap();
    let report = scheduler.run(begin, end).unwrap();

    assert_eq!(report.batches, TimeSlot::count_ticks(begin, end));
    assert_eq!(report.batches, 1439);
    assert_eq!(report.events, 2 * 1439);
    assert_eq!(queue.len(), 1439);
    assert_eq!(report.first_slot.as_deref(), Some("2019-01-01T00:01:00"));
    assert_eq!(report.last_slot.as_deref(), Some("2019-01-01T23:59:00"));
}

#[test]
fn test_batch_count_does_not_depend_on_seed() {
    let begin = at("2019-01-01T06:30:00");
    let end = at("2019-01-04T18:00:00");
    let expected = TimeSlot::count_ticks(begin, end);

    let mut counts = Vec::new();
    for seed in [1, 77] {
        let queue = MemoryQueue::new();
        let sim = TruckSimulation::with_seed(&glasgow(2), 0.5, seed).unwrap();
        let mut scheduler = BackfillScheduler::new(sim, &queue, RetryPolicy::immediate(1)).unwrap();
        let report = scheduler.run(begin, end).unwrap();
        assert_eq!(queue.len() as u64, report.batches);
        counts.push(report.batches);
    }
    assert_eq!(counts[0], counts[1]);
    assert_eq!(counts[0], expected);
    assert!(expected > 3 * 1400);
}

#[test]
fn test_batches_arrive_in_slot_order_across_midnight() {
    let queue = MemoryQueue::new();
    let sim = TruckSimulation::with_seed(&glasgow(1), 1.0, 9).unwrap();
    let mut scheduler = BackfillScheduler::new(sim, &queue, RetryPolicy::immediate(1)).unwrap();
    scheduler
        .run(at("2019-01-01T23:57:00"), at("2019-01-02T00:04:00"))
        .unwrap();
    let slots: Vec<String> = queue
        .messages()
        .iter()
        .map(|m| m.attribute(TIMESLOT_ATTRIBUTE).unwrap().to_string())
        .collect();
    assert_eq!(
        slots,
        [
            "2019-01-01T23:58:00",
            "2019-01-01T23:59:00",
            "2019-01-02T00:01:00",
            "2019-01-02T00:02:00",
            "2019-01-02T00:03:00",
        ]
    );
}

#[test]
fn test_delivery_failure_stops_backfill() {
    let queue = MemoryQueue::new();
    queue.inject_send_failures(2);
    let sim = TruckSimulation::with_seed(&glasgow(1), 1.0, 9).unwrap();
    let mut scheduler = BackfillScheduler::new(sim, &queue, RetryPolicy::immediate(2)).unwrap();
    let err = scheduler
        .run(at("2019-01-01T10:00:00"), at("2019-01-01T10:05:00"))
        .unwrap_err();
    assert!(matches!(err, Error::DeliveryFailed { attempts: 2, .. }));
    assert_eq!(queue.send_attempts(), 2);
}
