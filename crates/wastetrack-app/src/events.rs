//! Pipeline trigger events
//!
//! Incoming JSON triggers are resolved once into a [`PipelineEvent`] and then
//! handled by an exhaustive match. Accepted shapes:
//!
//! - `{"detail-type": "Scheduled Event", "source": "aws.events"}`: live tick
//! - `{"historical-process": true, "timeslot"?, "endtime"?, "weighting"?}`: backfill
//! - `{"Records": [{"eventSource": "aws:s3", "s3": {"object": {"key"}}}]}`: enrich
//! - `{"Records": [{"eventSource": "aws:sqs", "body", "messageAttributes"}]}`:
//!   telemetry batch (`timeslot` attribute) or geocode batch (`csv` attribute)
//! - `{"compaction-sweep": true}`: compaction

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use wastetrack_domain::repository::{GeoIndex, MessageQueue, ObjectStore};
use wastetrack_domain::service::TruckSimulation;
use wastetrack_types::{
    CodeKind, Error, QueueMessage, Result, CSV_ATTRIBUTE, TIMESLOT_ATTRIBUTE, TIMESLOT_FORMAT,
};

use crate::backfill::{BackfillReport, BackfillScheduler};
use crate::cache_loader::warm_message;
use crate::compaction::{CompactionReport, Compactor};
use crate::config::Config;
use crate::enrichment_job::{check_index_ready, EnrichmentJob, EnrichmentOutcome};
use crate::historical_writer::write_message;
use crate::live::{run_live_tick, DeliveryStreamSink};

/// Backfill start used when a historical request names none
pub const DEFAULT_HISTORICAL_BEGIN: &str = "2018-12-31T00:00:00";

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    ScheduledTick,
    HistoricalRequest {
        begin: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        weighting: Option<f64>,
    },
    ObjectCreated {
        bucket: Option<String>,
        key: String,
    },
    TelemetryBatch(QueueMessage),
    GeocodeBatch(QueueMessage),
    CompactionSweep,
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidInput(msg.into())
}

fn parse_time(value: &Value, field: &str) -> Result<Option<NaiveDateTime>> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => NaiveDateTime::parse_from_str(s, TIMESLOT_FORMAT)
            .map(Some)
            .map_err(|e| invalid(format!("invalid '{field}' value '{s}': {e}"))),
        Some(other) => Err(invalid(format!("'{field}' must be a string, got {other}"))),
    }
}

fn string_at<'v>(value: &'v Value, pointer: &str) -> Option<&'v str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn parse_record(record: &Value) -> Result<PipelineEvent> {
    match record.get("eventSource").and_then(Value::as_str) {
        Some("aws:s3") => {
            let key = string_at(record, "/s3/object/key")
                .ok_or_else(|| invalid("object notification without s3.object.key"))?;
            Ok(PipelineEvent::ObjectCreated {
                bucket: string_at(record, "/s3/bucket/name").map(str::to_string),
                key: key.to_string(),
            })
        }
        Some("aws:sqs") => {
            let body = record
                .get("body")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("queue record without a body"))?;
            let mut message = QueueMessage::new(body);
            if let Some(Value::Object(attributes)) = record.get("messageAttributes") {
                for (name, attr) in attributes {
                    let value = attr
                        .get("stringValue")
                        .and_then(Value::as_str)
                        .or_else(|| attr.as_str());
                    if let Some(value) = value {
                        message = message.with_attribute(name.as_str(), value);
                    }
                }
            }
            if message.attribute(TIMESLOT_ATTRIBUTE).is_some() {
                Ok(PipelineEvent::TelemetryBatch(message))
            } else if message.attribute(CSV_ATTRIBUTE).is_some() {
                Ok(PipelineEvent::GeocodeBatch(message))
            } else {
                Err(invalid(format!(
                    "queue record has neither '{TIMESLOT_ATTRIBUTE}' nor '{CSV_ATTRIBUTE}' attribute"
                )))
            }
        }
        Some(other) => Err(invalid(format!("unsupported event source '{other}'"))),
        None => Err(invalid("record without eventSource")),
    }
}

impl PipelineEvent {
    /// Resolve a JSON trigger. A `Records` envelope yields one event per record.
    pub fn parse_all(json: &str) -> Result<Vec<Self>> {
        let value: Value = serde_json::from_str(json)?;

        if let Some(records) = value.get("Records") {
            let records = records
                .as_array()
                .ok_or_else(|| invalid("'Records' must be an array"))?;
            if records.is_empty() {
                return Err(invalid("'Records' is empty"));
            }
            return records.iter().map(parse_record).collect();
        }

        if let Some(flag) = value.get("historical-process") {
            if flag.as_bool() != Some(true) {
                return Err(invalid("'historical-process' must be true"));
            }
            let weighting = match value.get("weighting") {
                None | Some(Value::Null) => None,
                Some(w) => Some(
                    w.as_f64()
                        .ok_or_else(|| invalid(format!("'weighting' must be a number, got {w}")))?,
                ),
            };
            return Ok(vec![PipelineEvent::HistoricalRequest {
                begin: parse_time(&value, "timeslot")?,
                end: parse_time(&value, "endtime")?,
                weighting,
            }]);
        }

        if value.get("compaction-sweep").and_then(Value::as_bool) == Some(true) {
            return Ok(vec![PipelineEvent::CompactionSweep]);
        }

        if string_at(&value, "/detail-type") == Some("Scheduled Event")
            && string_at(&value, "/source") == Some("aws.events")
        {
            return Ok(vec![PipelineEvent::ScheduledTick]);
        }

        Err(invalid("unrecognised pipeline event"))
    }

    /// Whether handling this event touches the geospatial index
    pub fn needs_index(&self) -> bool {
        matches!(
            self,
            PipelineEvent::ObjectCreated { .. } | PipelineEvent::GeocodeBatch(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::ScheduledTick => "scheduled-tick",
            PipelineEvent::HistoricalRequest { .. } => "historical-request",
            PipelineEvent::ObjectCreated { .. } => "object-created",
            PipelineEvent::TelemetryBatch(_) => "telemetry-batch",
            PipelineEvent::GeocodeBatch(_) => "geocode-batch",
            PipelineEvent::CompactionSweep => "compaction-sweep",
        }
    }
}

/// Everything a handler may need
pub struct PipelineContext<'a> {
    pub config: &'a Config,
    pub store: &'a dyn ObjectStore,
    pub telemetry_queue: &'a dyn MessageQueue,
    pub index: Option<&'a dyn GeoIndex>,
    /// Wall-clock time (UTC) the event is handled at
    pub now: NaiveDateTime,
}

impl<'a> PipelineContext<'a> {
    fn index(&self) -> Result<&'a dyn GeoIndex> {
        self.index
            .ok_or_else(|| Error::IndexUnavailable("no geospatial index connected".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum DispatchOutcome {
    Live { events: usize },
    Backfill(BackfillReport),
    Enriched(EnrichmentOutcome),
    RawWritten { key: String },
    Warmed { kind: CodeKind, codes: usize },
    Compacted(CompactionReport),
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Live { events } => write!(f, "live tick published {events} reading(s)"),
            DispatchOutcome::Backfill(r) => {
                write!(f, "backfill published {} batch(es), {} reading(s)", r.batches, r.events)
            }
            DispatchOutcome::Enriched(o) => write!(
                f,
                "enriched {} record(s) from {} ({} dead-lettered)",
                o.enriched, o.source_key, o.dead_lettered
            ),
            DispatchOutcome::RawWritten { key } => write!(f, "raw object written to {key}"),
            DispatchOutcome::Warmed { kind, codes } => write!(f, "loaded {codes} {kind}(s)"),
            DispatchOutcome::Compacted(r) => write!(
                f,
                "compacted {} partition(s), skipped {} for today, {} leased, {} unchanged",
                r.compacted.len(),
                r.skipped_today,
                r.skipped_leased,
                r.skipped_unchanged
            ),
        }
    }
}

/// Handle one event
pub fn dispatch(event: PipelineEvent, ctx: &PipelineContext<'_>) -> Result<DispatchOutcome> {
    info!(event = event.name(), "dispatching pipeline event");
    let config = ctx.config;
    match event {
        PipelineEvent::ScheduledTick => {
            let mut simulation = TruckSimulation::new(&config.fleet()?, config.weighting)?;
            let sink = DeliveryStreamSink::new(ctx.store);
            let events = run_live_tick(&mut simulation, ctx.now, &sink)?;
            Ok(DispatchOutcome::Live { events })
        }
        PipelineEvent::HistoricalRequest {
            begin,
            end,
            weighting,
        } => {
            let begin = match begin {
                Some(begin) => begin,
                None => NaiveDateTime::parse_from_str(DEFAULT_HISTORICAL_BEGIN, TIMESLOT_FORMAT)
                    .map_err(|e| invalid(e.to_string()))?,
            };
            let end = end.unwrap_or_else(|| ctx.now.with_nanosecond(0).unwrap_or(ctx.now));
            let simulation =
                TruckSimulation::new(&config.fleet()?, weighting.unwrap_or(config.weighting))?;
            let mut scheduler =
                BackfillScheduler::new(simulation, ctx.telemetry_queue, config.retry)?;
            Ok(DispatchOutcome::Backfill(scheduler.run(begin, end)?))
        }
        PipelineEvent::ObjectCreated { bucket, key } => {
            if let Some(bucket) = bucket {
                info!(%bucket, %key, "object notification");
            }
            let index = ctx.index()?;
            check_index_ready(index, config.require_warm_index)?;
            let job = EnrichmentJob::new(ctx.store, index, config.search, config.enrichment_policy)?;
            Ok(DispatchOutcome::Enriched(job.enrich_object(&key)?))
        }
        PipelineEvent::TelemetryBatch(message) => Ok(DispatchOutcome::RawWritten {
            key: write_message(ctx.store, &message)?,
        }),
        PipelineEvent::GeocodeBatch(message) => {
            let (kind, codes) = warm_message(ctx.index()?, &message)?;
            Ok(DispatchOutcome::Warmed { kind, codes })
        }
        PipelineEvent::CompactionSweep => {
            let compactor = Compactor::new(ctx.store, config.lease_ttl());
            Ok(DispatchOutcome::Compacted(compactor.compact_all(ctx.now.date())?))
        }
    }
}
