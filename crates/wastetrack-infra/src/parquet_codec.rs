//! Parquet encoding of enriched telemetry
//!
//! One flat schema of 11 non-null columns, shared by per-file enrichment
//! output and compacted files. A compacted file also names the files it was
//! merged from in its key-value metadata.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{Array as _, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::format::KeyValue;

use wastetrack_types::{EnrichedEvent, Error, Result, TelemetryEvent};

fn enriched_schema_ref() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Int64, false),
        Field::new("truck_id", DataType::Utf8, false),
        Field::new("lat", DataType::Float64, false),
        Field::new("lon", DataType::Float64, false),
        Field::new("load", DataType::Float64, false),
        Field::new("postcode", DataType::Utf8, false),
        Field::new("postcode_lat", DataType::Float64, false),
        Field::new("postcode_lon", DataType::Float64, false),
        Field::new("outcode", DataType::Utf8, false),
        Field::new("outcode_lat", DataType::Float64, false),
        Field::new("outcode_lon", DataType::Float64, false),
    ]))
}

/// Schema of enriched Parquet files
#[must_use]
pub fn enriched_schema() -> Schema {
    (*enriched_schema_ref()).clone()
}

/// Metadata key listing the source keys of a compacted file (JSON array)
pub const MERGED_SOURCES_KEY: &str = "wastetrack.merged_sources";

fn writer_properties(extra: Vec<KeyValue>) -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some("wastetrack".to_string()),
    };
    let mut metadata = vec![created_by];
    metadata.extend(extra);
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(metadata))
        .build()
}

fn parquet_error(stage: &str, e: impl std::fmt::Display) -> Error {
    Error::Parquet(format!("{stage}: {e}"))
}

fn strings<'a>(rows: &'a [EnrichedEvent], f: impl Fn(&'a EnrichedEvent) -> &'a str) -> StringArray {
    StringArray::from(rows.iter().map(f).collect::<Vec<_>>())
}

fn floats(rows: &[EnrichedEvent], f: impl Fn(&EnrichedEvent) -> f64) -> Float64Array {
    Float64Array::from(rows.iter().map(f).collect::<Vec<_>>())
}

/// Encode enriched events as a single-row-group Parquet file
pub fn write_enriched(rows: &[EnrichedEvent]) -> Result<Bytes> {
    write_with_metadata(rows, Vec::new())
}

/// Encode a compacted file, recording the keys it replaces
pub fn write_compacted(rows: &[EnrichedEvent], sources: &[String]) -> Result<Bytes> {
    let entry = KeyValue {
        key: MERGED_SOURCES_KEY.to_string(),
        value: Some(serde_json::to_string(sources)?),
    };
    write_with_metadata(rows, vec![entry])
}

/// Keys a compacted file was merged from; empty for any other file
pub fn merged_sources(bytes: &Bytes) -> Result<Vec<String>> {
    let reader = SerializedFileReader::new(bytes.clone())
        .map_err(|e| parquet_error("parquet footer read failed", e))?;
    let entry = reader
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|kv| kv.iter().find(|k| k.key == MERGED_SOURCES_KEY))
        .and_then(|k| k.value.clone());
    match entry {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

fn write_with_metadata(rows: &[EnrichedEvent], extra: Vec<KeyValue>) -> Result<Bytes> {
    let schema = enriched_schema_ref();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(
                rows.iter().map(|r| r.event.timestamp).collect::<Vec<_>>(),
            )),
            Arc::new(strings(rows, |r| r.event.truck_id.as_str())),
            Arc::new(floats(rows, |r| r.event.lat)),
            Arc::new(floats(rows, |r| r.event.lon)),
            Arc::new(floats(rows, |r| r.event.load)),
            Arc::new(strings(rows, |r| r.postcode.as_str())),
            Arc::new(floats(rows, |r| r.postcode_lat)),
            Arc::new(floats(rows, |r| r.postcode_lon)),
            Arc::new(strings(rows, |r| r.outcode.as_str())),
            Arc::new(floats(rows, |r| r.outcode_lat)),
            Arc::new(floats(rows, |r| r.outcode_lon)),
        ],
    )
    .map_err(|e| parquet_error("record batch build failed", e))?;

    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer = ArrowWriter::try_new(&mut cursor, schema, Some(writer_properties(extra)))
        .map_err(|e| parquet_error("parquet writer init failed", e))?;
    writer
        .write(&batch)
        .map_err(|e| parquet_error("parquet write failed", e))?;
    writer
        .close()
        .map_err(|e| parquet_error("parquet close failed", e))?;
    Ok(Bytes::from(cursor.into_inner()))
}

fn read_batches(bytes: &Bytes) -> Result<Vec<RecordBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
        .map_err(|e| parquet_error("parquet reader init failed", e))?
        .build()
        .map_err(|e| parquet_error("parquet reader build failed", e))?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch.map_err(|e| parquet_error("parquet read batch failed", e))?);
    }
    Ok(batches)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|e| parquet_error(&format!("missing column '{name}'"), e))?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Parquet(format!("column '{name}' has an unexpected type")))
}

/// Decode a file written by [`write_enriched`]
pub fn read_enriched(bytes: &Bytes) -> Result<Vec<EnrichedEvent>> {
    let mut out = Vec::new();
    for batch in read_batches(bytes)? {
        let timestamp = column::<Int64Array>(&batch, "timestamp")?;
        let truck_id = column::<StringArray>(&batch, "truck_id")?;
        let lat = column::<Float64Array>(&batch, "lat")?;
        let lon = column::<Float64Array>(&batch, "lon")?;
        let load = column::<Float64Array>(&batch, "load")?;
        let postcode = column::<StringArray>(&batch, "postcode")?;
        let postcode_lat = column::<Float64Array>(&batch, "postcode_lat")?;
        let postcode_lon = column::<Float64Array>(&batch, "postcode_lon")?;
        let outcode = column::<StringArray>(&batch, "outcode")?;
        let outcode_lat = column::<Float64Array>(&batch, "outcode_lat")?;
        let outcode_lon = column::<Float64Array>(&batch, "outcode_lon")?;

        for row in 0..batch.num_rows() {
            out.push(EnrichedEvent {
                event: TelemetryEvent {
                    timestamp: timestamp.value(row),
                    truck_id: truck_id.value(row).to_string(),
                    lat: lat.value(row),
                    lon: lon.value(row),
                    load: load.value(row),
                },
                postcode: postcode.value(row).to_string(),
                postcode_lat: postcode_lat.value(row),
                postcode_lon: postcode_lon.value(row),
                outcode: outcode.value(row).to_string(),
                outcode_lat: outcode_lat.value(row),
                outcode_lon: outcode_lon.value(row),
            });
        }
    }
    Ok(out)
}
