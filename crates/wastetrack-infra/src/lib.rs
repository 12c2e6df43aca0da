//! Infrastructure layer: geospatial index backends, the Parquet codec for
//! enriched records, wire codecs for queue bodies and raw objects, and the
//! reference CSV loader.

pub mod geo_index;
pub mod parquet_codec;
pub mod reference_csv;
pub mod wire;
