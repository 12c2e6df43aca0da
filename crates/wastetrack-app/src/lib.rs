//! Application service layer - config, logging, pipeline use cases

pub mod backfill;
pub mod cache_loader;
pub mod compaction;
pub mod config;
pub mod enrichment_job;
pub mod events;
pub mod historical_writer;
pub mod layout;
pub mod lease;
pub mod live;
pub mod observability;
pub mod repository;
pub mod retry;
