//! Storage backends: object storage and at-least-once queues, each with a
//! local-filesystem and an in-memory implementation.

pub mod object_store;
pub mod queue;

pub use object_store::{LocalObjectStore, MemoryObjectStore};
pub use queue::{MemoryQueue, SpoolQueue};
