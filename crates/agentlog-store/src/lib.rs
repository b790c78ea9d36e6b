//! agentlog-store: event and benchmark persistence for agentlog
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: atomic appends, indexed time-range queries, and benchmark result
//! integrity.
//!
//! ## Key Components
//!
//! - `EventStore` / `EventReader`: append-only, indexed event storage
//! - `BenchmarkStore`: benchmark runs and their per-work-item results
//! - `MemoryEventStore` / `MemoryBenchmarkStore`: in-process backends
//! - `SurrealHandle`: SurrealDB connection that hands out durable backends

mod error;
mod handle;
pub mod memory;
mod migrations;
pub mod records;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use handle::{StoreConfig, SurrealHandle};
pub use memory::{MemoryBenchmarkStore, MemoryEventStore};
pub use records::{
    BenchmarkResult, BenchmarkRunRecord, BenchmarkRunStatus, Event, EventId, EventType, LogLevel,
    Payload, RunId,
};
pub use storage_traits::{
    query_stream, BenchmarkStore, Cursor, EventFilter, EventPage, EventReader, EventStore,
    RunPins, StorageResult, TimelineKey, DEFAULT_STREAM_PAGE,
};
pub use surreal_store::{SurrealBenchmarkStore, SurrealEventStore};
