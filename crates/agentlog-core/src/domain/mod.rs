//! Domain models for agentlog.
//!
//! Canonical definitions for the ingestion and benchmark entities:
//! - `RawEvent` / `normalize`: producer input and its validated form
//! - `Sanitizer`: secret redaction and truncation policy
//! - `BenchmarkTaskCase` / `BenchmarkConfiguration`: benchmark definitions

pub mod benchmark;
pub mod error;
pub mod event;
pub mod sanitize;

pub use benchmark::{BenchmarkConfiguration, BenchmarkTaskCase, TaskType, WEIGHT_TOLERANCE};
pub use error::{CoreError, Result, ValidationError};
pub use event::{normalize, RawEvent};
pub use sanitize::{RedactionRule, Sanitizer, SanitizerConfig};
