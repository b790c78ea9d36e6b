//! Benchmark harness: registry, executor seam, scoring and run execution.

pub mod error;
pub mod executor;
pub mod registry;
pub mod runner;
pub mod scoring;

pub use error::{ExecutorError, HarnessError};
pub use executor::{parse_response, ExecutionOutput, Executor, HttpExecutor};
pub use registry::{BenchmarkCatalog, BenchmarkRegistry};
pub use runner::{BenchmarkHarness, HarnessConfig, RunHandle, RunRequest, RunSummary};
pub use scoring::{token_f1, Scorer, WeightedCriteriaScorer};
