// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod app;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod tagger;
pub mod translate;

pub use crate::api::router;
pub use crate::ingest::{IngestionPipeline, RunSummary};
pub use crate::store::{NewsQuery, Record, UpsertStore};
