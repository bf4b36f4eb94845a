//! Backup, restore and cross-engine import pipeline for the Stoner payment
//! system.
//!
//! The crate exports and imports the whole operational database: native
//! `pg_dump`/`psql` orchestration for text dumps, and a validated, batched,
//! single-transaction import for SQLite files. The HTTP surface in [`http`]
//! and the CLI in `main.rs` are thin shells over [`pipeline`].

pub mod artifact;
pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod import;
pub mod logging;
pub mod native;
pub mod pipeline;
pub mod security;
pub mod state;

pub use audit::{Actor, AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::PipelineConfig;
pub use db::{StoreEngine, TargetStore};
pub use error::{AppError, AppResult, FailurePhase, PipelineError};
pub use state::{OperationGuard, PipelineContext};

/// Install the process-wide tracing subscriber. Safe to call more than once.
pub fn init_logging() {
    logging::init();
}
