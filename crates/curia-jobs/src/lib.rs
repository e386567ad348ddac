//! # curia-jobs
//!
//! Bulk curation for curia.
//!
//! This crate provides:
//! - The curation controller (load, diff, merge, persist, re-diff, state)
//! - Exclusive per-(document, target owner) locks with scoped release
//! - Cooperative cancellation checked between documents
//! - A worker running several project batches concurrently
//!
//! ## Example
//!
//! ```rust,ignore
//! use curia_jobs::{CurationWorker, WorkerConfig};
//!
//! let worker = CurationWorker::new(store, WorkerConfig::from_env());
//! let batch = worker
//!     .batch("project-1", MergeStrategy::threshold(2))
//!     .with_documents(documents)
//!     .with_layers(adapters);
//! let handle = worker.submit(batch)?;
//! let report = handle.wait().await?;
//! println!("{}", report.summary());
//! ```

pub mod cancel;
pub mod controller;
pub mod lock;
pub mod worker;

// Re-export core types
pub use curia_core::*;

pub use cancel::CancellationFlag;
pub use controller::{BatchReport, CurationBatch, CurationController};
pub use lock::{CurationLockGuard, DocumentLocks};
pub use worker::{BatchHandle, CurationWorker, WorkerConfig};
