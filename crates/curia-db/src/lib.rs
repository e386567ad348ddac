//! # curia-db
//!
//! Reference backends for curia's ports.
//!
//! This crate provides:
//! - An in-memory [`DocumentStore`] with document and annotation set states
//! - An append-only in-memory learning history
//! - A recommender serving precomputed suggestion generations
//! - JSON project snapshots seeding and capturing those backends
//! - A failure-injecting store wrapper for isolation tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use curia_db::{MemoryDocumentStore, ProjectSnapshot};
//!
//! let snapshot = ProjectSnapshot::load("project.json").await?;
//! let store = MemoryDocumentStore::from_snapshot(&snapshot);
//! ```

pub mod failing;
pub mod history;
pub mod recommender;
pub mod snapshot;
pub mod store;

// Re-export core types
pub use curia_core::*;

pub use failing::FailingDocumentStore;
pub use history::MemoryLearningHistory;
pub use recommender::StaticRecommender;
pub use snapshot::{DocumentSnapshot, ProjectSnapshot};
pub use store::MemoryDocumentStore;
