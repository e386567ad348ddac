//! # curia-diff
//!
//! Position-aware diffing and merging of annotation sets.
//!
//! This crate provides:
//! - Layer adapters defining structural equality per layer (span, chain)
//! - A position index grouping every owner's annotations by canonical position
//! - The differ, partitioning owners into configurations per position
//! - Merge strategies turning configuration sets into curation decisions
//!
//! ## Example
//!
//! ```ignore
//! use curia_diff::{diff, MergeStrategy, SpanLayerAdapter};
//!
//! let adapters: Vec<Arc<dyn LayerAdapter>> = vec![Arc::new(SpanLayerAdapter::new("ner"))];
//! let result = diff(&adapters, &sets_by_owner)?;
//! let decisions = MergeStrategy::threshold(2).decide(&result.sets, "CURATION_USER");
//! ```

pub mod differ;
pub mod layer;
pub mod merge;
pub mod position_index;

// Re-export core types
pub use curia_core::*;

pub use differ::{diff, Configuration, ConfigurationSet, Contribution, DiffResult};
pub use layer::{build_adapters, ChainLayerAdapter, LayerDefinition, SpanLayerAdapter};
pub use merge::{MergeDecision, MergeStrategy};
pub use position_index::{PositionIndex, PositionKey};
