//! # curia-suggest
//!
//! Visibility filtering and active-learning ranking of recommender output.
//!
//! This crate provides:
//! - The visibility filter flagging suggestions that overlap committed
//!   annotations, were rejected or skipped, or belong to an older generation
//! - The suggestion ranker selecting the most uncertain visible candidate
//! - An active-learning session wiring recommenders and the learning history
//!   to the ranker

pub mod ranker;
pub mod session;
pub mod visibility;

// Re-export core types
pub use curia_core::*;

pub use ranker::{compute_deltas, deduplicate, RankingRequest, SuggestionRanker};
pub use session::ActiveLearningSession;
pub use visibility::{hide_rejected, hide_superseded, is_record_honored, VisibilityFilter};
