//! Centralized default constants for curia.
//!
//! All crates and the CLI reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// IDENTITIES
// =============================================================================

/// Distinguished data owner that holds the curated annotation set.
pub const CURATION_USER: &str = "CURATION_USER";

/// Prefix for recommender-generated pseudo data owners.
pub const RECOMMENDER_OWNER_PREFIX: &str = "recommender:";

// =============================================================================
// ANNOTATIONS
// =============================================================================

/// Feature that carries the primary label of an annotation.
pub const LABEL_FEATURE: &str = "value";

// =============================================================================
// MERGE
// =============================================================================

/// Minimum number of agreeing data owners for the threshold strategy.
pub const MERGE_MIN_VOTES: usize = 2;

/// Minimum agreeing fraction for the threshold strategy (0.0 disables it).
pub const MERGE_MIN_CONFIDENCE: f64 = 0.0;

// =============================================================================
// WORKER
// =============================================================================

/// Default maximum number of project batches curated concurrently.
pub const CURATION_MAX_CONCURRENT_PROJECTS: usize = 4;

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;
