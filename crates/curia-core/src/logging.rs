//! Structured logging schema and field name constants for curia.
//!
//! All crates use these constants for consistent structured logging fields
//! so that log aggregation can query curation runs by the same keys across
//! the differ, the merge strategies, the controller and the ranker.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Worker-level faults, requires operator attention |
//! | WARN  | Per-document failure, batch continues |
//! | INFO  | Batch lifecycle, per-document completion |
//! | DEBUG | Merge decisions, convergence results, ranking picks |
//! | TRACE | Per-position iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "diff", "merge", "curation", "suggest", "db"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "diff", "decide", "curate", "select_best"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Project the curation batch belongs to.
pub const PROJECT: &str = "project";

/// Document being curated or ranked.
pub const DOCUMENT_ID: &str = "document_id";

/// Data owner (annotator, curator, recommender pseudo-owner).
pub const DATA_OWNER: &str = "data_owner";

/// Annotation layer.
pub const LAYER: &str = "layer";

/// Merge strategy name.
pub const STRATEGY: &str = "strategy";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of configuration sets produced by a diff.
pub const POSITION_COUNT: &str = "position_count";

/// Number of positions left contested after a merge.
pub const CONTESTED_COUNT: &str = "contested_count";

/// Number of merge decisions applied to the target set.
pub const APPLIED_COUNT: &str = "applied_count";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [&str; 11] = [
        SUBSYSTEM,
        OPERATION,
        PROJECT,
        DOCUMENT_ID,
        DATA_OWNER,
        LAYER,
        STRATEGY,
        DURATION_MS,
        POSITION_COUNT,
        CONTESTED_COUNT,
        APPLIED_COUNT,
    ];

    #[test]
    fn test_field_names_are_unique_identifiers() {
        let unique: HashSet<&str> = ALL.iter().copied().collect();
        assert_eq!(unique.len(), ALL.len());
        for name in ALL {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} must be usable as a tracing field identifier"
            );
        }
    }
}
