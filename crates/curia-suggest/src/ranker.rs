//! Active-learning suggestion ranker.
//!
//! The ranker is a pure function of its [`RankingRequest`]: it works on a
//! private copy of the recommender output, recomputes every visibility flag,
//! and returns the most uncertain visible candidate.
//!
//! ## Pipeline
//!
//! 1. Deduplicate identical candidates within each recommender generation
//! 2. Flag older recommender generations as superseded
//! 3. Flag candidates overlapping committed annotations
//! 4. Flag candidates matching rejected or honored skipped records
//! 5. Compute one [`Delta`] per scope over the visible candidates
//! 6. Select the smallest delta, ties broken by canonical scope order

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use curia_core::{
    Annotation, AnnotationSuggestion, Delta, LearningRecord, Position, SuggestionScope,
    UserAction, VisibilityFlags,
};

use crate::visibility::{hide_rejected, hide_superseded, is_record_honored, VisibilityFilter};

/// Inputs of one ranking pass.
#[derive(Debug, Clone, Default)]
pub struct RankingRequest {
    /// Raw recommender output, possibly spanning several generations.
    pub suggestions: Vec<AnnotationSuggestion>,
    /// Annotations already committed by the user.
    pub committed: Vec<Annotation>,
    /// Learning history of the user.
    pub records: Vec<LearningRecord>,
    /// Skip records strictly before this instant no longer hide suggestions.
    pub skip_cutoff: Option<DateTime<Utc>>,
}

impl RankingRequest {
    pub fn new(suggestions: Vec<AnnotationSuggestion>) -> Self {
        Self {
            suggestions,
            ..Default::default()
        }
    }

    pub fn with_committed(mut self, committed: Vec<Annotation>) -> Self {
        self.committed = committed;
        self
    }

    pub fn with_records(mut self, records: Vec<LearningRecord>) -> Self {
        self.records = records;
        self
    }

    pub fn with_skip_cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.skip_cutoff = Some(cutoff);
        self
    }
}

/// Identity of a candidate within one recommender generation.
type DedupKey = (
    String,
    u64,
    String,
    String,
    String,
    Option<Position>,
    Option<Position>,
    String,
);

fn dedup_key(s: &AnnotationSuggestion) -> DedupKey {
    (
        s.recommender_id.clone(),
        s.generation_id,
        s.document_id.clone(),
        s.layer.clone(),
        s.feature.clone(),
        s.position.clone(),
        s.secondary.clone(),
        s.label.clone(),
    )
}

/// Higher confidence first, then lower id.
fn prefer(a: &AnnotationSuggestion, b: &AnnotationSuggestion) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.id.cmp(&b.id))
}

/// Collapse candidates a recommender offered more than once.
///
/// The copy with the highest confidence survives; among equal confidences the
/// lowest id wins. The result is ordered by id.
pub fn deduplicate(suggestions: &[AnnotationSuggestion]) -> Vec<AnnotationSuggestion> {
    let mut best: BTreeMap<DedupKey, &AnnotationSuggestion> = BTreeMap::new();
    for suggestion in suggestions {
        best.entry(dedup_key(suggestion))
            .and_modify(|current| {
                if prefer(suggestion, current) == Ordering::Less {
                    *current = suggestion;
                }
            })
            .or_insert(suggestion);
    }
    let mut unique: Vec<AnnotationSuggestion> = best.into_values().cloned().collect();
    unique.sort_by_key(|s| s.id);
    unique
}

/// One delta per scope over the visible suggestions, in scope order.
///
/// Candidates for the same label from several recommenders collapse into the
/// most confident one. A scope with a single label is measured against an
/// implicit zero-confidence alternative.
pub fn compute_deltas(suggestions: &[AnnotationSuggestion]) -> Vec<Delta> {
    let mut scopes: BTreeMap<SuggestionScope, BTreeMap<&str, &AnnotationSuggestion>> =
        BTreeMap::new();
    for suggestion in suggestions.iter().filter(|s| s.is_visible()) {
        scopes
            .entry(suggestion.scope())
            .or_default()
            .entry(suggestion.label.as_str())
            .and_modify(|current| {
                if prefer(suggestion, current) == Ordering::Less {
                    *current = suggestion;
                }
            })
            .or_insert(suggestion);
    }

    scopes
        .into_iter()
        .filter_map(|(scope, labels)| {
            let mut candidates: Vec<&AnnotationSuggestion> = labels.into_values().collect();
            candidates.sort_by(|a, b| {
                b.confidence
                    .total_cmp(&a.confidence)
                    .then_with(|| a.label.cmp(&b.label))
            });
            let mut ranked = candidates.into_iter();
            let best = ranked.next()?.clone();
            let second = ranked.next().cloned();
            let delta = best.confidence - second.as_ref().map_or(0.0, |s| s.confidence);
            trace!(
                document_id = %scope.document_id,
                layer = %scope.layer,
                best = %best.label,
                delta,
                "Delta computed"
            );
            Some(Delta {
                scope,
                best,
                second,
                delta,
            })
        })
        .collect()
}

/// Ranks recommender output for active learning.
#[derive(Debug, Clone, Default)]
pub struct SuggestionRanker {
    filter: VisibilityFilter,
}

impl SuggestionRanker {
    pub fn new(filter: VisibilityFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &VisibilityFilter {
        &self.filter
    }

    /// Deduplicated suggestions with freshly computed visibility flags.
    pub fn evaluate(&self, request: &RankingRequest) -> Vec<AnnotationSuggestion> {
        let mut suggestions = deduplicate(&request.suggestions);
        hide_superseded(&mut suggestions);
        self.filter
            .hide_overlapping(&request.committed, &mut suggestions);
        hide_rejected(&request.records, request.skip_cutoff, &mut suggestions);
        suggestions
    }

    /// Suggestions that survive every visibility pass.
    pub fn visible(&self, request: &RankingRequest) -> Vec<AnnotationSuggestion> {
        self.evaluate(request)
            .into_iter()
            .filter(AnnotationSuggestion::is_visible)
            .collect()
    }

    /// Per-scope deltas over the visible suggestions.
    pub fn deltas(&self, request: &RankingRequest) -> Vec<Delta> {
        compute_deltas(&self.evaluate(request))
    }

    /// The most uncertain visible suggestion, or `None` when nothing is left
    /// to review.
    pub fn select_best_suggestion(&self, request: &RankingRequest) -> Option<Delta> {
        let start = Instant::now();
        let evaluated = self.evaluate(request);
        let visible = evaluated.iter().filter(|s| s.is_visible()).count();

        // Deltas arrive in scope order, so keeping the first strict minimum
        // breaks ties by the canonical order.
        let best = compute_deltas(&evaluated)
            .into_iter()
            .fold(None::<Delta>, |best, candidate| match best {
                Some(current) if candidate.delta.total_cmp(&current.delta) != Ordering::Less => {
                    Some(current)
                }
                _ => Some(candidate),
            });

        debug!(
            subsystem = "suggest",
            op = "select_best",
            suggestions = request.suggestions.len(),
            visible_count = visible,
            selected = best.as_ref().map(|d| d.best.id),
            delta = best.as_ref().map(|d| d.delta),
            duration_ms = start.elapsed().as_millis() as u64,
            "Suggestion ranking complete"
        );
        best
    }

    /// Whether any suggestion is currently hidden only because the user
    /// skipped it.
    ///
    /// Suggestions hidden for another reason (overlap, superseded, rejected)
    /// do not count.
    pub fn has_skipped_suggestion(&self, request: &RankingRequest) -> bool {
        let mut suggestions = deduplicate(&request.suggestions);
        hide_superseded(&mut suggestions);
        self.filter
            .hide_overlapping(&request.committed, &mut suggestions);

        let skips: Vec<&LearningRecord> = request
            .records
            .iter()
            .filter(|r| r.action == UserAction::Skipped && is_record_honored(r, request.skip_cutoff))
            .collect();
        let rejections: Vec<&LearningRecord> = request
            .records
            .iter()
            .filter(|r| r.action == UserAction::Rejected)
            .collect();

        suggestions
            .iter()
            .filter(|s| s.is_visible())
            .any(|s| {
                skips.iter().any(|r| s.matches_record(r))
                    && !rejections.iter().any(|r| s.matches_record(r))
            })
    }

    /// Whether a logged decision still refers to a candidate of the latest
    /// generation of some recommender.
    pub fn suggestion_exists_for_record(
        &self,
        suggestions: &[AnnotationSuggestion],
        record: &LearningRecord,
    ) -> bool {
        let mut current = suggestions.to_vec();
        hide_superseded(&mut current);
        current
            .iter()
            .filter(|s| !s.visibility.contains(VisibilityFlags::SUPERSEDED))
            .any(|s| s.matches_record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use curia_core::AutoAcceptMode;

    fn at(id: u64, begin: usize, end: usize, label: &str, confidence: f64) -> AnnotationSuggestion {
        AnnotationSuggestion {
            id,
            recommender_id: "rec".into(),
            generation_id: 1,
            document_id: "doc".into(),
            layer: "ner".into(),
            feature: "value".into(),
            position: Some(Position::new("doc", begin, end)),
            secondary: None,
            label: label.into(),
            confidence,
            visibility: VisibilityFlags::empty(),
            auto_accept: AutoAcceptMode::Never,
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_deduplicate_keeps_most_confident() {
        let suggestions = vec![
            at(3, 0, 5, "PER", 0.4),
            at(1, 0, 5, "PER", 0.8),
            at(2, 0, 5, "PER", 0.8),
            at(4, 0, 5, "ORG", 0.2),
        ];
        let unique = deduplicate(&suggestions);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].id, 1);
        assert_eq!(unique[1].id, 4);
    }

    #[test]
    fn test_deduplicate_keeps_other_recommenders() {
        let mut other = at(2, 0, 5, "PER", 0.3);
        other.recommender_id = "other".into();
        let unique = deduplicate(&[at(1, 0, 5, "PER", 0.8), other]);
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn test_delta_against_second_best() {
        let deltas = compute_deltas(&[at(1, 0, 5, "PER", 0.9), at(2, 0, 5, "ORG", 0.55)]);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].best_label(), "PER");
        assert_eq!(deltas[0].second_best_label(), Some("ORG"));
        assert!((deltas[0].delta - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_lone_suggestion_measured_against_zero() {
        let deltas = compute_deltas(&[at(1, 6, 9, "LOC", 0.51)]);
        assert_eq!(deltas[0].second_best_label(), None);
        assert!((deltas[0].delta - 0.51).abs() < 1e-9);
    }

    #[test]
    fn test_same_label_across_recommenders_collapses() {
        let mut other = at(2, 0, 5, "PER", 0.7);
        other.recommender_id = "other".into();
        let deltas = compute_deltas(&[at(1, 0, 5, "PER", 0.9), other]);
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].second.is_none());
        assert_eq!(deltas[0].best.id, 1);
    }

    #[test]
    fn test_hidden_suggestions_do_not_compete() {
        let mut hidden = at(2, 0, 5, "ORG", 0.85);
        hidden.hide(VisibilityFlags::OVERLAP);
        let deltas = compute_deltas(&[at(1, 0, 5, "PER", 0.9), hidden]);
        assert!((deltas[0].delta - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_select_smallest_delta() {
        let request = RankingRequest::new(vec![
            at(1, 0, 5, "PER", 0.9),
            at(2, 0, 5, "ORG", 0.55),
            at(3, 6, 9, "LOC", 0.51),
        ]);
        let best = SuggestionRanker::default()
            .select_best_suggestion(&request)
            .unwrap();
        assert_eq!(best.best.id, 1);

        let request = RankingRequest::new(vec![
            at(1, 0, 5, "PER", 0.9),
            at(2, 0, 5, "ORG", 0.55),
            at(3, 6, 9, "LOC", 0.2),
        ]);
        let best = SuggestionRanker::default()
            .select_best_suggestion(&request)
            .unwrap();
        assert_eq!(best.best.id, 3);
    }

    #[test]
    fn test_ties_break_by_canonical_position() {
        let request = RankingRequest::new(vec![at(1, 6, 9, "LOC", 0.4), at(2, 0, 5, "PER", 0.4)]);
        let best = SuggestionRanker::default()
            .select_best_suggestion(&request)
            .unwrap();
        assert_eq!(best.best.id, 2);
    }

    #[test]
    fn test_nothing_left_to_review() {
        let ranker = SuggestionRanker::default();
        assert!(ranker.select_best_suggestion(&RankingRequest::default()).is_none());

        let suggestion = at(1, 0, 5, "PER", 0.9);
        let record = LearningRecord::for_suggestion(&suggestion, "alice", UserAction::Rejected, ts());
        let request = RankingRequest::new(vec![suggestion]).with_records(vec![record]);
        assert!(ranker.select_best_suggestion(&request).is_none());
    }

    #[test]
    fn test_evaluate_does_not_touch_input() {
        let suggestion = at(1, 0, 5, "PER", 0.9);
        let record = LearningRecord::for_suggestion(&suggestion, "alice", UserAction::Rejected, ts());
        let request = RankingRequest::new(vec![suggestion]).with_records(vec![record]);
        let evaluated = SuggestionRanker::default().evaluate(&request);
        assert!(!evaluated[0].is_visible());
        assert!(request.suggestions[0].is_visible());
    }

    #[test]
    fn test_has_skipped_suggestion() {
        let ranker = SuggestionRanker::default();
        let skipped = at(1, 0, 5, "PER", 0.9);
        let rejected = at(2, 6, 9, "ORG", 0.9);
        let records = vec![
            LearningRecord::for_suggestion(&skipped, "alice", UserAction::Skipped, ts()),
            LearningRecord::for_suggestion(&rejected, "alice", UserAction::Rejected, ts()),
        ];

        let request = RankingRequest::new(vec![skipped.clone(), rejected.clone()])
            .with_records(records.clone());
        assert!(ranker.has_skipped_suggestion(&request));

        let request = RankingRequest::new(vec![rejected]).with_records(records.clone());
        assert!(!ranker.has_skipped_suggestion(&request));

        // A stale skip no longer hides anything.
        let request = RankingRequest::new(vec![skipped])
            .with_records(records)
            .with_skip_cutoff(ts() + chrono::Duration::seconds(1));
        assert!(!ranker.has_skipped_suggestion(&request));
    }

    #[test]
    fn test_suggestion_exists_for_record() {
        let ranker = SuggestionRanker::default();
        let old = at(1, 0, 5, "PER", 0.9);
        let mut new = at(2, 0, 5, "ORG", 0.9);
        new.generation_id = 2;

        let old_record = LearningRecord::for_suggestion(&old, "alice", UserAction::Accepted, ts());
        let new_record = LearningRecord::for_suggestion(&new, "alice", UserAction::Accepted, ts());
        let suggestions = vec![old, new];
        assert!(!ranker.suggestion_exists_for_record(&suggestions, &old_record));
        assert!(ranker.suggestion_exists_for_record(&suggestions, &new_record));
    }
}
