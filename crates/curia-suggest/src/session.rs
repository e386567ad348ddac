//! Active-learning session for one user.
//!
//! Gathers candidates from every recommender and the user's learning
//! history, hands them to the [`SuggestionRanker`], and appends the user's
//! decisions back to the history. The session holds no mutable shared state;
//! concurrent sessions for different documents or users need no locking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tracing::{debug, info};

use curia_core::{
    Annotation, AnnotationSuggestion, Delta, LearningHistoryPort, LearningRecord,
    RecommenderPort, Result, UserAction,
};

use crate::ranker::{RankingRequest, SuggestionRanker};

/// Active-learning loop bound to one user.
pub struct ActiveLearningSession {
    user: String,
    recommenders: Vec<Arc<dyn RecommenderPort>>,
    history: Arc<dyn LearningHistoryPort>,
    ranker: SuggestionRanker,
    skip_cutoff: Option<DateTime<Utc>>,
}

impl ActiveLearningSession {
    pub fn new(user: impl Into<String>, history: Arc<dyn LearningHistoryPort>) -> Self {
        Self {
            user: user.into(),
            recommenders: Vec::new(),
            history,
            ranker: SuggestionRanker::default(),
            skip_cutoff: None,
        }
    }

    pub fn with_recommender(mut self, recommender: Arc<dyn RecommenderPort>) -> Self {
        self.recommenders.push(recommender);
        self
    }

    pub fn with_ranker(mut self, ranker: SuggestionRanker) -> Self {
        self.ranker = ranker;
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn skip_cutoff(&self) -> Option<DateTime<Utc>> {
        self.skip_cutoff
    }

    /// Show skipped suggestions again: skip records strictly before `at` stop
    /// hiding their suggestions.
    pub fn resume_skipped(&mut self, at: DateTime<Utc>) {
        info!(subsystem = "suggest", user = %self.user, cutoff = %at, "Resuming skipped suggestions");
        self.skip_cutoff = Some(at);
    }

    async fn request(
        &self,
        document: &str,
        layer: &str,
        committed: &[Annotation],
    ) -> Result<RankingRequest> {
        let outputs = try_join_all(
            self.recommenders
                .iter()
                .map(|r| r.get_candidate_suggestions(document, layer)),
        )
        .await?;
        let records = self
            .history
            .list_records_for_document_user_layer(document, &self.user, layer)
            .await?;

        let mut request = RankingRequest::new(outputs.into_iter().flatten().collect())
            .with_committed(committed.to_vec())
            .with_records(records);
        request.skip_cutoff = self.skip_cutoff;
        Ok(request)
    }

    /// The next suggestion to present on `layer` of `document`.
    pub async fn next_suggestion(
        &self,
        document: &str,
        layer: &str,
        committed: &[Annotation],
    ) -> Result<Option<Delta>> {
        let request = self.request(document, layer, committed).await?;
        let best = self.ranker.select_best_suggestion(&request);
        debug!(
            subsystem = "suggest",
            document_id = %document,
            layer = %layer,
            user = %self.user,
            found = best.is_some(),
            "Next suggestion"
        );
        Ok(best)
    }

    /// Whether anything on `layer` of `document` is hidden only by a skip.
    pub async fn has_skipped_suggestion(
        &self,
        document: &str,
        layer: &str,
        committed: &[Annotation],
    ) -> Result<bool> {
        let request = self.request(document, layer, committed).await?;
        Ok(self.ranker.has_skipped_suggestion(&request))
    }

    /// Append the user's decision on `suggestion` to the learning history.
    pub async fn record_decision(
        &self,
        suggestion: &AnnotationSuggestion,
        action: UserAction,
        timestamp: DateTime<Utc>,
    ) -> Result<LearningRecord> {
        let record = LearningRecord::for_suggestion(suggestion, self.user.as_str(), action, timestamp);
        self.history.append_record(record.clone()).await?;
        debug!(
            subsystem = "suggest",
            document_id = %suggestion.document_id,
            layer = %suggestion.layer,
            user = %self.user,
            action = ?action,
            "Decision recorded"
        );
        Ok(record)
    }
}
