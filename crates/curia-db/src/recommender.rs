//! Recommender serving precomputed suggestions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use curia_core::{AnnotationSuggestion, RecommenderPort, Result, VisibilityFlags};

/// [`RecommenderPort`] returning suggestions published to it.
///
/// Every [`publish`](StaticRecommender::publish) starts a new generation.
/// Older generations are kept and returned as well, the way a recommender
/// backend would until it garbage-collects them.
#[derive(Debug)]
pub struct StaticRecommender {
    id: String,
    suggestions: RwLock<Vec<AnnotationSuggestion>>,
}

impl StaticRecommender {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            suggestions: RwLock::new(Vec::new()),
        }
    }

    /// Recommender serving suggestions as they are, generations included.
    pub fn with_suggestions(id: impl Into<String>, suggestions: Vec<AnnotationSuggestion>) -> Self {
        Self {
            id: id.into(),
            suggestions: RwLock::new(suggestions),
        }
    }

    /// One recommender per distinct `recommender_id`, ordered by id.
    pub fn group(suggestions: &[AnnotationSuggestion]) -> Vec<StaticRecommender> {
        let mut by_id: BTreeMap<&str, Vec<AnnotationSuggestion>> = BTreeMap::new();
        for suggestion in suggestions {
            by_id
                .entry(suggestion.recommender_id.as_str())
                .or_default()
                .push(suggestion.clone());
        }
        by_id
            .into_iter()
            .map(|(id, suggestions)| StaticRecommender::with_suggestions(id, suggestions))
            .collect()
    }

    /// Publish a new generation and return its id.
    ///
    /// Recommender id and generation are overwritten; visibility flags are
    /// cleared.
    pub async fn publish(&self, mut generation: Vec<AnnotationSuggestion>) -> u64 {
        let mut suggestions = self.suggestions.write().await;
        let generation_id = suggestions
            .iter()
            .map(|s| s.generation_id)
            .max()
            .unwrap_or(0)
            + 1;
        for suggestion in &mut generation {
            suggestion.recommender_id = self.id.clone();
            suggestion.generation_id = generation_id;
            suggestion.visibility = VisibilityFlags::empty();
        }
        debug!(
            subsystem = "db",
            recommender = %self.id,
            generation_id,
            suggestions = generation.len(),
            "Recommender generation published"
        );
        suggestions.extend(generation);
        generation_id
    }
}

#[async_trait]
impl RecommenderPort for StaticRecommender {
    fn recommender_id(&self) -> &str {
        &self.id
    }

    async fn get_candidate_suggestions(
        &self,
        document: &str,
        layer: &str,
    ) -> Result<Vec<AnnotationSuggestion>> {
        Ok(self
            .suggestions
            .read()
            .await
            .iter()
            .filter(|s| s.document_id == document && s.layer == layer)
            .cloned()
            .collect())
    }
}
