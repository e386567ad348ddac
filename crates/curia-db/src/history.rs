//! In-memory learning history.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use curia_core::{LearningHistoryPort, LearningRecord, Result};

/// Append-only [`LearningHistoryPort`] backed by a vector.
#[derive(Debug, Default)]
pub struct MemoryLearningHistory {
    records: RwLock<Vec<LearningRecord>>,
}

impl MemoryLearningHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<LearningRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Every record in append order.
    pub async fn records(&self) -> Vec<LearningRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl LearningHistoryPort for MemoryLearningHistory {
    async fn append_record(&self, record: LearningRecord) -> Result<()> {
        trace!(
            document_id = %record.document_id,
            layer = %record.layer,
            user = %record.user,
            action = ?record.action,
            "Learning record appended"
        );
        self.records.write().await.push(record);
        Ok(())
    }

    async fn list_records_for_document_user_layer(
        &self,
        document: &str,
        user: &str,
        layer: &str,
    ) -> Result<Vec<LearningRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.document_id == document && r.user == user && r.layer == layer)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use curia_core::{ChangeLocation, Span, UserAction};

    fn record(document: &str, user: &str, layer: &str) -> LearningRecord {
        LearningRecord {
            user: user.into(),
            document_id: document.into(),
            layer: layer.into(),
            feature: "value".into(),
            label: "PER".into(),
            span: Some(Span::new(0, 5)),
            secondary: None,
            action: UserAction::Rejected,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            change_location: ChangeLocation::MainEditor,
        }
    }

    #[tokio::test]
    async fn test_list_filters_by_document_user_layer() {
        let history = MemoryLearningHistory::new();
        history.append_record(record("doc", "alice", "ner")).await.unwrap();
        history.append_record(record("doc", "bob", "ner")).await.unwrap();
        history.append_record(record("doc", "alice", "pos")).await.unwrap();
        history.append_record(record("other", "alice", "ner")).await.unwrap();

        let records = history
            .list_records_for_document_user_layer("doc", "alice", "ner")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(history.len().await, 4);
    }
}
