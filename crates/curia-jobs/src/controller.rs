//! Bulk curation controller.
//!
//! Curates documents one after another for a single target owner:
//!
//! 1. Lock (document, target owner)
//! 2. Load every curatable owner's set and the target's set
//! 3. Diff the curatable sets and let the merge strategy decide
//! 4. Write every decided configuration into the target set and persist it
//! 5. Reload the target and diff again, this time including the target, to
//!    verify that every position is curated
//! 6. Record document and target set states
//!
//! Only precondition violations abort a batch. Every per-document failure is
//! reported through the [`ProgressSink`] and becomes a failed outcome.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use curia_core::{
    Annotation, AnnotationSetState, CurationOutcome, CurationStatus, DataOwner, DocumentId,
    DocumentState, DocumentStore, Error, LayerAdapter, LogLevel, Position, ProgressSink, Result,
    SourceAnnotationSet, TracingProgressSink,
};
use curia_diff::{diff, ConfigurationSet, MergeDecision, MergeStrategy};

use crate::cancel::CancellationFlag;
use crate::lock::DocumentLocks;

// =============================================================================
// BATCH DEFINITION
// =============================================================================

/// One project's curation run.
#[derive(Clone)]
pub struct CurationBatch {
    pub project: String,
    pub documents: Vec<DocumentId>,
    pub target_owner: DataOwner,
    pub strategy: MergeStrategy,
    pub layers: Vec<Arc<dyn LayerAdapter>>,
}

impl CurationBatch {
    pub fn new(
        project: impl Into<String>,
        target_owner: impl Into<DataOwner>,
        strategy: MergeStrategy,
    ) -> Self {
        Self {
            project: project.into(),
            documents: Vec::new(),
            target_owner: target_owner.into(),
            strategy,
            layers: Vec::new(),
        }
    }

    pub fn with_documents<I, S>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DocumentId>,
    {
        self.documents.extend(documents.into_iter().map(Into::into));
        self
    }

    pub fn with_layer(mut self, layer: Arc<dyn LayerAdapter>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_layers(mut self, layers: Vec<Arc<dyn LayerAdapter>>) -> Self {
        self.layers.extend(layers);
        self
    }

    /// Check the preconditions of a run.
    ///
    /// All failures are [`Error::InvalidConfig`].
    pub fn validate(&self) -> Result<()> {
        if self.target_owner.trim().is_empty() {
            return Err(Error::InvalidConfig("missing target owner".into()));
        }
        if self.layers.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "project {} has no annotation layers to curate",
                self.project
            )));
        }
        let mut names = HashSet::new();
        for layer in &self.layers {
            if !names.insert(layer.layer()) {
                return Err(Error::InvalidConfig(format!(
                    "layer '{}' configured more than once",
                    layer.layer()
                )));
            }
        }
        self.strategy.validate()?;
        if let MergeStrategy::Passthrough { owner } = &self.strategy {
            if *owner == self.target_owner {
                return Err(Error::InvalidConfig(format!(
                    "passthrough owner {owner} is the target owner and never votes"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// BATCH REPORT
// =============================================================================

/// Outcomes of one batch, in processing order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub project: String,
    /// Documents requested.
    pub total: usize,
    pub outcomes: Vec<CurationOutcome>,
    /// Whether the batch stopped before processing every document.
    pub cancelled: bool,
}

impl BatchReport {
    fn count(&self, status: CurationStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn finished(&self) -> usize {
        self.count(CurationStatus::Finished)
    }

    pub fn contested(&self) -> usize {
        self.count(CurationStatus::Contested)
    }

    pub fn failed(&self) -> usize {
        self.count(CurationStatus::Failed)
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed_documents(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == CurationStatus::Failed)
            .map(|o| o.document_id.as_str())
            .collect()
    }

    /// "N of M documents curated, K contested, J failed".
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} of {} documents curated, {} contested, {} failed",
            self.finished(),
            self.total,
            self.contested(),
            self.failed()
        );
        if self.cancelled {
            summary.push_str(&format!(
                " (cancelled after {} documents)",
                self.processed()
            ));
        }
        summary
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Runs curation against a [`DocumentStore`].
#[derive(Clone)]
pub struct CurationController {
    store: Arc<dyn DocumentStore>,
    locks: Arc<DocumentLocks>,
    sink: Arc<dyn ProgressSink>,
}

impl CurationController {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            locks: Arc::new(DocumentLocks::new()),
            sink: Arc::new(TracingProgressSink),
        }
    }

    /// Share locks with other controllers on the same store.
    pub fn with_locks(mut self, locks: Arc<DocumentLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn locks(&self) -> &Arc<DocumentLocks> {
        &self.locks
    }

    /// Curate every document of `batch` in order.
    ///
    /// Returns `Err` only for precondition violations, before any document is
    /// touched. Cancellation is checked before each document.
    pub async fn curate_batch(
        &self,
        batch: &CurationBatch,
        cancel: &CancellationFlag,
    ) -> Result<BatchReport> {
        batch.validate()?;

        let start = Instant::now();
        info!(
            subsystem = "curation",
            project = %batch.project,
            strategy = batch.strategy.name(),
            data_owner = %batch.target_owner,
            documents = batch.documents.len(),
            "Curation batch started"
        );

        let mut report = BatchReport {
            project: batch.project.clone(),
            total: batch.documents.len(),
            outcomes: Vec::with_capacity(batch.documents.len()),
            cancelled: false,
        };

        for document in &batch.documents {
            if cancel.is_cancelled() {
                report.cancelled = true;
                self.sink.on_message(
                    LogLevel::Warn,
                    &format!(
                        "Curation of project {} cancelled after {} of {} documents",
                        batch.project,
                        report.processed(),
                        report.total
                    ),
                );
                break;
            }

            let outcome = match self
                .curate(document, &batch.target_owner, &batch.strategy, &batch.layers)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        subsystem = "curation",
                        project = %batch.project,
                        document_id = %document,
                        error = %e,
                        "Document curation failed"
                    );
                    self.sink.on_message(
                        LogLevel::Error,
                        &format!("Curation of document {document} failed: {e}"),
                    );
                    CurationOutcome::failed(document.as_str(), e)
                }
            };
            self.sink.on_document_processed(document, &outcome);
            report.outcomes.push(outcome);
        }

        self.sink.on_message(LogLevel::Info, &report.summary());
        info!(
            subsystem = "curation",
            project = %batch.project,
            finished = report.finished(),
            contested_count = report.contested(),
            failed = report.failed(),
            cancelled = report.cancelled,
            duration_ms = start.elapsed().as_millis() as u64,
            "Curation batch finished"
        );
        Ok(report)
    }

    /// Curate one document into the set of `target_owner`.
    ///
    /// Holds the (document, target owner) lock for the whole run.
    pub async fn curate(
        &self,
        document: &str,
        target_owner: &str,
        strategy: &MergeStrategy,
        layers: &[Arc<dyn LayerAdapter>],
    ) -> Result<CurationOutcome> {
        let start = Instant::now();
        let _lock = self.locks.acquire(document, target_owner).await;

        // Point-in-time snapshot of every source.
        let mut sources: BTreeMap<DataOwner, SourceAnnotationSet> = BTreeMap::new();
        for owner in self.store.list_curatable_data_owners(document).await? {
            if owner == target_owner {
                continue;
            }
            if let Some(set) = self.store.load_source_annotation_set(document, &owner).await? {
                sources.insert(owner, set);
            }
        }
        let mut target = self
            .store
            .load_source_annotation_set(document, target_owner)
            .await?
            .unwrap_or_else(|| SourceAnnotationSet::new(document, target_owner));

        let first = diff(layers, &sources)?;
        let decisions = strategy.decide(&first.sets, target_owner);

        let applied = apply_decisions(&mut target, target_owner, &decisions, layers)?;
        target.state = AnnotationSetState::InProgress;
        self.store
            .write_source_annotation_set(document, target_owner, &target)
            .await?;
        self.store
            .set_document_state(document, DocumentState::CurationInProgress)
            .await?;

        // Verify against what the store actually holds now.
        let written = self
            .store
            .load_source_annotation_set(document, target_owner)
            .await?
            .ok_or_else(|| {
                Error::Store(format!(
                    "annotation set of {target_owner} for {document} missing after write"
                ))
            })?;
        let merged = written.clone();
        sources.insert(target_owner.to_string(), written);
        let second = diff(layers, &sources)?;
        let contested = unconverged(&second.sets, strategy, &merged);

        let (status, document_state, set_state) = if contested == 0 {
            (
                CurationStatus::Finished,
                DocumentState::CurationFinished,
                AnnotationSetState::Finished,
            )
        } else {
            (
                CurationStatus::Contested,
                DocumentState::CurationInProgress,
                AnnotationSetState::InProgress,
            )
        };
        self.store
            .set_annotation_set_state(document, target_owner, set_state)
            .await?;
        self.store.set_document_state(document, document_state).await?;

        info!(
            subsystem = "curation",
            document_id = %document,
            data_owner = %target_owner,
            strategy = strategy.name(),
            position_count = first.len(),
            applied_count = applied,
            contested_count = contested,
            duration_ms = start.elapsed().as_millis() as u64,
            "Document curated"
        );

        Ok(CurationOutcome {
            document_id: document.to_string(),
            status,
            positions: first.len(),
            applied,
            contested,
            error: None,
        })
    }
}

/// Write every decided configuration into `target`.
///
/// A position is replaced only when a decision exists for it and the target
/// does not already hold the chosen configuration there. Every decided
/// position is recorded as merged; merge records the target no longer matches
/// were overwritten by a curator and are dropped. Returns the number of
/// positions written.
fn apply_decisions(
    target: &mut SourceAnnotationSet,
    target_owner: &str,
    decisions: &[MergeDecision],
    layers: &[Arc<dyn LayerAdapter>],
) -> Result<usize> {
    let current = diff(
        layers,
        &BTreeMap::from([(target_owner.to_string(), target.clone())]),
    )?;

    let overwritten: Vec<(String, Position)> = target
        .merged
        .iter()
        .filter(|m| {
            current
                .find(&m.layer, &m.position)
                .and_then(|set| set.configuration_of(target_owner))
                .map_or(true, |c| c.key != m.key)
        })
        .map(|m| (m.layer.clone(), m.position.clone()))
        .collect();
    for (layer, position) in &overwritten {
        target.forget_merge(layer, position);
    }

    let mut remove: Vec<usize> = Vec::new();
    let mut insert: Vec<Annotation> = Vec::new();
    let mut applied = 0;
    for decision in decisions {
        let Some(chosen) = &decision.chosen else {
            continue;
        };
        let Some((owner, contribution)) = chosen.representative() else {
            continue;
        };
        let existing = current
            .find(&decision.layer, &decision.position)
            .and_then(|set| set.configuration_of(target_owner));
        target.record_merge(
            decision.layer.clone(),
            decision.position.clone(),
            chosen.key.clone(),
        );
        if existing.is_some_and(|c| c.key == chosen.key) {
            continue;
        }
        if let Some(contribution) = existing.and_then(|c| c.contribution(target_owner)) {
            remove.extend(contribution.source_indices.iter().copied());
        }

        debug!(
            layer = %decision.layer,
            position = %decision.position,
            source = %owner,
            rationale = %decision.rationale,
            "Applying merge decision"
        );
        let base = insert.len();
        insert.extend(contribution.annotations.iter().cloned().map(|mut a| {
            a.next = a.next.map(|n| base + n);
            a
        }));
        applied += 1;
    }

    if applied > 0 {
        target.replace(&remove, insert)?;
    }
    Ok(applied)
}

/// Positions the target has not caught up with.
///
/// Where the strategy decides, the target must hold exactly the chosen
/// configuration. Where it cannot, the target must hold content a curator
/// resolved by hand: a configuration left there by an earlier automatic merge
/// is stale. Positions only the target annotated count as curated.
fn unconverged(
    sets: &[ConfigurationSet],
    strategy: &MergeStrategy,
    target: &SourceAnnotationSet,
) -> usize {
    let target_owner = target.owner.as_str();
    sets.iter()
        .filter(|set| set.owners().iter().any(|o| o.as_str() != target_owner))
        .filter(|set| {
            let held = set.configuration_of(target_owner);
            let decision = strategy.decide_position(set, target_owner);
            let converged = match &decision.chosen {
                Some(chosen) => held.is_some_and(|c| c.key == chosen.key),
                None => held.is_some_and(|c| {
                    target.merged_key(&set.layer, &set.position) != Some(&c.key)
                }),
            };
            if !converged {
                debug!(
                    layer = %set.layer,
                    position = %set.position,
                    rationale = %decision.rationale,
                    "Position not curated"
                );
            }
            !converged
        })
        .count()
}
