//! Curation worker running project batches concurrently.
//!
//! Documents of one project are curated sequentially inside a single task;
//! different projects run on separate tasks, bounded by
//! [`WorkerConfig::max_concurrent_projects`]. Per-document locks are shared
//! by all tasks so two batches never curate the same document for the same
//! target owner at once.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use curia_core::defaults::{CURATION_MAX_CONCURRENT_PROJECTS, CURATION_USER};
use curia_core::{
    CurationEvent, DocumentStore, Error, EventBus, EventBusProgressSink, EventEnvelope,
    FanoutProgressSink, ProgressSink, Result, TracingProgressSink,
};
use curia_diff::MergeStrategy;

use crate::cancel::CancellationFlag;
use crate::controller::{BatchReport, CurationBatch, CurationController};
use crate::lock::DocumentLocks;

/// Configuration for the curation worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether batches are accepted at all.
    pub enabled: bool,
    /// Maximum number of project batches running at once.
    pub max_concurrent_projects: usize,
    /// Owner receiving curated annotations when a batch does not name one.
    pub target_owner: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_projects: CURATION_MAX_CONCURRENT_PROJECTS,
            target_owner: CURATION_USER.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CURATION_ENABLED` | `true` | Enable/disable bulk curation |
    /// | `CURATION_MAX_CONCURRENT_PROJECTS` | `4` | Max concurrent project batches |
    /// | `CURATION_TARGET_OWNER` | `CURATION_USER` | Default target owner |
    pub fn from_env() -> Self {
        let enabled = std::env::var("CURATION_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_projects = std::env::var("CURATION_MAX_CONCURRENT_PROJECTS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(CURATION_MAX_CONCURRENT_PROJECTS)
            .max(1);

        let target_owner = std::env::var("CURATION_TARGET_OWNER")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| CURATION_USER.to_string());

        Self {
            enabled,
            max_concurrent_projects,
            target_owner,
        }
    }

    /// Set maximum concurrent project batches.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_projects = max.max(1);
        self
    }

    /// Enable or disable the worker.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the default target owner.
    pub fn with_target_owner(mut self, owner: impl Into<String>) -> Self {
        self.target_owner = owner.into();
        self
    }
}

/// Handle of one submitted batch.
pub struct BatchHandle {
    project: String,
    cancel: CancellationFlag,
    events: broadcast::Receiver<EventEnvelope>,
    task: JoinHandle<Result<BatchReport>>,
}

impl BatchHandle {
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Stop the batch after the document currently being curated.
    pub fn cancel(&self) {
        info!(project = %self.project, "Curation batch cancellation requested");
        self.cancel.cancel();
    }

    /// Receiver for events of every batch on the worker's bus.
    pub fn events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.resubscribe()
    }

    /// Wait for the batch to end.
    pub async fn wait(self) -> Result<BatchReport> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("curation task for {} failed: {e}", self.project)))?
    }
}

/// Runs curation batches on tokio tasks.
pub struct CurationWorker {
    store: Arc<dyn DocumentStore>,
    config: WorkerConfig,
    locks: Arc<DocumentLocks>,
    bus: Arc<EventBus>,
    permits: Arc<Semaphore>,
    shutdown: CancellationFlag,
}

impl CurationWorker {
    pub fn new(store: Arc<dyn DocumentStore>, config: WorkerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_projects.max(1)));
        Self {
            store,
            config,
            locks: Arc::new(DocumentLocks::new()),
            bus: Arc::new(EventBus::default()),
            permits,
            shutdown: CancellationFlag::new(),
        }
    }

    /// Publish events on an existing bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    /// Batch for `project` targeting the configured owner.
    pub fn batch(&self, project: impl Into<String>, strategy: MergeStrategy) -> CurationBatch {
        CurationBatch::new(project, self.config.target_owner.clone(), strategy)
    }

    /// Cancel every running and queued batch.
    pub fn shutdown(&self) {
        info!("Curation worker shutting down");
        self.shutdown.cancel();
    }

    /// Validate and start `batch`.
    ///
    /// The batch waits for a free slot before curating its first document.
    pub fn submit(&self, batch: CurationBatch) -> Result<BatchHandle> {
        if !self.config.enabled {
            return Err(Error::InvalidConfig("curation worker is disabled".into()));
        }
        batch.validate()?;

        let cancel = self.shutdown.child();
        let events = self.bus.subscribe();
        let project = batch.project.clone();

        let sink: Arc<dyn ProgressSink> = Arc::new(
            FanoutProgressSink::new()
                .with(Arc::new(TracingProgressSink))
                .with(Arc::new(EventBusProgressSink::new(self.bus.clone(), project.clone()))),
        );
        let controller = CurationController::new(self.store.clone())
            .with_locks(self.locks.clone())
            .with_sink(sink);
        let run = BatchRun {
            controller,
            bus: self.bus.clone(),
            permits: self.permits.clone(),
            cancel: cancel.clone(),
        };

        debug!(project = %project, documents = batch.documents.len(), "Curation batch submitted");
        let task = tokio::spawn(run.execute(batch));

        Ok(BatchHandle {
            project,
            cancel,
            events,
            task,
        })
    }

    /// Run several batches concurrently and collect their reports in
    /// completion order.
    pub async fn run_all(&self, batches: Vec<CurationBatch>) -> Vec<Result<BatchReport>> {
        if !self.config.enabled {
            info!("Curation worker is disabled, not starting");
            return Vec::new();
        }

        let start = Instant::now();
        let mut results = Vec::with_capacity(batches.len());
        let mut tasks = JoinSet::new();
        for batch in batches {
            match self.submit(batch) {
                Ok(handle) => {
                    tasks.spawn(handle.wait());
                }
                Err(e) => results.push(Err(e)),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(error = ?e, "Curation task panicked");
                    results.push(Err(Error::Internal(format!("curation task panicked: {e}"))));
                }
            }
        }

        info!(
            batches = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Curation batches complete"
        );
        results
    }
}

/// Everything a spawned batch task needs.
struct BatchRun {
    controller: CurationController,
    bus: Arc<EventBus>,
    permits: Arc<Semaphore>,
    cancel: CancellationFlag,
}

impl BatchRun {
    async fn execute(self, batch: CurationBatch) -> Result<BatchReport> {
        let _permit = self
            .permits
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("curation worker semaphore closed".into()))?;

        self.bus.emit(CurationEvent::BatchStarted {
            project: batch.project.clone(),
            total: batch.documents.len(),
        });
        let report = self.controller.curate_batch(&batch, &self.cancel).await?;
        self.bus.emit(CurationEvent::BatchFinished {
            project: report.project.clone(),
            finished: report.finished(),
            contested: report.contested(),
            failed: report.failed(),
            cancelled: report.cancelled,
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_concurrent_projects, CURATION_MAX_CONCURRENT_PROJECTS);
        assert_eq!(config.target_owner, CURATION_USER);
    }

    #[test]
    fn test_config_builders() {
        let config = WorkerConfig::default()
            .with_enabled(false)
            .with_max_concurrent(0)
            .with_target_owner("curator");
        assert!(!config.enabled);
        assert_eq!(config.max_concurrent_projects, 1);
        assert_eq!(config.target_owner, "curator");
    }
}
