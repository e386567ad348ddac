//! Cooperative cancellation for curation batches.
//!
//! Batches poll the flag between documents; a document in flight always runs
//! to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

/// Shared cancellation flag.
///
/// A child flag also reports cancellation when its parent is cancelled, so a
/// worker can stop every batch at once while each batch stays individually
/// cancellable.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag cancelled by either itself or `self`.
    pub fn child(&self) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: Some(self.cancelled.clone()),
        }
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!("Cancellation requested");
        }
    }

    /// Lock-free check used between documents.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::Relaxed))
    }
}
