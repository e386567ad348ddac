//! Subcommand implementations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use curia_core::Delta;
use curia_db::{MemoryLearningHistory, StaticRecommender};
use curia_diff::diff;
use curia_jobs::{BatchReport, CurationWorker, WorkerConfig};
use curia_suggest::{ActiveLearningSession, SuggestionRanker, VisibilityFilter};

use crate::project::ProjectFile;

#[derive(Debug, Args)]
pub struct CurateArgs {
    /// Project file to curate.
    #[arg(long, env = "CURIA_PROJECT_FILE")]
    pub project_file: PathBuf,

    /// Where to write the curated project (defaults to printing only).
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Curate only these documents (repeatable).
    #[arg(long = "document")]
    pub documents: Vec<String>,

    /// Owner receiving the merged annotations.
    #[arg(long)]
    pub target_owner: Option<String>,
}

#[derive(Debug, Args)]
pub struct SuggestArgs {
    #[arg(long, env = "CURIA_PROJECT_FILE")]
    pub project_file: PathBuf,

    #[arg(long)]
    pub document: String,

    #[arg(long)]
    pub layer: String,

    /// User whose learning history applies.
    #[arg(long)]
    pub user: String,

    /// Skips recorded before this instant no longer hide suggestions
    /// (RFC 3339).
    #[arg(long)]
    pub skip_cutoff: Option<DateTime<Utc>>,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    #[arg(long, env = "CURIA_PROJECT_FILE")]
    pub project_file: PathBuf,

    #[arg(long)]
    pub document: String,
}

/// Run one bulk curation batch over the project.
///
/// Ctrl-C stops the batch after the document in flight.
pub async fn curate(args: CurateArgs) -> anyhow::Result<BatchReport> {
    let mut project = ProjectFile::load(&args.project_file).await?;
    let layers = project.adapters()?;
    let store = Arc::new(project.store());

    let mut config = WorkerConfig::from_env();
    if let Some(owner) = args.target_owner {
        config = config.with_target_owner(owner);
    }
    let worker = Arc::new(CurationWorker::new(store.clone(), config));

    let documents = if args.documents.is_empty() {
        project.snapshot.document_ids()
    } else {
        args.documents
    };
    let batch = worker
        .batch(project.snapshot.project.clone(), project.strategy.clone())
        .with_documents(documents)
        .with_layers(layers);
    let handle = worker.submit(batch)?;

    let interrupt = {
        let worker = worker.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current document");
                worker.shutdown();
            }
        })
    };
    let report = handle.wait().await;
    interrupt.abort();
    let report = report?;

    if let Some(output) = args.output {
        project.absorb(&store).await;
        project.save(&output).await?;
        info!(path = %output.display(), "Curated project written");
    }
    Ok(report)
}

/// Pick the next suggestion for a user.
pub async fn suggest(args: SuggestArgs) -> anyhow::Result<Option<Delta>> {
    let project = ProjectFile::load(&args.project_file).await?;
    let layers = project.adapters()?;

    let history = Arc::new(MemoryLearningHistory::from_records(
        project.snapshot.learning_records.clone(),
    ));
    let mut session = ActiveLearningSession::new(args.user.as_str(), history)
        .with_ranker(SuggestionRanker::new(VisibilityFilter::from_adapters(&layers)));
    for recommender in StaticRecommender::group(&project.snapshot.suggestions) {
        session = session.with_recommender(Arc::new(recommender));
    }
    if let Some(cutoff) = args.skip_cutoff {
        session.resume_skipped(cutoff);
    }

    let committed = project.committed(&args.document, &args.user, &args.layer);
    session
        .next_suggestion(&args.document, &args.layer, &committed)
        .await
        .context("suggestion ranking failed")
}

/// Agreement statistics of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub document_id: String,
    pub positions: usize,
    pub agreed: usize,
    pub contested: usize,
    pub uncorroborated: usize,
}

/// Diff every owner of one document.
pub async fn diff_document(args: DiffArgs) -> anyhow::Result<DiffSummary> {
    let project = ProjectFile::load(&args.project_file).await?;
    let layers = project.adapters()?;
    let document = project
        .snapshot
        .documents
        .iter()
        .find(|d| d.document_id == args.document)
        .with_context(|| format!("document {} not in project", args.document))?;

    let sets: BTreeMap<_, _> = document
        .annotation_sets
        .iter()
        .map(|set| (set.owner.clone(), set.clone()))
        .collect();
    let result = diff(&layers, &sets)?;
    Ok(DiffSummary {
        document_id: args.document,
        positions: result.len(),
        agreed: result.agreed_count(),
        contested: result.contested_count(),
        uncorroborated: result.uncorroborated_count(),
    })
}
