//! `curia` command-line runner.
//!
//! Runs bulk curation, active-learning suggestion ranking, or a plain
//! agreement diff over a JSON project file.

mod commands;
mod project;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{CurateArgs, DiffArgs, SuggestArgs};

#[derive(Debug, Parser)]
#[command(name = "curia", version, about = "Annotation curation and active learning")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Merge every annotator's work into the curated set.
    Curate(CurateArgs),
    /// Print the most uncertain suggestion for a user.
    Suggest(SuggestArgs),
    /// Print agreement statistics for one document.
    Diff(DiffArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   RUST_LOG    - standard env filter (default: "curia=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "curia=info,curia_jobs=info,curia_db=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    info!(log_format = %log_format, "Logging initialized");

    match Cli::parse().command {
        Command::Curate(args) => {
            let report = commands::curate(args).await?;
            println!("{}", report.summary());
            for outcome in &report.outcomes {
                if let Some(error) = &outcome.error {
                    println!("  failed {}: {error}", outcome.document_id);
                }
            }
        }
        Command::Suggest(args) => match commands::suggest(args).await? {
            Some(delta) => println!("{}", serde_json::to_string_pretty(&delta)?),
            None => println!("no suggestion left to review"),
        },
        Command::Diff(args) => {
            let summary = commands::diff_document(args).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
