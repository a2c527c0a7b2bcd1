//! `generate` command: run the full pipeline for a new event.

use std::path::PathBuf;

use console::style;
use tracing::info;

use crate::cli::util::{print_report, CommandContext};
use crate::extract;
use crate::types::Result;

pub struct GenerateArgs {
    pub topic: String,
    pub title: Option<String>,
    pub agent: String,
    pub documents: Vec<PathBuf>,
}

pub async fn run(ctx: &CommandContext, args: GenerateArgs) -> Result<()> {
    let event = ctx.db.create_event(&args.topic, None)?;
    let agent = ctx.db.create_agent(&event.id, &args.agent)?;

    if !args.documents.is_empty() {
        let stored = extract::ingest_documents(&ctx.db, &event.id, &args.documents)?;
        info!(stored, "Ingested source documents");
    }

    println!(
        "{} {}",
        style("Generating context database for").bold(),
        style(&args.topic).cyan()
    );

    let pipeline = ctx.pipeline()?;
    let title = args.title.as_deref().unwrap_or(&args.topic);
    let report = pipeline
        .generate_for(&event.id, &agent.id, title, &args.topic)
        .await?;

    print_report(&report);
    Ok(())
}
