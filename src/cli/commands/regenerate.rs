//! `regenerate` command: re-run one stage and everything downstream of it.

use console::style;

use crate::cli::util::{print_report, CommandContext};
use crate::types::{AgentId, EventId, Result};

/// Stage to restart from; downstream stages are always re-run with it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateStage {
    Research,
    Glossary,
    Chunks,
}

impl RegenerateStage {
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s.to_lowercase().as_str() {
            "research" => Ok(Self::Research),
            "glossary" => Ok(Self::Glossary),
            "chunks" => Ok(Self::Chunks),
            _ => Err(format!(
                "Invalid stage '{s}'. Valid values: research, glossary, chunks"
            )),
        }
    }
}

pub async fn run(
    ctx: &CommandContext,
    stage: RegenerateStage,
    event: &str,
    agent: &str,
) -> Result<()> {
    let event_id = EventId::new(event);
    let agent_id = AgentId::new(agent);

    println!(
        "{} {:?} {}",
        style("Regenerating").bold(),
        stage,
        style("stage and downstream results").bold()
    );

    let pipeline = ctx.pipeline()?;
    let report = match stage {
        RegenerateStage::Research => pipeline.regenerate_research(&event_id, &agent_id).await?,
        RegenerateStage::Glossary => pipeline.regenerate_glossary(&event_id, &agent_id).await?,
        RegenerateStage::Chunks => pipeline.regenerate_chunks(&event_id, &agent_id).await?,
    };

    print_report(&report);
    Ok(())
}
