//! `status` command: active state of one event's context database.

use console::style;

use crate::cli::util::CommandContext;
use crate::types::{AgentId, CycleType, EventId, LoomError, Result};

pub fn run(ctx: &CommandContext, event: &str, agent: &str) -> Result<()> {
    let event_id = EventId::new(event);
    let agent_id = AgentId::new(agent);

    let record = ctx
        .db
        .get_event(&event_id)?
        .ok_or_else(|| LoomError::NotFound(format!("event {event_id}")))?;

    println!("{} {}", style("Event:").bold(), record.topic);

    if let Some(agent) = ctx.db.get_agent(&agent_id)? {
        println!(
            "{} {} ({} / {})",
            style("Agent:").bold(),
            agent.name,
            agent.status.as_str(),
            agent.stage
        );
    }

    match ctx.db.latest_blueprint(&event_id, &agent_id)? {
        Some(blueprint) => {
            println!(
                "{} {} ({})",
                style("Blueprint:").bold(),
                blueprint.id,
                blueprint.status
            );
            if let Some(message) = &blueprint.error_message {
                println!("  {}", style(message).red());
            }
        }
        None => println!("{} none", style("Blueprint:").bold()),
    }

    println!("{}", style("Cycles:").bold());
    for cycle_type in [
        CycleType::Blueprint,
        CycleType::Research,
        CycleType::Glossary,
        CycleType::Chunks,
    ] {
        match ctx.db.active_cycle(&event_id, cycle_type)? {
            Some(cycle) => {
                let progress = match (cycle.progress_current, cycle.progress_total) {
                    (Some(current), Some(total)) => format!(" [{current}/{total}]"),
                    _ => String::new(),
                };
                println!("  {:<10} {}{}", cycle_type.as_str(), cycle.status, progress);
            }
            None => println!("  {:<10} -", cycle_type.as_str()),
        }
    }

    let summary = ctx.db.event_summary(&event_id)?;
    println!("{}", style("Active rows:").bold());
    println!("  research results: {}", summary.research_results);
    println!("  glossary terms:   {}", summary.glossary_terms);
    println!("  context chunks:   {}", summary.context_items);
    println!("  documents:        {}", summary.documents);

    Ok(())
}
