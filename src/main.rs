use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contextloom::cli::commands::generate::GenerateArgs;
use contextloom::cli::commands::regenerate::RegenerateStage;
use contextloom::cli::CommandContext;

#[derive(Parser)]
#[command(name = "contextloom")]
#[command(
    version,
    about = "Versioned context-database generation for event agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, help = "Path to contextloom.toml")]
    config: Option<PathBuf>,

    #[arg(long, help = "Database path (overrides config)")]
    db: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter contextloom.toml in the current directory
    Init,

    /// Run the full pipeline for a new event
    Generate {
        #[arg(long, help = "Event topic, e.g. \"Solar Summit 2026\"")]
        topic: String,
        #[arg(long, help = "Event title (defaults to the topic)")]
        title: Option<String>,
        #[arg(long, default_value = "default", help = "Consuming agent name")]
        agent: String,
        #[arg(long = "document", help = "Source document to ingest (repeatable)")]
        documents: Vec<PathBuf>,
    },

    /// Re-run one stage and everything downstream of it
    Regenerate {
        #[arg(value_parser = RegenerateStage::parse, help = "Stage: research, glossary, chunks")]
        stage: RegenerateStage,
        #[arg(long, help = "Event ID")]
        event: String,
        #[arg(long, help = "Agent ID")]
        agent: String,
    },

    /// Show the active state of an event's context database
    Status {
        #[arg(long, help = "Event ID")]
        event: String,
        #[arg(long, help = "Agent ID")]
        agent: String,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mContextLoom encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if matches!(cli.command, Commands::Init) {
        contextloom::cli::commands::init::run(std::path::Path::new("."))?;
        return Ok(());
    }

    let ctx = CommandContext::load(cli.config.as_deref(), cli.db.as_deref())?;

    match cli.command {
        // Handled before the database is opened
        Commands::Init => {}
        Commands::Generate {
            topic,
            title,
            agent,
            documents,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(contextloom::cli::commands::generate::run(
                &ctx,
                GenerateArgs {
                    topic,
                    title,
                    agent,
                    documents,
                },
            ))?;
        }
        Commands::Regenerate {
            stage,
            event,
            agent,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(contextloom::cli::commands::regenerate::run(
                &ctx, stage, &event, &agent,
            ))?;
        }
        Commands::Status { event, agent } => {
            contextloom::cli::commands::status::run(&ctx, &event, &agent)?;
        }
    }

    Ok(())
}
