//! CLI interface for waymark.
//!
//! One subcommand per pipeline command. Arguments in, a short summary on
//! stdout; logs go to stderr. Each command is non-interactive and safe to
//! rerun: the pipeline state decides whether it may proceed.

mod format;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::pipeline::{self, Pipeline, PipelineError};
use crate::runner::PlaywrightRunner;
use crate::storage::Storage;

/// Waymark: compile Journeys into Playwright tests, run them, heal them.
#[derive(Debug, Parser)]
#[command(name = "waymark", version, after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// Working directory holding `journeys/` and `.waymark/`.
    #[arg(long, global = true, default_value = ".")]
    pub dir: PathBuf,

    /// Log at debug level, overriding `WAYMARK_LOG`.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r"Workflow:
  1. waymark analyze      parse journeys/**/*.journey.md
  2. waymark plan         map every instruction to IR primitives
  3. waymark generate     write tests/journeys/<id>.spec.ts
  4. waymark run          run the generated tests
  5. waymark refine       heal failing tests within safe bounds

A blocked pipeline accepts only `waymark clean` (and `status`).
Stop a running refine from another shell with `waymark refine --cancel`.";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover and parse every Journey.
    Analyze,

    /// Compile analyzed Journeys into IR programs.
    Plan,

    /// Render, validate, and write the planned tests.
    ///
    /// Hand edits outside managed blocks are kept.
    Generate,

    /// Run every generated test.
    Run,

    /// Heal failing tests, one bounded session per test.
    Refine {
        /// Ask a running refine to stop before its next attempt.
        #[arg(long)]
        cancel: bool,
    },

    /// Show the pipeline stage, results, and healing sessions.
    Status {
        /// Print the full status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove generated state and reset to the initial stage.
    Clean,
}

/// Run one command.
pub fn run(cli: &Cli) -> Result<(), PipelineError> {
    let config = Config::load(&cli.dir)?;
    let storage = pipeline::open_storage(&cli.dir, &config)?;
    let mut pipeline = Pipeline::new(&config, &storage);

    match cli.command {
        Command::Analyze => {
            let analysis = pipeline.analyze()?;
            print!("{}", format::analysis(&analysis));
        }
        Command::Plan => {
            let plan = pipeline.plan()?;
            print!("{}", format::plan(&plan));
        }
        Command::Generate => {
            let files = pipeline.generate()?;
            print!("{}", format::generated(&files, &cli.dir));
        }
        Command::Run => {
            let mut runner = playwright(cli, &config, &storage);
            let summary = pipeline.run(&mut runner)?;
            print!("{}", format::run_summary(&summary));
        }
        Command::Refine { cancel: true } => {
            if pipeline.cancel()? {
                eprintln!("Cancellation requested; refine stops before its next attempt");
            } else {
                eprintln!("No refine appears to be running; the next refine clears the request");
            }
        }
        Command::Refine { cancel: false } => {
            let mut runner = playwright(cli, &config, &storage);
            let summary = pipeline.refine(&mut runner)?;
            print!("{}", format::refine_summary(&summary));
            if let Some(reason) = summary.blocked {
                return Err(PipelineError::CircuitOpen(reason));
            }
        }
        Command::Status { json } => {
            let status = pipeline.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", format::status(&status));
            }
        }
        Command::Clean => {
            pipeline.clean()?;
            eprintln!("Cleaned {}", cli.dir.display());
        }
    }
    Ok(())
}

fn playwright<'s>(cli: &Cli, config: &Config, storage: &'s Storage) -> PlaywrightRunner<'s> {
    PlaywrightRunner::new(
        config.runner.command.clone(),
        config.runner.args.clone(),
        Duration::from_secs(config.runner.timeout_secs),
        &cli.dir,
        storage,
    )
}
