//! fiberdbg - fiber backtraces for a paused process
//!
//! Usage:
//!   fiberdbg <snapshot.json>                     # Start REPL
//!   fiberdbg --script <script> <snapshot.json>   # Run script

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fiberdbg::DEFAULT_MAX_FRAMES;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fiberdbg")]
#[command(about = "Inspect and backtrace the fibers of a paused process.", long_about = None)]
struct Cli {
    /// Process snapshot (JSON).
    snapshot: PathBuf,
    /// Layout override (JSON); missing keys take the Arachne defaults.
    #[arg(long)]
    layout: Option<PathBuf>,
    /// Run commands from a script file instead of the prompt.
    #[arg(short, long)]
    script: Option<PathBuf>,
    /// Maximum frames per backtrace.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAMES)]
    max_frames: usize,
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    try_main().map_err(|err| {
        eprintln!("{err:#}");
        err
    })
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .with_context(|| format!("invalid log level {}", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut session = debugger::load_session(&cli.snapshot, cli.layout.as_deref(), cli.max_frames)?;

    match cli.script {
        Some(script) => debugger::run_script(&mut session, &script).map_err(anyhow::Error::msg)?,
        None => debugger::repl::run(&mut session),
    }

    session.into_target();
    Ok(())
}
