//! fiberdbg console front end
//!
//! Loads a process snapshot and an optional layout override, then drives a
//! [`fiberdbg::Session`] from a script or an interactive prompt.

pub mod repl;

use anyhow::{Context, Result};
use fiberdbg::{LayoutConfig, Session, SnapshotTarget};
use std::path::Path;

pub use fiberdbg::commands::{parse, Command};
pub use fiberdbg::script::run_script;

/// Read a layout override, or use the Arachne defaults.
pub fn load_layout_config(path: Option<&Path>) -> Result<LayoutConfig> {
    match path {
        Some(path) => LayoutConfig::from_file(path).context("loading layout override"),
        None => Ok(LayoutConfig::default()),
    }
}

/// Open a snapshot and start a session on it.
pub fn load_session(snapshot: &Path, layout: Option<&Path>, max_frames: usize) -> Result<Session<SnapshotTarget>> {
    let config = load_layout_config(layout)?;
    let target = SnapshotTarget::from_file(snapshot)
        .with_context(|| format!("loading snapshot {}", snapshot.display()))?;
    Ok(Session::new(target, config).with_max_frames(max_frames))
}
