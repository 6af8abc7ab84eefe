//! Script execution for the fiber console

use crate::commands;
use crate::session::Session;
use crate::target::DebugTarget;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Run a debugger script file
pub fn run_script<T: DebugTarget>(session: &mut Session<T>, script_path: &Path) -> Result<(), String> {
    let file = File::open(script_path)
        .map_err(|e| format!("Failed to open script {}: {}", script_path.display(), e))?;

    let reader = BufReader::new(file);

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("Error reading line {}: {}", line_num + 1, e))?;

        // Skip empty lines and comments
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        println!("> {}", trimmed);

        if run_line(session, trimmed, line_num)? {
            return Ok(());
        }
    }

    Ok(())
}

/// Run commands from a string (for testing)
pub fn run_commands<T: DebugTarget>(session: &mut Session<T>, commands_str: &str) -> Result<(), String> {
    for (line_num, line) in commands_str.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if run_line(session, trimmed, line_num)? {
            return Ok(());
        }
    }

    Ok(())
}

/// Execute one non-empty line; `Ok(true)` means quit.
fn run_line<T: DebugTarget>(session: &mut Session<T>, line: &str, line_num: usize) -> Result<bool, String> {
    session
        .execute(commands::parse(line))
        .map_err(|e| format!("Line {}: {}", line_num + 1, e))
}
