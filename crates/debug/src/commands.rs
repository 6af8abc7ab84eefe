//! Command parsing for the fiber console

use crate::types::FiberId;

/// A parsed console command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Backtrace one or more fibers
    Backtrace(FiberArg),
    /// Divert the selected carrier thread to a fiber, or restore it
    Switch(FiberArg),
    /// Show or select the current carrier thread
    Thread(Option<u32>),
    /// Show info (fibers, pending switches)
    Info(InfoKind),
    /// Resolve the runtime layout again
    ReloadLayout,
    /// Quit the debugger
    Quit,
    /// Empty line (repeat last command)
    Empty,
    /// `#` comment; does nothing and is not repeated
    Comment,
    /// Unknown command
    Unknown(String),
}

/// Which fiber(s) a command applies to
#[derive(Debug, Clone, PartialEq)]
pub enum FiberArg {
    /// No argument: the selected carrier thread's fibers, or its pending switch
    Current,
    /// Every fiber on every carrier thread
    All,
    /// A numeric fiber id
    Id(FiberId),
    /// An expression yielding a context handle
    Expr(String),
}

/// Kind of info to display
#[derive(Debug, Clone, PartialEq)]
pub enum InfoKind {
    Fibers,
    Switches,
}

/// Parse a command line into a Command
pub fn parse(line: &str) -> Command {
    let line = line.trim();

    if line.is_empty() {
        return Command::Empty;
    }
    if line.starts_with('#') {
        return Command::Comment;
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let args = parts.next().unwrap_or("").trim();

    match cmd {
        "backtrace-fiber" | "bta" => Command::Backtrace(parse_fiber_arg(args)),
        "thread-fiber" | "ta" => parse_switch(args),
        "thread" | "t" => parse_thread(args),
        "info" | "i" => parse_info(args),
        "reload-layout" => Command::ReloadLayout,
        "quit" | "q" => Command::Quit,
        _ => Command::Unknown(cmd.to_string()),
    }
}

fn parse_fiber_arg(args: &str) -> FiberArg {
    if args.is_empty() {
        FiberArg::Current
    } else if args == "all" {
        FiberArg::All
    } else if let Ok(id) = args.parse::<u64>() {
        FiberArg::Id(FiberId(id))
    } else {
        FiberArg::Expr(args.to_string())
    }
}

fn parse_switch(args: &str) -> Command {
    match parse_fiber_arg(args) {
        FiberArg::All => Command::Unknown("thread-fiber takes a single fiber".to_string()),
        arg => Command::Switch(arg),
    }
}

fn parse_thread(args: &str) -> Command {
    if args.is_empty() {
        return Command::Thread(None);
    }
    match args.parse::<u32>() {
        Ok(n) => Command::Thread(Some(n)),
        Err(_) => Command::Unknown("thread requires a thread number".to_string()),
    }
}

fn parse_info(args: &str) -> Command {
    match args {
        "fibers" | "f" => Command::Info(InfoKind::Fibers),
        "switches" | "s" => Command::Info(InfoKind::Switches),
        _ => Command::Unknown(format!("info {}", args)),
    }
}
