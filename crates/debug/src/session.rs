//! Debugging session that drives fiber requests against a paused target.

use crate::commands::{Command, FiberArg, InfoKind};
use crate::emulator::ContextEmulator;
use crate::error::{FiberError, Result, TargetError};
use crate::layout::{LayoutConfig, RuntimeLayout};
use crate::locator::{CarrierThreadLocator, OccupiedFiber, SelectionGuard};
use crate::resolver::FiberResolver;
use crate::switch::{Diversion, SessionSwitchTable, SwitchEntry};
use crate::target::DebugTarget;
use crate::types::{CarrierThreadId, ContextHandle, FiberId, Frame};
use crate::unwind::{walk_frames, DEFAULT_MAX_FRAMES};
use std::fmt;

/// How a backtrace names the fiber it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberLabel {
    /// Reached through an id or an occupancy scan
    Slot {
        fiber: FiberId,
        core_id: u64,
        slot: usize,
        context: ContextHandle,
    },
    /// Reached through a raw context handle
    Handle(ContextHandle),
}

impl From<&OccupiedFiber> for FiberLabel {
    fn from(fiber: &OccupiedFiber) -> Self {
        FiberLabel::Slot {
            fiber: fiber.fiber,
            core_id: fiber.core_id,
            slot: fiber.slot,
            context: fiber.context,
        }
    }
}

impl fmt::Display for FiberLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberLabel::Slot { fiber, core_id, slot, context } => {
                write!(f, "Fiber #{} [{}]:{}: {}", fiber, core_id, slot, context)
            }
            FiberLabel::Handle(context) => write!(f, "Fiber {}", context),
        }
    }
}

/// One fiber's backtrace, or why it could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiberBacktrace {
    pub label: FiberLabel,
    pub result: Result<Vec<Frame>>,
}

/// What a switch request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The selected carrier thread now shows the fiber.
    Diverted {
        carrier: CarrierThreadId,
        context: ContextHandle,
        diversion: Diversion,
    },
    /// The selected carrier thread got its own registers back.
    Restored(SwitchEntry),
    /// The fiber is running on the selected carrier thread, nothing to do.
    AlreadyLive {
        carrier: CarrierThreadId,
        context: ContextHandle,
    },
    /// The fiber is running on another carrier thread, which is now selected.
    SelectedHost {
        carrier: CarrierThreadId,
        context: ContextHandle,
        restored: Option<SwitchEntry>,
    },
}

/// Backtrace `context` on the selected carrier thread.
///
/// A pending diversion on that carrier holds its real registers; they are
/// used if `context` is the one it is running.
pub fn unwind_context<T: DebugTarget + ?Sized>(
    target: &mut T,
    switches: &SessionSwitchTable,
    layout: &RuntimeLayout,
    max_frames: usize,
    context: ContextHandle,
) -> Result<Vec<Frame>> {
    let carrier = target.selected_thread()?;
    let live = switches.pending(carrier).map(|entry| entry.saved);
    ContextEmulator::new(layout, max_frames).unwind_with_live(target, context, live)
}

struct Unwinder<'a> {
    layout: &'a RuntimeLayout,
    switches: &'a SessionSwitchTable,
    max_frames: usize,
}

impl Unwinder<'_> {
    /// Unwind on `host` if given, else on the selected carrier thread. The
    /// selection is the same on return as on entry.
    fn unwind_on<T: DebugTarget + ?Sized>(
        &self,
        target: &mut T,
        host: Option<CarrierThreadId>,
        context: ContextHandle,
    ) -> Result<Vec<Frame>> {
        let mut selection = SelectionGuard::new(target)?;
        if let Some(host) = host {
            selection.select(host)?;
        }
        let frames = unwind_context(selection.target_mut(), self.switches, self.layout, self.max_frames, context)?;
        selection.restore()?;
        Ok(frames)
    }

    fn trace<T: DebugTarget + ?Sized>(
        &self,
        target: &mut T,
        label: FiberLabel,
        host: Option<CarrierThreadId>,
        context: ContextHandle,
    ) -> FiberBacktrace {
        let result = self.unwind_on(target, host, context);
        if let Err(e) = &result {
            tracing::warn!(fiber = %label, error = %e, "fiber backtrace failed");
        }
        FiberBacktrace { label, result }
    }

    fn each<T: DebugTarget + ?Sized>(&self, target: &mut T, fibers: &[OccupiedFiber]) -> Vec<FiberBacktrace> {
        fibers
            .iter()
            .map(|fiber| {
                let host = fiber.is_live.then_some(fiber.carrier);
                self.trace(target, fiber.into(), host, fiber.context)
            })
            .collect()
    }
}

fn load_layout<T: DebugTarget + ?Sized>(target: &T, config: &LayoutConfig) -> Result<RuntimeLayout> {
    let layout = RuntimeLayout::load(target, config);
    match &layout {
        Ok(layout) => tracing::debug!(
            max_fibers_per_core = layout.max_fibers_per_core,
            resume_anchor = layout.resume_anchor,
            "fiber runtime layout loaded"
        ),
        Err(e) => tracing::warn!(error = %e, "fiber runtime layout unavailable"),
    }
    layout
}

/// Evaluate a user expression and check that it is a context handle.
fn evaluate_handle<T: DebugTarget + ?Sized>(target: &T, layout: &RuntimeLayout, expr: &str) -> Result<ContextHandle> {
    let value = target.evaluate(expr).map_err(|e| {
        tracing::debug!(expr, error = %e, "expression evaluation failed");
        FiberError::InvalidExpression(expr.to_string())
    })?;
    FiberResolver::new(layout).resolve_handle(&value)
}

/// The carrier thread running `context`, if any.
fn live_host<T: DebugTarget + ?Sized>(
    locator: &CarrierThreadLocator<'_>,
    target: &mut T,
    context: ContextHandle,
) -> Result<Option<CarrierThreadId>> {
    match locator.locate_host(target, context) {
        Ok(host) => Ok(Some(host)),
        Err(FiberError::HostNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// A debugging session generic over the target implementation.
pub struct Session<T: DebugTarget> {
    /// The paused process
    target: T,
    /// Names used to resolve the layout
    config: LayoutConfig,
    /// Result of the last layout load; fiber commands report its error
    layout: Result<RuntimeLayout>,
    /// Pending diversions made by the switch command
    switches: SessionSwitchTable,
    max_frames: usize,
    /// Last command (for repeat on empty line)
    last_command: Option<Command>,
    /// Captured output lines (for testing)
    output: Vec<String>,
}

impl<T: DebugTarget> Session<T> {
    /// Create a session and resolve the runtime layout.
    ///
    /// A layout that fails to load does not fail the session: every fiber
    /// command reports the failure until `reload-layout` succeeds.
    pub fn new(target: T, config: LayoutConfig) -> Self {
        let layout = load_layout(&target, &config);
        Self {
            target,
            config,
            layout,
            switches: SessionSwitchTable::new(),
            max_frames: DEFAULT_MAX_FRAMES,
            last_command: None,
            output: Vec::new(),
        }
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn layout(&self) -> Result<&RuntimeLayout> {
        self.layout.as_ref().map_err(Clone::clone)
    }

    pub fn switches(&self) -> &SessionSwitchTable {
        &self.switches
    }

    /// Resolve the runtime layout again.
    pub fn reload_layout(&mut self) -> Result<&RuntimeLayout> {
        self.layout = load_layout(&self.target, &self.config);
        self.layout()
    }

    /// Backtrace the fibers named by `arg`.
    ///
    /// Resolution failures fail the request. Unwinding is attempted for each
    /// fiber and its failure is kept in that fiber's entry, so one bad fiber
    /// does not hide the others.
    pub fn backtrace(&mut self, arg: &FiberArg) -> Result<Vec<FiberBacktrace>> {
        let Self { target, layout, switches, max_frames, .. } = self;
        let layout = layout.as_ref().map_err(Clone::clone)?;
        let locator = CarrierThreadLocator::new(layout);
        let unwinder = Unwinder { layout, switches: &*switches, max_frames: *max_frames };

        match arg {
            FiberArg::Current => {
                let fibers = locator.local_occupied(&*target)?;
                Ok(unwinder.each(target, &fibers))
            }
            FiberArg::All => {
                let fibers = locator.enumerate_occupied(target)?;
                Ok(unwinder.each(target, &fibers))
            }
            FiberArg::Id(id) => {
                let fiber = FiberResolver::new(layout).resolve(&*target, *id)?;
                let host = if fiber.is_live {
                    Some(locator.locate_host(target, fiber.context)?)
                } else {
                    None
                };
                let label = FiberLabel::Slot {
                    fiber: fiber.fiber,
                    core_id: fiber.core_id(),
                    slot: fiber.slot,
                    context: fiber.context,
                };
                Ok(vec![unwinder.trace(target, label, host, fiber.context)])
            }
            FiberArg::Expr(expr) => {
                let context = evaluate_handle(&*target, layout, expr)?;
                let host = live_host(&locator, target, context)?;
                Ok(vec![unwinder.trace(target, FiberLabel::Handle(context), host, context)])
            }
        }
    }

    /// Divert the selected carrier thread to the fiber named by `arg`, or
    /// with no argument restore its pending diversion.
    pub fn switch_to(&mut self, arg: &FiberArg) -> Result<SwitchOutcome> {
        let Self { target, layout, switches, .. } = self;
        let layout = layout.as_ref().map_err(Clone::clone)?;
        let locator = CarrierThreadLocator::new(layout);
        let selected = target.selected_thread()?;

        let (context, host) = match arg {
            FiberArg::Current => return switches.restore(target, selected).map(SwitchOutcome::Restored),
            FiberArg::All => return Err(FiberError::InvalidExpression("all".to_string())),
            FiberArg::Id(id) => {
                let fiber = FiberResolver::new(layout).resolve(&*target, *id)?;
                let host = if fiber.is_live {
                    Some(locator.locate_host(target, fiber.context)?)
                } else {
                    None
                };
                (fiber.context, host)
            }
            FiberArg::Expr(expr) => {
                let context = evaluate_handle(&*target, layout, expr)?;
                (context, live_host(&locator, target, context)?)
            }
        };

        match host {
            Some(host) if host == selected => match switches.pending(selected) {
                Some(_) => switches.restore(target, selected).map(SwitchOutcome::Restored),
                None => Ok(SwitchOutcome::AlreadyLive { carrier: selected, context }),
            },
            Some(host) => {
                target.select_thread(host)?;
                let restored = match switches.pending(host) {
                    Some(_) => Some(switches.restore(target, host)?),
                    None => None,
                };
                Ok(SwitchOutcome::SelectedHost { carrier: host, context, restored })
            }
            None => {
                let diversion = switches.divert(target, layout, selected, context)?;
                Ok(SwitchOutcome::Diverted { carrier: selected, context, diversion })
            }
        }
    }

    /// Print a line (captures to output buffer for testing)
    fn println(&mut self, msg: impl AsRef<str>) {
        let s = msg.as_ref().to_string();
        println!("{}", s);
        self.output.push(s);
    }

    /// Get captured output (for testing)
    pub fn get_output(&self) -> &[String] {
        &self.output
    }

    /// Clear captured output (for testing)
    pub fn clear_output(&mut self) {
        self.output.clear();
    }

    /// Execute a command. Returns `Ok(true)` if the session should quit.
    ///
    /// Reportable failures are printed and the session carries on; a
    /// failing target is returned as an error.
    pub fn execute(&mut self, cmd: Command) -> Result<bool> {
        // Store command for repeat
        if !matches!(cmd, Command::Empty | Command::Comment) {
            self.last_command = Some(cmd.clone());
        }

        let result = match cmd {
            Command::Backtrace(arg) => self.cmd_backtrace(&arg),
            Command::Switch(arg) => self.cmd_switch(&arg),
            Command::Thread(n) => self.cmd_thread(n),
            Command::Info(kind) => self.cmd_info(kind),
            Command::ReloadLayout => self.cmd_reload_layout(),
            Command::Quit => return Ok(true),
            Command::Comment => Ok(()),
            Command::Empty => {
                // Repeat last command
                if let Some(last) = self.last_command.clone() {
                    return self.execute(last);
                }
                Ok(())
            }
            Command::Unknown(s) => {
                self.println(format!("Unknown command: {}", s));
                Ok(())
            }
        };

        match result {
            Ok(()) => Ok(false),
            Err(e) if e.is_reportable() => {
                self.println(format!("Error: {}", e));
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn cmd_backtrace(&mut self, arg: &FiberArg) -> Result<()> {
        let traces = self.backtrace(arg)?;
        if traces.is_empty() {
            self.println("No fibers.");
        }
        for trace in traces {
            self.println(trace.label.to_string());
            match trace.result {
                Ok(frames) if frames.is_empty() => self.println("No stack."),
                Ok(frames) => {
                    for frame in frames {
                        self.println(frame.to_string());
                    }
                }
                Err(e) => self.println(format!("Error: {}", e)),
            }
        }
        Ok(())
    }

    fn cmd_switch(&mut self, arg: &FiberArg) -> Result<()> {
        match self.switch_to(arg)? {
            SwitchOutcome::Diverted { carrier, context, diversion } => {
                self.println(format!("Carrier thread {} now shows fiber {}", carrier, context));
                if diversion == Diversion::KeptEarlier {
                    self.println("Registers saved by the earlier switch are kept");
                }
            }
            SwitchOutcome::Restored(entry) => {
                self.println(format!(
                    "Carrier thread {} restored (sp 0x{:x}, pc 0x{:x})",
                    entry.carrier, entry.saved.stack_pointer, entry.saved.program_counter
                ));
            }
            SwitchOutcome::AlreadyLive { carrier, context } => {
                self.println(format!("Fiber {} is already running on carrier thread {}", context, carrier));
                return Ok(());
            }
            SwitchOutcome::SelectedHost { carrier, context, restored } => {
                self.println(format!(
                    "Switching to carrier thread {}, which is running fiber {}",
                    carrier, context
                ));
                if let Some(entry) = restored {
                    self.println(format!(
                        "Carrier thread {} restored (sp 0x{:x}, pc 0x{:x})",
                        entry.carrier, entry.saved.stack_pointer, entry.saved.program_counter
                    ));
                }
            }
        }
        self.print_newest_frame();
        Ok(())
    }

    fn print_newest_frame(&mut self) {
        if let Some(frame) = walk_frames(&self.target, 1).into_iter().next() {
            self.println(frame.to_string());
        }
    }

    fn cmd_thread(&mut self, n: Option<u32>) -> Result<()> {
        let Some(n) = n else {
            let current = self.target.selected_thread()?;
            self.println(format!("Current carrier thread is {}", current));
            return Ok(());
        };

        match self.target.select_thread(CarrierThreadId(n)) {
            Ok(()) => {
                self.println(format!("Switching to carrier thread {}", n));
                self.print_newest_frame();
                Ok(())
            }
            Err(TargetError::UnknownThread(id)) => {
                self.println(format!("No carrier thread {}.", id));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn cmd_info(&mut self, kind: InfoKind) -> Result<()> {
        match kind {
            InfoKind::Fibers => {
                let layout = self.layout.as_ref().map_err(Clone::clone)?;
                let fibers = CarrierThreadLocator::new(layout).enumerate_occupied(&mut self.target)?;
                if fibers.is_empty() {
                    self.println("No fibers.");
                }
                for fiber in &fibers {
                    let state = if fiber.is_live { ", running" } else { "" };
                    self.println(format!(
                        "{} (carrier thread {}{})",
                        FiberLabel::from(fiber),
                        fiber.carrier,
                        state
                    ));
                }
            }
            InfoKind::Switches => {
                let lines: Vec<String> = self
                    .switches
                    .entries()
                    .map(|entry| {
                        format!(
                            "Carrier thread {}: sp 0x{:x}, pc 0x{:x}",
                            entry.carrier, entry.saved.stack_pointer, entry.saved.program_counter
                        )
                    })
                    .collect();
                if lines.is_empty() {
                    self.println("No pending switches.");
                }
                for line in lines {
                    self.println(line);
                }
            }
        }
        Ok(())
    }

    fn cmd_reload_layout(&mut self) -> Result<()> {
        let max = self.reload_layout()?.max_fibers_per_core;
        self.println(format!("Layout loaded: {} fibers per core", max));
        Ok(())
    }

    /// End the session and hand back the target.
    ///
    /// Pending diversions are not undone: those carrier threads keep the
    /// registers the last switch gave them.
    pub fn into_target(self) -> T {
        for entry in self.switches.entries() {
            tracing::warn!(
                carrier = %entry.carrier,
                sp = entry.saved.stack_pointer,
                pc = entry.saved.program_counter,
                "session ended with a pending switch"
            );
        }
        self.target
    }
}
