//! Fiber inspection for a paused process
//!
//! This crate reconstructs the call stacks of fibers of a cooperative
//! user-level threading runtime (Arachne by default) from outside the
//! process. Suspended fibers are unwound by briefly pointing a carrier
//! thread's registers at the fiber's saved state; the real registers are
//! always put back.
//!
//! The main types are:
//! - [`Session`] - Command dispatch over a [`DebugTarget`]
//! - [`RuntimeLayout`] - The runtime's symbols and field placements
//! - [`FiberResolver`] - Fiber ids and handles to context records
//! - [`ContextEmulator`] - Register fabrication for unwinding
//! - [`SessionSwitchTable`] - Diversions left in place for inspection

pub mod arch;
pub mod commands;
pub mod emulator;
pub mod error;
pub mod layout;
pub mod locator;
pub mod resolver;
pub mod runtime;
pub mod script;
pub mod session;
pub mod snapshot;
pub mod switch;
pub mod target;
pub mod types;
pub mod unwind;

pub use arch::ArchInfo;
pub use commands::{Command, FiberArg, InfoKind};
pub use emulator::{ContextEmulator, RegisterGuard};
pub use error::{FiberError, LayoutConfigError, TargetError};
pub use layout::{LayoutConfig, RuntimeLayout};
pub use locator::{CarrierThreadLocator, OccupiedFiber, SelectionGuard};
pub use resolver::{FiberResolver, ResolvedFiber};
pub use runtime::CoreRecord;
pub use session::{FiberBacktrace, FiberLabel, Session, SwitchOutcome};
pub use snapshot::SnapshotTarget;
pub use switch::{Diversion, SessionSwitchTable, SwitchEntry};
pub use target::{DebugTarget, FieldInfo, Value};
pub use types::{CarrierThreadId, ContextHandle, FiberId, Frame, SavedRegisters, SourceLocation};
pub use unwind::{FrameWalker, DEFAULT_MAX_FRAMES};
