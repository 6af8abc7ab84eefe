//! Unwinding suspended fibers by fabricating carrier-thread registers.
//!
//! A suspended fiber has no registers of its own, only a saved stack
//! pointer. Pointing a carrier thread's stack pointer just past the
//! context switch's saved-register region, and its program counter at the
//! resume anchor, makes an ordinary unwinder walk the fiber's stack. The
//! carrier's real registers are put back on every exit path by
//! [`RegisterGuard`].

use crate::error::{Result, TargetError};
use crate::layout::RuntimeLayout;
use crate::runtime::local_core;
use crate::target::DebugTarget;
use crate::types::{ContextHandle, Frame, SavedRegisters};
use crate::unwind::walk_frames;

/// Scoped ownership of the selected carrier thread's stack pointer and
/// program counter.
///
/// [`RegisterGuard::release`] writes the captured values back and reports
/// failure. If the guard is dropped without being released (early return,
/// `?`, panic) the values are written back from `Drop` and a failure is
/// logged.
pub struct RegisterGuard<'t, T: DebugTarget + ?Sized> {
    target: &'t mut T,
    saved: SavedRegisters,
    released: bool,
}

impl<'t, T: DebugTarget + ?Sized> RegisterGuard<'t, T> {
    /// Capture the current registers, then install `registers`.
    pub fn install(target: &'t mut T, registers: SavedRegisters) -> Result<Self, TargetError> {
        let saved = target.saved_registers()?;
        let mut guard = Self { target, saved, released: false };
        guard.target.install_registers(registers)?;
        Ok(guard)
    }

    /// Registers that will be written back.
    pub fn saved(&self) -> SavedRegisters {
        self.saved
    }

    pub fn target(&self) -> &T {
        &*self.target
    }

    /// Leave the installed registers in place and hand back the captured
    /// ones.
    pub fn commit(mut self) -> SavedRegisters {
        self.released = true;
        self.saved
    }

    /// Write the captured registers back.
    pub fn release(mut self) -> Result<(), TargetError> {
        self.released = true;
        self.target.install_registers(self.saved)
    }
}

impl<T: DebugTarget + ?Sized> Drop for RegisterGuard<'_, T> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.target.install_registers(self.saved) {
            tracing::error!(
                error = %e,
                sp = self.saved.stack_pointer,
                pc = self.saved.program_counter,
                "failed to restore carrier thread registers"
            );
        }
    }
}

/// Produces backtraces for fiber contexts on the selected carrier thread.
pub struct ContextEmulator<'a> {
    layout: &'a RuntimeLayout,
    max_frames: usize,
}

impl<'a> ContextEmulator<'a> {
    pub fn new(layout: &'a RuntimeLayout, max_frames: usize) -> Self {
        Self { layout, max_frames }
    }

    /// Backtrace `context` using the selected carrier thread.
    ///
    /// If `context` is the carrier's loaded context its live registers are
    /// walked directly; otherwise registers are fabricated for the duration
    /// of the walk. The carrier's registers are identical before and after.
    pub fn unwind<T: DebugTarget + ?Sized>(&self, target: &mut T, context: ContextHandle) -> Result<Vec<Frame>> {
        self.unwind_with_live(target, context, None)
    }

    /// Like [`ContextEmulator::unwind`], for a carrier whose registers have
    /// been diverted: `live` holds its real registers, which are put in
    /// place if `context` turns out to be the loaded one.
    pub fn unwind_with_live<T: DebugTarget + ?Sized>(
        &self,
        target: &mut T,
        context: ContextHandle,
        live: Option<SavedRegisters>,
    ) -> Result<Vec<Frame>> {
        let loaded = local_core(&*target, self.layout)?.map(|core| core.loaded_context);

        let registers = if loaded == Some(context) {
            match live {
                Some(live) => live,
                None => return Ok(walk_frames(&*target, self.max_frames)),
            }
        } else {
            self.layout.fabricated_registers(&*target, context)?
        };

        let guard = RegisterGuard::install(target, registers)?;
        let frames = walk_frames(guard.target(), self.max_frames);
        guard.release()?;
        Ok(frames)
    }
}
