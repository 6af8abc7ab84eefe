//! Persistent carrier-thread diversions for the switch command.
//!
//! Unlike a backtrace, a switch leaves the carrier thread's registers
//! pointing at the fiber so the operator can keep inspecting it. The
//! registers the carrier had before its first diversion are kept here until
//! an explicit restore.

use crate::emulator::RegisterGuard;
use crate::error::{FiberError, Result};
use crate::layout::RuntimeLayout;
use crate::locator::SelectionGuard;
use crate::target::DebugTarget;
use crate::types::{CarrierThreadId, ContextHandle, SavedRegisters};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchEntry {
    pub carrier: CarrierThreadId,
    pub saved: SavedRegisters,
}

/// What a divert did with the carrier's pre-switch registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diversion {
    /// First diversion: the carrier's registers were recorded.
    Recorded,
    /// Already diverted: the registers recorded by the earlier diversion
    /// stay, the ones just replaced are not recoverable.
    KeptEarlier,
}

/// At most one pending diversion per carrier thread.
#[derive(Debug, Default)]
pub struct SessionSwitchTable {
    entries: BTreeMap<CarrierThreadId, SavedRegisters>,
}

impl SessionSwitchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `carrier`'s registers at `context` and leave them there.
    ///
    /// The selection is unchanged on return. On failure nothing is recorded
    /// and the carrier's registers are as they were.
    pub fn divert<T: DebugTarget + ?Sized>(
        &mut self,
        target: &mut T,
        layout: &RuntimeLayout,
        carrier: CarrierThreadId,
        context: ContextHandle,
    ) -> Result<Diversion> {
        let mut selection = SelectionGuard::new(target)?;
        selection.select(carrier)?;

        let fabricated = layout.fabricated_registers(selection.target(), context)?;
        let saved = RegisterGuard::install(selection.target_mut(), fabricated)?.commit();

        let diversion = if self.entries.contains_key(&carrier) {
            Diversion::KeptEarlier
        } else {
            self.entries.insert(carrier, saved);
            Diversion::Recorded
        };
        tracing::debug!(carrier = %carrier, context = %context, ?diversion, "carrier thread diverted");

        selection.restore()?;
        Ok(diversion)
    }

    /// Write back the registers recorded for `carrier` and forget them.
    ///
    /// The entry is kept if the write fails, so the restore can be retried.
    pub fn restore<T: DebugTarget + ?Sized>(&mut self, target: &mut T, carrier: CarrierThreadId) -> Result<SwitchEntry> {
        let saved = self
            .entries
            .get(&carrier)
            .copied()
            .ok_or(FiberError::NoPendingDiversion(carrier))?;

        let mut selection = SelectionGuard::new(target)?;
        selection.select(carrier)?;
        selection.target_mut().install_registers(saved)?;
        self.entries.remove(&carrier);
        selection.restore()?;

        tracing::debug!(carrier = %carrier, "carrier thread restored");
        Ok(SwitchEntry { carrier, saved })
    }

    pub fn pending(&self, carrier: CarrierThreadId) -> Option<SwitchEntry> {
        self.entries.get(&carrier).map(|&saved| SwitchEntry { carrier, saved })
    }

    /// Pending diversions in carrier thread order.
    pub fn entries(&self) -> impl Iterator<Item = SwitchEntry> + '_ {
        self.entries.iter().map(|(&carrier, &saved)| SwitchEntry { carrier, saved })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
