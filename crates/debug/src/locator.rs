//! Finding which carrier thread hosts a fiber, and listing every occupied slot.

use crate::error::{FiberError, Result, TargetError};
use crate::layout::RuntimeLayout;
use crate::runtime::{local_core, occupied_slots, CoreRecord};
use crate::target::DebugTarget;
use crate::types::{CarrierThreadId, ContextHandle, FiberId};

/// Remembers the selected carrier thread and reselects it when dropped.
///
/// Call [`SelectionGuard::restore`] to observe reselection failures, or
/// [`SelectionGuard::keep`] to leave the current selection in place.
pub struct SelectionGuard<'t, T: DebugTarget + ?Sized> {
    target: &'t mut T,
    original: CarrierThreadId,
    armed: bool,
}

impl<'t, T: DebugTarget + ?Sized> SelectionGuard<'t, T> {
    pub fn new(target: &'t mut T) -> Result<Self, TargetError> {
        let original = target.selected_thread()?;
        Ok(Self { target, original, armed: true })
    }

    pub fn original(&self) -> CarrierThreadId {
        self.original
    }

    /// Select `carrier`; a no-op when it is already selected.
    pub fn select(&mut self, carrier: CarrierThreadId) -> Result<(), TargetError> {
        if self.target.selected_thread()? != carrier {
            self.target.select_thread(carrier)?;
        }
        Ok(())
    }

    pub fn target(&self) -> &T {
        &*self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut *self.target
    }

    /// Reselect the original carrier thread.
    pub fn restore(mut self) -> Result<(), TargetError> {
        self.armed = false;
        self.reselect()
    }

    /// Keep whatever is selected now.
    pub fn keep(mut self) {
        self.armed = false;
    }

    fn reselect(&mut self) -> Result<(), TargetError> {
        if self.target.selected_thread()? != self.original {
            self.target.select_thread(self.original)?;
        }
        Ok(())
    }
}

impl<T: DebugTarget + ?Sized> Drop for SelectionGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.reselect() {
            tracing::error!(carrier = %self.original, error = %e, "failed to reselect carrier thread");
        }
    }
}

/// One set occupancy bit, with the carrier thread hosting its core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupiedFiber {
    pub carrier: CarrierThreadId,
    pub fiber: FiberId,
    pub core_id: u64,
    pub slot: usize,
    pub context: ContextHandle,
    /// The context is its core's loaded context, running on `carrier`.
    pub is_live: bool,
}

pub struct CarrierThreadLocator<'a> {
    layout: &'a RuntimeLayout,
}

impl<'a> CarrierThreadLocator<'a> {
    pub fn new(layout: &'a RuntimeLayout) -> Self {
        Self { layout }
    }

    /// The first carrier thread whose core has `context` loaded.
    ///
    /// Carrier threads whose core cannot be read are skipped. The selection
    /// is the same on return as on entry.
    pub fn locate_host<T: DebugTarget + ?Sized>(
        &self,
        target: &mut T,
        context: ContextHandle,
    ) -> Result<CarrierThreadId> {
        let carriers = target.carrier_threads()?;
        let mut selection = SelectionGuard::new(target)?;
        let mut host = None;

        for carrier in carriers {
            match self.core_on(&mut selection, carrier) {
                Ok(Some(core)) if core.loaded_context == context => {
                    host = Some(carrier);
                    break;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(carrier = %carrier, error = %e, "skipping carrier thread"),
            }
        }

        selection.restore()?;
        host.ok_or(FiberError::HostNotFound(context))
    }

    /// Every occupied slot of every carrier thread hosting a core, in
    /// carrier thread order and increasing slot order within a core.
    pub fn enumerate_occupied<T: DebugTarget + ?Sized>(&self, target: &mut T) -> Result<Vec<OccupiedFiber>> {
        let carriers = target.carrier_threads()?;
        let mut selection = SelectionGuard::new(target)?;
        let mut fibers = Vec::new();

        for carrier in carriers {
            match self.core_on(&mut selection, carrier) {
                Ok(Some(core)) => fibers.extend(self.occupied_on(selection.target(), carrier, &core)),
                Ok(None) => {}
                Err(e) => tracing::warn!(carrier = %carrier, error = %e, "cannot read core of carrier thread"),
            }
        }

        selection.restore()?;
        Ok(fibers)
    }

    /// Occupied slots of the selected carrier thread's core.
    pub fn local_occupied<T: DebugTarget + ?Sized>(&self, target: &T) -> Result<Vec<OccupiedFiber>> {
        let carrier = target.selected_thread()?;
        let core = local_core(target, self.layout)?.ok_or(FiberError::NotAFiberCore(carrier))?;
        Ok(self.occupied_on(target, carrier, &core))
    }

    fn core_on<T: DebugTarget + ?Sized>(
        &self,
        selection: &mut SelectionGuard<'_, T>,
        carrier: CarrierThreadId,
    ) -> Result<Option<CoreRecord>, TargetError> {
        selection.select(carrier)?;
        local_core(selection.target(), self.layout)
    }

    fn occupied_on<T: DebugTarget + ?Sized>(
        &self,
        target: &T,
        carrier: CarrierThreadId,
        core: &CoreRecord,
    ) -> Vec<OccupiedFiber> {
        let max = self.layout.max_fibers_per_core;
        occupied_slots(core.occupied, max)
            .filter_map(|slot| match core.slot_context(target, self.layout, slot) {
                Ok(context) => Some(OccupiedFiber {
                    carrier,
                    fiber: FiberId::from_parts(core.core_id(), slot, max),
                    core_id: core.core_id(),
                    slot,
                    context,
                    is_live: context == core.loaded_context,
                }),
                Err(e) => {
                    tracing::warn!(core = core.core_id(), slot, error = %e, "cannot read fiber slot");
                    None
                }
            })
            .collect()
    }
}
