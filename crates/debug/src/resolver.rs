//! Mapping fiber ids and raw handles to context records.

use crate::error::{FiberError, Result};
use crate::layout::RuntimeLayout;
use crate::runtime::{CoreRecord, CoreTable};
use crate::target::{DebugTarget, Value};
use crate::types::{ContextHandle, FiberId};

/// Where a fiber lives right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFiber {
    pub fiber: FiberId,
    pub core: CoreRecord,
    pub slot: usize,
    pub context: ContextHandle,
    /// The fiber is its core's loaded context: its registers are some
    /// carrier thread's live registers.
    pub is_live: bool,
}

impl ResolvedFiber {
    pub fn core_id(&self) -> u64 {
        self.core.core_id()
    }
}

/// Resolves fibers against a loaded [`RuntimeLayout`].
pub struct FiberResolver<'a> {
    layout: &'a RuntimeLayout,
}

impl<'a> FiberResolver<'a> {
    pub fn new(layout: &'a RuntimeLayout) -> Self {
        Self { layout }
    }

    /// Resolve a numeric fiber id.
    ///
    /// Ids at or above the sanity ceiling fail before any memory is read.
    pub fn resolve<T: DebugTarget + ?Sized>(&self, target: &T, fiber: FiberId) -> Result<ResolvedFiber> {
        let (core_id, slot) = fiber.decompose(self.layout.max_fibers_per_core);
        if fiber.0 >= self.layout.id_ceiling() {
            return Err(FiberError::CoreOutOfRange { fiber, core_id, cores: self.layout.max_cores });
        }

        let table = CoreTable::read(target, self.layout)?;
        if core_id >= table.len {
            return Err(FiberError::CoreOutOfRange { fiber, core_id, cores: table.len });
        }

        let address = table.core_address(target, self.layout, core_id)?;
        let core = CoreRecord::read(target, self.layout, address)?;
        if !core.is_fiber_core() || !core.is_occupied(slot) {
            return Err(FiberError::FiberNotFound(fiber));
        }

        let context = core.slot_context(target, self.layout, slot)?;
        Ok(ResolvedFiber {
            fiber,
            core,
            slot,
            context,
            is_live: context == core.loaded_context,
        })
    }

    /// Validate a caller-supplied context handle.
    ///
    /// This bypasses id arithmetic, so a handle from earlier output keeps
    /// naming the same record even if its slot number was since reused.
    pub fn resolve_handle(&self, value: &Value) -> Result<ContextHandle> {
        let found = value.type_name.trim();
        if found != self.layout.context_pointer_type {
            return Err(FiberError::TypeMismatch {
                expected: self.layout.context_pointer_type.clone(),
                found: found.to_string(),
            });
        }
        if value.value == 0 {
            return Err(FiberError::NullHandle);
        }
        Ok(ContextHandle(value.value))
    }
}
