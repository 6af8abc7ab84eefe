//! Reading the runtime's per-core scheduling records out of debuggee memory.

use crate::error::TargetError;
use crate::layout::RuntimeLayout;
use crate::target::{offset_address, DebugTarget, FieldInfo};
use crate::types::ContextHandle;

/// One core record as it was at the moment it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreRecord {
    /// Address of the record itself
    pub address: u64,
    /// Core id; negative on threads that never joined the runtime
    pub id: i64,
    /// Pointer to the occupancy word (null on non-fiber threads)
    pub occupancy_word: u64,
    /// Slot bitmask, already narrowed to `maxFibersPerCore` bits
    pub occupied: u64,
    pub loaded_context: ContextHandle,
    /// Base of the array of context pointers
    pub slots: u64,
}

fn sign_extend(raw: u64, size: u64) -> i64 {
    let shift = 64 - 8 * size.clamp(1, 8);
    ((raw << shift) as i64) >> shift
}

impl CoreRecord {
    pub fn read<T: DebugTarget + ?Sized>(
        target: &T,
        layout: &RuntimeLayout,
        address: u64,
    ) -> Result<Self, TargetError> {
        let f = &layout.core;
        let field = |base: u64, info: FieldInfo| -> Result<u64, TargetError> {
            target.read_scalar(offset_address(base, info.offset, info.size)?, info.size)
        };
        let id = sign_extend(field(address, f.id)?, f.id.size);
        let occupancy_word = field(address, f.occupancy)?;
        let occupied = if occupancy_word == 0 {
            0
        } else {
            field(occupancy_word, layout.occupied)? & layout.slot_mask()
        };
        let loaded_context = ContextHandle(field(address, f.loaded_context)?);
        let slots = field(address, f.slots)?;
        Ok(Self { address, id, occupancy_word, occupied, loaded_context, slots })
    }

    /// Whether this record belongs to a carrier thread that hosts fibers.
    pub fn is_fiber_core(&self) -> bool {
        self.id >= 0 && self.occupancy_word != 0
    }

    pub fn core_id(&self) -> u64 {
        self.id.max(0) as u64
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        slot < 64 && (self.occupied >> slot) & 1 == 1
    }

    /// Context pointer stored in `slot`. Only meaningful while the slot's
    /// occupancy bit is set.
    pub fn slot_context<T: DebugTarget + ?Sized>(
        &self,
        target: &T,
        layout: &RuntimeLayout,
        slot: usize,
    ) -> Result<ContextHandle, TargetError> {
        let address = offset_address(self.slots, slot as u64 * layout.pointer_size, layout.pointer_size)?;
        Ok(ContextHandle(target.read_pointer(address)?))
    }
}

/// Set bits of `mask` below `width`, in increasing slot order.
pub fn occupied_slots(mask: u64, width: u64) -> impl Iterator<Item = usize> {
    (0..width.min(64) as usize).filter(move |&slot| (mask >> slot) & 1 == 1)
}

/// The runtime's table of core pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreTable {
    pub start: u64,
    pub len: u64,
}

impl CoreTable {
    pub fn read<T: DebugTarget + ?Sized>(target: &T, layout: &RuntimeLayout) -> Result<Self, TargetError> {
        let start = target.evaluate(&layout.core_table_start)?.value;
        let finish = target.evaluate(&layout.core_table_finish)?.value;
        let len = finish.saturating_sub(start) / layout.pointer_size;
        Ok(Self { start, len })
    }

    /// Address of the core record for `core_id`. Caller checks the bound.
    pub fn core_address<T: DebugTarget + ?Sized>(
        &self,
        target: &T,
        layout: &RuntimeLayout,
        core_id: u64,
    ) -> Result<u64, TargetError> {
        let offset = core_id
            .checked_mul(layout.pointer_size)
            .ok_or(TargetError::Memory { address: self.start, len: layout.pointer_size as usize })?;
        target.read_pointer(offset_address(self.start, offset, layout.pointer_size)?)
    }
}

/// The selected carrier thread's own core, if it hosts one.
pub fn local_core<T: DebugTarget + ?Sized>(
    target: &T,
    layout: &RuntimeLayout,
) -> Result<Option<CoreRecord>, TargetError> {
    let address = target.evaluate(&layout.local_core)?.value;
    if address == 0 {
        return Ok(None);
    }
    let core = CoreRecord::read(target, layout, address)?;
    Ok(core.is_fiber_core().then_some(core))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutConfig;
    use crate::snapshot::tests::arachne_snapshot;
    use crate::types::CarrierThreadId;

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0xffff_ffff, 4), -1);
        assert_eq!(sign_extend(7, 4), 7);
        assert_eq!(sign_extend(0x80, 1), -128);
        assert_eq!(sign_extend(u64::MAX, 8), -1);
    }

    #[test]
    fn test_occupied_slots() {
        assert_eq!(occupied_slots(0b0101, 4).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(occupied_slots(0, 4).count(), 0);
        assert_eq!(occupied_slots(0b1111_0000, 4).count(), 0);
        assert_eq!(occupied_slots(u64::MAX, 64).count(), 64);
        assert_eq!(occupied_slots(1 << 63, 64).collect::<Vec<_>>(), vec![63]);
    }

    #[test]
    fn test_occupied_slots_matches_mask() {
        for mask in 0u64..256 {
            let slots: Vec<usize> = occupied_slots(mask, 8).collect();
            let rebuilt = slots.iter().fold(0u64, |acc, s| acc | 1 << s);
            assert_eq!(rebuilt, mask);
            assert!(slots.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_read_core_record() {
        let target = arachne_snapshot();
        let layout = RuntimeLayout::load(&target, &LayoutConfig::default()).unwrap();
        let core = CoreRecord::read(&target, &layout, 0x2000).unwrap();
        assert_eq!(core.id, 0);
        assert!(core.is_fiber_core());
        // the count byte above the mask is dropped
        assert_eq!(core.occupied, 0b0101);
        assert_eq!(core.loaded_context, ContextHandle(0x3200));
        assert!(core.is_occupied(2));
        assert!(!core.is_occupied(1));
        assert_eq!(core.slot_context(&target, &layout, 2).unwrap(), ContextHandle(0x3200));
    }

    #[test]
    fn test_core_table() {
        let target = arachne_snapshot();
        let layout = RuntimeLayout::load(&target, &LayoutConfig::default()).unwrap();
        let table = CoreTable::read(&target, &layout).unwrap();
        assert_eq!(table, CoreTable { start: 0x1000, len: 2 });
        assert_eq!(table.core_address(&target, &layout, 1).unwrap(), 0x2100);
    }

    #[test]
    fn test_local_core() {
        let mut target = arachne_snapshot();
        let layout = RuntimeLayout::load(&target, &LayoutConfig::default()).unwrap();
        assert_eq!(local_core(&target, &layout).unwrap().map(|c| c.id), Some(0));
        target.select_thread(CarrierThreadId(2)).unwrap();
        assert_eq!(local_core(&target, &layout).unwrap().map(|c| c.id), Some(1));
        target.select_thread(CarrierThreadId(3)).unwrap();
        assert_eq!(local_core(&target, &layout).unwrap(), None);
    }
}
