//! Target abstraction for the paused debuggee
//!
//! The [`DebugTarget`] trait abstracts over the debugger backend (a live
//! debugger connection, a core file, a recorded snapshot), so fiber
//! resolution and register fabrication stay backend-independent.

use crate::arch::ArchInfo;
use crate::error::TargetError;
use crate::types::{CarrierThreadId, Frame, SavedRegisters};

/// A typed value produced by evaluating an expression in the debuggee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    /// Raw scalar value (an address for pointer types)
    pub value: u64,
    /// Declared type as printed by the debugger (e.g. "Arachne::ThreadContext *")
    pub type_name: String,
}

/// Placement of a struct field in debuggee memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub offset: u64,
    pub size: u64,
}

/// `base + offset`, for a read of `len` bytes. Pointers come from debuggee
/// memory, so an address past the end of the address space is a memory fault.
pub fn offset_address(base: u64, offset: u64, len: u64) -> Result<u64, TargetError> {
    base.checked_add(offset)
        .ok_or(TargetError::Memory { address: base, len: len as usize })
}

/// Abstract interface to a paused process.
///
/// The debug control channel exposes carrier threads one at a time:
/// register access and unwinding always apply to the selected thread.
pub trait DebugTarget {
    /// Evaluate an expression in the context of the selected carrier thread.
    fn evaluate(&self, expr: &str) -> Result<Value, TargetError>;

    /// Resolve a field of a named struct type.
    fn field(&self, type_name: &str, field: &str) -> Result<FieldInfo, TargetError>;

    /// Read `len` bytes of debuggee memory.
    fn read_memory(&self, address: u64, len: usize) -> Result<Vec<u8>, TargetError>;

    /// All carrier threads, in the target's numbering order.
    fn carrier_threads(&self) -> Result<Vec<CarrierThreadId>, TargetError>;

    /// The currently selected carrier thread.
    fn selected_thread(&self) -> Result<CarrierThreadId, TargetError>;

    /// Make `id` the selected carrier thread.
    fn select_thread(&mut self, id: CarrierThreadId) -> Result<(), TargetError>;

    /// Read a register of the selected carrier thread.
    fn register(&self, name: &str) -> Result<u64, TargetError>;

    /// Write a register of the selected carrier thread (debugger-side state only).
    fn set_register(&mut self, name: &str, value: u64) -> Result<(), TargetError>;

    /// The innermost frame of the selected carrier thread's current registers.
    fn newest_frame(&self) -> Result<Frame, TargetError>;

    /// The caller of `frame`, or `None` at the end of the chain.
    fn older_frame(&self, frame: &Frame) -> Result<Option<Frame>, TargetError>;

    /// Get the architecture info for this target.
    fn arch(&self) -> &'static ArchInfo;

    /// Read a little-endian unsigned scalar of `size` bytes (1..=8).
    fn read_scalar(&self, address: u64, size: u64) -> Result<u64, TargetError> {
        let size = size.clamp(1, 8) as usize;
        let bytes = self.read_memory(address, size)?;
        if bytes.len() < size {
            return Err(TargetError::Memory { address, len: size });
        }
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&bytes[..size]);
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a pointer-sized value.
    fn read_pointer(&self, address: u64) -> Result<u64, TargetError> {
        self.read_scalar(address, self.arch().pointer_size)
    }

    /// Capture the selected thread's stack pointer and program counter.
    fn saved_registers(&self) -> Result<SavedRegisters, TargetError> {
        let arch = self.arch();
        Ok(SavedRegisters {
            stack_pointer: self.register(arch.stack_pointer)?,
            program_counter: self.register(arch.program_counter)?,
        })
    }

    /// Write both registers of `regs`. Both writes are attempted; the first
    /// failure is returned.
    fn install_registers(&mut self, regs: SavedRegisters) -> Result<(), TargetError> {
        let arch = self.arch();
        let sp = self.set_register(arch.stack_pointer, regs.stack_pointer);
        let pc = self.set_register(arch.program_counter, regs.program_counter);
        sp.and(pc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_address() {
        assert_eq!(offset_address(0x2000, 0x18, 8), Ok(0x2018));
        assert_eq!(
            offset_address(u64::MAX - 7, 16, 8),
            Err(TargetError::Memory { address: u64::MAX - 7, len: 8 })
        );
    }
}
