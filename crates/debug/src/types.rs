//! Core fiber inspection types

use std::fmt;

/// Dense fiber identifier: `core * maxFibersPerCore + slot`.
///
/// Derived on demand. Slots are reused once a fiber exits, so an id must not
/// be cached across a resume of the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(pub u64);

impl FiberId {
    /// Build the id of `slot` on `core_id`.
    pub fn from_parts(core_id: u64, slot: usize, max_fibers_per_core: u64) -> Self {
        FiberId(core_id * max_fibers_per_core + slot as u64)
    }

    /// Split into `(core_id, slot)`.
    pub fn decompose(self, max_fibers_per_core: u64) -> (u64, usize) {
        (self.0 / max_fibers_per_core, (self.0 % max_fibers_per_core) as usize)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of one fiber's saved-state record in debuggee memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextHandle(pub u64);

impl ContextHandle {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Kernel-visible thread in the debuggee, as numbered by the debug target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CarrierThreadId(pub u32);

impl fmt::Display for CarrierThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The register pair that register fabrication overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedRegisters {
    pub stack_pointer: u64,
    pub program_counter: u64,
}

/// Source position resolved from the line table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// A single frame produced by the unwinder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Depth from the newest frame (0)
    pub level: usize,
    /// Program counter, or return address for caller frames
    pub address: u64,
    /// Stack pointer on entry to this frame, used by the target to find the caller
    pub stack_pointer: u64,
    /// Function name, if the symbol table covers `address`
    pub function: Option<String>,
    /// Present only when the line table resolved `address`
    pub location: Option<SourceLocation>,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} 0x{:x}", self.level, self.address)?;
        match (&self.function, &self.location) {
            (Some(function), Some(loc)) => write!(f, " {} at {}:{}", function, loc.file, loc.line),
            (None, Some(loc)) => write!(f, " ?? at {}:{}", loc.file, loc.line),
            (Some(function), None) => write!(f, " {}", function),
            (None, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fiber_id_decompose() {
        assert_eq!(FiberId(130).decompose(64), (2, 2));
        assert_eq!(FiberId(0).decompose(56), (0, 0));
        assert_eq!(FiberId(55).decompose(56), (0, 55));
        assert_eq!(FiberId(56).decompose(56), (1, 0));
    }

    #[test]
    fn test_fiber_id_from_parts() {
        assert_eq!(FiberId::from_parts(2, 2, 64), FiberId(130));
        for id in 0..300 {
            let (core, slot) = FiberId(id).decompose(7);
            assert_eq!(FiberId::from_parts(core, slot, 7), FiberId(id));
        }
    }

    #[test]
    fn test_context_handle_display() {
        assert_eq!(ContextHandle(0x7f00_1000).to_string(), "0x7f001000");
        assert!(ContextHandle(0).is_null());
        assert!(!ContextHandle(8).is_null());
    }

    #[test]
    fn test_frame_display() {
        let mut frame = Frame {
            level: 0,
            address: 0x401000,
            stack_pointer: 0x7000,
            function: None,
            location: None,
        };
        assert_eq!(frame.to_string(), "#0 0x401000");

        frame.function = Some("worker".to_string());
        assert_eq!(frame.to_string(), "#0 0x401000 worker");

        frame.location = Some(SourceLocation { file: "worker.cc".to_string(), line: 42 });
        assert_eq!(frame.to_string(), "#0 0x401000 worker at worker.cc:42");

        frame.function = None;
        assert_eq!(frame.to_string(), "#0 0x401000 ?? at worker.cc:42");
    }
}
