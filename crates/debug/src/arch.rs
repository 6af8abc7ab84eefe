//! Architecture abstraction for register fabrication and unwinding.

/// Architecture-specific information needed to fabricate and walk fiber stacks.
#[derive(Debug)]
pub struct ArchInfo {
    /// Architecture name (e.g. "aarch64", "x86_64")
    pub name: &'static str,
    /// Register name the debug target uses for the stack pointer
    pub stack_pointer: &'static str,
    /// Register name the debug target uses for the program counter
    pub program_counter: &'static str,
    /// Size of a pointer in the debuggee, in bytes
    pub pointer_size: u64,
    /// Bytes to subtract from a return address to land within the call instruction.
    /// 4 for AArch64 (fixed-size instructions), 1 for x86_64 (variable-length).
    pub return_addr_decrement: u64,
}

impl ArchInfo {
    /// Look up a supported architecture by name.
    pub fn by_name(name: &str) -> Option<&'static ArchInfo> {
        match name.to_lowercase().as_str() {
            "x86_64" | "x86-64" | "amd64" => Some(&X86_64),
            "aarch64" | "arm64" => Some(&AARCH64),
            _ => None,
        }
    }

    /// Address to use for symbol lookup of the frame at `level`.
    ///
    /// Caller frames hold return addresses, which point just past the call.
    pub fn lookup_address(&self, level: usize, address: u64) -> u64 {
        if level == 0 {
            address
        } else {
            address.saturating_sub(self.return_addr_decrement)
        }
    }
}

/// x86_64 architecture info.
pub static X86_64: ArchInfo = ArchInfo {
    name: "x86_64",
    stack_pointer: "rsp",
    program_counter: "rip",
    pointer_size: 8,
    return_addr_decrement: 1,
};

/// AArch64 architecture info.
pub static AARCH64: ArchInfo = ArchInfo {
    name: "aarch64",
    stack_pointer: "sp",
    program_counter: "pc",
    pointer_size: 8,
    return_addr_decrement: 4,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x86_64_constants() {
        assert_eq!(X86_64.name, "x86_64");
        assert_eq!(X86_64.stack_pointer, "rsp");
        assert_eq!(X86_64.program_counter, "rip");
        assert_eq!(X86_64.pointer_size, 8);
        assert_eq!(X86_64.return_addr_decrement, 1);
    }

    #[test]
    fn test_aarch64_constants() {
        assert_eq!(AARCH64.name, "aarch64");
        assert_eq!(AARCH64.stack_pointer, "sp");
        assert_eq!(AARCH64.program_counter, "pc");
        assert_eq!(AARCH64.return_addr_decrement, 4);
    }

    #[test]
    fn test_by_name() {
        assert_eq!(ArchInfo::by_name("x86_64").map(|a| a.name), Some("x86_64"));
        assert_eq!(ArchInfo::by_name("AMD64").map(|a| a.name), Some("x86_64"));
        assert_eq!(ArchInfo::by_name("arm64").map(|a| a.name), Some("aarch64"));
        assert!(ArchInfo::by_name("riscv64").is_none());
        assert!(ArchInfo::by_name("").is_none());
    }

    #[test]
    fn test_lookup_address() {
        assert_eq!(X86_64.lookup_address(0, 0x1000), 0x1000);
        assert_eq!(X86_64.lookup_address(1, 0x1000), 0x0fff);
        assert_eq!(AARCH64.lookup_address(3, 0x1000), 0x0ffc);
        assert_eq!(AARCH64.lookup_address(1, 0), 0);
    }
}
