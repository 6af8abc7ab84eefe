//! Debug target backed by a recorded process snapshot.
//!
//! A snapshot is a JSON document holding everything fiber inspection reads:
//! an expression table, struct field placements, memory words, carrier
//! threads with their registers, and a function table used both for
//! symbolization and for a simple fixed-frame-size unwinder.

use crate::arch::ArchInfo;
use crate::error::TargetError;
use crate::target::{DebugTarget, FieldInfo, Value};
use crate::types::{CarrierThreadId, Frame, SourceLocation};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// An integer written either as a JSON number or as a `"0x..."` string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "NumberRepr")]
pub struct Number(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Int(u64),
    Text(String),
}

impl TryFrom<NumberRepr> for Number {
    type Error = String;

    fn try_from(repr: NumberRepr) -> Result<Self, Self::Error> {
        match repr {
            NumberRepr::Int(n) => Ok(Number(n)),
            NumberRepr::Text(s) => parse_number(&s)
                .map(Number)
                .ok_or_else(|| format!("invalid number: {}", s)),
        }
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer.
pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse::<u64>().ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolEntry {
    pub value: Number,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldEntry {
    pub offset: Number,
    pub size: Number,
}

/// A run of 64-bit little-endian words starting at `address`.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryRegion {
    pub address: Number,
    pub words: Vec<Number>,
}

/// Function covering `[low, high)`.
///
/// The return address of a frame in this function sits `frame_size` bytes
/// above the frame's stack pointer.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionEntry {
    pub name: String,
    pub low: Number,
    pub high: Number,
    #[serde(default)]
    pub frame_size: Number,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadEntry {
    pub id: u32,
    pub registers: BTreeMap<String, Number>,
    /// Thread-local expressions, consulted before the global table
    #[serde(default)]
    pub locals: BTreeMap<String, SymbolEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    pub arch: String,
    #[serde(default)]
    pub symbols: BTreeMap<String, SymbolEntry>,
    #[serde(default)]
    pub types: BTreeMap<String, BTreeMap<String, FieldEntry>>,
    #[serde(default)]
    pub memory: Vec<MemoryRegion>,
    #[serde(default)]
    pub functions: Vec<FunctionEntry>,
    pub threads: Vec<ThreadEntry>,
    #[serde(default)]
    pub selected: Option<u32>,
}

/// [`DebugTarget`] over a [`Snapshot`].
///
/// Register writes only change the snapshot's copy, matching a debugger that
/// edits its own view of a stopped thread.
#[derive(Debug, Clone)]
pub struct SnapshotTarget {
    arch: &'static ArchInfo,
    snapshot: Snapshot,
    selected: usize,
}

impl SnapshotTarget {
    pub fn new(snapshot: Snapshot) -> Result<Self, TargetError> {
        let arch = ArchInfo::by_name(&snapshot.arch)
            .ok_or_else(|| TargetError::Snapshot(format!("unsupported arch: {}", snapshot.arch)))?;
        if snapshot.threads.is_empty() {
            return Err(TargetError::Snapshot("no threads".to_string()));
        }
        let selected = match snapshot.selected {
            Some(id) => snapshot
                .threads
                .iter()
                .position(|t| t.id == id)
                .ok_or(TargetError::UnknownThread(CarrierThreadId(id)))?,
            None => 0,
        };
        Ok(Self { arch, snapshot, selected })
    }

    pub fn from_json(text: &str) -> Result<Self, TargetError> {
        let snapshot: Snapshot =
            serde_json::from_str(text).map_err(|e| TargetError::Snapshot(e.to_string()))?;
        Self::new(snapshot)
    }

    pub fn from_file(path: &Path) -> Result<Self, TargetError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TargetError::Snapshot(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    fn thread(&self) -> &ThreadEntry {
        &self.snapshot.threads[self.selected]
    }

    fn register_name(&self, name: &str) -> String {
        match name.trim_start_matches('$') {
            "pc" => self.arch.program_counter.to_string(),
            "sp" => self.arch.stack_pointer.to_string(),
            other => other.to_string(),
        }
    }

    fn function_at(&self, address: u64) -> Option<&FunctionEntry> {
        self.snapshot
            .functions
            .iter()
            .find(|f| address >= f.low.0 && address < f.high.0)
    }

    fn describe(&self, level: usize, address: u64, stack_pointer: u64) -> Frame {
        let func = self.function_at(self.arch.lookup_address(level, address));
        let location = func.and_then(|f| match (&f.file, f.line) {
            (Some(file), Some(line)) if line != 0 => Some(SourceLocation { file: file.clone(), line }),
            _ => None,
        });
        Frame {
            level,
            address,
            stack_pointer,
            function: func.map(|f| f.name.clone()),
            location,
        }
    }

    /// Evaluate `(type) number` casts and bare integer literals.
    fn evaluate_literal(expr: &str) -> Option<Value> {
        if let Some(rest) = expr.strip_prefix('(') {
            let close = rest.find(')')?;
            let type_name = rest[..close].trim();
            let value = parse_number(&rest[close + 1..])?;
            return Some(Value { value, type_name: normalize_type(type_name) });
        }
        parse_number(expr).map(|value| Value { value, type_name: "long".to_string() })
    }
}

/// Print pointer types the way debuggers do: `T *`.
fn normalize_type(type_name: &str) -> String {
    let base = type_name.trim_end_matches(|c: char| c == '*' || c.is_whitespace());
    let stars = type_name.len() - type_name.trim_end_matches('*').len();
    if stars == 0 || base.is_empty() {
        type_name.to_string()
    } else {
        format!("{} {}", base, "*".repeat(stars))
    }
}

impl DebugTarget for SnapshotTarget {
    fn evaluate(&self, expr: &str) -> Result<Value, TargetError> {
        let expr = expr.trim();
        let entry = self
            .thread()
            .locals
            .get(expr)
            .or_else(|| self.snapshot.symbols.get(expr));
        if let Some(entry) = entry {
            return Ok(Value { value: entry.value.0, type_name: entry.type_name.clone() });
        }
        Self::evaluate_literal(expr).ok_or_else(|| TargetError::UnknownSymbol(expr.to_string()))
    }

    fn field(&self, type_name: &str, field: &str) -> Result<FieldInfo, TargetError> {
        self.snapshot
            .types
            .get(type_name)
            .and_then(|fields| fields.get(field))
            .map(|f| FieldInfo { offset: f.offset.0, size: f.size.0 })
            .ok_or_else(|| TargetError::UnknownField {
                type_name: type_name.to_string(),
                field: field.to_string(),
            })
    }

    fn read_memory(&self, address: u64, len: usize) -> Result<Vec<u8>, TargetError> {
        let fault = TargetError::Memory { address, len };
        let end = address.checked_add(len as u64).ok_or_else(|| fault.clone())?;
        let region = self
            .snapshot
            .memory
            .iter()
            .find(|r| address >= r.address.0 && end <= r.address.0.saturating_add(8 * r.words.len() as u64))
            .ok_or(fault)?;
        let bytes: Vec<u8> = region.words.iter().flat_map(|w| w.0.to_le_bytes()).collect();
        let start = (address - region.address.0) as usize;
        Ok(bytes[start..start + len].to_vec())
    }

    fn carrier_threads(&self) -> Result<Vec<CarrierThreadId>, TargetError> {
        Ok(self.snapshot.threads.iter().map(|t| CarrierThreadId(t.id)).collect())
    }

    fn selected_thread(&self) -> Result<CarrierThreadId, TargetError> {
        Ok(CarrierThreadId(self.thread().id))
    }

    fn select_thread(&mut self, id: CarrierThreadId) -> Result<(), TargetError> {
        self.selected = self
            .snapshot
            .threads
            .iter()
            .position(|t| t.id == id.0)
            .ok_or(TargetError::UnknownThread(id))?;
        Ok(())
    }

    fn register(&self, name: &str) -> Result<u64, TargetError> {
        let name = self.register_name(name);
        self.thread()
            .registers
            .get(&name)
            .map(|n| n.0)
            .ok_or(TargetError::UnknownRegister(name))
    }

    fn set_register(&mut self, name: &str, value: u64) -> Result<(), TargetError> {
        let name = self.register_name(name);
        match self.snapshot.threads[self.selected].registers.get_mut(&name) {
            Some(slot) => {
                slot.0 = value;
                Ok(())
            }
            None => Err(TargetError::UnknownRegister(name)),
        }
    }

    fn newest_frame(&self) -> Result<Frame, TargetError> {
        let pc = self.register(self.arch.program_counter)?;
        let sp = self.register(self.arch.stack_pointer)?;
        Ok(self.describe(0, pc, sp))
    }

    fn older_frame(&self, frame: &Frame) -> Result<Option<Frame>, TargetError> {
        let lookup = self.arch.lookup_address(frame.level, frame.address);
        let func = self
            .function_at(lookup)
            .ok_or_else(|| TargetError::Unwind(format!("no unwind info for 0x{:x}", frame.address)))?;
        let slot = frame.stack_pointer.wrapping_add(func.frame_size.0);
        let return_address = self.read_pointer(slot)?;
        if return_address == 0 {
            return Ok(None);
        }
        Ok(Some(self.describe(frame.level + 1, return_address, slot.wrapping_add(self.arch.pointer_size))))
    }

    fn arch(&self) -> &'static ArchInfo {
        self.arch
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::SavedRegisters;
    use indoc::indoc;

    /// Two fiber cores with four slots each plus one ordinary thread.
    ///
    /// - core 0 (thread 1): occupied 0b0101; slot 0 = 0x3000 suspended,
    ///   slot 2 = 0x3200 loaded (running on thread 1)
    /// - core 1 (thread 2): nothing occupied
    /// - thread 3: main thread, its core record has id -1
    /// - 0x3300 sits in a free slot and has a bogus saved stack pointer
    pub(crate) const ARACHNE_JSON: &str = indoc! {r#"
        {
          "arch": "x86_64",
          "symbols": {
            "Arachne::maxThreadsPerCore": { "value": 4, "type": "const int" },
            "Arachne::SPACE_FOR_SAVED_REGISTERS": { "value": 48, "type": "const size_t" },
            "arachne_context_pushed": { "value": "0x401000", "type": "<text variable, no debug info>" },
            "Arachne::coreMap._M_impl._M_start": { "value": "0x1000", "type": "Arachne::Core **" },
            "Arachne::coreMap._M_impl._M_finish": { "value": "0x1010", "type": "Arachne::Core **" },
            "zero_constant": { "value": 0, "type": "const int" },
            "ctx0": { "value": "0x3000", "type": "Arachne::ThreadContext *" },
            "ctx_stale": { "value": "0x3300", "type": "Arachne::ThreadContext *" },
            "null_ctx": { "value": 0, "type": "Arachne::ThreadContext *" },
            "core_ptr": { "value": "0x2000", "type": "Arachne::Core *" }
          },
          "types": {
            "Arachne::Core": {
              "id": { "offset": 0, "size": 4 },
              "localOccupiedAndCount": { "offset": 8, "size": 8 },
              "loadedContext": { "offset": 16, "size": 8 },
              "localThreadContexts": { "offset": 24, "size": 8 }
            },
            "Arachne::MaskAndCount": {
              "occupied": { "offset": 0, "size": 8 }
            },
            "Arachne::ThreadContext": {
              "sp": { "offset": 0, "size": 8 }
            }
          },
          "memory": [
            { "address": "0x1000", "words": ["0x2000", "0x2100"] },
            { "address": "0x2000", "words": [0, "0x2800", "0x3200", "0x2400"] },
            { "address": "0x2100", "words": [1, "0x2900", 0, "0x2500"] },
            { "address": "0x2200", "words": ["0xffffffff", 0, 0, 0] },
            { "address": "0x2400", "words": ["0x3000", "0x3100", "0x3200", "0x3300"] },
            { "address": "0x2500", "words": ["0x3400", 0, 0, 0] },
            { "address": "0x2800", "words": ["0x0200000000000005"] },
            { "address": "0x2900", "words": [0] },
            { "address": "0x3000", "words": ["0x7100"] },
            { "address": "0x3100", "words": ["0x7100"] },
            { "address": "0x3200", "words": ["0x9000"] },
            { "address": "0x3300", "words": ["0xdead0000"] },
            { "address": "0x3400", "words": ["0x7100"] },
            { "address": "0x7100", "words": [0, 0, 0, 0, 0, 0, "0x402150", 0, 0, "0x402380", 0, 0, 0, 0, 0] },
            { "address": "0x9000", "words": [0, "0x402390", 0, 0, 0, 0, 0] },
            { "address": "0xa000", "words": [0, 0, 0] },
            { "address": "0xb000", "words": [0, 0, 0] }
          ],
          "functions": [
            { "name": "Arachne::swapcontext", "low": "0x400ff0", "high": "0x401010", "frame_size": 0 },
            { "name": "spin_worker", "low": "0x402000", "high": "0x402100", "frame_size": 8, "file": "app.cc", "line": 10 },
            { "name": "suspended_worker", "low": "0x402100", "high": "0x402200", "frame_size": 16, "file": "app.cc", "line": 20 },
            { "name": "Arachne::threadMain", "low": "0x402300", "high": "0x402400", "frame_size": 32, "file": "Arachne.cc", "line": 500 },
            { "name": "Arachne::dispatch", "low": "0x403000", "high": "0x403100", "frame_size": 16, "file": "Arachne.cc", "line": 300 },
            { "name": "main", "low": "0x404000", "high": "0x404100", "frame_size": 16, "file": "main.cc", "line": 5 }
          ],
          "threads": [
            {
              "id": 1,
              "registers": { "rsp": "0x9000", "rip": "0x402010" },
              "locals": { "&Arachne::core": { "value": "0x2000", "type": "Arachne::Core *" } }
            },
            {
              "id": 2,
              "registers": { "rsp": "0xa000", "rip": "0x403000" },
              "locals": { "&Arachne::core": { "value": "0x2100", "type": "Arachne::Core *" } }
            },
            {
              "id": 3,
              "registers": { "rsp": "0xb000", "rip": "0x404000" },
              "locals": { "&Arachne::core": { "value": "0x2200", "type": "Arachne::Core *" } }
            }
          ]
        }
    "#};

    pub(crate) fn arachne_snapshot() -> SnapshotTarget {
        SnapshotTarget::from_json(ARACHNE_JSON).unwrap()
    }

    /// Wraps a snapshot and injects failures, like a target that drops its
    /// connection part-way through a request.
    pub(crate) struct FaultyTarget {
        pub(crate) inner: SnapshotTarget,
        /// Fail `newest_frame` outright
        pub(crate) fail_newest_frame: bool,
        /// Fail `older_frame` once this many frames have been produced
        pub(crate) fail_older_after: Option<usize>,
        /// Fail the n-th `set_register` call (0-based)
        pub(crate) fail_set_register_at: Option<usize>,
        pub(crate) set_register_calls: usize,
    }

    impl FaultyTarget {
        pub(crate) fn new(inner: SnapshotTarget) -> Self {
            Self {
                inner,
                fail_newest_frame: false,
                fail_older_after: None,
                fail_set_register_at: None,
                set_register_calls: 0,
            }
        }
    }

    impl DebugTarget for FaultyTarget {
        fn evaluate(&self, expr: &str) -> Result<Value, TargetError> {
            self.inner.evaluate(expr)
        }

        fn field(&self, type_name: &str, field: &str) -> Result<FieldInfo, TargetError> {
            self.inner.field(type_name, field)
        }

        fn read_memory(&self, address: u64, len: usize) -> Result<Vec<u8>, TargetError> {
            self.inner.read_memory(address, len)
        }

        fn carrier_threads(&self) -> Result<Vec<CarrierThreadId>, TargetError> {
            self.inner.carrier_threads()
        }

        fn selected_thread(&self) -> Result<CarrierThreadId, TargetError> {
            self.inner.selected_thread()
        }

        fn select_thread(&mut self, id: CarrierThreadId) -> Result<(), TargetError> {
            self.inner.select_thread(id)
        }

        fn register(&self, name: &str) -> Result<u64, TargetError> {
            self.inner.register(name)
        }

        fn set_register(&mut self, name: &str, value: u64) -> Result<(), TargetError> {
            let call = self.set_register_calls;
            self.set_register_calls += 1;
            if self.fail_set_register_at == Some(call) {
                return Err(TargetError::UnknownRegister(name.to_string()));
            }
            self.inner.set_register(name, value)
        }

        fn newest_frame(&self) -> Result<Frame, TargetError> {
            if self.fail_newest_frame {
                return Err(TargetError::Unwind("target disconnected".to_string()));
            }
            self.inner.newest_frame()
        }

        fn older_frame(&self, frame: &Frame) -> Result<Option<Frame>, TargetError> {
            if let Some(limit) = self.fail_older_after {
                if frame.level + 1 >= limit {
                    return Err(TargetError::Unwind("broken frame chain".to_string()));
                }
            }
            self.inner.older_frame(frame)
        }

        fn arch(&self) -> &'static ArchInfo {
            self.inner.arch()
        }
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("0x2a"), Some(42));
        assert_eq!(parse_number(" 0X2A "), Some(42));
        assert_eq!(parse_number("zz"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("Arachne::ThreadContext*"), "Arachne::ThreadContext *");
        assert_eq!(normalize_type("Arachne::ThreadContext *"), "Arachne::ThreadContext *");
        assert_eq!(normalize_type("Core**"), "Core **");
        assert_eq!(normalize_type("long"), "long");
    }

    #[test]
    fn test_rejects_unknown_arch() {
        let err = SnapshotTarget::from_json(r#"{ "arch": "mips", "threads": [] }"#).unwrap_err();
        assert!(matches!(err, TargetError::Snapshot(msg) if msg.contains("mips")));
    }

    #[test]
    fn test_rejects_empty_threads() {
        let err = SnapshotTarget::from_json(r#"{ "arch": "x86_64", "threads": [] }"#).unwrap_err();
        assert_eq!(err, TargetError::Snapshot("no threads".to_string()));
    }

    #[test]
    fn test_evaluate_thread_local_and_global() {
        let mut target = arachne_snapshot();
        assert_eq!(target.evaluate("&Arachne::core").unwrap().value, 0x2000);
        target.select_thread(CarrierThreadId(2)).unwrap();
        assert_eq!(target.evaluate("&Arachne::core").unwrap().value, 0x2100);
        assert_eq!(target.evaluate("Arachne::maxThreadsPerCore").unwrap().value, 4);
        assert!(matches!(target.evaluate("nope"), Err(TargetError::UnknownSymbol(_))));
    }

    #[test]
    fn test_evaluate_literals() {
        let target = arachne_snapshot();
        let v = target.evaluate("(Arachne::ThreadContext*)0x3000").unwrap();
        assert_eq!(v, Value { value: 0x3000, type_name: "Arachne::ThreadContext *".to_string() });
        let v = target.evaluate("0x3000").unwrap();
        assert_eq!(v.type_name, "long");
    }

    #[test]
    fn test_read_memory() {
        let target = arachne_snapshot();
        assert_eq!(target.read_pointer(0x1008).unwrap(), 0x2100);
        assert_eq!(target.read_scalar(0x2200, 4).unwrap(), 0xffff_ffff);
        assert_eq!(target.read_memory(0x1004, 2).unwrap(), vec![0, 0]);
        assert_eq!(
            target.read_memory(0x1010, 8),
            Err(TargetError::Memory { address: 0x1010, len: 8 })
        );
        assert!(target.read_pointer(0xdead0000).is_err());
    }

    #[test]
    fn test_registers_and_aliases() {
        let mut target = arachne_snapshot();
        assert_eq!(target.register("rsp").unwrap(), 0x9000);
        assert_eq!(target.register("$pc").unwrap(), 0x402010);
        target.set_register("sp", 0x1234).unwrap();
        assert_eq!(target.register("rsp").unwrap(), 0x1234);
        assert!(matches!(target.set_register("xmm0", 1), Err(TargetError::UnknownRegister(_))));
        assert_eq!(
            target.saved_registers().unwrap(),
            SavedRegisters { stack_pointer: 0x1234, program_counter: 0x402010 }
        );
    }

    #[test]
    fn test_register_writes_are_per_thread() {
        let mut target = arachne_snapshot();
        target.select_thread(CarrierThreadId(2)).unwrap();
        target.set_register("rsp", 1).unwrap();
        target.select_thread(CarrierThreadId(1)).unwrap();
        assert_eq!(target.register("rsp").unwrap(), 0x9000);
        assert!(target.select_thread(CarrierThreadId(9)).is_err());
    }

    #[test]
    fn test_unwind_live_stack() {
        let target = arachne_snapshot();
        let frame0 = target.newest_frame().unwrap();
        assert_eq!(frame0.function.as_deref(), Some("spin_worker"));
        assert_eq!(frame0.location, Some(SourceLocation { file: "app.cc".to_string(), line: 10 }));

        let frame1 = target.older_frame(&frame0).unwrap().unwrap();
        assert_eq!(frame1.level, 1);
        assert_eq!(frame1.address, 0x402390);
        assert_eq!(frame1.stack_pointer, 0x9010);
        assert_eq!(frame1.function.as_deref(), Some("Arachne::threadMain"));

        assert_eq!(target.older_frame(&frame1).unwrap(), None);
    }

    #[test]
    fn test_unwind_without_function_fails() {
        let target = arachne_snapshot();
        let frame = Frame { level: 0, address: 0x500000, stack_pointer: 0x9000, function: None, location: None };
        assert!(matches!(target.older_frame(&frame), Err(TargetError::Unwind(_))));
    }
}
