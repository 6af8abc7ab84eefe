//! Runtime layout: where the fiber runtime keeps its scheduling state.
//!
//! [`LayoutConfig`] names the symbols, types and fields of the runtime;
//! [`RuntimeLayout::load`] resolves them once per session into offsets and
//! constants. Nothing else in the crate hardcodes an offset.

use crate::error::{FiberError, LayoutConfigError, Result};
use crate::target::{offset_address, DebugTarget, FieldInfo};
use crate::types::{ContextHandle, SavedRegisters};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;

/// Symbolic description of the fiber runtime. Defaults describe Arachne.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Constant holding the number of slots per core
    pub max_fibers_per_core: String,
    /// Constant holding the size of the region the context switch pushes
    pub saved_register_region_size: String,
    /// Code label where a switched-out fiber resumes
    pub resume_anchor: String,
    /// First element of the table of core pointers
    pub core_table_start: String,
    /// One past the last element of the table of core pointers
    pub core_table_finish: String,
    /// Address of the selected carrier thread's own core record
    pub local_core: String,
    pub core_type: String,
    pub mask_type: String,
    pub context_type: String,
    /// Declared type a raw context handle must have
    pub context_pointer_type: String,
    pub fields: FieldNames,
    /// Sanity ceiling on the number of cores a fiber id may address
    pub max_cores: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            max_fibers_per_core: "Arachne::maxThreadsPerCore".to_string(),
            saved_register_region_size: "Arachne::SPACE_FOR_SAVED_REGISTERS".to_string(),
            resume_anchor: "arachne_context_pushed".to_string(),
            core_table_start: "Arachne::coreMap._M_impl._M_start".to_string(),
            core_table_finish: "Arachne::coreMap._M_impl._M_finish".to_string(),
            local_core: "&Arachne::core".to_string(),
            core_type: "Arachne::Core".to_string(),
            mask_type: "Arachne::MaskAndCount".to_string(),
            context_type: "Arachne::ThreadContext".to_string(),
            context_pointer_type: "Arachne::ThreadContext *".to_string(),
            fields: FieldNames::default(),
            max_cores: 256,
        }
    }
}

impl LayoutConfig {
    /// Load a config from a JSON file. Missing keys take the defaults.
    pub fn from_file(path: &Path) -> std::result::Result<Self, LayoutConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| LayoutConfigError::Read { path: path.to_path_buf(), source })?;
        serde_json::from_str(&text)
            .map_err(|source| LayoutConfigError::Parse { path: path.to_path_buf(), source })
    }
}

/// Field names within the runtime's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub core_id: String,
    /// Pointer from the core to its occupancy word
    pub occupancy: String,
    pub loaded_context: String,
    /// Pointer to the core's array of context pointers
    pub slots: String,
    /// Occupied bitmask within the occupancy word
    pub occupied: String,
    /// Saved stack pointer within a context record
    pub saved_stack_pointer: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            core_id: "id".to_string(),
            occupancy: "localOccupiedAndCount".to_string(),
            loaded_context: "loadedContext".to_string(),
            slots: "localThreadContexts".to_string(),
            occupied: "occupied".to_string(),
            saved_stack_pointer: "sp".to_string(),
        }
    }
}

/// Resolved fields of a core record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreFields {
    pub id: FieldInfo,
    pub occupancy: FieldInfo,
    pub loaded_context: FieldInfo,
    pub slots: FieldInfo,
}

/// Resolved runtime layout, immutable for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub max_fibers_per_core: u64,
    pub saved_register_region_size: u64,
    pub resume_anchor: u64,
    pub max_cores: u64,
    pub pointer_size: u64,
    pub core: CoreFields,
    pub occupied: FieldInfo,
    pub saved_stack_pointer: FieldInfo,
    pub core_table_start: String,
    pub core_table_finish: String,
    pub local_core: String,
    pub context_pointer_type: String,
}

fn unavailable(what: &str, err: impl Display) -> FiberError {
    FiberError::LayoutUnavailable(format!("{}: {}", what, err))
}

impl RuntimeLayout {
    /// Resolve `config` against the target's symbols and types.
    pub fn load<T: DebugTarget + ?Sized>(target: &T, config: &LayoutConfig) -> Result<Self> {
        let constant = |expr: &str| {
            target
                .evaluate(expr)
                .map(|v| v.value)
                .map_err(|e| unavailable(expr, e))
        };
        let field = |type_name: &str, name: &str| {
            target
                .field(type_name, name)
                .map_err(|e| unavailable(&format!("{}::{}", type_name, name), e))
        };

        let max_fibers_per_core = constant(&config.max_fibers_per_core)?;
        if max_fibers_per_core == 0 || max_fibers_per_core > 64 {
            return Err(unavailable(
                &config.max_fibers_per_core,
                format!("{} slots per core does not fit the occupancy mask", max_fibers_per_core),
            ));
        }
        if config.max_cores == 0 {
            return Err(FiberError::LayoutUnavailable("max_cores must be positive".to_string()));
        }

        let names = &config.fields;
        let core = CoreFields {
            id: field(&config.core_type, &names.core_id)?,
            occupancy: field(&config.core_type, &names.occupancy)?,
            loaded_context: field(&config.core_type, &names.loaded_context)?,
            slots: field(&config.core_type, &names.slots)?,
        };

        Ok(Self {
            max_fibers_per_core,
            saved_register_region_size: constant(&config.saved_register_region_size)?,
            resume_anchor: constant(&config.resume_anchor)?,
            max_cores: config.max_cores,
            pointer_size: target.arch().pointer_size,
            core,
            occupied: field(&config.mask_type, &names.occupied)?,
            saved_stack_pointer: field(&config.context_type, &names.saved_stack_pointer)?,
            core_table_start: config.core_table_start.clone(),
            core_table_finish: config.core_table_finish.clone(),
            local_core: config.local_core.clone(),
            context_pointer_type: config.context_pointer_type.clone(),
        })
    }

    /// Fiber ids at or above this value are rejected without reading memory.
    pub fn id_ceiling(&self) -> u64 {
        self.max_cores.saturating_mul(self.max_fibers_per_core)
    }

    /// Bits of the occupancy word that belong to slots.
    pub fn slot_mask(&self) -> u64 {
        if self.max_fibers_per_core >= 64 {
            u64::MAX
        } else {
            (1u64 << self.max_fibers_per_core) - 1
        }
    }

    /// Registers that make `context` look like it is about to resume: stack
    /// pointer just past the saved-register region, program counter at the
    /// resume anchor.
    pub fn fabricated_registers<T: DebugTarget + ?Sized>(
        &self,
        target: &T,
        context: ContextHandle,
    ) -> Result<SavedRegisters> {
        let sp = self.saved_stack_pointer;
        let saved_sp = target.read_scalar(offset_address(context.0, sp.offset, sp.size)?, sp.size)?;
        Ok(SavedRegisters {
            stack_pointer: saved_sp.wrapping_add(self.saved_register_region_size),
            program_counter: self.resume_anchor,
        })
    }
}
