//! Error types for fiber inspection

use crate::types::{CarrierThreadId, ContextHandle, FiberId};
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by the debug target collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("cannot read {len} bytes at 0x{address:x}")]
    Memory { address: u64, len: usize },
    #[error("no symbol matches expression `{0}`")]
    UnknownSymbol(String),
    #[error("type `{type_name}` has no field `{field}`")]
    UnknownField { type_name: String, field: String },
    #[error("no carrier thread {0}")]
    UnknownThread(CarrierThreadId),
    #[error("no register named `{0}`")]
    UnknownRegister(String),
    #[error("unwind failed: {0}")]
    Unwind(String),
    #[error("invalid snapshot: {0}")]
    Snapshot(String),
}

/// A layout override file that could not be used.
#[derive(Debug, Error)]
pub enum LayoutConfigError {
    #[error("failed to read layout {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse layout {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of a fiber-aware request that did not succeed.
///
/// Everything except [`FiberError::Target`] is an input or compatibility
/// problem to report to the operator, not a fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FiberError {
    #[error("fiber {fiber} maps to core {core_id}, which is out of range ({cores} cores)")]
    CoreOutOfRange { fiber: FiberId, core_id: u64, cores: u64 },
    #[error("no fiber found for {0}")]
    FiberNotFound(FiberId),
    #[error("please pass a {expected}, not {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("a null context handle was passed")]
    NullHandle,
    #[error("cannot evaluate `{0}`")]
    InvalidExpression(String),
    #[error("fiber runtime layout unavailable: {0}")]
    LayoutUnavailable(String),
    #[error("no pending diversion on carrier thread {0}")]
    NoPendingDiversion(CarrierThreadId),
    #[error("no carrier thread has {0} loaded")]
    HostNotFound(ContextHandle),
    #[error("carrier thread {0} is not hosting a fiber core")]
    NotAFiberCore(CarrierThreadId),
    #[error(transparent)]
    Target(#[from] TargetError),
}

impl FiberError {
    /// Whether this error is a reportable outcome rather than a target fault.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, FiberError::Target(_))
    }
}

pub type Result<T, E = FiberError> = std::result::Result<T, E>;
