//! # Error Types
//!
//! Two families of failure live here:
//!
//! - [`RetraceError`]: ordinary fallible operations outside the unwind loop
//!   (loading snapshots and images, parsing arguments). Propagated with `?`.
//! - [`UnwindFault`]: conditions met *inside* an unwind. The unwinder never
//!   returns an error; local faults are counted and the scan moves on, while
//!   terminal ones end up in the trace's status next to the frames found so
//!   far.
//!
//! We use `thiserror` to generate the `Error` implementations and messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Address;

/// Main error type for retrace operations
///
/// ## Error Categories
///
/// 1. **Input errors**: InvalidArgument
/// 2. **Data errors**: Snapshot, ObjectParse, Json
/// 3. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum RetraceError
{
    /// Invalid argument passed to a retrace function
    ///
    /// Examples:
    /// - Malformed address string
    /// - `PATH@BIAS` symbol spec without a path
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A process snapshot is internally inconsistent
    ///
    /// For example a module whose end lies below its start, or an instruction
    /// record with a zero length.
    #[error("Invalid snapshot: {0}")]
    Snapshot(String),

    /// A binary image could not be parsed by the `object` crate.
    #[error("Failed to parse object file: {0}")]
    ObjectParse(String),

    /// JSON (de)serialization of snapshots or traces failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, RetraceError>`
///
/// ```rust
/// use retrace_core::error::RetraceResult;
/// fn foo() -> RetraceResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type RetraceResult<T> = std::result::Result<T, RetraceError>;

/// Condition met while unwinding
///
/// ## Severity
///
/// | fault | effect |
/// |---|---|
/// | `UnreadableMemory`, `DecodeFailure` | local, the candidate is dropped and scanning continues |
/// | `UnsupportedContext` | no frames, `Unsupported` status |
/// | `IterationExhausted`, `GapUnrecoverable`, `FrameLimit`, `ByteLimit` | best prefix, `Incomplete` status |
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnwindFault
{
    /// A stack word could not be read.
    #[error("unreadable memory at {address}")]
    UnreadableMemory
    {
        /// Address that failed to read
        address: Address,
    },

    /// The decoder could not disassemble an instruction.
    #[error("could not decode instruction at {address}")]
    DecodeFailure
    {
        /// Address of the undecodable instruction
        address: Address,
    },

    /// The starting context cannot be unwound.
    #[error("unsupported context at pc {pc}: {reason}")]
    UnsupportedContext
    {
        /// Starting program counter
        pc: Address,
        /// Why it was refused
        reason: String,
    },

    /// The iteration budget ran out.
    #[error("gave up after {iterations} iterations")]
    IterationExhausted
    {
        /// Iterations performed
        iterations: u32,
    },

    /// A gap could not be recovered from.
    #[error("unrecoverable gap in stack near {stack_cursor}")]
    GapUnrecoverable
    {
        /// Scan position when recovery gave up
        stack_cursor: Address,
    },

    /// The frame limit was reached.
    #[error("frame limit of {max} reached")]
    FrameLimit
    {
        /// Configured limit
        max: usize,
    },

    /// The byte limit was reached.
    #[error("byte limit of {max} reached")]
    ByteLimit
    {
        /// Configured limit
        max: u64,
    },
}

impl UnwindFault
{
    /// `true` for faults that only drop one candidate.
    pub const fn is_local(&self) -> bool
    {
        matches!(self, UnwindFault::UnreadableMemory { .. } | UnwindFault::DecodeFailure { .. })
    }
}
