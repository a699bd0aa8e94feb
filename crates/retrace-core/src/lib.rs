//! # retrace-core
//!
//! Heuristic call-stack reconstruction for Retrace.
//!
//! Given a stopped thread's registers and read access to its memory, the
//! unwinder rebuilds the call stack without unwind tables or debug info. It
//! scans the stack for words that look like return addresses, checks that the
//! instruction before each one is a call, and keeps only frames whose call is
//! consistent with the function below. A frame-pointer chain, when present,
//! is followed first.
//!
//! This crate provides:
//! - The unwinder ([`Unwinder`], [`unwind`]) and its limits ([`UnwindLimits`])
//! - The call-site resolver ([`callsite`])
//! - Collaborator traits through which all process state is read ([`collab`])
//! - Per-architecture knowledge for x86 and ARM ([`arch`])
//! - Symbol tables, ELF symbol loading and name matching ([`symbols`])
//! - Offline process snapshots that implement every collaborator ([`snapshot`])
//!
//! ## Failure model
//!
//! Unwinding never fails. A [`Trace`] always carries the frames found so far
//! and a [`TraceStatus`] saying whether the walk completed, stopped early, or
//! could not start. Loading snapshots and images returns [`RetraceResult`].

pub mod arch;
pub mod callsite;
pub mod collab;
pub mod error;
pub mod instruction;
pub mod limits;
pub mod snapshot;
pub mod symbols;
pub mod types;
pub mod unwind;

// Re-export commonly used types
pub use error::{RetraceError, RetraceResult, UnwindFault};
pub use limits::UnwindLimits;
pub use snapshot::{ProcessSnapshot, SnapshotBuilder};
pub use types::{Address, Architecture, Frame, Registers, ThreadId, Trace, TraceStatus};
pub use unwind::{unwind, Unwinder};
