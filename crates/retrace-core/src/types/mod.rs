//! # Types
//!
//! Data model shared by the unwinder, its collaborators and its callers.
//!
//! Addresses, thread and module identity, the register snapshot that seeds an
//! unwind, and the frames and trace it produces. Everything here is plain data
//! and serializes with `serde`.

pub mod address;
pub mod frame;
pub mod process;
pub mod registers;
pub mod trace;

// Re-export all public types
pub use address::Address;
pub use frame::Frame;
pub use process::{Architecture, ModuleId, ModuleKind, ThreadId};
pub use registers::Registers;
pub use trace::{Trace, TraceStats, TraceStatus};
