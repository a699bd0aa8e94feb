//! # Unwinder Core
//!
//! Reconstructs a call stack from a register snapshot and raw stack memory,
//! without unwind tables or debug information.
//!
//! ## Phases
//!
//! 1. **Frame 0**: the interrupted instruction at PC, with the stack cursor at
//!    SP.
//! 2. **Link register** (ARM): when LR returns into another function right
//!    after a call to the current one, an LR-style frame.
//! 3. **Frame-pointer fast path** (x86): a leaf probe just above SP, then the
//!    saved-FP chain, each link validated against the call that produced it.
//!    A chain that ends in a null FP completes the trace.
//! 4. **Stack scan**: every word from the cursor up is tested as a return
//!    address; plausible ones whose call is consistent with the frame below
//!    are accepted. Gaps trigger rollback to the best prefix and blacklisting
//!    of the call site that caused them.
//!
//! ## Termination
//!
//! The iteration budget is shared by every phase and never reset; the frame
//! and byte limits, the stack ceiling, and one page of unreadable stack all
//! end the scan.
//!
//! ## Example
//!
//! ```rust
//! use retrace_core::snapshot::SnapshotBuilder;
//! use retrace_core::types::{Architecture, ModuleKind};
//! use retrace_core::{UnwindLimits, Unwinder};
//!
//! let process = SnapshotBuilder::new(Architecture::X86)
//!     .module("app", 0x0804_8000, 0x0805_0000, ModuleKind::Main)
//!     .function(0x0804_8100, 0x40, "main")
//!     .function(0x0804_8200, 0x40, "work")
//!     .instruction(0x0804_8110, 5, "call 0x8048200")
//!     .instruction(0x0804_8210, 1, "nop")
//!     .registers(0x0804_8210, 0xbfff_f000)
//!     .words(0xbfff_f000, &[0, 0x0804_8115, 0])
//!     .stack_base(0xbfff_f010)
//!     .build();
//!
//! let trace = Unwinder::over(&process, process.architecture, process.thread)
//!     .unwind(&process.registers, &process.effective_limits());
//! assert_eq!(trace.frames.len(), 2);
//! assert_eq!(trace.frames[1].instruction_text, "call work");
//! ```

mod arena;
mod fast_path;
mod recovery;
mod scan;
mod session;

use tracing::debug_span;

use crate::arch::{capabilities, ArchCapabilities};
use crate::callsite::CallSiteResolver;
use crate::collab::{CodeRangeOracle, InstructionDecoder, MemoryReader, ProcessView, SymbolResolver};
use crate::limits::UnwindLimits;
use crate::types::{Architecture, Frame, Registers, ThreadId, Trace};
use session::UnwindSession;

/// Heuristic stack unwinder for one thread.
///
/// Holds only borrowed collaborators; every call to [`Unwinder::unwind`]
/// creates and discards its own session state.
#[derive(Clone, Copy)]
pub struct Unwinder<'a>
{
    arch: &'static dyn ArchCapabilities,
    thread: ThreadId,
    code: &'a dyn CodeRangeOracle,
    symbols: &'a dyn SymbolResolver,
    decoder: &'a dyn InstructionDecoder,
    memory: &'a dyn MemoryReader,
}

impl<'a> Unwinder<'a>
{
    /// Unwinder over four separate collaborators.
    pub fn new(
        architecture: Architecture,
        thread: ThreadId,
        code: &'a dyn CodeRangeOracle,
        symbols: &'a dyn SymbolResolver,
        decoder: &'a dyn InstructionDecoder,
        memory: &'a dyn MemoryReader,
    ) -> Self
    {
        Self {
            arch: capabilities(architecture),
            thread,
            code,
            symbols,
            decoder,
            memory,
        }
    }

    /// Unwinder over one object implementing every collaborator.
    pub fn over<P: ProcessView>(process: &'a P, architecture: Architecture, thread: ThreadId) -> Self
    {
        Self::new(architecture, thread, process, process, process, process)
    }

    /// Architecture being unwound.
    pub fn architecture(&self) -> Architecture
    {
        self.arch.architecture()
    }

    pub(crate) fn resolver(&self) -> CallSiteResolver<'a>
    {
        CallSiteResolver::new(self.arch, self.thread, self.code, self.symbols, self.decoder, self.memory)
    }

    /// Reconstruct the call stack starting at `registers.pc` / `registers.sp`.
    ///
    /// Never fails: a context that cannot be unwound yields an empty trace with
    /// [`TraceStatus::Unsupported`](crate::types::TraceStatus::Unsupported);
    /// a walk cut short by a limit yields the best prefix with
    /// [`TraceStatus::Incomplete`](crate::types::TraceStatus::Incomplete).
    pub fn unwind(&self, registers: &Registers, limits: &UnwindLimits) -> Trace
    {
        let span = debug_span!(
            "unwind",
            thread = %self.thread,
            arch = %self.architecture(),
            pc = %registers.pc,
            sp = %registers.sp
        );
        let _guard = span.enter();

        UnwindSession::new(self, registers, limits).run()
    }
}

/// Convenience entry point returning only the frames.
///
/// ```rust
/// use retrace_core::snapshot::SnapshotBuilder;
/// use retrace_core::types::{Architecture, ModuleKind, Registers, ThreadId, Address};
/// use retrace_core::UnwindLimits;
///
/// let process = SnapshotBuilder::new(Architecture::X86_64)
///     .module("app", 0x40_0000, 0x41_0000, ModuleKind::Main)
///     .instruction(0x40_1000, 1, "hlt")
///     .build();
/// let regs = Registers::new(Address::new(0x40_1000), Address::new(0x7ffe_0000));
/// let frames = retrace_core::unwind(&process, ThreadId(1), &regs, Architecture::X86_64, &UnwindLimits::default());
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].instruction_text, "hlt");
/// ```
pub fn unwind<P: ProcessView>(
    process: &P,
    thread: ThreadId,
    registers: &Registers,
    architecture: Architecture,
    limits: &UnwindLimits,
) -> Vec<Frame>
{
    Unwinder::over(process, architecture, thread).unwind(registers, limits).frames
}
