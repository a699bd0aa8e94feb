//! Fluent construction of snapshots for tests and tooling.

use super::{InstructionRecord, MemoryRegion, ModuleRecord, ProcessSnapshot};
use crate::limits::UnwindLimits;
use crate::symbols::{FunctionSymbol, RelocationSymbol};
use crate::types::{Address, Architecture, ModuleKind, ThreadId};

/// Builder for a [`ProcessSnapshot`]. Addresses are plain integers.
///
/// ```rust
/// use retrace_core::collab::MemoryReader;
/// use retrace_core::snapshot::SnapshotBuilder;
/// use retrace_core::types::{Address, Architecture, ModuleKind};
///
/// let snapshot = SnapshotBuilder::new(Architecture::X86)
///     .module("app", 0x0804_8000, 0x0805_0000, ModuleKind::Main)
///     .registers(0x0804_8100, 0xbfff_f000)
///     .words(0xbfff_f000, &[7, 8])
///     .build();
/// assert_eq!(snapshot.read_word(Address::new(0xbfff_f004)), Some(8));
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotBuilder
{
    snapshot: ProcessSnapshot,
}

impl SnapshotBuilder
{
    pub fn new(architecture: Architecture) -> Self
    {
        Self {
            snapshot: ProcessSnapshot::new(architecture),
        }
    }

    #[must_use]
    pub fn thread(mut self, thread: u64) -> Self
    {
        self.snapshot.thread = ThreadId(thread);
        self
    }

    #[must_use]
    pub fn registers(mut self, pc: u64, sp: u64) -> Self
    {
        self.snapshot.registers.pc = Address::new(pc);
        self.snapshot.registers.sp = Address::new(sp);
        self
    }

    #[must_use]
    pub fn fp(mut self, fp: u64) -> Self
    {
        self.snapshot.registers.fp = Some(Address::new(fp));
        self
    }

    #[must_use]
    pub fn lr(mut self, lr: u64) -> Self
    {
        self.snapshot.registers.lr = Some(Address::new(lr));
        self
    }

    #[must_use]
    pub fn stack_base(mut self, base: u64) -> Self
    {
        self.snapshot.stack_base = Some(Address::new(base));
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: UnwindLimits) -> Self
    {
        self.snapshot.limits = Some(limits);
        self
    }

    /// Executable mapping `[start, end)`.
    #[must_use]
    pub fn module(mut self, name: &str, start: u64, end: u64, kind: ModuleKind) -> Self
    {
        self.snapshot.modules.push(ModuleRecord {
            name: name.to_string(),
            start: Address::new(start),
            end: Address::new(end),
            kind: Some(kind),
            executable: true,
        });
        self
    }

    #[must_use]
    pub fn function(mut self, start: u64, size: u64, name: &str) -> Self
    {
        self.snapshot
            .functions
            .push(FunctionSymbol::new(Address::new(start), size, name));
        self
    }

    #[must_use]
    pub fn relocation(mut self, address: u64, name: &str) -> Self
    {
        self.snapshot.relocations.push(RelocationSymbol {
            address: Address::new(address),
            name: name.to_string(),
        });
        self
    }

    #[must_use]
    pub fn instruction(mut self, address: u64, length: u64, text: &str) -> Self
    {
        self.snapshot.instructions.push(InstructionRecord {
            address: Address::new(address),
            length,
            text: text.to_string(),
        });
        self
    }

    #[must_use]
    pub fn word(self, address: u64, value: u64) -> Self
    {
        self.words(address, &[value])
    }

    /// Consecutive words starting at `address`.
    #[must_use]
    pub fn words(mut self, address: u64, values: &[u64]) -> Self
    {
        self.snapshot.memory.push(MemoryRegion {
            address: Address::new(address),
            words: values.to_vec(),
        });
        self
    }

    pub fn build(self) -> ProcessSnapshot
    {
        self.snapshot
    }
}
