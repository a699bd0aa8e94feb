//! # Collaborators
//!
//! The unwinder owns no process state. Everything it knows about the target
//! comes through four narrow traits, borrowed for the duration of one unwind:
//!
//! - [`CodeRangeOracle`]: which addresses are code, and in which module
//! - [`SymbolResolver`]: function boundaries, names, and import relocations
//! - [`InstructionDecoder`]: one-instruction disassembly
//! - [`MemoryReader`]: one machine word of target memory
//!
//! [`ProcessSnapshot`](crate::snapshot::ProcessSnapshot) implements all four
//! over captured data; an analysis platform implements them over live state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Address, ModuleId, ModuleKind, ThreadId};

/// Identity of a function: its entry address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(pub Address);

impl FunctionId
{
    /// Entry address.
    pub const fn start(self) -> Address
    {
        self.0
    }
}

impl fmt::Display for FunctionId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction
{
    /// Encoded length in bytes.
    pub length: u64,
    /// Disassembly text, e.g. `call 0x401020` or `bl 0x10400`.
    pub text: String,
}

impl Instruction
{
    /// Build an instruction record.
    pub fn new(length: u64, text: impl Into<String>) -> Self
    {
        Self {
            length,
            text: text.into(),
        }
    }
}

/// Address-range membership for code and modules.
pub trait CodeRangeOracle
{
    /// `true` when `address` lies in an executable mapping of `thread`'s process.
    fn is_code(&self, address: Address, thread: ThreadId) -> bool;

    /// Module whose mapping contains `address`.
    fn containing_module(&self, address: Address, thread: ThreadId) -> Option<ModuleId>;

    /// Classification of the module containing `address`.
    fn module_kind(&self, address: Address, thread: ThreadId) -> Option<ModuleKind>;
}

/// Function-boundary and symbol database.
pub trait SymbolResolver
{
    /// Function containing `address`.
    fn function_of(&self, address: Address) -> Option<FunctionId>;

    /// Name of `function`.
    fn name_of(&self, function: FunctionId) -> Option<String>;

    /// `true` when `a` and `b` lie in the same function.
    fn same_function(&self, a: Address, b: Address) -> bool
    {
        match (self.function_of(a), self.function_of(b)) {
            (Some(fa), Some(fb)) => fa == fb,
            _ => false,
        }
    }

    /// `true` when `address` is exactly a function entry.
    fn is_function_entry(&self, address: Address) -> bool
    {
        self.function_of(address).is_some_and(|function| function.start() == address)
    }

    /// Import name bound to a relocation slot or stub at `address`.
    fn relocation_name(&self, address: Address) -> Option<String>;

    /// Name of the function containing `address`.
    fn function_name_at(&self, address: Address) -> Option<String>
    {
        self.function_of(address).and_then(|function| self.name_of(function))
    }
}

/// Single-instruction disassembler.
pub trait InstructionDecoder
{
    /// Decode the instruction at `address`; `None` when the bytes do not form one.
    fn decode_one(&self, address: Address) -> Option<Instruction>;
}

/// Target memory access.
pub trait MemoryReader
{
    /// Read one target machine word (4 or 8 bytes, zero-extended).
    fn read_word(&self, address: Address) -> Option<u64>;
}

/// The four collaborators bundled, for callers holding one object that
/// implements them all.
pub trait ProcessView: CodeRangeOracle + SymbolResolver + InstructionDecoder + MemoryReader {}

impl<T> ProcessView for T where T: CodeRangeOracle + SymbolResolver + InstructionDecoder + MemoryReader {}
