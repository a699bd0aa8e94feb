//! # Process Snapshots
//!
//! A [`ProcessSnapshot`] is everything the unwinder needs about one stopped
//! thread, captured as plain data: registers, module map, function symbols,
//! relocation names, pre-decoded instructions and raw stack words. It
//! implements all four collaborator traits, so it can be unwound offline and
//! stored as JSON next to the trace it produced.
//!
//! ## JSON layout
//!
//! ```json
//! {
//!   "architecture": "x86_64",
//!   "thread": 4242,
//!   "registers": { "pc": "0x401010", "sp": "0x7ffe0000", "fp": "0x7ffe0010" },
//!   "stack_base": "0x7ffe1000",
//!   "modules": [{ "name": "/usr/bin/app", "start": "0x400000", "end": "0x410000", "kind": "main" }],
//!   "functions": [{ "start": "0x401000", "size": 64, "name": "main" }],
//!   "relocations": [{ "address": "0x403018", "name": "free" }],
//!   "instructions": [{ "address": "0x401010", "length": 1, "text": "hlt" }],
//!   "memory": [{ "address": "0x7ffe0000", "words": [0, 4198417] }]
//! }
//! ```
//!
//! Addresses accept either a `"0x..."` string or a plain integer. A module
//! without a `kind` is classified from its name.

mod builder;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub use builder::SnapshotBuilder;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collab::{CodeRangeOracle, FunctionId, Instruction, InstructionDecoder, MemoryReader, SymbolResolver};
use crate::error::{RetraceError, RetraceResult};
use crate::limits::UnwindLimits;
use crate::symbols::{FunctionSymbol, RelocationSymbol, SymbolTable};
use crate::types::{Address, Architecture, ModuleId, ModuleKind, Registers, ThreadId, Trace};
use crate::unwind::Unwinder;

const fn default_true() -> bool
{
    true
}

/// One mapped image. `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord
{
    pub name: String,
    pub start: Address,
    pub end: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ModuleKind>,
    /// Data-only mappings are listed with `executable: false`.
    #[serde(default = "default_true")]
    pub executable: bool,
}

impl ModuleRecord
{
    /// Declared kind, or one inferred from the module name.
    pub fn effective_kind(&self) -> ModuleKind
    {
        self.kind.unwrap_or_else(|| {
            if ModuleId::new(&self.name).looks_like_c_library() {
                ModuleKind::CLibrary
            } else {
                ModuleKind::Library
            }
        })
    }

    fn contains(&self, address: Address) -> bool
    {
        self.start <= address && address < self.end
    }
}

/// A pre-decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord
{
    pub address: Address,
    pub length: u64,
    pub text: String,
}

/// Consecutive target words starting at `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion
{
    pub address: Address,
    pub words: Vec<u64>,
}

/// Lookup structures built from the records on first query.
#[derive(Debug, Clone, Default)]
struct SnapshotIndex
{
    symbols: SymbolTable,
    instructions: BTreeMap<Address, Instruction>,
    words: BTreeMap<Address, u64>,
    modules: Vec<ModuleRecord>,
}

/// Captured state of one stopped thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot
{
    pub architecture: Architecture,
    #[serde(default)]
    pub thread: ThreadId,
    pub registers: Registers,
    /// Highest stack address of the thread, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_base: Option<Address>,
    /// Limits to unwind with; defaults when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<UnwindLimits>,
    #[serde(default)]
    pub modules: Vec<ModuleRecord>,
    #[serde(default)]
    pub functions: Vec<FunctionSymbol>,
    #[serde(default)]
    pub relocations: Vec<RelocationSymbol>,
    #[serde(default)]
    pub instructions: Vec<InstructionRecord>,
    #[serde(default)]
    pub memory: Vec<MemoryRegion>,
    #[serde(skip)]
    index: OnceCell<SnapshotIndex>,
}

impl ProcessSnapshot
{
    /// Empty snapshot for `architecture`, with PC and SP at zero.
    pub fn new(architecture: Architecture) -> Self
    {
        Self {
            architecture,
            thread: ThreadId::default(),
            registers: Registers::default(),
            stack_base: None,
            limits: None,
            modules: Vec::new(),
            functions: Vec::new(),
            relocations: Vec::new(),
            instructions: Vec::new(),
            memory: Vec::new(),
            index: OnceCell::new(),
        }
    }

    /// Parse and validate a JSON snapshot.
    pub fn from_json(json: &str) -> RetraceResult<Self>
    {
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Read, parse and validate a JSON snapshot file.
    pub fn load(path: impl AsRef<Path>) -> RetraceResult<Self>
    {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let snapshot = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            arch = %snapshot.architecture,
            modules = snapshot.modules.len(),
            functions = snapshot.functions.len(),
            "loaded process snapshot"
        );
        Ok(snapshot)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> RetraceResult<String>
    {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject records that cannot describe a real process.
    pub fn validate(&self) -> RetraceResult<()>
    {
        for module in &self.modules {
            if module.end <= module.start {
                return Err(RetraceError::Snapshot(format!(
                    "module {} ends at {} which is not above its start {}",
                    module.name, module.end, module.start
                )));
            }
        }
        let mut modules: Vec<&ModuleRecord> = self.modules.iter().collect();
        modules.sort_by_key(|module| module.start);
        for pair in modules.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(RetraceError::Snapshot(format!(
                    "modules {} and {} overlap",
                    pair[0].name, pair[1].name
                )));
            }
        }
        if let Some(bad) = self.instructions.iter().find(|instruction| instruction.length == 0) {
            return Err(RetraceError::Snapshot(format!(
                "instruction at {} has zero length",
                bad.address
            )));
        }
        if let Some(base) = self.stack_base {
            if base < self.registers.sp {
                return Err(RetraceError::Snapshot(format!(
                    "stack base {} lies below sp {}",
                    base, self.registers.sp
                )));
            }
        }
        Ok(())
    }

    /// The snapshot's limits with its `stack_base` filled in.
    pub fn effective_limits(&self) -> UnwindLimits
    {
        let mut limits = self.limits.clone().unwrap_or_default();
        if limits.stack_base.is_none() {
            limits.stack_base = self.stack_base;
        }
        limits
    }

    /// Add symbols loaded from elsewhere, e.g. binary images on disk.
    pub fn overlay_symbols(&mut self, table: SymbolTable)
    {
        debug!(
            functions = table.function_count(),
            relocations = table.relocation_count(),
            "overlaying symbols onto snapshot"
        );
        self.functions.extend(table.functions().iter().cloned());
        self.relocations.extend(table.relocations());
        self.index = OnceCell::new();
    }

    /// Unwinder reading from this snapshot.
    pub fn unwinder(&self) -> Unwinder<'_>
    {
        Unwinder::over(self, self.architecture, self.thread)
    }

    /// Unwind the captured thread with the snapshot's own limits.
    pub fn unwind(&self) -> Trace
    {
        self.unwind_with(&self.effective_limits())
    }

    /// Unwind the captured thread with `limits`.
    pub fn unwind_with(&self, limits: &UnwindLimits) -> Trace
    {
        self.unwinder().unwind(&self.registers, limits)
    }

    fn index(&self) -> &SnapshotIndex
    {
        self.index.get_or_init(|| {
            let word = self.architecture.word_size();
            let mut words = BTreeMap::new();
            for region in &self.memory {
                let mut address = region.address;
                for value in &region.words {
                    words.insert(address, *value);
                    address = address + word;
                }
            }

            let instructions = self
                .instructions
                .iter()
                .map(|record| (record.address, Instruction::new(record.length, record.text.clone())))
                .collect();

            let mut modules = self.modules.clone();
            modules.sort_by_key(|module| module.start);

            SnapshotIndex {
                symbols: SymbolTable::from_records(self.functions.clone(), &self.relocations),
                instructions,
                words,
                modules,
            }
        })
    }

    fn module_at(&self, address: Address) -> Option<&ModuleRecord>
    {
        let modules = &self.index().modules;
        let index = modules.partition_point(|module| module.start <= address);
        modules.get(index.checked_sub(1)?).filter(|module| module.contains(address))
    }
}

impl CodeRangeOracle for ProcessSnapshot
{
    fn is_code(&self, address: Address, _thread: ThreadId) -> bool
    {
        self.module_at(address).is_some_and(|module| module.executable)
    }

    fn containing_module(&self, address: Address, _thread: ThreadId) -> Option<ModuleId>
    {
        self.module_at(address).map(|module| ModuleId::new(&module.name))
    }

    fn module_kind(&self, address: Address, _thread: ThreadId) -> Option<ModuleKind>
    {
        self.module_at(address).map(ModuleRecord::effective_kind)
    }
}

impl SymbolResolver for ProcessSnapshot
{
    fn function_of(&self, address: Address) -> Option<FunctionId>
    {
        self.index().symbols.function_of(address)
    }

    fn name_of(&self, function: FunctionId) -> Option<String>
    {
        self.index().symbols.name_of(function)
    }

    fn relocation_name(&self, address: Address) -> Option<String>
    {
        self.index().symbols.relocation_name(address)
    }
}

impl InstructionDecoder for ProcessSnapshot
{
    fn decode_one(&self, address: Address) -> Option<Instruction>
    {
        self.index().instructions.get(&address).cloned()
    }
}

impl MemoryReader for ProcessSnapshot
{
    fn read_word(&self, address: Address) -> Option<u64>
    {
        self.index().words.get(&address).copied()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    const SNAPSHOT: &str = r#"{
        "architecture": "x86_64",
        "thread": 7,
        "registers": { "pc": "0x401010", "sp": "0x7ffe0000" },
        "stack_base": "0x7ffe0100",
        "modules": [
            { "name": "/usr/bin/app", "start": "0x400000", "end": "0x410000", "kind": "main" },
            { "name": "/lib/x86_64-linux-gnu/libc.so.6", "start": "0x7f0000000000", "end": "0x7f0000200000" },
            { "name": "[stack]", "start": "0x7ffd0000", "end": "0x7ffe1000", "executable": false }
        ],
        "functions": [{ "start": "0x401000", "size": 64, "name": "main" }],
        "relocations": [{ "address": 4206616, "name": "free" }],
        "instructions": [{ "address": "0x401010", "length": 1, "text": "hlt" }],
        "memory": [{ "address": "0x7ffe0000", "words": [1, 2] }]
    }"#;

    #[test]
    fn test_json_snapshot_answers_every_collaborator()
    {
        let snapshot = ProcessSnapshot::from_json(SNAPSHOT).unwrap();
        let thread = snapshot.thread;
        assert_eq!(thread, ThreadId(7));

        assert!(snapshot.is_code(Address::new(0x40_1010), thread));
        assert!(!snapshot.is_code(Address::new(0x7ffe_0000), thread));
        assert!(!snapshot.is_code(Address::new(0x41_0000), thread));
        assert_eq!(
            snapshot.containing_module(Address::new(0x7f00_0000_1000), thread),
            Some(ModuleId::new("libc.so.6"))
        );
        assert_eq!(
            snapshot.module_kind(Address::new(0x7f00_0000_1000), thread),
            Some(ModuleKind::CLibrary)
        );
        assert_eq!(snapshot.function_name_at(Address::new(0x40_1020)).as_deref(), Some("main"));
        assert_eq!(snapshot.relocation_name(Address::new(0x40_3018)).as_deref(), Some("free"));
        assert_eq!(snapshot.decode_one(Address::new(0x40_1010)).map(|i| i.text), Some("hlt".to_string()));
        assert_eq!(snapshot.read_word(Address::new(0x7ffe_0008)), Some(2));
        assert_eq!(snapshot.read_word(Address::new(0x7ffe_0004)), None);
    }

    #[test]
    fn test_effective_limits_pick_up_stack_base()
    {
        let snapshot = ProcessSnapshot::from_json(SNAPSHOT).unwrap();
        assert_eq!(snapshot.effective_limits().stack_base, Some(Address::new(0x7ffe_0100)));
    }

    #[test]
    fn test_overlapping_modules_are_rejected()
    {
        let json = r#"{
            "architecture": "x86",
            "registers": { "pc": 0, "sp": 0 },
            "modules": [
                { "name": "a", "start": "0x1000", "end": "0x3000" },
                { "name": "b", "start": "0x2000", "end": "0x4000" }
            ]
        }"#;
        let err = ProcessSnapshot::from_json(json).unwrap_err();
        assert!(matches!(err, RetraceError::Snapshot(_)));
    }

    #[test]
    fn test_overlay_rebuilds_index()
    {
        let mut snapshot = ProcessSnapshot::from_json(SNAPSHOT).unwrap();
        assert_eq!(snapshot.function_name_at(Address::new(0x40_2000)), None);

        let mut table = SymbolTable::new();
        table.add_function(Address::new(0x40_2000), 0x10, "late");
        snapshot.overlay_symbols(table);
        assert_eq!(snapshot.function_name_at(Address::new(0x40_2004)).as_deref(), Some("late"));
    }

    #[test]
    fn test_malformed_json_is_a_json_error()
    {
        let err = ProcessSnapshot::from_json("{ not json").unwrap_err();
        assert!(matches!(err, RetraceError::Json(_)));
    }
}
