//! # Symbols
//!
//! Function boundaries and import names for the heuristics.
//!
//! [`SymbolTable`] is a plain in-memory database of function ranges and
//! relocation names that implements [`SymbolResolver`]. It can be filled by
//! hand, from a process snapshot, or from binary images on disk with
//! [`load_elf_symbols`].
//!
//! ## Example
//!
//! ```rust
//! use retrace_core::collab::SymbolResolver;
//! use retrace_core::symbols::SymbolTable;
//! use retrace_core::types::Address;
//!
//! let mut table = SymbolTable::new();
//! table.add_function(Address::new(0x1000), 0x40, "parse_header");
//! table.add_function(Address::new(0x1040), 0x80, "parse_body");
//! table.add_relocation(Address::new(0x4018), "memcpy");
//!
//! assert_eq!(table.function_name_at(Address::new(0x1050)).as_deref(), Some("parse_body"));
//! assert!(table.same_function(Address::new(0x1001), Address::new(0x103f)));
//! assert_eq!(table.relocation_name(Address::new(0x4018)).as_deref(), Some("memcpy"));
//! ```

mod demangle;
mod elf;

use std::collections::BTreeMap;

pub use demangle::{clean_name, demangle_name, names_match};
pub use elf::load_elf_symbols;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collab::{FunctionId, SymbolResolver};
use crate::types::Address;

/// One function range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSymbol
{
    /// Entry address.
    pub start: Address,
    /// Size in bytes; zero when unknown (the range then runs to the next
    /// function's start).
    #[serde(default)]
    pub size: u64,
    /// Demangled name.
    pub name: String,
}

impl FunctionSymbol
{
    /// Build a function record. The name is demangled.
    pub fn new(start: Address, size: u64, name: &str) -> Self
    {
        Self {
            start,
            size,
            name: demangle_name(name),
        }
    }
}

/// Import name bound to a relocation slot (GOT entry) or PLT stub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationSymbol
{
    /// Slot or stub address.
    pub address: Address,
    /// Imported symbol name.
    pub name: String,
}

/// Function ranges and relocation names.
///
/// Lookups go through a sorted index built on first use; adding entries
/// invalidates it.
#[derive(Debug, Default)]
pub struct SymbolTable
{
    functions: Vec<FunctionSymbol>,
    relocations: BTreeMap<Address, String>,
    sorted: OnceCell<Vec<FunctionSymbol>>,
}

impl Clone for SymbolTable
{
    fn clone(&self) -> Self
    {
        Self {
            functions: self.functions.clone(),
            relocations: self.relocations.clone(),
            sorted: OnceCell::new(),
        }
    }
}

impl SymbolTable
{
    /// Empty table.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Build a table from function and relocation records.
    pub fn from_records(functions: Vec<FunctionSymbol>, relocations: &[RelocationSymbol]) -> Self
    {
        let mut table = Self {
            functions,
            ..Self::default()
        };
        for relocation in relocations {
            table.relocations.insert(relocation.address, relocation.name.clone());
        }
        table
    }

    /// Add a function range.
    pub fn add_function(&mut self, start: Address, size: u64, name: &str)
    {
        self.functions.push(FunctionSymbol::new(start, size, name));
        self.sorted.take();
    }

    /// Bind `name` to the relocation slot or stub at `address`.
    pub fn add_relocation(&mut self, address: Address, name: &str)
    {
        self.relocations.insert(address, name.to_string());
    }

    /// Merge another table into this one.
    pub fn extend(&mut self, other: SymbolTable)
    {
        debug!(
            functions = other.functions.len(),
            relocations = other.relocations.len(),
            "merging symbol table"
        );
        self.functions.extend(other.functions);
        self.relocations.extend(other.relocations);
        self.sorted.take();
    }

    /// Number of function ranges.
    pub fn function_count(&self) -> usize
    {
        self.functions.len()
    }

    /// Number of relocation names.
    pub fn relocation_count(&self) -> usize
    {
        self.relocations.len()
    }

    /// Function ranges sorted by start address; duplicates at one start keep
    /// the first name added.
    pub fn functions(&self) -> &[FunctionSymbol]
    {
        self.sorted.get_or_init(|| {
            let mut sorted = self.functions.clone();
            sorted.sort_by_key(|function| function.start);
            sorted.dedup_by_key(|function| function.start);
            sorted
        })
    }

    /// Relocation records in address order.
    pub fn relocations(&self) -> impl Iterator<Item = RelocationSymbol> + '_
    {
        self.relocations.iter().map(|(address, name)| RelocationSymbol {
            address: *address,
            name: name.clone(),
        })
    }

    /// Function record containing `address`.
    pub fn lookup(&self, address: Address) -> Option<&FunctionSymbol>
    {
        let functions = self.functions();
        let index = functions.partition_point(|function| function.start <= address);
        let candidate = functions.get(index.checked_sub(1)?)?;
        let end = if candidate.size > 0 {
            candidate.start.saturating_add(candidate.size)
        } else {
            functions.get(index).map_or(Address::new(u64::MAX), |next| next.start)
        };
        (address < end).then_some(candidate)
    }
}

impl SymbolResolver for SymbolTable
{
    fn function_of(&self, address: Address) -> Option<FunctionId>
    {
        self.lookup(address).map(|function| FunctionId(function.start))
    }

    fn name_of(&self, function: FunctionId) -> Option<String>
    {
        let functions = self.functions();
        functions
            .binary_search_by_key(&function.start(), |record| record.start)
            .ok()
            .map(|index| functions[index].name.clone())
    }

    fn relocation_name(&self, address: Address) -> Option<String>
    {
        self.relocations.get(&address).cloned()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_unsized_functions_extend_to_next_start()
    {
        let mut table = SymbolTable::new();
        table.add_function(Address::new(0x2000), 0, "second");
        table.add_function(Address::new(0x1000), 0, "first");

        assert_eq!(table.function_name_at(Address::new(0x1fff)).as_deref(), Some("first"));
        assert_eq!(table.function_name_at(Address::new(0x2000)).as_deref(), Some("second"));
        assert_eq!(table.function_name_at(Address::new(0x0fff)), None);
        assert!(table.is_function_entry(Address::new(0x2000)));
        assert!(!table.is_function_entry(Address::new(0x2001)));
    }

    #[test]
    fn test_sized_functions_leave_holes()
    {
        let mut table = SymbolTable::new();
        table.add_function(Address::new(0x1000), 0x10, "tiny");
        table.add_function(Address::new(0x1100), 0x10, "other");

        assert!(table.lookup(Address::new(0x1010)).is_none());
        assert!(!table.same_function(Address::new(0x1000), Address::new(0x1100)));
    }

    #[test]
    fn test_adding_after_lookup_rebuilds_index()
    {
        let mut table = SymbolTable::new();
        table.add_function(Address::new(0x1000), 0x10, "a");
        assert!(table.lookup(Address::new(0x3000)).is_none());

        table.add_function(Address::new(0x3000), 0x10, "b");
        assert_eq!(table.lookup(Address::new(0x3004)).map(|f| f.name.as_str()), Some("b"));
    }

    #[test]
    fn test_extend_merges_relocations()
    {
        let mut base = SymbolTable::new();
        let mut extra = SymbolTable::new();
        extra.add_relocation(Address::new(0x4010), "free");
        extra.add_function(Address::new(0x5000), 4, "stub");
        base.extend(extra);

        assert_eq!(base.relocation_count(), 1);
        assert_eq!(base.function_count(), 1);
        assert_eq!(base.relocation_name(Address::new(0x4010)).as_deref(), Some("free"));
    }
}
