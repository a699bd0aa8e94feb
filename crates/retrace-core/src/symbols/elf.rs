//! Symbol extraction from binary images on disk.

use std::fs;
use std::path::Path;

use object::{Object, ObjectSymbol, ObjectSymbolTable, RelocationTarget, SymbolKind};
use tracing::{debug, info};

use super::SymbolTable;
use crate::error::{RetraceError, RetraceResult};
use crate::types::Address;

/// Read function symbols and import relocations from the image at `path`,
/// relocated by `load_bias`.
///
/// - Defined text symbols from both the static and the dynamic symbol table
///   become function ranges (names demangled).
/// - Dynamic relocations that target a symbol (on ELF, the `JUMP_SLOT` and
///   `GLOB_DAT` entries of the GOT) become relocation names at their slot
///   address, so an indirect call through an unbound slot can still be named.
///
/// Any format the `object` crate reads is accepted; only ELF carries dynamic
/// relocations.
pub fn load_elf_symbols(path: impl AsRef<Path>, load_bias: u64) -> RetraceResult<SymbolTable>
{
    let path = path.as_ref();
    let data = fs::read(path)?;
    let file = object::File::parse(&*data)
        .map_err(|err| RetraceError::ObjectParse(format!("failed to parse {}: {err}", path.display())))?;

    let mut table = SymbolTable::new();
    for symbol in file.symbols().chain(file.dynamic_symbols()) {
        if symbol.kind() != SymbolKind::Text || !symbol.is_definition() {
            continue;
        }
        let Ok(name) = symbol.name() else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        table.add_function(Address::new(symbol.address().wrapping_add(load_bias)), symbol.size(), name);
    }

    if let (Some(relocations), Some(dynamic_symbols)) = (file.dynamic_relocations(), file.dynamic_symbol_table()) {
        for (offset, relocation) in relocations {
            let RelocationTarget::Symbol(index) = relocation.target() else {
                continue;
            };
            let Ok(symbol) = dynamic_symbols.symbol_by_index(index) else {
                continue;
            };
            match symbol.name() {
                Ok(name) if !name.is_empty() => {
                    table.add_relocation(Address::new(offset.wrapping_add(load_bias)), name);
                }
                _ => debug!(offset, "relocation without a symbol name"),
            }
        }
    }

    info!(
        path = %path.display(),
        functions = table.function_count(),
        relocations = table.relocation_count(),
        "loaded symbols"
    );
    Ok(table)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_missing_file_is_io_error()
    {
        let err = load_elf_symbols("/nonexistent/retrace/image.so", 0).unwrap_err();
        assert!(matches!(err, RetraceError::Io(_)));
    }

    #[test]
    fn test_garbage_is_parse_error()
    {
        let path = std::env::temp_dir().join(format!("retrace-garbage-{}.bin", std::process::id()));
        fs::write(&path, b"definitely not an object file").unwrap();
        let err = load_elf_symbols(&path, 0).unwrap_err();
        let _ = fs::remove_file(&path);
        assert!(matches!(err, RetraceError::ObjectParse(_)));
    }

    #[test]
    fn test_reads_own_test_binary()
    {
        // The test executable itself is a valid image on every platform we build for.
        let Ok(exe) = std::env::current_exe() else {
            return;
        };
        let table = load_elf_symbols(exe, 0).unwrap();
        assert!(table.function_count() > 0);
    }
}
