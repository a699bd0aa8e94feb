//! Symbol name normalisation.
//!
//! Names reach the unwinder from several places (ELF symbol tables, relocation
//! tables, analysis databases) and in several spellings: mangled or not, with
//! or without an argument list, with library-internal prefixes. The helpers
//! here bring them to a comparable form.
//!
//! ## Matching
//!
//! [`names_match`] decides whether a call's target name and the name of the
//! function the previous frame sits in refer to the same routine. It is
//! deliberately loose:
//!
//! - argument lists are dropped when both names carry one
//! - `struct_std::`, `class_std::` and `std::` qualifiers are ignored
//! - `>_>` is read as `>>` (some demanglers space nested templates)
//! - a prefix match in either direction is enough
//! - a few known aliases match (`mktime`/`timelocal`, wide and multibyte
//!   string compares reached through `strcmp`, `IO_file_*` wrappers)

use rustc_demangle::try_demangle;

/// Demangle `raw` when it is a Rust (legacy or v0) symbol, otherwise return it
/// unchanged. The trailing hash of legacy symbols is dropped.
///
/// ```rust
/// use retrace_core::symbols::demangle_name;
///
/// assert_eq!(demangle_name("_ZN4core3ptr13drop_in_place17h0123456789abcdefE"), "core::ptr::drop_in_place");
/// assert_eq!(demangle_name("memcpy"), "memcpy");
/// ```
pub fn demangle_name(raw: &str) -> String
{
    match try_demangle(raw) {
        Ok(demangled) => format!("{demangled:#}"),
        Err(_) => raw.to_string(),
    }
}

/// Display form of a function name: a leading `std::` (and a following
/// `__cxx11::`) is trimmed.
///
/// ```rust
/// use retrace_core::symbols::clean_name;
///
/// assert_eq!(clean_name("std::__cxx11::basic_string::append"), "basic_string::append");
/// assert_eq!(clean_name("main"), "main");
/// ```
pub fn clean_name(name: &str) -> String
{
    let Some(rest) = name.strip_prefix("std::") else {
        return name.to_string();
    };
    rest.strip_prefix("__cxx11::").unwrap_or(rest).to_string()
}

fn normalise(name: &str, strip_args: bool) -> String
{
    let base = if strip_args {
        name.split('(').next().unwrap_or(name)
    } else {
        name
    };
    base.replace("struct_std::", "")
        .replace("class_std::", "")
        .replace("std::", "")
        .replace(">_>", ">>")
        .replace("snextc", "sgetc")
}

/// Loose equality of two function names, see the module docs.
///
/// ```rust
/// use retrace_core::symbols::names_match;
///
/// assert!(names_match("std::vector<int>::push_back(int const&)", "vector<int>::push_back(int&&)"));
/// assert!(names_match("mktime", "timelocal"));
/// assert!(!names_match("malloc", "free"));
/// ```
pub fn names_match(callee: &str, current: &str) -> bool
{
    if callee.is_empty() || current.is_empty() {
        return false;
    }
    let strip_args = callee.contains('(') && current.contains('(');
    let a = normalise(callee, strip_args);
    let b = normalise(current, strip_args);

    if a.starts_with(&b) || b.starts_with(&a) {
        return true;
    }
    if matches!((a.as_str(), b.as_str()), ("timelocal", "mktime") | ("mktime", "timelocal")) {
        return true;
    }
    if b == "strcmp" && matches!(a.as_str(), "wcscmp" | "mbscmp" | "mbscmp_l") {
        return true;
    }
    b.starts_with("IO_file_") && b.ends_with(&a)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_argument_lists_dropped_only_when_both_have_one()
    {
        assert!(names_match("foo(int)", "foo(char const*)"));
        // `bar(int)` is not a prefix of `barrier` and vice versa.
        assert!(!names_match("bar(int)", "barrier"));
    }

    #[test]
    fn test_qualifiers_and_templates()
    {
        assert!(names_match("class_std::map<a, b>::find", "map<a, b>::find"));
        assert!(names_match("list<vector<int>_>::begin", "list<vector<int>>::begin"));
        assert!(names_match("basic_streambuf::snextc", "basic_streambuf::sgetc"));
    }

    #[test]
    fn test_known_aliases()
    {
        assert!(names_match("wcscmp", "strcmp"));
        assert!(!names_match("strcmp", "wcscmp"));
        assert!(names_match("xsputn", "IO_file_xsputn"));
        assert!(!names_match("", "main"));
    }

    #[test]
    fn test_demangles_rust_and_leaves_c_names()
    {
        assert_eq!(
            demangle_name("_ZN7mycrate6parser5parse17h0123456789abcdefE"),
            "mycrate::parser::parse"
        );
        assert_eq!(demangle_name("_Z3foov"), "_Z3foov");
        assert_eq!(demangle_name("puts"), "puts");
    }
}
