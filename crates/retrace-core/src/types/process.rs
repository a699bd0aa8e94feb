//! Thread, architecture, and module identity types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Thread identifier
///
/// Identifies the thread whose stack is being unwound. The Code Range Oracle
/// receives it with every query because module maps are tracked per thread
/// group in the analysis platform.
///
/// ## Example
///
/// ```rust
/// use retrace_core::types::ThreadId;
///
/// let thread = ThreadId::from(12345);
/// assert_eq!(thread.raw(), 12345);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Get the raw `u64` representation of the thread identifier
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// CPU architecture of the target process
///
/// The unwinder supports two instruction-set families:
///
/// - **x86** (`X86`, `X86_64`): variable-width instructions, `call`/`jmp`,
///   optional EBP/RBP frame-pointer chain.
/// - **ARM** (`Arm`, `Arm64`): fixed 4-byte instructions, `bl`/`blx`, return
///   address delivered in the link register.
///
/// Architecture-specific behaviour lives behind
/// [`ArchCapabilities`](crate::arch::ArchCapabilities); this enum only names
/// the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture
{
    /// 32-bit x86
    X86,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// 32-bit ARM
    Arm,
    /// 64-bit ARM
    Arm64,
}

impl Architecture
{
    /// Size of a machine word (and of a stack slot) in bytes.
    pub const fn word_size(self) -> u64
    {
        match self {
            Architecture::X86 | Architecture::Arm => 4,
            Architecture::X86_64 | Architecture::Arm64 => 8,
        }
    }

    /// `true` for the ARM family.
    pub const fn is_arm(self) -> bool
    {
        matches!(self, Architecture::Arm | Architecture::Arm64)
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Arm => "arm",
            Architecture::Arm64 => "arm64",
        };
        write!(f, "{label}")
    }
}

impl FromStr for Architecture
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "x86" | "i386" | "i686" => Ok(Architecture::X86),
            "x86_64" | "x86-64" | "amd64" => Ok(Architecture::X86_64),
            "arm" | "armv7" => Ok(Architecture::Arm),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            _ => Err(format!("Unknown architecture: {s}. Use 'x86', 'x86_64', 'arm' or 'arm64'")),
        }
    }
}

/// Identifier of a binary image mapped into the target (its file name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId
{
    /// Placeholder used for frames whose address is outside every known module.
    pub const UNKNOWN: &'static str = "unknown";

    /// Build an identifier from a path or file name. Only the final path
    /// component is kept, for both `/` and `\` separators.
    pub fn new(name: impl AsRef<str>) -> Self
    {
        let name = name.as_ref();
        let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name);
        Self(base.to_string())
    }

    /// The `"unknown"` module.
    pub fn unknown() -> Self
    {
        Self(Self::UNKNOWN.to_string())
    }

    /// Module file name.
    pub fn as_str(&self) -> &str
    {
        &self.0
    }

    /// `true` for the `"unknown"` placeholder.
    pub fn is_unknown(&self) -> bool
    {
        self.0 == Self::UNKNOWN
    }

    /// Whether the file name looks like the C runtime or its companions
    /// (`libc`, `libpthread`, the dynamic loader, the C++ runtimes).
    ///
    /// ```rust
    /// use retrace_core::types::ModuleId;
    ///
    /// assert!(ModuleId::new("/lib/x86_64-linux-gnu/libc.so.6").looks_like_c_library());
    /// assert!(ModuleId::new("libc-2.31.so").looks_like_c_library());
    /// assert!(!ModuleId::new("libcrypto.so.3").looks_like_c_library());
    /// ```
    pub fn looks_like_c_library(&self) -> bool
    {
        const PREFIXES: [&str; 8] =
            ["libc.", "libc-", "clib", "libpthread", "ld-linux", "ld.so", "libstdc++", "libc++"];
        PREFIXES.iter().any(|prefix| self.0.starts_with(prefix))
    }
}

impl fmt::Display for ModuleId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.0)
    }
}

/// Classification of a mapped image, as used by the unwinder's heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind
{
    /// The main program's own text segment.
    Main,
    /// The C runtime library and its companions.
    CLibrary,
    /// Any other shared library.
    Library,
}

impl ModuleKind
{
    /// `true` for both kinds of shared library.
    pub const fn is_library(self) -> bool
    {
        matches!(self, ModuleKind::CLibrary | ModuleKind::Library)
    }
}
