//! # Architecture capabilities
//!
//! The unwinder is written once; everything that differs between x86 and ARM
//! is asked of an [`ArchCapabilities`] implementation:
//!
//! - word size and whether instructions have a fixed width
//! - which mnemonics are calls and jumps
//! - whether a frame-pointer chain may be followed, and where FP lives
//! - whether a link register carries the return address
//! - where privileged address space begins
//!
//! Use [`capabilities`] to get the implementation for an [`Architecture`].

mod arm;
mod x86;

pub use arm::ArmCapabilities;
pub use x86::X86Capabilities;

use crate::types::{Address, Architecture, Registers};

/// Architecture-dependent conventions consulted by the unwinder.
pub trait ArchCapabilities: Send + Sync
{
    /// Architecture being described.
    fn architecture(&self) -> Architecture;

    /// Size of a stack slot in bytes.
    fn word_size(&self) -> u64
    {
        self.architecture().word_size()
    }

    /// `Some(width)` when every instruction has the same length.
    fn fixed_instruction_width(&self) -> Option<u64>;

    /// `true` when a saved frame-pointer chain may be walked.
    fn supports_frame_pointer(&self) -> bool;

    /// Frame pointer from a register snapshot, if the convention has one.
    fn frame_pointer_value(&self, regs: &Registers) -> Option<Address>;

    /// Return address held in a link register, if the convention has one.
    fn link_register_return(&self, regs: &Registers) -> Option<Address>;

    /// Mnemonics that transfer control and push or link a return address.
    fn call_mnemonics(&self) -> &'static [&'static str];

    /// Mnemonics of unconditional jumps/branches.
    fn jump_mnemonics(&self) -> &'static [&'static str];

    /// `true` when `address` lies in privileged (kernel) address space.
    fn is_kernel_address(&self, address: Address) -> bool;

    /// `true` when the decoded instruction text is a call.
    fn is_call_instruction(&self, text: &str) -> bool
    {
        let mnemonic = mnemonic_of(text);
        self.call_mnemonics().iter().any(|candidate| mnemonic.eq_ignore_ascii_case(candidate))
    }

    /// `true` when the decoded instruction text is an unconditional jump.
    fn is_jump_instruction(&self, text: &str) -> bool
    {
        let mnemonic = mnemonic_of(text);
        self.jump_mnemonics().iter().any(|candidate| mnemonic.eq_ignore_ascii_case(candidate))
    }

    /// Mask applied to candidate stack values before they are tested as code.
    fn address_mask(&self) -> u64
    {
        if self.word_size() == 8 {
            0x0000_ffff_ffff_ffff
        } else {
            0xffff_ffff
        }
    }
}

/// Capabilities for `architecture`.
///
/// ```rust
/// use retrace_core::arch::capabilities;
/// use retrace_core::types::Architecture;
///
/// let arm = capabilities(Architecture::Arm);
/// assert_eq!(arm.fixed_instruction_width(), Some(4));
/// assert!(!arm.supports_frame_pointer());
/// assert!(capabilities(Architecture::X86_64).is_call_instruction("call qword ptr [rip+0x2fe2]"));
/// ```
pub fn capabilities(architecture: Architecture) -> &'static dyn ArchCapabilities
{
    static X86: X86Capabilities = X86Capabilities::new(Architecture::X86);
    static X86_64: X86Capabilities = X86Capabilities::new(Architecture::X86_64);
    static ARM: ArmCapabilities = ArmCapabilities::new(Architecture::Arm);
    static ARM64: ArmCapabilities = ArmCapabilities::new(Architecture::Arm64);

    match architecture {
        Architecture::X86 => &X86,
        Architecture::X86_64 => &X86_64,
        Architecture::Arm => &ARM,
        Architecture::Arm64 => &ARM64,
    }
}

/// First whitespace-separated token, ignoring `lock`/`rep`/`bnd`/`notrack`
/// style prefixes.
pub(crate) fn mnemonic_of(text: &str) -> &str
{
    const PREFIXES: [&str; 5] = ["lock", "rep", "repz", "bnd", "notrack"];
    text.split_whitespace()
        .find(|token| !PREFIXES.iter().any(|prefix| token.eq_ignore_ascii_case(prefix)))
        .unwrap_or("")
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_mnemonic_skips_prefixes()
    {
        assert_eq!(mnemonic_of("bnd call qword ptr [rip+0x10]"), "call");
        assert_eq!(mnemonic_of("notrack jmp rax"), "jmp");
        assert_eq!(mnemonic_of(""), "");
    }

    #[test]
    fn test_kernel_thresholds()
    {
        let x64 = capabilities(Architecture::X86_64);
        assert!(x64.is_kernel_address(Address::new(0xffff_ffff_8100_0000)));
        assert!(!x64.is_kernel_address(Address::new(0x7fff_ffff_f000)));

        let x86 = capabilities(Architecture::X86);
        assert!(x86.is_kernel_address(Address::new(0xc010_0000)));
        assert!(!x86.is_kernel_address(Address::new(0x0804_8000)));

        let arm64 = capabilities(Architecture::Arm64);
        assert!(arm64.is_kernel_address(Address::new(0xffff_0000_0800_0000)));
        assert!(!arm64.is_kernel_address(Address::new(0x0000_aaaa_0000_0000)));
    }

    #[test]
    fn test_call_and_jump_classification()
    {
        let x86 = capabilities(Architecture::X86);
        assert!(x86.is_call_instruction("call 0x8048400"));
        assert!(x86.is_call_instruction("CALL eax"));
        assert!(!x86.is_call_instruction("jmp 0x8048400"));
        assert!(x86.is_jump_instruction("jmp dword ptr [0x804a00c]"));

        let arm = capabilities(Architecture::Arm);
        assert!(arm.is_call_instruction("bl 0x10400"));
        assert!(arm.is_call_instruction("blx r3"));
        assert!(!arm.is_call_instruction("b 0x10400"));
        assert!(arm.is_jump_instruction("b 0x10400"));
    }

    #[test]
    fn test_address_mask_by_word_size()
    {
        assert_eq!(capabilities(Architecture::X86_64).address_mask(), 0x0000_ffff_ffff_ffff);
        assert_eq!(capabilities(Architecture::Arm).address_mask(), 0xffff_ffff);
    }
}
