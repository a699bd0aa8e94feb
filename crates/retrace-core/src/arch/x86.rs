//! x86 and x86-64 conventions.

use super::ArchCapabilities;
use crate::types::{Address, Architecture, Registers};

/// Variable-width instructions, EBP/RBP frame-pointer chains, no link register.
#[derive(Debug, Clone, Copy)]
pub struct X86Capabilities
{
    architecture: Architecture,
}

impl X86Capabilities
{
    /// Capabilities for [`Architecture::X86`] or [`Architecture::X86_64`].
    pub const fn new(architecture: Architecture) -> Self
    {
        Self { architecture }
    }
}

impl ArchCapabilities for X86Capabilities
{
    fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    fn fixed_instruction_width(&self) -> Option<u64>
    {
        None
    }

    fn supports_frame_pointer(&self) -> bool
    {
        true
    }

    fn frame_pointer_value(&self, regs: &Registers) -> Option<Address>
    {
        regs.fp
    }

    fn link_register_return(&self, _regs: &Registers) -> Option<Address>
    {
        None
    }

    fn call_mnemonics(&self) -> &'static [&'static str]
    {
        &["call", "callq", "calll"]
    }

    fn jump_mnemonics(&self) -> &'static [&'static str]
    {
        &["jmp", "jmpq", "jmpl"]
    }

    fn is_kernel_address(&self, address: Address) -> bool
    {
        match self.architecture {
            Architecture::X86_64 => address.value() >= 0xffff_8000_0000_0000,
            _ => address.value() >= 0xc000_0000,
        }
    }
}
