//! 32-bit ARM and AArch64 conventions.

use super::ArchCapabilities;
use crate::types::{Address, Architecture, Registers};

/// Fixed 4-byte instructions, return address in LR.
///
/// Frame-pointer chains are not walked: compilers place FP inconsistently on
/// ARM (R7 in Thumb code, R11 in ARM code, X29 on AArch64 with frame records
/// often omitted in leaf code).
#[derive(Debug, Clone, Copy)]
pub struct ArmCapabilities
{
    architecture: Architecture,
}

impl ArmCapabilities
{
    /// Capabilities for [`Architecture::Arm`] or [`Architecture::Arm64`].
    pub const fn new(architecture: Architecture) -> Self
    {
        Self { architecture }
    }
}

impl ArchCapabilities for ArmCapabilities
{
    fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    fn fixed_instruction_width(&self) -> Option<u64>
    {
        Some(4)
    }

    fn supports_frame_pointer(&self) -> bool
    {
        false
    }

    fn frame_pointer_value(&self, regs: &Registers) -> Option<Address>
    {
        regs.fp
    }

    fn link_register_return(&self, regs: &Registers) -> Option<Address>
    {
        regs.lr.filter(|lr| !lr.is_null())
    }

    fn call_mnemonics(&self) -> &'static [&'static str]
    {
        &["bl", "blx", "blr"]
    }

    fn jump_mnemonics(&self) -> &'static [&'static str]
    {
        &["b", "bx", "br"]
    }

    fn is_kernel_address(&self, address: Address) -> bool
    {
        match self.architecture {
            Architecture::Arm64 => address.value() >= 0xffff_0000_0000_0000,
            _ => address.value() >= 0xc000_0000,
        }
    }
}
