//! Register snapshot handed to the unwinder.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Address;

/// Register state of the thread at the moment it was stopped
///
/// Only the registers the heuristics consult are first-class fields:
///
/// - `pc`: Program Counter (EIP/RIP on x86, PC on ARM)
/// - `sp`: Stack Pointer (ESP/RSP, SP)
/// - `fp`: Frame/base pointer (EBP/RBP on x86, R11/X29 on ARM), when captured
/// - `lr`: Link register (ARM only), when captured
///
/// Anything else the capture produced is kept in `other`, keyed by register
/// name, so snapshots round-trip without loss.
///
/// ## Example
///
/// ```rust
/// use retrace_core::types::{Address, Registers};
///
/// let regs = Registers::new(Address::new(0x401000), Address::new(0x7ffe_0000)).with_fp(Address::new(0x7ffe_0040));
/// assert_eq!(regs.fp, Some(Address::new(0x7ffe_0040)));
/// assert_eq!(regs.lr, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers
{
    /// Program counter
    pub pc: Address,
    /// Stack pointer
    pub sp: Address,
    /// Frame pointer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fp: Option<Address>,
    /// Link register
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lr: Option<Address>,
    /// Remaining registers by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub other: BTreeMap<String, u64>,
}

impl Registers
{
    /// Snapshot with only PC and SP known.
    pub fn new(pc: Address, sp: Address) -> Self
    {
        Self {
            pc,
            sp,
            ..Self::default()
        }
    }

    /// Set the frame pointer.
    #[must_use]
    pub fn with_fp(mut self, fp: Address) -> Self
    {
        self.fp = Some(fp);
        self
    }

    /// Set the link register.
    #[must_use]
    pub fn with_lr(mut self, lr: Address) -> Self
    {
        self.lr = Some(lr);
        self
    }

    /// Look up a register by name, covering the first-class fields and their
    /// usual architectural aliases.
    pub fn get(&self, name: &str) -> Option<u64>
    {
        match name.to_lowercase().as_str() {
            "pc" | "eip" | "rip" => Some(self.pc.value()),
            "sp" | "esp" | "rsp" => Some(self.sp.value()),
            "fp" | "ebp" | "rbp" | "x29" => self.fp.map(Address::value),
            "lr" | "x30" => self.lr.map(Address::value),
            other => self.other.get(other).copied(),
        }
    }
}
