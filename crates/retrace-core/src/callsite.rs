//! # Call-Site Resolver
//!
//! Given a value found on the stack, decide whether it is a return address by
//! finding the call instruction that would have produced it, and work out what
//! that call was calling.
//!
//! ## Finding the call
//!
//! - **Fixed-width ISAs** (ARM): the call can only sit at `v - 4`.
//! - **Variable-width ISAs** (x86): walk backward one byte at a time from
//!   `v - 2` across four machine words, decoding at each offset. The first
//!   (shortest) decoding that is a near call, ends exactly at `v`, and whose
//!   immediate target (if it has one) is code wins. An offset that does not
//!   decode is skipped; stepping out of mapped code ends the search.
//!
//! ## Naming the callee
//!
//! | call form | start | name |
//! |---|---|---|
//! | `call 0x401020` | the immediate | relocation name, then thunk target, then function name |
//! | `call [slot]` | the slot's contents, when code | function at the contents, then the slot's relocation name, then the stub's |
//! | `call rax` | unknown | unknown |

use std::cell::Cell;

use tracing::trace;

use crate::arch::ArchCapabilities;
use crate::collab::{CodeRangeOracle, Instruction, InstructionDecoder, MemoryReader, SymbolResolver};
use crate::error::UnwindFault;
use crate::instruction::{InstructionText, Operand};
use crate::types::{Address, ThreadId};

/// Return addresses at or below this value are never considered.
const MIN_RETURN_ADDRESS: u64 = 10;

/// Instructions examined after a call target when looking for a jump table.
const JUMP_TABLE_WINDOW: usize = 5;

/// A call instruction believed to have produced a return address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite
{
    /// Address of the call instruction.
    pub address: Address,
    /// The decoded call.
    pub instruction: Instruction,
}

impl CallSite
{
    /// Address just past the call, i.e. the return address it pushes.
    pub fn return_address(&self) -> Address
    {
        self.address + self.instruction.length
    }
}

/// What a call site calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Callee
{
    /// Entry of the target, when it could be determined.
    pub start: Option<Address>,
    /// Name of the target, when it could be determined.
    pub name: Option<String>,
    /// Call instruction text with the target replaced by `name`.
    pub text: String,
}

impl Callee
{
    /// `true` when neither the target nor its name is known.
    pub fn is_unknown(&self) -> bool
    {
        self.start.is_none() && self.name.is_none()
    }
}

/// Call-site lookup and callee naming over borrowed collaborators.
pub struct CallSiteResolver<'a>
{
    arch: &'a dyn ArchCapabilities,
    thread: ThreadId,
    code: &'a dyn CodeRangeOracle,
    symbols: &'a dyn SymbolResolver,
    decoder: &'a dyn InstructionDecoder,
    memory: &'a dyn MemoryReader,
    decode_failures: Cell<u32>,
}

impl<'a> CallSiteResolver<'a>
{
    /// Bundle the collaborators for one thread.
    pub fn new(
        arch: &'a dyn ArchCapabilities,
        thread: ThreadId,
        code: &'a dyn CodeRangeOracle,
        symbols: &'a dyn SymbolResolver,
        decoder: &'a dyn InstructionDecoder,
        memory: &'a dyn MemoryReader,
    ) -> Self
    {
        Self {
            arch,
            thread,
            code,
            symbols,
            decoder,
            memory,
            decode_failures: Cell::new(0),
        }
    }

    /// Number of failed decodes so far.
    pub fn decode_failures(&self) -> u32
    {
        self.decode_failures.get()
    }

    fn decode(&self, address: Address) -> Option<Instruction>
    {
        let decoded = self.decoder.decode_one(address);
        if decoded.is_none() {
            self.decode_failures.set(self.decode_failures.get().saturating_add(1));
            let fault = UnwindFault::DecodeFailure { address };
            trace!(%fault, "candidate offset skipped");
        }
        decoded
    }

    fn is_code(&self, address: Address) -> bool
    {
        self.code.is_code(address, self.thread)
    }

    /// Find the call instruction that would leave `candidate` on the stack.
    pub fn find_call_site(&self, candidate: Address) -> Option<CallSite>
    {
        if candidate.value() <= MIN_RETURN_ADDRESS || !self.is_code(candidate) {
            return None;
        }

        if let Some(width) = self.arch.fixed_instruction_width() {
            let address = candidate.checked_sub(width)?;
            let instruction = self.decode(address)?;
            return self
                .arch
                .is_call_instruction(&instruction.text)
                .then_some(CallSite { address, instruction });
        }

        let window = self.arch.word_size() * 4;
        for back in 2..window + 2 {
            let Some(address) = candidate.checked_sub(back) else {
                break;
            };
            if !self.is_code(address) {
                break;
            }
            let Some(instruction) = self.decode(address) else {
                continue;
            };
            if address + instruction.length != candidate || !self.arch.is_call_instruction(&instruction.text) {
                continue;
            }
            let (far, direct_target) = {
                let text = InstructionText::parse(&instruction.text);
                let far = text.is_far();
                let direct = match text.target() {
                    Some(Operand::Direct(target)) => Some(target),
                    _ => None,
                };
                (far, direct)
            };
            if far {
                trace!(%address, "far call rejected");
                continue;
            }
            if let Some(target) = direct_target.filter(|target| !self.is_code(*target)) {
                trace!(%address, %target, "call target is not code");
                continue;
            }
            return Some(CallSite { address, instruction });
        }
        None
    }

    /// Resolve the target of `site`.
    pub fn resolve_callee(&self, site: &CallSite) -> Callee
    {
        self.resolve_target(site.address, &site.instruction)
    }

    /// Resolve the target of any call or jump `instruction` located at `address`.
    pub fn resolve_target(&self, address: Address, instruction: &Instruction) -> Callee
    {
        let text = InstructionText::parse(&instruction.text);
        let (start, name) = match text.target() {
            Some(Operand::Direct(target)) => {
                let name = self
                    .symbols
                    .relocation_name(target)
                    .or_else(|| self.check_relocate(target).and_then(|(_, name)| name))
                    .or_else(|| self.symbols.function_name_at(target));
                (Some(target), name)
            }
            Some(operand @ (Operand::AbsoluteSlot(_) | Operand::IpRelativeSlot(_))) => {
                match operand.slot_address(address, instruction.length) {
                    Some(slot) => self.resolve_slot(slot),
                    None => (None, None),
                }
            }
            _ => (None, None),
        };

        let rendered = match &name {
            Some(name) => text.with_target_name(name),
            None => instruction.text.clone(),
        };
        Callee {
            start,
            name,
            text: rendered,
        }
    }

    fn resolve_slot(&self, slot: Address) -> (Option<Address>, Option<String>)
    {
        let pointer = self
            .memory
            .read_word(slot)
            .map(|raw| Address::new(raw & self.arch.address_mask()))
            .filter(|pointer| !pointer.is_null());

        let code_pointer = pointer.filter(|pointer| self.is_code(*pointer));
        let name = code_pointer
            .and_then(|pointer| self.symbols.function_name_at(pointer))
            .or_else(|| self.symbols.relocation_name(slot))
            .or_else(|| pointer.and_then(|pointer| self.symbols.relocation_name(pointer)));
        (code_pointer, name)
    }

    /// When the instruction at `address` jumps through a memory slot (a
    /// relocation thunk or PLT entry), where the slot leads and that target's
    /// name. A direct `jmp` is a tail call, not a relocation, and yields `None`.
    pub fn check_relocate(&self, address: Address) -> Option<(Address, Option<String>)>
    {
        let instruction = self.decoder.decode_one(address)?;
        if !self.arch.is_jump_instruction(&instruction.text) {
            return None;
        }
        let slot = InstructionText::parse(&instruction.text)
            .target()?
            .slot_address(address, instruction.length)?;
        let (target, name) = self.resolve_slot(slot);
        Some((target?, name))
    }

    /// `true` when `address` looks like a PLT entry: it starts with a jump, or
    /// (ARM) with an `add` involving the PC.
    pub fn is_plt(&self, address: Address) -> bool
    {
        let Some(instruction) = self.decoder.decode_one(address) else {
            return false;
        };
        if self.arch.is_jump_instruction(&instruction.text) {
            return true;
        }
        let text = InstructionText::parse(&instruction.text);
        text.is("add") && text.uses_register("pc")
    }

    /// `true` when the function at `call_to` dispatches through a register
    /// jump within its first few instructions.
    pub fn is_jump_table(&self, call_to: Address) -> bool
    {
        let Some(first) = self.decoder.decode_one(call_to) else {
            return false;
        };
        let mut address = call_to + first.length;
        for _ in 0..JUMP_TABLE_WINDOW {
            let Some(instruction) = self.decoder.decode_one(address) else {
                return false;
            };
            if self.arch.is_jump_instruction(&instruction.text) {
                let text = InstructionText::parse(&instruction.text);
                if text.operands().len() == 1 && matches!(text.target(), Some(Operand::Register(_))) {
                    return true;
                }
            }
            address = address + instruction.length;
        }
        false
    }

    /// ARM PLT thunk: the second or third instruction at `address` loads the PC.
    pub fn is_arm_plt_thunk(&self, address: Address) -> bool
    {
        let Some(first) = self.decoder.decode_one(address) else {
            return false;
        };
        let mut next = address + first.length;
        for _ in 0..2 {
            let Some(instruction) = self.decoder.decode_one(next) else {
                return false;
            };
            let text = InstructionText::parse(&instruction.text);
            if text.is("ldr") && text.operands().first().is_some_and(|dest| dest.eq_ignore_ascii_case("pc")) {
                return true;
            }
            next = next + instruction.length;
        }
        false
    }

    /// Tail-call detection: when `callee` starts with a direct branch to a
    /// function entry, that entry.
    pub fn tail_branch_target(&self, callee: Address) -> Option<(Address, Instruction)>
    {
        let instruction = self.decoder.decode_one(callee)?;
        if !self.arch.is_jump_instruction(&instruction.text) {
            return None;
        }
        let target = match InstructionText::parse(&instruction.text).target()? {
            Operand::Direct(target) => target,
            _ => return None,
        };
        self.symbols.is_function_entry(target).then_some((target, instruction))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::arch::capabilities;
    use crate::snapshot::SnapshotBuilder;
    use crate::types::{Architecture, ModuleKind};

    fn x86_process() -> crate::snapshot::ProcessSnapshot
    {
        SnapshotBuilder::new(Architecture::X86)
            .module("app", 0x0804_8000, 0x0805_0000, ModuleKind::Main)
            .function(0x0804_8100, 0x100, "main")
            .function(0x0804_8400, 0x40, "helper")
            .function(0x0804_8500, 0x10, "memcpy@plt")
            .relocation(0x0804_a00c, "memcpy")
            // direct call, 5 bytes, ends at 0x8048125
            .instruction(0x0804_8120, 5, "call 0x8048400")
            // a decoy that decodes at 0x8048123 but is not a call
            .instruction(0x0804_8123, 2, "add al, 0x0")
            // indirect through an unbound GOT slot, 6 bytes, ends at 0x8048136
            .instruction(0x0804_8130, 6, "call dword ptr [0x804a00c]")
            // far call ending at 0x8048147
            .instruction(0x0804_8140, 7, "lcall 0x23:0x8048400")
            // call to a non-code immediate ending at 0x8048155
            .instruction(0x0804_8150, 5, "call 0x10")
            .instruction(0x0804_8400, 1, "push ebp")
            .instruction(0x0804_8500, 6, "jmp dword ptr [0x804a00c]")
            .word(0x0804_a00c, 0x0804_8506)
            .build()
    }

    fn resolver(process: &crate::snapshot::ProcessSnapshot) -> CallSiteResolver<'_>
    {
        CallSiteResolver::new(
            capabilities(process.architecture),
            process.thread,
            process,
            process,
            process,
            process,
        )
    }

    #[test]
    fn test_direct_call_must_end_exactly_at_return()
    {
        let process = x86_process();
        let resolver = resolver(&process);

        let site = resolver.find_call_site(Address::new(0x0804_8125)).unwrap();
        assert_eq!(site.address, Address::new(0x0804_8120));
        assert_eq!(site.return_address(), Address::new(0x0804_8125));

        let callee = resolver.resolve_callee(&site);
        assert_eq!(callee.start, Some(Address::new(0x0804_8400)));
        assert_eq!(callee.name.as_deref(), Some("helper"));
        assert_eq!(callee.text, "call helper");

        // One byte further along nothing ends at the candidate.
        assert!(resolver.find_call_site(Address::new(0x0804_8126)).is_none());
    }

    #[test]
    fn test_far_calls_and_non_code_targets_are_rejected()
    {
        let process = x86_process();
        let resolver = resolver(&process);
        assert!(resolver.find_call_site(Address::new(0x0804_8147)).is_none());
        assert!(resolver.find_call_site(Address::new(0x0804_8155)).is_none());
    }

    #[test]
    fn test_small_and_non_code_values_are_rejected()
    {
        let process = x86_process();
        let resolver = resolver(&process);
        assert!(resolver.find_call_site(Address::new(10)).is_none());
        assert!(resolver.find_call_site(Address::new(0x1000_0000)).is_none());
    }

    #[test]
    fn test_unbound_got_slot_is_named_from_relocations()
    {
        let process = x86_process();
        let resolver = resolver(&process);

        let site = resolver.find_call_site(Address::new(0x0804_8136)).unwrap();
        let callee = resolver.resolve_callee(&site);
        // The slot points back into the PLT stub, which has a function name of
        // its own; the stub name wins over the relocation.
        assert_eq!(callee.start, Some(Address::new(0x0804_8506)));
        assert_eq!(callee.name.as_deref(), Some("memcpy@plt"));
        assert_eq!(callee.text, "call memcpy@plt");
    }

    #[test]
    fn test_slot_pointing_nowhere_uses_relocation_name()
    {
        let process = SnapshotBuilder::new(Architecture::X86_64)
            .module("app", 0x40_0000, 0x41_0000, ModuleKind::Main)
            .relocation(0x40_3018, "free")
            .instruction(0x40_1000, 6, "call qword ptr [rip+0x2012]")
            .word(0x40_3018, 0)
            .build();
        let resolver = resolver(&process);

        let site = resolver.find_call_site(Address::new(0x40_1006)).unwrap();
        let callee = resolver.resolve_callee(&site);
        assert_eq!(callee.start, None);
        assert_eq!(callee.name.as_deref(), Some("free"));
        assert_eq!(callee.text, "call free");
    }

    #[test]
    fn test_relocation_thunks_and_plt()
    {
        let process = x86_process();
        let resolver = resolver(&process);

        let (target, _) = resolver.check_relocate(Address::new(0x0804_8500)).unwrap();
        assert_eq!(target, Address::new(0x0804_8506));
        assert!(resolver.is_plt(Address::new(0x0804_8500)));
        assert!(!resolver.is_plt(Address::new(0x0804_8400)));
        assert!(resolver.check_relocate(Address::new(0x0804_8400)).is_none());
    }

    #[test]
    fn test_direct_jump_is_a_tail_branch_not_a_relocation()
    {
        let process = SnapshotBuilder::new(Architecture::X86)
            .module("app", 0x0804_8000, 0x0805_0000, ModuleKind::Main)
            .function(0x0804_8200, 0x10, "wrapper")
            .function(0x0804_8300, 0x100, "work")
            .instruction(0x0804_8200, 5, "jmp 0x8048300")
            .instruction(0x0804_8208, 5, "jmp 0x8048310")
            .build();
        let resolver = resolver(&process);

        assert!(resolver.check_relocate(Address::new(0x0804_8200)).is_none());
        let (target, branch) = resolver.tail_branch_target(Address::new(0x0804_8200)).unwrap();
        assert_eq!(target, Address::new(0x0804_8300));
        assert_eq!(resolver.resolve_target(Address::new(0x0804_8200), &branch).text, "jmp work");

        // Into the middle of a function is not a tail call.
        assert!(resolver.tail_branch_target(Address::new(0x0804_8208)).is_none());
    }

    #[test]
    fn test_variable_width_window_spans_four_words()
    {
        // x86: offsets v-2 through v-17 are tried.
        let process = SnapshotBuilder::new(Architecture::X86)
            .module("app", 0x0804_8000, 0x0805_0000, ModuleKind::Main)
            .instruction(0x0804_8400, 1, "push ebp")
            .instruction(0x0804_8500, 17, "call 0x8048400")
            .instruction(0x0804_8600, 18, "call 0x8048400")
            .build();
        let resolver = resolver(&process);

        let site = resolver.find_call_site(Address::new(0x0804_8511)).unwrap();
        assert_eq!(site.address, Address::new(0x0804_8500));
        assert!(resolver.find_call_site(Address::new(0x0804_8612)).is_none());
    }

    #[test]
    fn test_jump_table_detection()
    {
        let process = SnapshotBuilder::new(Architecture::X86)
            .module("app", 0x0804_8000, 0x0805_0000, ModuleKind::Main)
            .instruction(0x0804_8600, 3, "mov eax, dword ptr [esp+4]")
            .instruction(0x0804_8603, 7, "mov eax, dword ptr [eax*4+0x804a100]")
            .instruction(0x0804_860a, 2, "jmp eax")
            .instruction(0x0804_8700, 1, "push ebp")
            .instruction(0x0804_8701, 2, "mov ebp, esp")
            .instruction(0x0804_8703, 1, "ret")
            .build();
        let resolver = resolver(&process);
        assert!(resolver.is_jump_table(Address::new(0x0804_8600)));
        assert!(!resolver.is_jump_table(Address::new(0x0804_8700)));
    }

    #[test]
    fn test_arm_uses_fixed_width_lookup()
    {
        let process = SnapshotBuilder::new(Architecture::Arm)
            .module("app", 0x1_0000, 0x2_0000, ModuleKind::Main)
            .function(0x1_0400, 0x40, "worker")
            .function(0x1_0800, 0x0c, "puts@plt")
            .instruction(0x1_0100, 4, "bl 0x10400")
            .instruction(0x1_0104, 4, "mov r0, r4")
            .instruction(0x1_0800, 4, "add ip, pc, #0")
            .instruction(0x1_0804, 4, "add ip, ip, #16")
            .instruction(0x1_0808, 4, "ldr pc, [ip, #0x8b0]!")
            .build();
        let resolver = resolver(&process);

        let site = resolver.find_call_site(Address::new(0x1_0104)).unwrap();
        assert_eq!(site.address, Address::new(0x1_0100));
        assert_eq!(resolver.resolve_callee(&site).name.as_deref(), Some("worker"));
        assert!(resolver.find_call_site(Address::new(0x1_0108)).is_none());

        assert!(resolver.is_arm_plt_thunk(Address::new(0x1_0800)));
        assert!(resolver.is_plt(Address::new(0x1_0800)));
        assert!(!resolver.is_arm_plt_thunk(Address::new(0x1_0100)));
    }
}
