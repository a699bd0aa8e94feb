//! Per-request unwind state.

use std::collections::BTreeSet;

use tracing::debug;

use super::arena::{FrameArena, Push};
use super::Unwinder;
use crate::callsite::{CallSite, CallSiteResolver, Callee};
use crate::error::UnwindFault;
use crate::limits::UnwindLimits;
use crate::types::{Address, Frame, ModuleId, ModuleKind, Registers, Trace, TraceStats, TraceStatus};

/// Consecutive unreadable stack bytes taken as the end of the stack.
pub(super) const UNREADABLE_RUN_LIMIT: u64 = 4096;

/// Where the unwinder goes after a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Next
{
    /// Keep scanning from this stack address.
    Scan(Address),
    /// Stop with this status.
    Stop(TraceStatus),
}

pub(super) struct UnwindSession<'s, 'a>
{
    pub(super) unwinder: &'s Unwinder<'a>,
    pub(super) resolver: CallSiteResolver<'a>,
    pub(super) regs: &'s Registers,
    pub(super) limits: &'s UnwindLimits,
    pub(super) arena: FrameArena,
    pub(super) blacklist: BTreeSet<Address>,
    pub(super) been_in_main: bool,
    pub(super) been_above_clib: bool,
    /// Frames present before the fast path ran (frame 0 and an LR frame).
    pub(super) pre_fast_len: usize,
    /// Frames present once the fast path finished.
    pub(super) fast_len: usize,
    pub(super) retried_from_sp: bool,
    pub(super) stats: TraceStats,
}

impl<'s, 'a> UnwindSession<'s, 'a>
{
    pub(super) fn new(unwinder: &'s Unwinder<'a>, regs: &'s Registers, limits: &'s UnwindLimits) -> Self
    {
        Self {
            unwinder,
            resolver: unwinder.resolver(),
            regs,
            limits,
            arena: FrameArena::new(
                limits.preserve_recursion,
                limits.collapse_recursive_callees,
                limits.boundary_gap,
            ),
            blacklist: BTreeSet::new(),
            been_in_main: false,
            been_above_clib: false,
            pre_fast_len: 0,
            fast_len: 0,
            retried_from_sp: false,
            stats: TraceStats::default(),
        }
    }

    pub(super) fn run(mut self) -> Trace
    {
        let pc = self.regs.pc;
        if self.unwinder.arch.is_kernel_address(pc) {
            debug!(%pc, "kernel pc, not unwinding");
            return Trace {
                frames: Vec::new(),
                status: TraceStatus::Unsupported {
                    reason: UnwindFault::UnsupportedContext {
                        pc,
                        reason: "program counter is in kernel address space".to_string(),
                    },
                },
                stats: self.stats,
            };
        }

        self.push_innermost();
        self.push_link_register_frame();
        self.pre_fast_len = self.arena.len();

        let next = self.fast_path();
        self.fast_len = self.arena.len();

        let status = match next {
            Next::Stop(status) => status,
            Next::Scan(cursor) => self.scan(cursor),
        };
        self.finish(status)
    }

    fn finish(mut self, status: TraceStatus) -> Trace
    {
        self.stats.decode_failures += self.resolver.decode_failures();
        let mut frames = self.arena.into_frames();
        if let Some(max) = self.limits.max_frames {
            frames.truncate(max);
        }
        debug!(frames = frames.len(), iterations = self.stats.iterations, ?status, "unwind finished");
        Trace {
            frames,
            status,
            stats: self.stats,
        }
    }

    pub(super) fn word_size(&self) -> u64
    {
        self.unwinder.arch.word_size()
    }

    /// Read a stack word, masked to the architecture's address width.
    pub(super) fn read_masked(&self, address: Address) -> Option<Address>
    {
        self.unwinder
            .memory
            .read_word(address)
            .map(|raw| Address::new(raw & self.unwinder.arch.address_mask()))
    }

    pub(super) fn is_code(&self, address: Address) -> bool
    {
        self.unwinder.code.is_code(address, self.unwinder.thread)
    }

    pub(super) fn module_of(&self, address: Address) -> ModuleId
    {
        self.unwinder
            .code
            .containing_module(address, self.unwinder.thread)
            .unwrap_or_else(ModuleId::unknown)
    }

    pub(super) fn module_kind(&self, address: Address) -> Option<ModuleKind>
    {
        self.unwinder.code.module_kind(address, self.unwinder.thread)
    }

    pub(super) fn is_main_text(&self, address: Address) -> bool
    {
        self.module_kind(address) == Some(ModuleKind::Main)
    }

    pub(super) fn is_library(&self, address: Address) -> bool
    {
        self.module_kind(address).is_some_and(ModuleKind::is_library)
    }

    pub(super) fn function_name_at(&self, address: Address) -> Option<String>
    {
        self.unwinder.symbols.function_name_at(address)
    }

    /// `true` when the call described by `callee` reaches the function that
    /// contains `ip`: directly, through a relocation thunk, or by name.
    /// An unresolvable callee or an unknown function at `ip` counts as
    /// consistent.
    pub(super) fn callee_reaches(&self, callee: &Callee, ip: Address) -> bool
    {
        let symbols = self.unwinder.symbols;
        let Some(current) = symbols.function_of(ip) else {
            return true;
        };

        if let Some(start) = callee.start {
            if symbols.same_function(start, ip) {
                return true;
            }
            if let Some((target, _)) = self.resolver.check_relocate(start) {
                if symbols.same_function(target, ip) {
                    return true;
                }
            }
        }

        let current_name = symbols.name_of(current);
        match (callee.name.as_deref(), current_name.as_deref()) {
            (Some(callee_name), Some(current_name)) => crate::symbols::names_match(callee_name, current_name),
            (None, _) => callee.start.map_or(true, |start| symbols.function_of(start).is_none()),
            (Some(_), None) => true,
        }
    }

    /// Frame for an accepted call site whose return address `value` was found
    /// in `slot`.
    pub(super) fn call_frame(&self, site: &CallSite, callee: Callee, value: Address, slot: Address, cursor: Address) -> Frame
    {
        let mut frame = Frame::new(site.address, cursor, self.module_of(site.address));
        frame.call_site_ip = Some(site.address);
        frame.instruction_text = callee.text;
        frame.return_address = Some(value);
        frame.return_slot_address = Some(slot);
        frame.callee_function_start = callee.start;
        frame.callee_function_name = callee.name;
        frame.function_containing_ip = self.function_name_at(site.address);
        frame
    }

    /// Append `frame`; on acceptance backfill frame 0 and move the ratchets.
    pub(super) fn accept(&mut self, frame: Frame) -> Push
    {
        let previous_ip = self.arena.last().map(|previous| previous.ip);
        let return_address = frame.return_address;
        let return_slot = frame.return_slot_address;
        let callee_start = frame.callee_function_start;
        let callee_name = frame.callee_function_name.clone();
        let ip = frame.ip;

        let outcome = self.arena.push(frame);
        if outcome == Push::Coalesced {
            debug!(%ip, "duplicate frame coalesced");
            return outcome;
        }

        if let Some(return_address) = return_address {
            self.arena
                .backfill_innermost(return_address, return_slot, callee_start, callee_name.as_deref());
        }
        if let Some(previous_ip) = previous_ip {
            self.advance_ratchets(previous_ip, ip);
        }
        debug!(%ip, depth = self.arena.len() - 1, "frame accepted");
        outcome
    }

    fn advance_ratchets(&mut self, previous_ip: Address, ip: Address)
    {
        if self.is_main_text(ip) {
            self.been_in_main = true;
        }
        if self.module_kind(previous_ip) == Some(ModuleKind::CLibrary)
            && self.module_kind(ip) != Some(ModuleKind::CLibrary)
        {
            self.been_above_clib = true;
        }
    }

    /// Recompute the ratchets from the frames currently held.
    pub(super) fn recompute_ratchets(&mut self)
    {
        self.been_in_main = false;
        self.been_above_clib = false;
        let ips: Vec<Address> = self.arena.frames().iter().map(|frame| frame.ip).collect();
        if let Some(first) = ips.first() {
            self.been_in_main = self.is_main_text(*first);
        }
        for pair in ips.windows(2) {
            self.advance_ratchets(pair[0], pair[1]);
        }
    }

    fn push_innermost(&mut self)
    {
        let pc = self.regs.pc;
        let mut frame = Frame::new(pc, self.regs.sp, self.module_of(pc));
        frame.function_containing_ip = self.function_name_at(pc);

        if let Some(instruction) = self.unwinder.decoder.decode_one(pc) {
            let arch = self.unwinder.arch;
            if arch.is_call_instruction(&instruction.text) || arch.is_jump_instruction(&instruction.text) {
                let callee = self.resolver.resolve_target(pc, &instruction);
                frame.instruction_text = callee.text;
            } else {
                frame.instruction_text = instruction.text;
            }
        } else {
            self.stats.decode_failures += 1;
            debug!(%pc, "could not decode instruction at pc");
        }

        self.arena.push(frame);
        self.been_in_main = self.is_main_text(pc);
    }

    /// ARM: a frame for the caller recorded in LR, when LR returns into a
    /// different function right after a call to the current one (or to a PLT
    /// thunk).
    fn push_link_register_frame(&mut self)
    {
        let pc = self.regs.pc;
        let Some(lr) = self.unwinder.arch.link_register_return(self.regs) else {
            return;
        };
        let lr = Address::new(lr.value() & self.unwinder.arch.address_mask());
        if !self.is_code(lr) || self.unwinder.symbols.same_function(lr, pc) {
            return;
        }
        let Some(site) = self.resolver.find_call_site(lr) else {
            debug!(%lr, "link register does not follow a call");
            return;
        };
        let callee = self.resolver.resolve_callee(&site);
        let to_current = callee.start.is_some_and(|start| {
            self.unwinder.symbols.same_function(start, pc) || self.resolver.is_arm_plt_thunk(start)
        }) || (callee.start.is_none() && self.callee_reaches(&callee, pc));
        if !to_current {
            debug!(%lr, call = %site.address, "link register call does not reach current function");
            return;
        }

        let mut frame = Frame::new(site.address, self.regs.sp, self.module_of(site.address));
        frame.call_site_ip = Some(site.address);
        frame.return_address = Some(lr);
        frame.callee_function_start = callee.start;
        frame.callee_function_name = callee.name.clone();
        frame.function_containing_ip = self.function_name_at(site.address);
        frame.is_lr_style_return = true;
        frame.instruction_text = callee.text;

        if self.accept(frame) == Push::Accepted {
            debug!(%lr, "link register frame added");
        }
    }
}
