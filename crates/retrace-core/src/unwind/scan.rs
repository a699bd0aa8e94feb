//! Slow path: word-by-word stack scan.

use tracing::{debug, trace};

use super::session::{UnwindSession, UNREADABLE_RUN_LIMIT};
use crate::callsite::{CallSite, Callee};
use crate::error::UnwindFault;
use crate::types::{Address, Frame, ModuleKind, TraceStatus};

/// Outcome of validating one candidate.
#[derive(Debug)]
enum Verdict
{
    Accept,
    /// Accept, after recording the tail-call branch that leads from the
    /// callee into the function below.
    AcceptWithBranch(Frame),
    Reject(&'static str),
}

impl UnwindSession<'_, '_>
{
    /// Scan from `start` until a stop condition. Returns the final status.
    pub(super) fn scan(&mut self, start: Address) -> TraceStatus
    {
        let word = self.word_size();
        let mut cursor = start;
        let mut unreadable_run = 0_u64;

        loop {
            if self.limits.past_stack_base(cursor) {
                debug!(%cursor, "reached stack base");
                return TraceStatus::Complete;
            }
            if self.limits.frames_exhausted(self.arena.len()) {
                return TraceStatus::Incomplete {
                    reason: UnwindFault::FrameLimit {
                        max: self.limits.max_frames.unwrap_or_default(),
                    },
                };
            }
            if self.limits.bytes_exhausted(self.stats.bytes_scanned) {
                return TraceStatus::Incomplete {
                    reason: UnwindFault::ByteLimit {
                        max: self.limits.max_bytes.unwrap_or_default(),
                    },
                };
            }
            if self.stats.iterations >= self.limits.max_iterations {
                debug!(iterations = self.stats.iterations, "iteration budget exhausted");
                return TraceStatus::Incomplete {
                    reason: UnwindFault::IterationExhausted {
                        iterations: self.stats.iterations,
                    },
                };
            }
            self.stats.iterations += 1;

            if self.gap_at(cursor) {
                match self.recover(cursor) {
                    Ok(resume) => {
                        cursor = resume;
                        unreadable_run = 0;
                        continue;
                    }
                    Err(fault) => return TraceStatus::Incomplete { reason: fault },
                }
            }

            match self.read_masked(cursor) {
                None => {
                    self.stats.unreadable_words += 1;
                    let fault = UnwindFault::UnreadableMemory { address: cursor };
                    trace!(%fault, "skipping stack word");
                    unreadable_run += word;
                    if unreadable_run >= UNREADABLE_RUN_LIMIT {
                        debug!(%cursor, "end of readable stack");
                        return TraceStatus::Complete;
                    }
                }
                Some(value) => {
                    unreadable_run = 0;
                    self.consider(cursor, value);
                }
            }

            self.stats.bytes_scanned += word;
            let Some(next) = cursor.checked_add(word) else {
                return TraceStatus::Complete;
            };
            cursor = next;
        }
    }

    /// `true` when the scan has wandered too far from the last frame.
    fn gap_at(&self, cursor: Address) -> bool
    {
        if self.arena.boundary_gap_seen() {
            return true;
        }
        let Some(last) = self.arena.last() else {
            return false;
        };
        cursor.distance_from(last.stack_cursor) > self.limits.gap_threshold && self.is_library(last.ip)
    }

    /// Test the word `value` found at `cursor` as a return address.
    fn consider(&mut self, cursor: Address, value: Address)
    {
        if value.is_null() || !self.is_code(value) {
            return;
        }
        let Some(site) = self.resolver.find_call_site(value) else {
            self.stats.rejected_candidates += 1;
            trace!(%cursor, %value, "code pointer without a call before it");
            return;
        };
        if self.blacklist.contains(&site.address) {
            self.stats.rejected_candidates += 1;
            trace!(%cursor, call = %site.address, "blacklisted call site");
            return;
        }

        let callee = self.resolver.resolve_callee(&site);
        match self.validate(cursor, value, &site, &callee) {
            Verdict::Reject(why) => {
                self.stats.rejected_candidates += 1;
                trace!(%cursor, %value, call = %site.address, why, "candidate rejected");
            }
            Verdict::Accept => {
                let frame = self.call_frame(&site, callee, value, cursor, cursor);
                self.accept(frame);
            }
            Verdict::AcceptWithBranch(branch) => {
                debug!(branch = %branch.ip, "tail call recorded");
                self.accept(branch);
                let frame = self.call_frame(&site, callee, value, cursor, cursor);
                self.accept(frame);
            }
        }
    }

    fn validate(&self, cursor: Address, value: Address, site: &CallSite, callee: &Callee) -> Verdict
    {
        let Some(previous) = self.arena.last() else {
            return Verdict::Accept;
        };
        let previous_ip = previous.ip;
        let reaches = self.callee_reaches(callee, previous_ip);

        if !reaches && self.is_main_text(value) && self.is_library(previous_ip) {
            if let Some(start) = callee.start {
                if self.is_main_text(start) && !self.resolver.is_plt(start) {
                    return Verdict::Reject("library frame returning into main through a non-PLT call");
                }
            }
        }

        if self.been_above_clib && self.module_kind(value) == Some(ModuleKind::CLibrary) {
            return Verdict::Reject("already above the C library");
        }

        if let Some(start) = callee.start {
            if let Some((target, _)) = self.resolver.check_relocate(start) {
                let target_module = self.module_of(target);
                if !target_module.is_unknown()
                    && target_module != self.module_of(site.address)
                    && target_module != self.module_of(previous_ip)
                {
                    return Verdict::Reject("relocation thunk resolves into a third module");
                }
            }
        }

        if reaches {
            return Verdict::Accept;
        }
        if let Some(branch) = self.tail_branch(cursor, callee, previous_ip) {
            return Verdict::AcceptWithBranch(branch);
        }
        if self.through_jump_table(callee) {
            debug!(%cursor, %value, "callee may reach the function below through a jump table");
            return Verdict::Accept;
        }
        if self.been_in_main && self.is_main_text(value) {
            return Verdict::Accept;
        }
        if self.unwinder.arch.supports_frame_pointer() {
            if let Some(fp) = self.unwinder.arch.frame_pointer_value(self.regs) {
                if !fp.is_null() && cursor == fp + self.word_size() {
                    return Verdict::Accept;
                }
            }
        }
        Verdict::Reject("callee does not reach the function below")
    }

    /// Variable-width code only, and only below the C library: a callee that
    /// dispatches through a register jump may reach any function.
    fn through_jump_table(&self, callee: &Callee) -> bool
    {
        if self.been_above_clib || self.unwinder.arch.fixed_instruction_width().is_some() {
            return false;
        }
        callee.start.is_some_and(|start| self.resolver.is_jump_table(start))
    }

    /// When the callee begins with a direct branch into the function that
    /// contains `previous_ip`, the frame describing that branch.
    fn tail_branch(&self, cursor: Address, callee: &Callee, previous_ip: Address) -> Option<Frame>
    {
        let start = callee.start?;
        let (target, instruction) = self.resolver.tail_branch_target(start)?;
        if !self.unwinder.symbols.same_function(target, previous_ip) {
            return None;
        }

        let branch = self.resolver.resolve_target(start, &instruction);
        let mut frame = Frame::new(start, cursor, self.module_of(start));
        frame.call_site_ip = Some(start);
        frame.instruction_text = branch.text;
        frame.callee_function_start = Some(target);
        frame.callee_function_name = branch.name;
        frame.function_containing_ip = self.function_name_at(start);
        Some(frame)
    }
}
