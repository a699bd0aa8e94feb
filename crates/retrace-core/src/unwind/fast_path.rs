//! Frame-pointer fast path.

use tracing::{debug, trace};

use super::arena::Push;
use super::session::{Next, UnwindSession};
use crate::error::UnwindFault;
use crate::types::{Address, TraceStatus};

/// Bytes above SP searched for the return address of a function that has not
/// pushed its frame pointer yet.
const LEAF_PROBE_BYTES: u64 = 0x22;

/// Largest SP-to-FP distance for which FP is believed to be live.
const MAX_FRAME_DISTANCE: u64 = 0x10_0000;

impl UnwindSession<'_, '_>
{
    fn frame_pointer_is_live(&self, fp: Address) -> bool
    {
        let sp = self.regs.sp;
        !fp.is_null()
            && fp > sp
            && fp.distance_from(sp) <= MAX_FRAME_DISTANCE
            && !self.limits.past_stack_base(fp)
    }

    /// Follow the saved frame-pointer chain. Returns where the stack scan
    /// should start, or a final status when the chain accounts for the whole
    /// stack.
    pub(super) fn fast_path(&mut self) -> Next
    {
        let sp = self.regs.sp;
        let arch = self.unwinder.arch;
        if !arch.supports_frame_pointer() {
            return Next::Scan(sp);
        }
        let Some(fp) = arch.frame_pointer_value(self.regs) else {
            return Next::Scan(sp);
        };
        if !self.frame_pointer_is_live(fp) {
            debug!(%fp, "frame pointer not live, skipping fast path");
            return Next::Scan(sp);
        }

        self.probe_leaf_return(sp, fp);

        let word = self.word_size();
        let mut bp = fp;
        let mut produced = 0_u32;
        let mut last_slot: Option<Address> = None;

        loop {
            if bp.is_null() {
                break;
            }
            if self.limits.frames_exhausted(self.arena.len()) {
                let max = self.limits.max_frames.unwrap_or_default();
                return Next::Stop(TraceStatus::Incomplete {
                    reason: UnwindFault::FrameLimit { max },
                });
            }
            if self.stats.iterations >= self.limits.max_iterations {
                return Next::Stop(TraceStatus::Incomplete {
                    reason: UnwindFault::IterationExhausted {
                        iterations: self.stats.iterations,
                    },
                });
            }
            self.stats.iterations += 1;

            let slot = bp + word;
            let (Some(pushed_bp), Some(value)) = (self.read_masked(bp), self.read_masked(slot)) else {
                trace!(%bp, "frame pointer link unreadable");
                break;
            };
            if pushed_bp == bp {
                trace!(%bp, "saved frame pointer points at itself");
                break;
            }
            if value.is_null() || !self.is_code(value) {
                trace!(%bp, %value, "saved return address is not code");
                break;
            }
            let Some(site) = self.resolver.find_call_site(value) else {
                trace!(%value, "no call before saved return address");
                break;
            };
            let callee = self.resolver.resolve_callee(&site);
            let current_ip = self.arena.last().map_or(self.regs.pc, |frame| frame.ip);
            if !self.callee_reaches(&callee, current_ip) {
                debug!(call = %site.address, "frame pointer link calls a different function, leaving chain");
                break;
            }

            let frame = self.call_frame(&site, callee, value, slot, bp);
            if self.accept(frame) == Push::Accepted {
                produced += 1;
                self.stats.fast_path_frames += 1;
            }
            last_slot = Some(slot);

            if !pushed_bp.is_null() && pushed_bp < bp {
                debug!(%bp, %pushed_bp, "frame pointer chain goes down the stack, leaving chain");
                break;
            }
            bp = pushed_bp;
        }

        if bp.is_null() && produced > 0 {
            debug!(frames = produced, "frame pointer chain reached the outermost frame");
            return Next::Stop(TraceStatus::Complete);
        }
        Next::Scan(last_slot.map_or(sp, |slot| slot + word))
    }

    /// Look in the few words between SP and FP for the return address of a
    /// function that has not set up its own frame. Adds at most one frame.
    fn probe_leaf_return(&mut self, sp: Address, fp: Address)
    {
        let word = self.word_size();
        let end = fp.value().min(sp.value().saturating_add(LEAF_PROBE_BYTES));
        let pc = self.regs.pc;

        let mut cursor = sp;
        while cursor.value() < end {
            self.stats.iterations += 1;
            if let Some(value) = self.read_masked(cursor) {
                if !value.is_null() && self.is_code(value) {
                    if let Some(site) = self.resolver.find_call_site(value) {
                        let callee = self.resolver.resolve_callee(&site);
                        if callee.start.is_some() && self.callee_reaches(&callee, pc) {
                            debug!(slot = %cursor, call = %site.address, "leaf return found below frame pointer");
                            let frame = self.call_frame(&site, callee, value, cursor, cursor);
                            self.accept(frame);
                            return;
                        }
                    }
                }
            }
            cursor = cursor + word;
        }
    }
}
