//! Gap recovery.
//!
//! A gap means the last accepted frame was probably a false positive that led
//! the scan astray. Recovery blacklists that frame's call site, rolls the
//! arena back to its best prefix, and resumes just above the prefix's last
//! evidence. When nothing but frame 0 (and fast-path frames) is left to roll
//! back to, the scan is restarted once from SP without the fast-path frames.
//! The blacklist survives the restart.

use tracing::debug;

use super::session::UnwindSession;
use crate::error::UnwindFault;
use crate::types::Address;

impl UnwindSession<'_, '_>
{
    /// Recover from a gap detected at `cursor`. Returns where to resume, or
    /// the fault that ends the walk.
    pub(super) fn recover(&mut self, cursor: Address) -> Result<Address, UnwindFault>
    {
        self.stats.recoveries += 1;

        if self.arena.len() <= self.fast_len {
            return self.restart_from_sp(cursor);
        }

        let Some(call_site) = self.arena.last().and_then(|frame| frame.call_site_ip) else {
            return self.restart_from_sp(cursor);
        };
        if !self.blacklist.insert(call_site) {
            debug!(%call_site, "call site already blacklisted, giving up");
            return Err(UnwindFault::GapUnrecoverable { stack_cursor: cursor });
        }

        let dropped = self.arena.rollback();
        if self.limits.reset_ratchets_on_recovery {
            self.recompute_ratchets();
        }
        let resume = self.resume_point();
        debug!(%call_site, dropped, %resume, "gap: blacklisted call site and rolled back");
        Ok(resume)
    }

    fn restart_from_sp(&mut self, cursor: Address) -> Result<Address, UnwindFault>
    {
        if self.retried_from_sp {
            debug!(%cursor, "gap with no frames left to roll back, giving up");
            return Err(UnwindFault::GapUnrecoverable { stack_cursor: cursor });
        }
        self.retried_from_sp = true;
        self.arena.truncate(self.pre_fast_len);
        self.fast_len = self.pre_fast_len;
        if self.limits.reset_ratchets_on_recovery {
            self.recompute_ratchets();
        }
        debug!(%cursor, "gap with only the innermost frames, rescanning from sp");
        Ok(self.regs.sp)
    }

    /// Stack address just above the evidence of the last retained frame.
    fn resume_point(&self) -> Address
    {
        let frames = self.arena.frames();
        match frames.last() {
            Some(last) if frames.len() > 1 && !last.is_lr_style_return => last
                .return_slot_address
                .map_or(last.stack_cursor, |slot| slot + self.word_size()),
            Some(last) => last.stack_cursor,
            None => self.regs.sp,
        }
    }
}
