//! Frame accumulator: append-only arena with a best-prefix watermark.
//!
//! Frames are pushed into a `Vec`. Whenever the arena grows past its previous
//! maximum, everything but the newest frame becomes the best prefix. A
//! rollback truncates to that prefix, or further when the arena already sits
//! at it, so the newest frame always goes. No frame is ever reordered.

use tracing::debug;

use crate::types::{Address, Frame};

/// Result of offering a frame to the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push
{
    /// The frame was appended.
    Accepted,
    /// The frame duplicated the previous one and was dropped.
    Coalesced,
}

#[derive(Debug)]
pub(crate) struct FrameArena
{
    frames: Vec<Frame>,
    most: usize,
    watermark: usize,
    preserve_recursion: bool,
    collapse_recursive_callees: bool,
    boundary_gap: u64,
    boundary_gap_seen: bool,
}

impl FrameArena
{
    pub(crate) fn new(preserve_recursion: bool, collapse_recursive_callees: bool, boundary_gap: u64) -> Self
    {
        Self {
            frames: Vec::new(),
            most: 0,
            watermark: 0,
            preserve_recursion,
            collapse_recursive_callees,
            boundary_gap,
            boundary_gap_seen: false,
        }
    }

    pub(crate) fn len(&self) -> usize
    {
        self.frames.len()
    }

    pub(crate) fn frames(&self) -> &[Frame]
    {
        &self.frames
    }

    pub(crate) fn last(&self) -> Option<&Frame>
    {
        self.frames.last()
    }

    #[cfg(test)]
    pub(crate) fn watermark(&self) -> usize
    {
        self.watermark
    }

    pub(crate) fn into_frames(self) -> Vec<Frame>
    {
        self.frames
    }

    /// Offer `frame`. Direct recursion (same `ip` as the previous frame) is
    /// coalesced unless recursion is preserved.
    pub(crate) fn push(&mut self, frame: Frame) -> Push
    {
        if let Some(previous) = self.frames.last() {
            if self.collapse_recursive_callees
                && frame.callee_function_name.is_some()
                && frame.callee_function_name == previous.callee_function_name
            {
                debug!(ip = %frame.ip, "same callee as previous frame, collapsed");
                return Push::Coalesced;
            }
            if !self.preserve_recursion && frame.ip == previous.ip {
                return Push::Coalesced;
            }
        }

        self.frames.push(frame);
        if self.frames.len() > self.most {
            self.most = self.frames.len();
            self.watermark = self.most - 1;
        }
        self.check_boundary();
        Push::Accepted
    }

    fn check_boundary(&mut self)
    {
        let [.., previous, newest] = self.frames.as_slice() else {
            return;
        };
        if previous.module.is_unknown() || newest.module.is_unknown() || previous.module == newest.module {
            return;
        }
        let delta = newest.stack_cursor.distance_from(previous.stack_cursor);
        if delta > self.boundary_gap {
            debug!(delta, from = %previous.module, to = %newest.module, "module boundary gap");
            self.boundary_gap_seen = true;
        }
    }

    /// A module-boundary gap was seen since the last rollback.
    pub(crate) fn boundary_gap_seen(&self) -> bool
    {
        self.boundary_gap_seen
    }

    /// Truncate to the best prefix, always dropping at least the newest frame
    /// but never frame 0. The watermark follows the arena down. Returns the
    /// number of frames dropped.
    pub(crate) fn rollback(&mut self) -> usize
    {
        let keep = self.watermark.min(self.frames.len().saturating_sub(1)).max(1);
        let dropped = self.frames.len().saturating_sub(keep);
        self.truncate(keep);
        self.watermark = self.watermark.min(keep);
        dropped
    }

    /// Keep the first `len` frames.
    pub(crate) fn truncate(&mut self, len: usize)
    {
        self.frames.truncate(len);
        self.boundary_gap_seen = false;
        if self.frames.len() == 1 {
            self.clear_backfill();
        }
    }

    /// Fill in frame 0's return information the first time a return value is
    /// found for it.
    pub(crate) fn backfill_innermost(
        &mut self,
        return_address: Address,
        return_slot: Option<Address>,
        callee_start: Option<Address>,
        callee_name: Option<&str>,
    )
    {
        let Some(innermost) = self.frames.first_mut() else {
            return;
        };
        if innermost.return_address.is_some() {
            return;
        }
        innermost.return_address = Some(return_address);
        innermost.return_slot_address = return_slot;
        if innermost.callee_function_start.is_none() {
            innermost.callee_function_start = callee_start;
        }
        if innermost.callee_function_name.is_none() {
            innermost.callee_function_name = callee_name.map(str::to_string);
        }
    }

    fn clear_backfill(&mut self)
    {
        if let Some(innermost) = self.frames.first_mut() {
            innermost.return_address = None;
            innermost.return_slot_address = None;
            innermost.callee_function_start = None;
            innermost.callee_function_name = None;
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::ModuleId;

    fn frame(ip: u64, cursor: u64, module: &str) -> Frame
    {
        Frame::new(Address::new(ip), Address::new(cursor), ModuleId::new(module))
    }

    #[test]
    fn test_identical_ip_is_coalesced()
    {
        let mut arena = FrameArena::new(false, false, 1500);
        assert_eq!(arena.push(frame(0x1000, 0x100, "app")), Push::Accepted);
        assert_eq!(arena.push(frame(0x2000, 0x110, "app")), Push::Accepted);
        assert_eq!(arena.push(frame(0x2000, 0x120, "app")), Push::Coalesced);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_recursion_preserved_on_request()
    {
        let mut arena = FrameArena::new(true, false, 1500);
        arena.push(frame(0x1000, 0x100, "app"));
        arena.push(frame(0x2000, 0x110, "app"));
        assert_eq!(arena.push(frame(0x2000, 0x120, "app")), Push::Accepted);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn test_recursive_callees_collapse()
    {
        let mut arena = FrameArena::new(false, true, 1500);
        let mut first = frame(0x2000, 0x110, "app");
        first.callee_function_name = Some("walk".into());
        let mut second = frame(0x2010, 0x120, "app");
        second.callee_function_name = Some("walk".into());

        arena.push(frame(0x1000, 0x100, "app"));
        assert_eq!(arena.push(first), Push::Accepted);
        assert_eq!(arena.push(second), Push::Coalesced);
    }

    #[test]
    fn test_watermark_rollback_keeps_best_prefix()
    {
        let mut arena = FrameArena::new(false, false, 1500);
        for (i, ip) in [0x1000, 0x2000, 0x3000, 0x4000].into_iter().enumerate() {
            arena.push(frame(ip, 0x100 + i as u64 * 0x10, "app"));
        }
        assert_eq!(arena.watermark(), 3);
        assert_eq!(arena.rollback(), 1);
        assert_eq!(arena.len(), 3);
        assert_eq!(arena.last().map(|f| f.ip), Some(Address::new(0x3000)));

        // Regrowing to the old maximum does not move the watermark.
        arena.push(frame(0x5000, 0x200, "app"));
        assert_eq!(arena.watermark(), 3);
    }

    #[test]
    fn test_rollback_never_drops_frame_zero()
    {
        let mut arena = FrameArena::new(false, false, 1500);
        arena.push(frame(0x1000, 0x100, "app"));
        arena.backfill_innermost(Address::new(0x2005), Some(Address::new(0x108)), None, Some("f"));
        arena.push(frame(0x2000, 0x108, "app"));

        assert_eq!(arena.rollback(), 1);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.frames()[0].return_address, None);
        assert_eq!(arena.frames()[0].callee_function_name, None);
        assert_eq!(arena.rollback(), 0);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_backfill_after_rollback_takes_new_callee()
    {
        let mut arena = FrameArena::new(false, false, 1500);
        arena.push(frame(0x1000, 0x100, "app"));
        let stale_callee = Some(Address::new(0x900));
        arena.backfill_innermost(Address::new(0x2005), Some(Address::new(0x104)), stale_callee, Some("stale"));
        arena.push(frame(0x2000, 0x104, "app"));
        arena.rollback();

        let callee = Some(Address::new(0x1000));
        arena.backfill_innermost(Address::new(0x3005), Some(Address::new(0x400)), callee, Some("f"));
        let innermost = &arena.frames()[0];
        assert_eq!(innermost.return_address, Some(Address::new(0x3005)));
        assert_eq!(innermost.callee_function_start, Some(Address::new(0x1000)));
        assert_eq!(innermost.callee_function_name.as_deref(), Some("f"));
    }

    #[test]
    fn test_second_rollback_at_watermark_still_drops_newest()
    {
        let mut arena = FrameArena::new(false, false, 1500);
        for (i, ip) in [0x1000, 0x2000, 0x3000].into_iter().enumerate() {
            arena.push(frame(ip, 0x100 + i as u64 * 4, "app"));
        }
        assert_eq!(arena.rollback(), 1);
        assert_eq!(arena.len(), 2);

        // Nothing was added since, so the newest frame is the suspect now.
        assert_eq!(arena.rollback(), 1);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.watermark(), 1);
    }

    #[test]
    fn test_module_boundary_gap_flag()
    {
        let mut arena = FrameArena::new(false, false, 1500);
        arena.push(frame(0x1000, 0x100, "libfoo.so"));
        arena.push(frame(0x2000, 0x100 + 1501, "app"));
        assert!(arena.boundary_gap_seen());
        arena.rollback();
        assert!(!arena.boundary_gap_seen());

        arena.push(frame(0x3000, 0x100 + 1400, "app"));
        assert!(!arena.boundary_gap_seen());
    }
}
