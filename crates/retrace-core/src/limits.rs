//! Unwind limits and policy switches.

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Bounds and policy for one unwind.
///
/// Every walk terminates: the iteration budget is never reset, and the frame
/// and byte limits cut the scan short with an `Incomplete` status.
///
/// ## Defaults
///
/// | field | default |
/// |---|---|
/// | `max_frames` | unlimited |
/// | `max_bytes` | unlimited |
/// | `stack_base` | none (the scan stops at unreadable memory) |
/// | `max_iterations` | 9000 |
/// | `gap_threshold` | 2000 bytes |
/// | `boundary_gap` | 1500 bytes |
/// | `preserve_recursion` | `false` |
/// | `collapse_recursive_callees` | `false` |
/// | `reset_ratchets_on_recovery` | `true` |
///
/// ## Example
///
/// ```rust
/// use retrace_core::UnwindLimits;
///
/// let limits = UnwindLimits::default().with_max_frames(16);
/// assert_eq!(limits.max_frames, Some(16));
/// assert_eq!(limits.max_iterations, 9000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnwindLimits
{
    /// Stop after this many frames.
    pub max_frames: Option<usize>,
    /// Stop after scanning this many bytes of stack.
    pub max_bytes: Option<u64>,
    /// Highest stack address of the thread; the scan ends once past it.
    pub stack_base: Option<Address>,
    /// Candidate words examined before giving up.
    pub max_iterations: u32,
    /// Distance past a library frame's slot that declares a gap.
    pub gap_threshold: u64,
    /// Stack delta between frames of different modules that declares a gap.
    pub boundary_gap: u64,
    /// Keep consecutive frames with the same call site.
    pub preserve_recursion: bool,
    /// Drop a frame whose callee name equals the previous frame's.
    pub collapse_recursive_callees: bool,
    /// Recompute the "been in main" / "above the C library" flags from the
    /// frames kept after a recovery rollback. When `false` the flags keep
    /// the values they had before the rollback.
    pub reset_ratchets_on_recovery: bool,
}

impl Default for UnwindLimits
{
    fn default() -> Self
    {
        Self {
            max_frames: None,
            max_bytes: None,
            stack_base: None,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            gap_threshold: Self::DEFAULT_GAP_THRESHOLD,
            boundary_gap: Self::DEFAULT_BOUNDARY_GAP,
            preserve_recursion: false,
            collapse_recursive_callees: false,
            reset_ratchets_on_recovery: true,
        }
    }
}

impl UnwindLimits
{
    /// Default iteration budget.
    pub const DEFAULT_MAX_ITERATIONS: u32 = 9000;
    /// Default gap distance after a library frame.
    pub const DEFAULT_GAP_THRESHOLD: u64 = 2000;
    /// Default module-boundary gap.
    pub const DEFAULT_BOUNDARY_GAP: u64 = 1500;

    /// Set the frame limit.
    #[must_use]
    pub fn with_max_frames(mut self, max: usize) -> Self
    {
        self.max_frames = Some(max);
        self
    }

    /// Set the byte limit.
    #[must_use]
    pub fn with_max_bytes(mut self, max: u64) -> Self
    {
        self.max_bytes = Some(max);
        self
    }

    /// Set the stack ceiling.
    #[must_use]
    pub fn with_stack_base(mut self, base: Address) -> Self
    {
        self.stack_base = Some(base);
        self
    }

    /// Keep direct recursion.
    #[must_use]
    pub fn preserving_recursion(mut self) -> Self
    {
        self.preserve_recursion = true;
        self
    }

    /// `true` once `frames` has reached the frame limit.
    pub fn frames_exhausted(&self, frames: usize) -> bool
    {
        self.max_frames.is_some_and(|max| frames >= max)
    }

    /// `true` once `bytes` has reached the byte limit.
    pub fn bytes_exhausted(&self, bytes: u64) -> bool
    {
        self.max_bytes.is_some_and(|max| bytes >= max)
    }

    /// `true` when `cursor` lies past the stack ceiling.
    pub fn past_stack_base(&self, cursor: Address) -> bool
    {
        self.stack_base.is_some_and(|base| cursor > base)
    }
}
