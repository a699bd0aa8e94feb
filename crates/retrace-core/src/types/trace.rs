//! Unwind result types.

use serde::{Deserialize, Serialize};

use super::Frame;
use crate::error::{RetraceResult, UnwindFault};

/// How an unwind ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TraceStatus
{
    /// The scan reached the stack ceiling, a null frame pointer, or the end
    /// of readable stack.
    Complete,
    /// A limit or an unrecoverable gap cut the walk short; the frames are the
    /// best prefix found.
    Incomplete
    {
        /// What stopped the walk.
        reason: UnwindFault,
    },
    /// The context cannot be unwound at all (for example a kernel PC).
    Unsupported
    {
        /// Why the context was refused.
        reason: UnwindFault,
    },
}

impl TraceStatus
{
    /// `true` for [`TraceStatus::Complete`].
    pub const fn is_complete(&self) -> bool
    {
        matches!(self, TraceStatus::Complete)
    }

    /// The fault behind a non-complete status.
    pub fn fault(&self) -> Option<&UnwindFault>
    {
        match self {
            TraceStatus::Complete => None,
            TraceStatus::Incomplete { reason } | TraceStatus::Unsupported { reason } => Some(reason),
        }
    }
}

/// Counters collected while scanning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStats
{
    /// Candidate words examined (never reset by recovery).
    pub iterations: u32,
    /// Code-looking words rejected by call-site lookup or validation.
    pub rejected_candidates: u32,
    /// Stack words that could not be read.
    pub unreadable_words: u32,
    /// Instructions the decoder could not disassemble.
    pub decode_failures: u32,
    /// Gap recoveries performed.
    pub recoveries: u32,
    /// Bytes of stack scanned by the slow path.
    pub bytes_scanned: u64,
    /// Frames produced by the frame-pointer fast path.
    pub fast_path_frames: u32,
}

/// Result of one unwind request.
///
/// ## Example
///
/// ```rust
/// use retrace_core::types::{Trace, TraceStatus};
///
/// let trace = Trace::default();
/// let json = trace.to_json().unwrap();
/// assert_eq!(Trace::from_json(&json).unwrap(), trace);
/// assert!(matches!(trace.status, TraceStatus::Complete));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace
{
    /// Frames, innermost first.
    pub frames: Vec<Frame>,
    /// How the walk ended.
    #[serde(flatten)]
    pub status: TraceStatus,
    /// Scan counters.
    #[serde(default)]
    pub stats: TraceStats,
}

impl Default for Trace
{
    fn default() -> Self
    {
        Self {
            frames: Vec::new(),
            status: TraceStatus::Complete,
            stats: TraceStats::default(),
        }
    }
}

impl Trace
{
    /// Number of frames.
    pub fn len(&self) -> usize
    {
        self.frames.len()
    }

    /// `true` when no frame was produced.
    pub fn is_empty(&self) -> bool
    {
        self.frames.is_empty()
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> RetraceResult<String>
    {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a trace previously produced by [`Trace::to_json`].
    pub fn from_json(json: &str) -> RetraceResult<Self>
    {
        Ok(serde_json::from_str(json)?)
    }

    /// Report lines, one per frame.
    pub fn report_lines(&self) -> impl Iterator<Item = String> + '_
    {
        self.frames.iter().map(super::Frame::report_line)
    }
}
