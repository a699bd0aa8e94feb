//! Stack frame types.

use serde::{Deserialize, Serialize};

use super::{Address, ModuleId};

/// One reconstructed stack entry.
///
/// Frames are produced innermost first. Frame 0 describes the interrupted
/// instruction itself; every later frame describes the call instruction that
/// is believed to have pushed (or, on ARM, placed in the link register) the
/// return address that was found on the stack.
///
/// ## Fields at a glance
///
/// | field | frame 0 | later frames |
/// |---|---|---|
/// | `ip` | starting PC | call site |
/// | `call_site_ip` | `None` | call site |
/// | `stack_cursor` | SP | stack slot where the evidence was found |
/// | `return_address` | backfilled | value read from the stack |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame
{
    /// Anchor instruction pointer used for display and coalescing.
    pub ip: Address,
    /// Call or branch responsible for this frame.
    pub call_site_ip: Option<Address>,
    /// Image containing `ip`.
    pub module: ModuleId,
    /// Decoded instruction at `ip`, callee replaced by its name when known.
    pub instruction_text: String,
    /// Stack address where this frame's evidence was found.
    pub stack_cursor: Address,
    /// Where execution resumes if this frame returns.
    pub return_address: Option<Address>,
    /// Stack slot holding `return_address`.
    pub return_slot_address: Option<Address>,
    /// Entry address of the call target.
    pub callee_function_start: Option<Address>,
    /// Name of the call target.
    pub callee_function_name: Option<String>,
    /// Name of the function that contains `ip`.
    pub function_containing_ip: Option<String>,
    /// Inferred from the link register rather than a stack slot.
    #[serde(default)]
    pub is_lr_style_return: bool,
}

impl Frame
{
    /// Bare frame anchored at `ip`, evidence at `stack_cursor`.
    pub fn new(ip: Address, stack_cursor: Address, module: ModuleId) -> Self
    {
        Self {
            ip,
            call_site_ip: None,
            module,
            instruction_text: String::new(),
            stack_cursor,
            return_address: None,
            return_slot_address: None,
            callee_function_start: None,
            callee_function_name: None,
            function_containing_ip: None,
            is_lr_style_return: false,
        }
    }

    /// `true` for the frame describing the interrupted instruction.
    pub fn is_innermost(&self) -> bool
    {
        self.call_site_ip.is_none() && !self.is_lr_style_return
    }

    /// Report line in the classic `[sp] ip module instruction function` layout.
    ///
    /// ```rust
    /// use retrace_core::types::{Address, Frame, ModuleId};
    ///
    /// let mut frame = Frame::new(Address::new(0x401000), Address::new(0x7ff0), ModuleId::new("/bin/app"));
    /// frame.instruction_text = "call memcpy".into();
    /// frame.function_containing_ip = Some("main".into());
    /// assert_eq!(frame.report_line(), "[0x00007ff0] 0x00401000 app call memcpy main");
    /// ```
    pub fn report_line(&self) -> String
    {
        let function = self.function_containing_ip.as_deref().map(crate::symbols::clean_name).unwrap_or_default();
        let line = format!(
            "[{}] {} {} {} {}",
            self.stack_cursor,
            self.ip,
            self.module,
            self.instruction_text,
            function
        );
        line.trim_end().to_string()
    }
}
