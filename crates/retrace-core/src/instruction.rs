//! # Instruction text model
//!
//! The decoder hands back disassembly *text*. The heuristics only ever need a
//! handful of facts from it (the mnemonic, whether the single operand of a
//! call or jump is an immediate target, a memory slot, or a register) so this
//! module parses just enough of Intel and ARM syntax to answer those.
//!
//! ## Operand forms
//!
//! | text | [`Operand`] |
//! |---|---|
//! | `0x401020`, `#0x10400` | `Direct` |
//! | `dword ptr [0x804a00c]` | `AbsoluteSlot` |
//! | `qword ptr [rip+0x2fe2]` | `IpRelativeSlot` |
//! | `eax`, `r3`, `x16` | `Register` |
//! | `qword ptr [rax+0x10]` | `Other` |

use smallvec::SmallVec;

use crate::types::Address;

/// Classified operand of a control-transfer instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand<'a>
{
    /// Immediate target address.
    Direct(Address),
    /// Memory slot at a fixed address.
    AbsoluteSlot(Address),
    /// Memory slot at `next instruction + displacement`.
    IpRelativeSlot(i64),
    /// Register holding the target.
    Register(&'a str),
    /// Anything else (register-based memory, expressions).
    Other(&'a str),
}

impl Operand<'_>
{
    /// Address of the memory slot this operand reads, given the address and
    /// length of the instruction it belongs to.
    pub fn slot_address(&self, ip: Address, length: u64) -> Option<Address>
    {
        match *self {
            Operand::AbsoluteSlot(slot) => Some(slot),
            Operand::IpRelativeSlot(displacement) => {
                let next = ip.value().wrapping_add(length);
                Some(Address::new(next.wrapping_add_signed(displacement)))
            }
            _ => None,
        }
    }
}

/// Parsed view over one line of disassembly.
///
/// ```rust
/// use retrace_core::instruction::{InstructionText, Operand};
/// use retrace_core::types::Address;
///
/// let insn = InstructionText::parse("call qword ptr [rip+0x2fe2]");
/// assert_eq!(insn.mnemonic(), "call");
/// assert_eq!(insn.target(), Some(Operand::IpRelativeSlot(0x2fe2)));
///
/// let direct = InstructionText::parse("bl #0x10400");
/// assert_eq!(direct.target(), Some(Operand::Direct(Address::new(0x10400))));
/// ```
#[derive(Debug, Clone)]
pub struct InstructionText<'a>
{
    text: &'a str,
    mnemonic: &'a str,
    operands: SmallVec<[&'a str; 4]>,
}

impl<'a> InstructionText<'a>
{
    /// Split `text` into mnemonic and comma-separated operands. Commas inside
    /// brackets stay with their operand.
    pub fn parse(text: &'a str) -> Self
    {
        let trimmed = text.trim();
        let mnemonic = crate::arch::mnemonic_of(trimmed);
        let rest = trimmed
            .find(mnemonic)
            .map_or("", |pos| trimmed[pos + mnemonic.len()..].trim());

        let mut operands = SmallVec::new();
        let mut depth = 0_i32;
        let mut start = 0;
        for (index, ch) in rest.char_indices() {
            match ch {
                '[' | '{' => depth += 1,
                ']' | '}' => depth -= 1,
                ',' if depth == 0 => {
                    push_operand(&mut operands, &rest[start..index]);
                    start = index + 1;
                }
                _ => {}
            }
        }
        push_operand(&mut operands, &rest[start..]);

        Self {
            text: trimmed,
            mnemonic,
            operands,
        }
    }

    /// Original text.
    pub fn text(&self) -> &'a str
    {
        self.text
    }

    /// Mnemonic token as written.
    pub fn mnemonic(&self) -> &'a str
    {
        self.mnemonic
    }

    /// `true` when the mnemonic equals `name`, ignoring case.
    pub fn is(&self, name: &str) -> bool
    {
        self.mnemonic.eq_ignore_ascii_case(name)
    }

    /// `true` when the mnemonic starts with `prefix`, ignoring case.
    pub fn starts_with(&self, prefix: &str) -> bool
    {
        self.mnemonic
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    }

    /// Raw operand strings.
    pub fn operands(&self) -> &[&'a str]
    {
        &self.operands
    }

    /// Classified operand at `index`.
    pub fn operand(&self, index: usize) -> Option<Operand<'a>>
    {
        self.operands.get(index).copied().map(classify)
    }

    /// Classified target of a call or jump (its last operand).
    pub fn target(&self) -> Option<Operand<'a>>
    {
        self.operands.last().copied().map(classify)
    }

    /// `true` when any operand names register `name`.
    pub fn uses_register(&self, name: &str) -> bool
    {
        self.operands.iter().any(|operand| {
            operand
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|token| token.eq_ignore_ascii_case(name))
        })
    }

    /// Far (segment-changing) call or jump: `lcall`, `call far ...`, or a
    /// `segment:offset` immediate.
    pub fn is_far(&self) -> bool
    {
        if self.is("lcall") || self.is("ljmp") {
            return true;
        }
        self.text.split_whitespace().any(|token| token.eq_ignore_ascii_case("far"))
            || self.operands.iter().any(|operand| {
                operand
                    .split_once(':')
                    .is_some_and(|(segment, offset)| parse_number(segment).is_some() && parse_number(offset).is_some())
            })
    }

    /// Text with the call or jump target replaced by `name`.
    ///
    /// ```rust
    /// use retrace_core::instruction::InstructionText;
    ///
    /// let insn = InstructionText::parse("call dword ptr [0x804a00c]");
    /// assert_eq!(insn.with_target_name("memcpy"), "call memcpy");
    /// ```
    pub fn with_target_name(&self, name: &str) -> String
    {
        format!("{} {name}", self.mnemonic)
    }
}

fn push_operand<'a>(operands: &mut SmallVec<[&'a str; 4]>, raw: &'a str)
{
    let operand = raw.trim();
    if !operand.is_empty() {
        operands.push(operand);
    }
}

fn classify(raw: &str) -> Operand<'_>
{
    let operand = strip_size_prefix(raw.trim());

    if let (Some(open), Some(close)) = (operand.find('['), operand.rfind(']')) {
        if close <= open {
            return Operand::Other(raw);
        }
        let inner = operand[open + 1..close].trim();
        if let Some(slot) = parse_number(inner) {
            return Operand::AbsoluteSlot(Address::new(slot));
        }
        if let Some(displacement) = ip_relative_displacement(inner) {
            return Operand::IpRelativeSlot(displacement);
        }
        return Operand::Other(raw);
    }

    if let Some(target) = parse_number(operand) {
        return Operand::Direct(Address::new(target));
    }
    if is_register(operand) {
        return Operand::Register(operand);
    }
    Operand::Other(raw)
}

fn strip_size_prefix(operand: &str) -> &str
{
    const SIZES: [&str; 6] = ["qword ptr", "dword ptr", "word ptr", "byte ptr", "fword ptr", "tbyte ptr"];
    let mut rest = operand;
    for size in SIZES {
        if let Some(head) = rest.get(..size.len()) {
            if head.eq_ignore_ascii_case(size) {
                rest = rest[size.len()..].trim_start();
                break;
            }
        }
    }
    // Segment override such as `ds:[0x804a00c]` or `ds:0x804a00c`.
    if let Some((segment, tail)) = rest.split_once(':') {
        if segment.len() == 2 && segment.ends_with('s') {
            rest = tail.trim_start();
        }
    }
    rest
}

fn ip_relative_displacement(inner: &str) -> Option<i64>
{
    let compact: String = inner.chars().filter(|c| !c.is_whitespace()).collect();
    let lower = compact.to_ascii_lowercase();
    let rest = lower.strip_prefix("rip").or_else(|| lower.strip_prefix("eip"))?;
    if rest.is_empty() {
        return Some(0);
    }
    let (negative, magnitude) = match rest.as_bytes()[0] {
        b'+' => (false, &rest[1..]),
        b'-' => (true, &rest[1..]),
        _ => return None,
    };
    let value = i64::try_from(parse_number(magnitude)?).ok()?;
    Some(if negative { -value } else { value })
}

/// Parse `0x`-prefixed hex (optionally `#`-prefixed, ARM style) or decimal.
pub(crate) fn parse_number(raw: &str) -> Option<u64>
{
    let token = raw.trim().trim_start_matches('#');
    let token = token.split_whitespace().next()?;
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if token.bytes().all(|b| b.is_ascii_digit()) {
        token.parse().ok()
    } else {
        None
    }
}

/// `true` for general-purpose register names of x86, x86-64, ARM and AArch64.
pub(crate) fn is_register(raw: &str) -> bool
{
    const NAMED: [&str; 28] = [
        "eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp",
        "rsp", "ax", "bx", "cx", "dx", "si", "di", "sp", "lr", "pc", "ip", "fp", "sb",
    ];
    let name = raw.trim().to_ascii_lowercase();
    if NAMED.contains(&name.as_str()) {
        return true;
    }
    let numbered = |prefix: char, max: u32, suffixes: &[&str]| {
        name.strip_prefix(prefix).is_some_and(|rest| {
            let digits = suffixes
                .iter()
                .find_map(|suffix| rest.strip_suffix(suffix))
                .unwrap_or(rest);
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) && digits.parse::<u32>().is_ok_and(|n| n <= max)
        })
    };
    numbered('r', 15, &["d", "w", "b"]) || numbered('x', 30, &[]) || numbered('w', 30, &[])
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parses_absolute_and_relative_slots()
    {
        let abs = InstructionText::parse("call dword ptr [0x804a00c]");
        assert_eq!(abs.target(), Some(Operand::AbsoluteSlot(Address::new(0x804a00c))));

        let seg = InstructionText::parse("jmp dword ptr ds:[0x804a010]");
        assert_eq!(seg.target(), Some(Operand::AbsoluteSlot(Address::new(0x804a010))));

        let rel = InstructionText::parse("call qword ptr [rip - 0x20]");
        let target = rel.target().unwrap();
        assert_eq!(target, Operand::IpRelativeSlot(-0x20));
        assert_eq!(target.slot_address(Address::new(0x1000), 6), Some(Address::new(0x1000 + 6 - 0x20)));
    }

    #[test]
    fn test_registers_and_other_forms()
    {
        assert_eq!(InstructionText::parse("call rax").target(), Some(Operand::Register("rax")));
        assert_eq!(InstructionText::parse("blx r3").target(), Some(Operand::Register("r3")));
        assert_eq!(InstructionText::parse("br x16").target(), Some(Operand::Register("x16")));
        assert!(matches!(
            InstructionText::parse("call qword ptr [rax+0x10]").target(),
            Some(Operand::Other(_))
        ));
        assert!(!is_register("r16"));
        assert!(is_register("r10d"));
    }

    #[test]
    fn test_bracketed_commas_stay_together()
    {
        let ldr = InstructionText::parse("ldr pc, [ip, #0x8b0]!");
        assert!(ldr.is("ldr"));
        assert_eq!(ldr.operands(), &["pc", "[ip, #0x8b0]!"]);
        assert!(ldr.uses_register("pc"));
    }

    #[test]
    fn test_far_calls_are_detected()
    {
        assert!(InstructionText::parse("lcall 0x23:0x1000").is_far());
        assert!(InstructionText::parse("call far ptr [eax]").is_far());
        assert!(InstructionText::parse("call 0x23:0x1000").is_far());
        assert!(!InstructionText::parse("call 0x401000").is_far());
    }

    #[test]
    fn test_target_renaming()
    {
        let insn = InstructionText::parse("bnd call 0x401020");
        assert_eq!(insn.mnemonic(), "call");
        assert_eq!(insn.with_target_name("puts"), "call puts");
    }
}
