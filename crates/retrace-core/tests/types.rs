//! Tests for the platform-agnostic value types

use std::collections::BTreeMap;

use retrace_core::types::{Address, Architecture, Frame, ModuleId, ModuleKind, Registers, ThreadId};

#[test]
fn test_address_display_is_zero_padded()
{
    assert_eq!(Address::new(0x1234).to_string(), "0x00001234");
    assert_eq!(Address::new(0x7ffe_0000_1000).to_string(), "0x7ffe00001000");
}

#[test]
fn test_address_parses_hex_and_decimal()
{
    assert_eq!("0x401000".parse::<Address>(), Ok(Address::new(0x40_1000)));
    assert_eq!("4096".parse::<Address>(), Ok(Address::new(4096)));
    assert!("rip".parse::<Address>().is_err());
}

#[test]
fn test_address_serde_accepts_strings_and_integers()
{
    let from_string: Address = serde_json::from_str("\"0x10\"").unwrap();
    let from_int: Address = serde_json::from_str("16").unwrap();
    assert_eq!(from_string, from_int);
    assert_eq!(serde_json::to_string(&from_int).unwrap(), "\"0x10\"");
    assert!(serde_json::from_str::<Address>("-1").is_err());
}

#[test]
fn test_address_arithmetic_does_not_panic()
{
    let top = Address::new(u64::MAX);
    assert_eq!(top.checked_add(1), None);
    assert_eq!(top.saturating_add(5), top);
    assert_eq!(Address::ZERO.checked_sub(1), None);
    assert_eq!(Address::new(0x10).distance_from(Address::new(0x40)), 0);
    assert_eq!(Address::new(0x40).distance_from(Address::new(0x10)), 0x30);
}

#[test]
fn test_thread_id_from_u64()
{
    let thread = ThreadId::from(12345);
    assert_eq!(thread.raw(), 12345);
    assert_eq!(thread, ThreadId(12345));
}

#[test]
fn test_architecture_word_sizes()
{
    assert_eq!(Architecture::X86.word_size(), 4);
    assert_eq!(Architecture::Arm.word_size(), 4);
    assert_eq!(Architecture::X86_64.word_size(), 8);
    assert_eq!(Architecture::Arm64.word_size(), 8);
    assert!(Architecture::Arm64.is_arm());
    assert!(!Architecture::X86.is_arm());
}

#[test]
fn test_architecture_names()
{
    assert_eq!("aarch64".parse::<Architecture>(), Ok(Architecture::Arm64));
    assert_eq!("AMD64".parse::<Architecture>(), Ok(Architecture::X86_64));
    assert!("mips".parse::<Architecture>().is_err());
    assert_eq!(serde_json::to_string(&Architecture::X86_64).unwrap(), "\"x86_64\"");
}

#[test]
fn test_module_id_keeps_file_name()
{
    let module = ModuleId::new("/usr/lib/x86_64-linux-gnu/libssl.so.3");
    assert_eq!(module.as_str(), "libssl.so.3");
    assert!(!module.is_unknown());
    assert!(ModuleId::unknown().is_unknown());
    assert!(ModuleId::new("ld-linux-x86-64.so.2").looks_like_c_library());
    assert!(ModuleKind::CLibrary.is_library());
    assert!(!ModuleKind::Main.is_library());
}

#[test]
fn test_registers_lookup_by_alias()
{
    let mut other = BTreeMap::new();
    other.insert("rax".to_string(), 7);
    let regs = Registers {
        other,
        ..Registers::new(Address::new(0x40_1000), Address::new(0x7ffe_0000)).with_fp(Address::new(0x7ffe_0040))
    };

    assert_eq!(regs.get("RIP"), Some(0x40_1000));
    assert_eq!(regs.get("esp"), Some(0x7ffe_0000));
    assert_eq!(regs.get("rbp"), Some(0x7ffe_0040));
    assert_eq!(regs.get("lr"), None);
    assert_eq!(regs.get("rax"), Some(7));
}

#[test]
fn test_registers_json_omits_missing_registers()
{
    let regs = Registers::new(Address::new(0x10), Address::new(0x20));
    let json = serde_json::to_string(&regs).unwrap();
    assert_eq!(json, r#"{"pc":"0x10","sp":"0x20"}"#);
}

#[test]
fn test_innermost_frame_report_line()
{
    let mut frame = Frame::new(Address::new(0x40_1010), Address::new(0x7ffe_0000), ModuleId::new("/usr/bin/app"));
    frame.instruction_text = "hlt".to_string();
    frame.function_containing_ip = Some("std::process::abort".to_string());

    assert!(frame.is_innermost());
    assert_eq!(frame.report_line(), "[0x7ffe0000] 0x00401010 app hlt process::abort");
}
