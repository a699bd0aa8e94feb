//! Tests for error handling

use retrace_core::error::{RetraceError, RetraceResult};
use retrace_core::types::Address;
use retrace_core::UnwindFault;

#[test]
fn test_error_display()
{
    let error = RetraceError::InvalidArgument("missing load bias".to_string());
    assert_eq!(error.to_string(), "Invalid argument: missing load bias");

    let error = RetraceError::Snapshot("modules overlap".to_string());
    assert!(error.to_string().contains("modules overlap"));
}

#[test]
fn test_io_error_conversion()
{
    fn open() -> RetraceResult<String>
    {
        Ok(std::fs::read_to_string("/definitely/not/here.json")?)
    }
    assert!(matches!(open(), Err(RetraceError::Io(_))));
}

#[test]
fn test_json_error_conversion()
{
    fn parse() -> RetraceResult<Address>
    {
        Ok(serde_json::from_str("[1, 2]")?)
    }
    assert!(matches!(parse(), Err(RetraceError::Json(_))));
}

#[test]
fn test_unwind_fault_messages()
{
    let fault = UnwindFault::IterationExhausted { iterations: 9000 };
    assert_eq!(fault.to_string(), "gave up after 9000 iterations");

    let fault = UnwindFault::UnreadableMemory {
        address: Address::new(0xbfff_0000),
    };
    assert!(fault.to_string().contains("0xbfff0000"));
}

#[test]
fn test_local_and_terminal_faults()
{
    assert!(UnwindFault::DecodeFailure { address: Address::ZERO }.is_local());
    assert!(UnwindFault::UnreadableMemory { address: Address::ZERO }.is_local());
    assert!(!UnwindFault::GapUnrecoverable { stack_cursor: Address::ZERO }.is_local());
    assert!(!UnwindFault::FrameLimit { max: 3 }.is_local());
}

#[test]
fn test_unwind_fault_json_is_tagged()
{
    let fault = UnwindFault::GapUnrecoverable {
        stack_cursor: Address::new(0x7ffe_0100),
    };
    let json = serde_json::to_string(&fault).unwrap();
    assert_eq!(json, r#"{"kind":"gap_unrecoverable","stack_cursor":"0x7ffe0100"}"#);
    assert_eq!(serde_json::from_str::<UnwindFault>(&json).unwrap(), fault);
}
