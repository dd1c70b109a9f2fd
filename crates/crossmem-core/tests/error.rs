//! Tests for error handling

use crossmem_core::error::{AccessFault, CrossmemError, HostError, Parameter, Result, Status};
#[cfg(target_os = "macos")]
use crossmem_core::platform::macos::error::MachError;
use crossmem_core::types::Address;

#[test]
fn test_status_of_each_variant()
{
    let cases = [
        (CrossmemError::invalid(Parameter::Size), Status::InvalidParameter(Parameter::Size)),
        (CrossmemError::NotLocked(HostError::Unmapped(Address::new(0x1000))), Status::NotLocked),
        (CrossmemError::NotMappedView(HostError::NoWindow(4096)), Status::NotMappedView),
        (
            CrossmemError::Unsuccessful(AccessFault {
                address: None,
                copied: 0,
            }),
            Status::Unsuccessful,
        ),
        (CrossmemError::NotImplemented("attach_process"), Status::NotImplemented),
        (CrossmemError::ProcessNotFound(1), Status::Unsuccessful),
        (CrossmemError::ThreadNotFound(7), Status::Unsuccessful),
        (CrossmemError::Host(HostError::InsufficientRights), Status::Unsuccessful),
        (CrossmemError::Io(std::io::Error::other("spawn failed")), Status::Unsuccessful),
    ];
    for (error, status) in cases {
        assert_eq!(error.status(), status, "{error}");
    }
}

#[test]
fn test_status_of_result()
{
    let ok: Result<u8> = Ok(1);
    let err: Result<u8> = Err(CrossmemError::invalid(Parameter::Address));
    assert_eq!(Status::of(&ok), Status::Success);
    assert_eq!(Status::of(&err), Status::InvalidParameter(Parameter::Address));
    assert_eq!(Status::of(&err).to_string(), "invalid parameter (address)");
}

#[test]
fn test_error_display()
{
    let error = CrossmemError::ProcessNotFound(12345);
    let message = error.to_string();
    assert!(message.contains("12345"));
    assert!(message.contains("not found"));

    let error = CrossmemError::NotLocked(HostError::QuotaExceeded {
        requested: 6000,
        available: 2000,
    });
    assert_eq!(
        error.to_string(),
        "range could not be locked: pin quota exceeded: requested 6000 bytes, 2000 available"
    );
}

#[test]
fn test_access_fault_display()
{
    let fault = AccessFault {
        address: Some(Address::new(0x40_0020)),
        copied: 32,
    };
    assert_eq!(fault.to_string(), "access fault after 32 bytes at 0x0000000000400020");

    let fault = AccessFault {
        address: None,
        copied: 0,
    };
    assert_eq!(fault.to_string(), "access fault after 0 bytes");
}

#[test]
fn test_host_error_is_source()
{
    use std::error::Error;

    let error = CrossmemError::NotMappedView(HostError::AccessDenied(Address::new(0x1000)));
    let source = error.source().map(ToString::to_string);
    assert_eq!(source.as_deref(), Some("pages at 0x0000000000001000 do not permit the requested access"));
}

#[test]
fn test_io_error_conversion()
{
    let io = std::io::Error::new(std::io::ErrorKind::Other, "spawn failed");
    let error: CrossmemError = io.into();
    assert!(matches!(error, CrossmemError::Io(_)));
    assert_eq!(error.status(), Status::Unsuccessful);
}

#[cfg(target_os = "macos")]
#[test]
fn test_mach_error_messages()
{
    assert!(MachError::ProtectionFailure.to_string().contains("Permission denied"));
    assert!(MachError::ProcessNotFound.to_string().contains("not found"));
    assert!(MachError::Unknown(999).to_string().contains("999"));
}

#[cfg(target_os = "macos")]
#[test]
fn test_mach_error_codes_round_trip()
{
    use mach2::kern_return::{KERN_INVALID_ADDRESS, KERN_NO_SPACE};

    assert_eq!(MachError::from(KERN_INVALID_ADDRESS), MachError::InvalidAddress);
    assert_eq!(MachError::from(KERN_NO_SPACE).code(), KERN_NO_SPACE);
    assert_eq!(MachError::from(4711), MachError::Unknown(4711));
}

#[cfg(target_os = "macos")]
#[test]
fn test_mach_error_into_host()
{
    let at = Address::new(0x1000);
    assert_eq!(MachError::InvalidAddress.into_host("mach_vm_map", at), HostError::Unmapped(at));
    assert_eq!(MachError::ProtectionFailure.into_host("mach_vm_map", at), HostError::Protected(at));
    assert!(matches!(
        MachError::InvalidArgument.into_host("mach_vm_map", at),
        HostError::Native {
            operation: "mach_vm_map",
            ..
        }
    ));

    let error: CrossmemError = MachError::ProtectionFailure.into();
    assert!(matches!(error, CrossmemError::MachError(_)));
}
