//! # macOS Mach API Errors
//!
//! Mach APIs return `kern_return_t` codes. This module turns the ones the
//! Mach host sees into an enum with readable messages, and folds them into
//! [`HostError`] where the transfer path needs a host-level reason.

use mach2::kern_return::{
    kern_return_t, KERN_FAILURE, KERN_INVALID_ADDRESS, KERN_INVALID_ARGUMENT, KERN_NO_SPACE, KERN_PROTECTION_FAILURE,
    KERN_RESOURCE_SHORTAGE,
};
use thiserror::Error;

use crate::error::HostError;
use crate::types::Address;

/// Mach kernel API error
///
/// Common values:
///
/// - `KERN_SUCCESS` (0): Operation succeeded
/// - `KERN_INVALID_ADDRESS` (1): Address not mapped in the task
/// - `KERN_PROTECTION_FAILURE` (2): Access not permitted by the pages
/// - `KERN_NO_SPACE` (3): No room in the address space
/// - `KERN_INVALID_ARGUMENT` (4): Invalid argument
/// - `KERN_FAILURE` (5): General failure (often means process not found)
///
/// ## References
///
/// - [kern_return_t documentation](https://developer.apple.com/documentation/kernel/kern_return_t)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachError
{
    /// `KERN_INVALID_ADDRESS`
    #[error("KERN_INVALID_ADDRESS: Address is not mapped")]
    InvalidAddress,

    /// `KERN_PROTECTION_FAILURE`
    ///
    /// On `task_for_pid()` this means the call was blocked by macOS's
    /// security system: run with `sudo` or grant the debugger entitlement.
    ///
    /// See: [macOS Debugging Entitlements](https://developer.apple.com/documentation/bundleresources/entitlements/com.apple.security.cs.debugger)
    #[error("KERN_PROTECTION_FAILURE: Permission denied")]
    ProtectionFailure,

    /// `KERN_NO_SPACE`
    #[error("KERN_NO_SPACE: No room in the address space")]
    NoSpace,

    /// `KERN_INVALID_ARGUMENT`
    #[error("KERN_INVALID_ARGUMENT: Invalid PID or argument")]
    InvalidArgument,

    /// `KERN_FAILURE`
    ///
    /// A general failure. On `task_for_pid()` this can be either a missing
    /// process or a permission problem; the Mach host checks which.
    #[error("KERN_FAILURE: Process not found")]
    ProcessNotFound,

    /// `KERN_RESOURCE_SHORTAGE`
    #[error("KERN_RESOURCE_SHORTAGE: Kernel resources exhausted")]
    ResourceShortage,

    /// Unknown Mach error code
    ///
    /// The integer value is preserved so you can look it up.
    #[error("Unknown Mach error: {0}")]
    Unknown(i32),
}

impl MachError
{
    /// Host-level reason for a failed Mach call on the range at `address`.
    pub fn into_host(self, operation: &'static str, address: Address) -> HostError
    {
        match self {
            MachError::InvalidAddress => HostError::Unmapped(address),
            MachError::ProtectionFailure => HostError::Protected(address),
            MachError::NoSpace => HostError::NoWindow(0),
            MachError::ResourceShortage => HostError::QuotaExceeded {
                requested: 0,
                available: 0,
            },
            other => HostError::Native {
                operation,
                code: other.code(),
            },
        }
    }

    /// The raw `kern_return_t`.
    pub fn code(self) -> i32
    {
        match self {
            MachError::InvalidAddress => KERN_INVALID_ADDRESS,
            MachError::ProtectionFailure => KERN_PROTECTION_FAILURE,
            MachError::NoSpace => KERN_NO_SPACE,
            MachError::InvalidArgument => KERN_INVALID_ARGUMENT,
            MachError::ProcessNotFound => KERN_FAILURE,
            MachError::ResourceShortage => KERN_RESOURCE_SHORTAGE,
            MachError::Unknown(code) => code,
        }
    }
}

/// Convert a `kern_return_t` to a `MachError`
///
/// ```rust,no_run
/// use crossmem_core::platform::macos::error::MachError;
///
/// let err = MachError::from(mach2::kern_return::KERN_PROTECTION_FAILURE);
/// assert_eq!(err, MachError::ProtectionFailure);
/// ```
impl From<kern_return_t> for MachError
{
    fn from(code: kern_return_t) -> Self
    {
        match code {
            KERN_INVALID_ADDRESS => MachError::InvalidAddress,
            KERN_PROTECTION_FAILURE => MachError::ProtectionFailure,
            KERN_NO_SPACE => MachError::NoSpace,
            KERN_INVALID_ARGUMENT => MachError::InvalidArgument,
            KERN_FAILURE => MachError::ProcessNotFound,
            KERN_RESOURCE_SHORTAGE => MachError::ResourceShortage,
            _ => MachError::Unknown(code),
        }
    }
}
