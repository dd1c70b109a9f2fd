//! # Error Types
//!
//! Error handling for transfers and the process collaborators.
//!
//! Two layers:
//!
//! 1. [`HostError`]: what a host primitive (pin, map, process lookup, ...)
//!    reports. Each host fills it in with as much detail as it has.
//! 2. [`CrossmemError`]: the public error. The transfer path folds host
//!    failures into the coarse codes `NotLocked`, `NotMappedView` and
//!    `Unsuccessful`, keeping the host error as the source.
//!
//! We use `thiserror` to generate the `Error` implementations.

use std::fmt;

use thiserror::Error;

use crate::types::Address;

/// Which argument of a transfer failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter
{
    /// The process descriptor
    Process,
    /// The foreign address
    Address,
    /// The local buffer
    Buffer,
    /// The byte count
    Size,
}

impl fmt::Display for Parameter
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            Parameter::Process => "process",
            Parameter::Address => "address",
            Parameter::Buffer => "buffer",
            Parameter::Size => "size",
        };
        f.write_str(name)
    }
}

/// A hardware access fault caught inside the copy boundary.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("access fault after {copied} bytes{}", fault_suffix(.address))]
pub struct AccessFault
{
    /// Faulting address, when the host knows it
    pub address: Option<Address>,
    /// Bytes already copied before the fault
    pub copied: usize,
}

fn fault_suffix(address: &Option<Address>) -> String
{
    address.map(|a| format!(" at {a}")).unwrap_or_default()
}

/// Failure reported by a host primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError
{
    /// Some page in the range is not mapped
    #[error("range is not mapped at {0}")]
    Unmapped(Address),

    /// A new region would overlap an existing one
    #[error("range overlaps an existing region at {0}")]
    AlreadyMapped(Address),

    /// Pinning would exceed the host's pin quota
    #[error("pin quota exceeded: requested {requested} bytes, {available} available")]
    QuotaExceeded
    {
        /// Bytes the call asked to pin
        requested: usize,
        /// Bytes still available under the quota
        available: usize,
    },

    /// Pages are immutable, guard or no-access pages
    #[error("range is protected at {0}")]
    Protected(Address),

    /// Requested mapping intent exceeds the pages' protection
    #[error("pages at {0} do not permit the requested access")]
    AccessDenied(Address),

    /// No contiguous window is available for the mapping
    #[error("no contiguous window of {0} bytes available")]
    NoWindow(usize),

    /// The secured handle does not name a live pin
    #[error("secured handle is stale")]
    StaleHandle,

    /// Mapping size exceeds the secured range
    #[error("mapping of {requested} bytes exceeds secured range of {secured} bytes")]
    OutOfRange
    {
        /// Requested mapping size
        requested: usize,
        /// Size of the secured range
        secured: usize,
    },

    /// The target process no longer exists
    #[error("process has exited")]
    ProcessGone,

    /// Handle lacks the rights for the operation
    #[error("handle lacks the required access rights")]
    InsufficientRights,

    /// Information class or buffer length not accepted
    #[error("information class {class} rejected: {reason}")]
    BadInformationClass
    {
        /// The class code
        class: u32,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Native call failed with a raw status code
    #[error("{operation} failed with code {code}")]
    Native
    {
        /// Name of the native call
        operation: &'static str,
        /// Raw status returned by the host
        code: i32,
    },
}

/// Main error type for crossmem operations
///
/// Transfer failures use the first five variants; the rest come from the
/// process collaborators.
#[derive(Error, Debug)]
pub enum CrossmemError
{
    /// A transfer argument was rejected before any resource was touched
    #[error("invalid parameter: {which}")]
    InvalidParameter
    {
        /// Which argument was bad
        which: Parameter,
    },

    /// Pinning a range failed
    #[error("range could not be locked: {0}")]
    NotLocked(#[source] HostError),

    /// Mapping a secured range failed
    #[error("range could not be mapped: {0}")]
    NotMappedView(#[source] HostError),

    /// The copy faulted inside the fault boundary
    ///
    /// The destination may have been partially written.
    #[error("copy was unsuccessful: {0}")]
    Unsuccessful(#[source] AccessFault),

    /// An optional host primitive is absent on this host
    #[error("{0} is not implemented on this host")]
    NotImplemented(&'static str),

    /// No process with this id
    #[error("Process not found: PID {0}")]
    ProcessNotFound(u32),

    /// No thread with this id
    #[error("Thread not found: TID {0}")]
    ThreadNotFound(u64),

    /// A forwarded host call failed
    #[error("host call failed: {0}")]
    Host(#[from] HostError),

    /// macOS-specific Mach API error
    #[cfg(target_os = "macos")]
    #[error("Mach API error: {0}")]
    MachError(#[from] crate::platform::macos::error::MachError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrossmemError
{
    /// Shorthand for [`CrossmemError::InvalidParameter`].
    pub fn invalid(which: Parameter) -> Self
    {
        CrossmemError::InvalidParameter { which }
    }

    /// Coarse status code for this error.
    ///
    /// Failed collaborator calls (lookups, forwarded host calls, I/O) report
    /// `Unsuccessful`, the same code as a contained copy fault. Match on the
    /// error itself to tell them apart.
    pub fn status(&self) -> Status
    {
        match self {
            CrossmemError::InvalidParameter { which } => Status::InvalidParameter(*which),
            CrossmemError::NotLocked(_) => Status::NotLocked,
            CrossmemError::NotMappedView(_) => Status::NotMappedView,
            CrossmemError::NotImplemented(_) => Status::NotImplemented,
            CrossmemError::Unsuccessful(_)
            | CrossmemError::ProcessNotFound(_)
            | CrossmemError::ThreadNotFound(_)
            | CrossmemError::Host(_)
            | CrossmemError::Io(_) => Status::Unsuccessful,
            #[cfg(target_os = "macos")]
            CrossmemError::MachError(_) => Status::Unsuccessful,
        }
    }
}

/// Coarse outcome of an operation, as callers at the process boundary see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status
{
    /// Completed
    Success,
    /// Bad argument
    InvalidParameter(Parameter),
    /// Pin failed
    NotLocked,
    /// Map failed
    NotMappedView,
    /// Copy or forwarded call failed
    Unsuccessful,
    /// Optional primitive missing
    NotImplemented,
}

impl Status
{
    /// Status of a finished operation.
    pub fn of<T>(result: &Result<T>) -> Self
    {
        match result {
            Ok(_) => Status::Success,
            Err(err) => err.status(),
        }
    }
}

impl fmt::Display for Status
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Status::Success => f.write_str("success"),
            Status::InvalidParameter(which) => write!(f, "invalid parameter ({which})"),
            Status::NotLocked => f.write_str("not locked"),
            Status::NotMappedView => f.write_str("not mapped view"),
            Status::Unsuccessful => f.write_str("unsuccessful"),
            Status::NotImplemented => f.write_str("not implemented"),
        }
    }
}

/// Convenience type alias for `Result<T, CrossmemError>`
///
/// ```rust
/// use crossmem_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, CrossmemError>;

/// Result type returned by host primitives.
pub type HostResult<T> = std::result::Result<T, HostError>;
