//! # Fault-Contained Copy
//!
//! Copies bytes between two local views through the host's guarded-copy
//! facility. If a page becomes inaccessible mid-copy (a racing unmap, a
//! protection change), the host reports an [`AccessFault`](crate::error::AccessFault)
//! and this module turns it into [`CrossmemError::Unsuccessful`]; nothing
//! crashes.
//!
//! There is no atomicity on failure: the destination may already hold part
//! of the source.

use std::marker::PhantomData;

use tracing::{trace, warn};

use crate::error::{CrossmemError, Parameter, Result};
use crate::host::MemoryHost;
use crate::types::{AccessIntent, Address};

/// One end of a copy.
///
/// The lifetime ties the view to the mapping or buffer it was taken from, so
/// a view cannot outlive the memory it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyView<'m>
{
    base: Address,
    len: usize,
    intent: AccessIntent,
    resident: bool,
    _borrow: PhantomData<&'m [u8]>,
}

impl CopyView<'_>
{
    /// A live alias from [`crate::map::map_memory`].
    pub(crate) fn mapped(base: Address, len: usize, intent: AccessIntent) -> Self
    {
        Self {
            base,
            len,
            intent,
            resident: false,
            _borrow: PhantomData,
        }
    }

    /// A privileged buffer that is already resident and needs no pin or alias.
    ///
    /// Only the transfer path builds these, for a local buffer the classifier
    /// puts in the privileged range.
    pub(crate) fn resident(base: Address, len: usize, intent: AccessIntent) -> Self
    {
        Self {
            base,
            len,
            intent,
            resident: true,
            _borrow: PhantomData,
        }
    }

    /// First byte.
    pub fn base(&self) -> Address
    {
        self.base
    }

    /// Length in bytes.
    pub fn len(&self) -> usize
    {
        self.len
    }

    /// `true` if the view covers no bytes.
    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// `true` if the view is a resident buffer rather than a mapping.
    pub fn is_resident(&self) -> bool
    {
        self.resident
    }

    /// Intent governing what the view may be used for.
    pub fn intent(&self) -> AccessIntent
    {
        self.intent
    }
}

/// Copy exactly `size` bytes from `source` to `destination`.
///
/// ## Errors
///
/// - `InvalidParameter(Size)`: `size` is zero or larger than either view
/// - `InvalidParameter(Buffer)`: the source is not readable or the
///   destination is not writable
/// - `Unsuccessful`: an access fault was caught mid-copy
pub fn copy_bytes<H>(host: &H, source: CopyView<'_>, destination: CopyView<'_>, size: usize) -> Result<()>
where
    H: MemoryHost + ?Sized,
{
    if size == 0 || size > source.len || size > destination.len {
        return Err(CrossmemError::invalid(Parameter::Size));
    }
    if !source.intent.readable() || !destination.intent.writable() {
        return Err(CrossmemError::invalid(Parameter::Buffer));
    }

    trace!(source = %source.base, destination = %destination.base, size, "guarded copy");

    // SAFETY: both views are either live mappings borrowed from guards that
    // outlive this call, or resident buffers the caller owns, and `size` fits
    // inside each of them.
    let outcome = unsafe { host.guarded_copy(destination.base, source.base, size) };

    outcome.map_err(|fault| {
        warn!(
            source = %source.base,
            destination = %destination.base,
            copied = fault.copied,
            "copy faulted: {fault}"
        );
        CrossmemError::Unsuccessful(fault)
    })
}
