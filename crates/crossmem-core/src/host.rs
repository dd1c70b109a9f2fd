//! # Host Memory Primitives
//!
//! The [`MemoryHost`] trait is everything the transfer path needs from the
//! platform: pin a range, alias it locally, copy between aliases without
//! crashing on a fault, and undo the first two.
//!
//! Each host implements this with its native APIs:
//!
//! - **macOS**: named memory entries, `mach_vm_map`, `mach_vm_read_overwrite`
//!   (see [`crate::platform::macos::MachHost`])
//! - **Simulated**: an in-process model with resource accounting and fault
//!   injection (see [`crate::sim::SimHost`])
//!
//! Callers should not use these methods directly. [`crate::secure`],
//! [`crate::map`] and [`crate::copy`] wrap them in guards that pair every
//! acquisition with exactly one release.

use crate::classify::AddressClassifier;
use crate::error::{AccessFault, HostResult};
use crate::types::{AccessIntent, Address, CacheMode, MemoryRegion, Protection};

/// Opaque token for one pinned range, issued by [`MemoryHost::secure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecureToken(u64);

impl SecureToken
{
    /// Wrap a host-specific value.
    pub const fn new(raw: u64) -> Self
    {
        Self(raw)
    }

    /// The host-specific value.
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

/// A live local alias produced by [`MemoryHost::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappedView
{
    /// Host-specific identity of the mapping
    pub token: u64,
    /// Locally dereferenceable address of the first requested byte
    pub base: Address,
    /// Bytes addressable from `base`
    pub size: usize,
}

/// Platform primitives for pinning, mapping and fault-contained copying.
///
/// ## Contract
///
/// - `secure` either fails or returns a token that is passed to `unsecure`
///   exactly once, with the same region.
/// - `map` is only called with a live token; its view is passed to `unmap`
///   exactly once, before the token is unsecured.
/// - `guarded_copy` never lets an access fault escape; it reports it.
pub trait MemoryHost: Send + Sync
{
    /// The host's process descriptor.
    type Process: ?Sized;

    /// Privileged/unprivileged split for this host.
    fn classifier(&self) -> AddressClassifier
    {
        AddressClassifier::default()
    }

    /// Pin the pages backing `region` so they cannot be freed or paged out.
    fn secure(&self, region: &MemoryRegion<'_, Self::Process>, protection: Protection) -> HostResult<SecureToken>;

    /// Release a pin. Must succeed for a live token.
    fn unsecure(&self, region: &MemoryRegion<'_, Self::Process>, token: SecureToken);

    /// Create a local alias of the first `size` bytes of a secured region.
    fn map(
        &self,
        region: &MemoryRegion<'_, Self::Process>,
        token: SecureToken,
        size: usize,
        intent: AccessIntent,
        cache: CacheMode,
    ) -> HostResult<MappedView>;

    /// Release a local alias.
    fn unmap(&self, view: MappedView);

    /// Copy `len` bytes from `source` to `destination` inside a fault boundary.
    ///
    /// On a fault the destination may be partially written.
    ///
    /// # Safety
    ///
    /// Both ranges must be local aliases produced by this host's `map` that
    /// are still live, or resident privileged memory owned by the caller.
    unsafe fn guarded_copy(&self, destination: Address, source: Address, len: usize) -> Result<(), AccessFault>;
}
