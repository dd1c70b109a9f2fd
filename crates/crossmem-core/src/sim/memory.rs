//! Backing store for simulated address spaces.
//!
//! Each region is a real heap allocation, so a "mapping" of it is a real
//! pointer the copy step can dereference. Pins and mappings hold an `Arc` to
//! the region, which keeps the allocation alive after the region has been
//! removed from its process (like a pinned VM object outliving its
//! address-space entry).

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::Address;

/// Page protection of a simulated region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageProtection
{
    /// Readable only
    ReadOnly,
    /// Readable and writable
    ReadWrite,
    /// Any access faults
    NoAccess,
}

impl PageProtection
{
    fn encode(self) -> u8
    {
        match self {
            PageProtection::ReadOnly => 1,
            PageProtection::ReadWrite => 3,
            PageProtection::NoAccess => 0,
        }
    }

    fn decode(raw: u8) -> Self
    {
        match raw {
            1 => PageProtection::ReadOnly,
            3 => PageProtection::ReadWrite,
            _ => PageProtection::NoAccess,
        }
    }

    /// Whether the pages can be read.
    pub fn readable(self) -> bool
    {
        !matches!(self, PageProtection::NoAccess)
    }

    /// Whether the pages can be written.
    pub fn writable(self) -> bool
    {
        matches!(self, PageProtection::ReadWrite)
    }
}

/// Zero-filled heap allocation addressed through a raw pointer.
struct Backing
{
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the allocation is owned exclusively by this struct and only ever
// accessed through raw pointers; callers synchronise their own accesses.
unsafe impl Send for Backing {}
// SAFETY: see above.
unsafe impl Sync for Backing {}

impl Backing
{
    fn zeroed(len: usize) -> Self
    {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(boxed);
        // SAFETY: `Box::into_raw` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw.cast::<u8>()) };
        Self { ptr, len }
    }
}

impl Drop for Backing
{
    fn drop(&mut self)
    {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        // SAFETY: `slice` is exactly the allocation produced in `zeroed`.
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// One contiguous region of a simulated process.
pub struct SimRegion
{
    base: Address,
    backing: Backing,
    protection: AtomicU8,
}

impl SimRegion
{
    pub(crate) fn new(base: Address, len: usize, protection: PageProtection) -> Self
    {
        Self {
            base,
            backing: Backing::zeroed(len),
            protection: AtomicU8::new(protection.encode()),
        }
    }

    /// Virtual base inside the owning process.
    pub fn base(&self) -> Address
    {
        self.base
    }

    /// Length in bytes.
    pub fn len(&self) -> usize
    {
        self.backing.len
    }

    /// `true` for a zero-length region (never constructed by the host).
    pub fn is_empty(&self) -> bool
    {
        self.backing.len == 0
    }

    /// One past the last byte.
    pub fn end(&self) -> Address
    {
        self.base + self.backing.len as u64
    }

    /// Current protection.
    pub fn protection(&self) -> PageProtection
    {
        PageProtection::decode(self.protection.load(Ordering::Acquire))
    }

    pub(crate) fn set_protection(&self, protection: PageProtection)
    {
        self.protection.store(protection.encode(), Ordering::Release);
    }

    /// Whether `[address, address + len)` lies inside the region.
    pub fn contains(&self, address: Address, len: usize) -> bool
    {
        match address.checked_add(len as u64) {
            Some(end) => address >= self.base && end <= self.end(),
            None => false,
        }
    }

    /// Whether the region intersects `[address, address + len)`.
    pub fn overlaps(&self, address: Address, len: usize) -> bool
    {
        let end = address.checked_add(len as u64).unwrap_or(Address::new(u64::MAX));
        address < self.end() && self.base < end
    }

    /// Local address of the byte at virtual `address`.
    ///
    /// `address` must lie inside the region.
    pub(crate) fn alias_of(&self, address: Address) -> Address
    {
        let offset = address.offset_from(self.base).unwrap_or(0);
        Address::from_ptr(self.backing.ptr.as_ptr()) + offset
    }

    /// Copy bytes out of the region, ignoring protection.
    pub(crate) fn peek(&self, address: Address, out: &mut [u8])
    {
        let source = self.alias_of(address).as_mut_ptr();
        // SAFETY: the caller checked `contains(address, out.len())`, and
        // `out` is a distinct Rust allocation.
        unsafe { std::ptr::copy_nonoverlapping(source, out.as_mut_ptr(), out.len()) };
    }

    /// Copy bytes into the region, ignoring protection.
    pub(crate) fn poke(&self, address: Address, bytes: &[u8])
    {
        let destination = self.alias_of(address).as_mut_ptr();
        // SAFETY: the caller checked `contains(address, bytes.len())`, and
        // `bytes` is a distinct Rust allocation.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), destination, bytes.len()) };
    }
}

impl std::fmt::Debug for SimRegion
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("SimRegion")
            .field("base", &self.base)
            .field("len", &self.backing.len)
            .field("protection", &self.protection())
            .finish()
    }
}
