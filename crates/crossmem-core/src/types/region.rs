//! Memory regions, address spaces and access vocabulary.

use std::fmt;

use thiserror::Error;

use super::Address;

/// Whose address space a [`MemoryRegion`] is interpreted in.
///
/// `Foreign` borrows the host's process descriptor for as long as the region
/// (and anything secured or mapped from it) lives. The core never takes or
/// drops a reference of its own.
pub enum AddressSpace<'p, P: ?Sized>
{
    /// The agent's own address space
    Local,
    /// Another process's address space
    Foreign(&'p P),
}

impl<P: ?Sized> AddressSpace<'_, P>
{
    /// `true` for [`AddressSpace::Foreign`].
    pub fn is_foreign(&self) -> bool
    {
        matches!(self, AddressSpace::Foreign(_))
    }

    /// The borrowed process, if any.
    pub fn process(&self) -> Option<&P>
    {
        match self {
            AddressSpace::Local => None,
            AddressSpace::Foreign(process) => Some(process),
        }
    }
}

// Manual impls: deriving would require `P: Clone`.
impl<P: ?Sized> Clone for AddressSpace<'_, P>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<P: ?Sized> Copy for AddressSpace<'_, P> {}

impl<P: ?Sized> fmt::Debug for AddressSpace<'_, P>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            AddressSpace::Local => f.write_str("Local"),
            AddressSpace::Foreign(_) => f.write_str("Foreign"),
        }
    }
}

/// Why a [`MemoryRegion`] could not be built.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError
{
    /// Size was zero
    #[error("region size must be non-zero")]
    Empty,
    /// Base was the null address
    #[error("region base must be non-null")]
    Null,
    /// `base + size` wrapped around the address space
    #[error("region 0x{base:x}+{size} overflows the address space")]
    Overflow
    {
        /// Requested base
        base: u64,
        /// Requested size
        size: usize,
    },
}

/// A contiguous virtual range in one address space.
///
/// Construction enforces `size > 0`, a non-null base, and that
/// `base + size` does not overflow.
pub struct MemoryRegion<'p, P: ?Sized>
{
    base: Address,
    size: usize,
    space: AddressSpace<'p, P>,
}

impl<'p, P: ?Sized> MemoryRegion<'p, P>
{
    /// Build a region, checking its invariants.
    pub fn new(base: Address, size: usize, space: AddressSpace<'p, P>) -> Result<Self, RegionError>
    {
        if size == 0 {
            return Err(RegionError::Empty);
        }
        if base.is_null() {
            return Err(RegionError::Null);
        }
        if base.checked_add(size as u64).is_none() {
            return Err(RegionError::Overflow {
                base: base.value(),
                size,
            });
        }
        Ok(Self { base, size, space })
    }

    /// First byte of the region.
    pub fn base(&self) -> Address
    {
        self.base
    }

    /// Length in bytes.
    pub fn size(&self) -> usize
    {
        self.size
    }

    /// One past the last byte. Cannot overflow by construction.
    pub fn end(&self) -> Address
    {
        self.base + self.size as u64
    }

    /// The address space the range lives in.
    pub fn space(&self) -> AddressSpace<'p, P>
    {
        self.space
    }

    /// Whether `[address, address + len)` lies inside this region.
    pub fn contains_range(&self, address: Address, len: usize) -> bool
    {
        match address.checked_add(len as u64) {
            Some(end) => address >= self.base && end <= self.end(),
            None => false,
        }
    }
}

impl<P: ?Sized> Clone for MemoryRegion<'_, P>
{
    fn clone(&self) -> Self
    {
        Self {
            base: self.base,
            size: self.size,
            space: self.space,
        }
    }
}

impl<P: ?Sized> fmt::Debug for MemoryRegion<'_, P>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("MemoryRegion")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("space", &self.space)
            .finish()
    }
}

/// Page protection requested when pinning a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protection
{
    /// Pages must stay at least readable
    ReadOnly,
    /// Pages must stay readable and writable
    ReadWrite,
}

impl Protection
{
    /// Whether this protection includes write access.
    pub fn allows_write(self) -> bool
    {
        matches!(self, Protection::ReadWrite)
    }
}

/// What a mapping will be used for.
///
/// `Read` yields a read-only alias of a copy source; `Write` and `Modify`
/// yield a writable alias of a copy destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessIntent
{
    /// Read-only
    Read,
    /// Write-only
    Write,
    /// Read-modify-write
    Modify,
}

impl AccessIntent
{
    /// Whether a view with this intent can be copied from.
    pub fn readable(self) -> bool
    {
        matches!(self, AccessIntent::Read | AccessIntent::Modify)
    }

    /// Whether a view with this intent can be copied into.
    pub fn writable(self) -> bool
    {
        matches!(self, AccessIntent::Write | AccessIntent::Modify)
    }

    /// The intent the opposite end of a copy needs.
    ///
    /// A read-only source pairs with a read-modify-write destination and the
    /// other way round.
    pub fn complement(self) -> Self
    {
        match self {
            AccessIntent::Read => AccessIntent::Modify,
            AccessIntent::Write | AccessIntent::Modify => AccessIntent::Read,
        }
    }
}

/// Caching attribute for a new mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheMode
{
    /// Normal cached access
    Cached,
    /// Uncached; the transfer path uses this
    #[default]
    NonCached,
    /// Write-combined
    WriteCombined,
}

/// Which way bytes flow in a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction
{
    /// Foreign process into the local buffer
    Read,
    /// Local buffer into the foreign process
    Write,
}

impl Direction
{
    /// Intent for mapping the foreign side of a transfer in this direction.
    pub fn foreign_intent(self) -> AccessIntent
    {
        match self {
            Direction::Read => AccessIntent::Read,
            Direction::Write => AccessIntent::Modify,
        }
    }
}

impl fmt::Display for Direction
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}
