//! # Cross-Process Transfers
//!
//! [`ProcessMemory`] moves bytes between a buffer in the agent and a range in
//! another process:
//!
//! 1. validate the request (process, address, buffer, size, in that order)
//! 2. secure the foreign range read-only
//! 3. secure the local buffer read-write, if it is process-owned memory
//! 4. map the foreign range (`Read` for reads, `Modify` for writes)
//! 5. map the local buffer with the complementary intent
//! 6. copy inside the fault boundary
//! 7. unmap and unsecure everything, last acquired first
//!
//! Steps 2-5 produce guards, so step 7 happens on every path out of the
//! call, including a failure halfway through acquisition. Nothing is retried
//! and nothing outlives the call.
//!
//! ## Example
//!
//! ```rust
//! use crossmem_core::sim::SimHost;
//! use crossmem_core::transfer::ProcessMemory;
//! use crossmem_core::types::Address;
//!
//! let host = SimHost::new();
//! let process = host.spawn_process(4242);
//! process.add_region(Address::new(0x40_0000), 0x1000)?;
//!
//! let memory = ProcessMemory::new(&host);
//! memory.write(&process, Address::new(0x40_0010), &[0x11; 16])?;
//!
//! let mut readback = [0u8; 16];
//! memory.read(&process, Address::new(0x40_0010), &mut readback)?;
//! assert_eq!(readback, [0x11; 16]);
//! assert_eq!(host.live_pins(), 0);
//! # Ok::<(), crossmem_core::error::CrossmemError>(())
//! ```

use std::fmt;

use tracing::debug_span;

use crate::classify::AddressClassifier;
use crate::copy::{copy_bytes, CopyView};
use crate::error::{CrossmemError, Parameter, Result};
use crate::host::MemoryHost;
use crate::map::map_memory;
use crate::secure::secure;
use crate::types::{Address, AddressSpace, CacheMode, Direction, MemoryRegion, Protection};

/// One transfer, as submitted by a caller.
///
/// `local` is a raw address in the agent's own address space; see
/// [`ProcessMemory::transfer`] for what it must point to.
pub struct TransferRequest<'p, P: ?Sized>
{
    /// Target process; `None` is rejected
    pub process: Option<&'p P>,
    /// Address inside the target process
    pub foreign: Address,
    /// Address of the agent-side buffer
    pub local: Address,
    /// Bytes to move
    pub size: usize,
    /// Which way the bytes go
    pub direction: Direction,
}

impl<P: ?Sized> fmt::Debug for TransferRequest<'_, P>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("TransferRequest")
            .field("process", &self.process.is_some())
            .field("foreign", &self.foreign)
            .field("local", &self.local)
            .field("size", &self.size)
            .field("direction", &self.direction)
            .finish()
    }
}

impl<'p, P: ?Sized> TransferRequest<'p, P>
{
    /// Check the request without touching any resource.
    ///
    /// ## Errors
    ///
    /// `InvalidParameter` naming the first argument that fails, in order:
    ///
    /// 1. `Process`: no process
    /// 2. `Address`: null or privileged foreign address
    /// 3. `Buffer`: null local buffer
    /// 4. `Size`: zero size
    ///
    /// then `Address` again if the foreign range overflows or runs into the
    /// privileged range, and `Buffer` if the local range overflows.
    pub fn validate(self, classifier: &AddressClassifier) -> Result<ValidatedRequest<'p, P>>
    {
        let process = self.process.ok_or_else(|| CrossmemError::invalid(Parameter::Process))?;

        if self.foreign.is_null() || classifier.is_privileged(self.foreign) {
            return Err(CrossmemError::invalid(Parameter::Address));
        }
        if self.local.is_null() {
            return Err(CrossmemError::invalid(Parameter::Buffer));
        }
        if self.size == 0 {
            return Err(CrossmemError::invalid(Parameter::Size));
        }

        let foreign_last = self
            .foreign
            .checked_add(self.size as u64 - 1)
            .ok_or_else(|| CrossmemError::invalid(Parameter::Address))?;
        if classifier.is_privileged(foreign_last) {
            return Err(CrossmemError::invalid(Parameter::Address));
        }
        if self.local.checked_add(self.size as u64).is_none() {
            return Err(CrossmemError::invalid(Parameter::Buffer));
        }

        Ok(ValidatedRequest {
            process,
            foreign: self.foreign,
            local: self.local,
            size: self.size,
            direction: self.direction,
        })
    }
}

/// A request that passed [`TransferRequest::validate`]. Immutable.
pub struct ValidatedRequest<'p, P: ?Sized>
{
    process: &'p P,
    foreign: Address,
    local: Address,
    size: usize,
    direction: Direction,
}

impl<'p, P: ?Sized> ValidatedRequest<'p, P>
{
    /// Target process.
    pub fn process(&self) -> &'p P
    {
        self.process
    }

    /// Foreign address.
    pub fn foreign(&self) -> Address
    {
        self.foreign
    }

    /// Local buffer address.
    pub fn local(&self) -> Address
    {
        self.local
    }

    /// Byte count, never zero.
    pub fn size(&self) -> usize
    {
        self.size
    }

    /// Direction.
    pub fn direction(&self) -> Direction
    {
        self.direction
    }
}

/// Reads and writes another process's memory through a [`MemoryHost`].
///
/// Holds nothing but the host reference, so it is free to copy and can be
/// shared across threads whenever the host can.
pub struct ProcessMemory<'h, H: MemoryHost + ?Sized>
{
    host: &'h H,
}

impl<H: MemoryHost + ?Sized> Clone for ProcessMemory<'_, H>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<H: MemoryHost + ?Sized> Copy for ProcessMemory<'_, H> {}

impl<'h, H: MemoryHost + ?Sized> ProcessMemory<'h, H>
{
    /// Wrap a host.
    pub fn new(host: &'h H) -> Self
    {
        Self { host }
    }

    /// The underlying host.
    pub fn host(&self) -> &'h H
    {
        self.host
    }

    /// Read `buffer.len()` bytes at `address` in `process` into `buffer`.
    ///
    /// ## Errors
    ///
    /// See [`ProcessMemory::transfer`].
    pub fn read(&self, process: &H::Process, address: Address, buffer: &mut [u8]) -> Result<()>
    {
        let request = TransferRequest {
            process: Some(process),
            foreign: address,
            local: Address::from_ptr(buffer.as_mut_ptr()),
            size: buffer.len(),
            direction: Direction::Read,
        };
        // SAFETY: the local range is exactly `buffer`, borrowed mutably for the call.
        unsafe { self.transfer(request) }
    }

    /// Write `buffer` to `address` in `process`.
    ///
    /// ## Errors
    ///
    /// See [`ProcessMemory::transfer`].
    pub fn write(&self, process: &H::Process, address: Address, buffer: &[u8]) -> Result<()>
    {
        let request = TransferRequest {
            process: Some(process),
            foreign: address,
            local: Address::from_ptr(buffer.as_ptr()),
            size: buffer.len(),
            direction: Direction::Write,
        };
        // SAFETY: the local range is exactly `buffer`, and a write only reads it.
        unsafe { self.transfer(request) }
    }

    /// Run one transfer.
    ///
    /// ## Errors
    ///
    /// - `InvalidParameter`: see [`TransferRequest::validate`]; no resource is touched
    /// - `NotLocked`: a range could not be pinned
    /// - `NotMappedView`: a pinned range could not be mapped
    /// - `Unsuccessful`: the copy faulted; the destination may be partially written
    ///
    /// Every pin and mapping acquired before a failure is released before the
    /// error is returned.
    ///
    /// # Safety
    ///
    /// `request.local` must point to `request.size` bytes in this process that
    /// stay valid for the call: writable for [`Direction::Read`], readable for
    /// [`Direction::Write`], and not accessed by anything else meanwhile.
    pub unsafe fn transfer(&self, request: TransferRequest<'_, H::Process>) -> Result<()>
    {
        let host = self.host;
        let classifier = host.classifier();
        let request = request.validate(&classifier)?;
        let size = request.size;
        let direction = request.direction;

        let _span = debug_span!(
            "transfer",
            foreign = %request.foreign,
            local = %request.local,
            size,
            %direction
        )
        .entered();

        let foreign_region = MemoryRegion::new(request.foreign, size, AddressSpace::Foreign(request.process))
            .map_err(|_| CrossmemError::invalid(Parameter::Address))?;
        let foreign_pin = secure(host, foreign_region, Protection::ReadOnly)?;

        // Privileged buffers are already resident; only process-owned ones need a pin.
        let local_pin = if classifier.is_unprivileged(request.local) {
            let local_region = MemoryRegion::new(request.local, size, AddressSpace::Local)
                .map_err(|_| CrossmemError::invalid(Parameter::Buffer))?;
            Some(secure(host, local_region, Protection::ReadWrite)?)
        } else {
            None
        };

        let foreign_intent = direction.foreign_intent();
        let local_intent = foreign_intent.complement();

        let foreign_map = map_memory(&foreign_pin, size, foreign_intent, CacheMode::NonCached)?;
        let local_map = match &local_pin {
            Some(pin) => Some(map_memory(pin, size, local_intent, CacheMode::NonCached)?),
            None => None,
        };

        let foreign_view = foreign_map.view();
        let local_view = match &local_map {
            Some(mapping) => mapping.view(),
            None => CopyView::resident(request.local, size, local_intent),
        };
        let (source, destination) = match direction {
            Direction::Read => (foreign_view, local_view),
            Direction::Write => (local_view, foreign_view),
        };

        // Guards drop in reverse declaration order: local map, foreign map,
        // local pin, foreign pin.
        copy_bytes(host, source, destination, size)
    }
}
