//! Simulated processes, threads and handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::error::{CrossmemError, HostError, Result};
use crate::types::{AccessMask, Address, ProcessId, ThreadContext, ThreadId};

use super::memory::{PageProtection, SimRegion};

/// Base of the range `allocate_virtual_memory` hands out from.
pub const ALLOCATION_BASE: Address = Address::new(0x1000_0000_0000);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T>
{
    // A panic while holding a table lock leaves the table itself consistent.
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A simulated process: an address space made of [`SimRegion`]s plus
/// bookkeeping for suspend, exit and information classes.
#[derive(Debug)]
pub struct SimProcess
{
    pid: ProcessId,
    regions: Mutex<Vec<Arc<SimRegion>>>,
    threads: Mutex<Vec<ThreadId>>,
    suspend_count: AtomicU32,
    exit_status: Mutex<Option<i32>>,
    info: Mutex<HashMap<u32, Vec<u8>>>,
    next_allocation: AtomicU64,
}

impl SimProcess
{
    pub(crate) fn new(pid: ProcessId) -> Self
    {
        Self {
            pid,
            regions: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            suspend_count: AtomicU32::new(0),
            exit_status: Mutex::new(None),
            info: Mutex::new(HashMap::new()),
            next_allocation: AtomicU64::new(ALLOCATION_BASE.value()),
        }
    }

    /// Process id.
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// Add a zero-filled read-write region.
    ///
    /// ## Errors
    ///
    /// - `InvalidParameter(Address)`: null base or overflowing range
    /// - `InvalidParameter(Size)`: zero length
    /// - `Host(AlreadyMapped)`: overlaps an existing region
    pub fn add_region(&self, base: Address, len: usize) -> Result<()>
    {
        self.add_region_with(base, len, PageProtection::ReadWrite)
    }

    /// Add a zero-filled region with the given protection.
    ///
    /// ## Errors
    ///
    /// Same as [`SimProcess::add_region`].
    pub fn add_region_with(&self, base: Address, len: usize, protection: PageProtection) -> Result<()>
    {
        use crate::error::Parameter;

        if len == 0 {
            return Err(CrossmemError::invalid(Parameter::Size));
        }
        if base.is_null() || base.checked_add(len as u64).is_none() {
            return Err(CrossmemError::invalid(Parameter::Address));
        }
        let mut regions = lock(&self.regions);
        if let Some(existing) = regions.iter().find(|r| r.overlaps(base, len)) {
            return Err(HostError::AlreadyMapped(existing.base()).into());
        }
        regions.push(Arc::new(SimRegion::new(base, len, protection)));
        Ok(())
    }

    /// Remove the region starting at `base`.
    ///
    /// Pins and mappings taken earlier keep the backing memory alive.
    ///
    /// ## Errors
    ///
    /// - `Host(Unmapped)`: no region starts at `base`
    pub fn remove_region(&self, base: Address) -> Result<()>
    {
        let mut regions = lock(&self.regions);
        let index = regions
            .iter()
            .position(|r| r.base() == base)
            .ok_or(HostError::Unmapped(base))?;
        regions.remove(index);
        Ok(())
    }

    /// Change the protection of the region containing `address`.
    ///
    /// Setting [`PageProtection::NoAccess`] under a live mapping makes the
    /// next copy through it fault.
    ///
    /// ## Errors
    ///
    /// - `Host(Unmapped)`: `address` is not inside any region
    pub fn protect(&self, address: Address, protection: PageProtection) -> Result<()>
    {
        let region = self.region_at(address, 1).ok_or(HostError::Unmapped(address))?;
        region.set_protection(protection);
        Ok(())
    }

    /// The region fully containing `[address, address + len)`.
    pub fn region_at(&self, address: Address, len: usize) -> Option<Arc<SimRegion>>
    {
        lock(&self.regions)
            .iter()
            .find(|r| r.contains(address, len))
            .cloned()
    }

    /// Where a range that no single region contains stops being mapped: the
    /// end of the region holding `address`, or `address` itself.
    pub(crate) fn unmapped_at(&self, address: Address) -> Address
    {
        match lock(&self.regions).iter().find(|r| r.contains(address, 1)) {
            Some(region) => region.end(),
            None => address,
        }
    }

    /// Number of regions.
    pub fn region_count(&self) -> usize
    {
        lock(&self.regions).len()
    }

    /// Write bytes directly, bypassing pins and protection.
    ///
    /// ## Errors
    ///
    /// - `Host(Unmapped)`: the range is not inside one region
    pub fn fill(&self, address: Address, bytes: &[u8]) -> Result<()>
    {
        let region = self
            .region_at(address, bytes.len())
            .ok_or(HostError::Unmapped(address))?;
        region.poke(address, bytes);
        Ok(())
    }

    /// Read bytes directly, bypassing pins and protection.
    ///
    /// ## Errors
    ///
    /// - `Host(Unmapped)`: the range is not inside one region
    pub fn peek(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let region = self.region_at(address, len).ok_or(HostError::Unmapped(address))?;
        let mut out = vec![0u8; len];
        region.peek(address, &mut out);
        Ok(out)
    }

    /// Current suspend count.
    pub fn suspend_count(&self) -> u32
    {
        self.suspend_count.load(Ordering::Acquire)
    }

    pub(crate) fn suspend(&self) -> u32
    {
        self.suspend_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn resume(&self) -> u32
    {
        let previous = self
            .suspend_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| Some(count.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Exit status, once terminated.
    pub fn exit_status(&self) -> Option<i32>
    {
        *lock(&self.exit_status)
    }

    /// Whether the process has been terminated.
    pub fn has_exited(&self) -> bool
    {
        self.exit_status().is_some()
    }

    pub(crate) fn exit(&self, status: i32)
    {
        let mut exit = lock(&self.exit_status);
        if exit.is_none() {
            *exit = Some(status);
        }
    }

    /// Ids of threads belonging to this process.
    pub fn threads(&self) -> Vec<ThreadId>
    {
        lock(&self.threads).clone()
    }

    /// The first thread, created with the process.
    pub fn main_thread(&self) -> Option<ThreadId>
    {
        lock(&self.threads).first().copied()
    }

    pub(crate) fn add_thread(&self, tid: ThreadId)
    {
        lock(&self.threads).push(tid);
    }

    pub(crate) fn info(&self, class: u32) -> Option<Vec<u8>>
    {
        lock(&self.info).get(&class).cloned()
    }

    pub(crate) fn set_info(&self, class: u32, data: &[u8])
    {
        lock(&self.info).insert(class, data.to_vec());
    }

    pub(crate) fn reserve(&self, len: u64) -> Address
    {
        Address::new(self.next_allocation.fetch_add(len, Ordering::AcqRel))
    }
}

/// A simulated thread.
#[derive(Debug)]
pub struct SimThread
{
    tid: ThreadId,
    pid: ProcessId,
    context: Mutex<ThreadContext>,
    suspend_count: AtomicU32,
    info: Mutex<HashMap<u32, Vec<u8>>>,
}

impl SimThread
{
    pub(crate) fn new(tid: ThreadId, pid: ProcessId, context: ThreadContext, suspended: bool) -> Self
    {
        Self {
            tid,
            pid,
            context: Mutex::new(context),
            suspend_count: AtomicU32::new(u32::from(suspended)),
            info: Mutex::new(HashMap::new()),
        }
    }

    /// Thread id.
    pub fn tid(&self) -> ThreadId
    {
        self.tid
    }

    /// Owning process id (0 for system threads without one).
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// Current suspend count.
    pub fn suspend_count(&self) -> u32
    {
        self.suspend_count.load(Ordering::Acquire)
    }

    pub(crate) fn adjust_suspend(&self, suspend: bool)
    {
        if suspend {
            self.suspend_count.fetch_add(1, Ordering::AcqRel);
        } else {
            let _ = self
                .suspend_count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| Some(count.saturating_sub(1)));
        }
    }

    /// Snapshot of the full register context.
    pub fn context(&self) -> ThreadContext
    {
        lock(&self.context).clone()
    }

    pub(crate) fn context_mut(&self) -> MutexGuard<'_, ThreadContext>
    {
        lock(&self.context)
    }

    pub(crate) fn info(&self, class: u32) -> Option<Vec<u8>>
    {
        lock(&self.info).get(&class).cloned()
    }

    pub(crate) fn set_info(&self, class: u32, data: &[u8])
    {
        lock(&self.info).insert(class, data.to_vec());
    }
}

/// Counts one open handle for as long as it lives.
#[derive(Debug)]
pub(crate) struct HandleCount(Arc<AtomicUsize>);

impl HandleCount
{
    pub(crate) fn open(counter: &Arc<AtomicUsize>) -> Self
    {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for HandleCount
{
    fn drop(&mut self)
    {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Open process handle. Closed on drop.
#[derive(Debug)]
pub struct SimProcessHandle
{
    pub(crate) process: Arc<SimProcess>,
    pub(crate) access: AccessMask,
    pub(crate) _open: HandleCount,
}

impl SimProcessHandle
{
    /// The process this handle names.
    pub fn process(&self) -> &Arc<SimProcess>
    {
        &self.process
    }

    /// Rights granted at open.
    pub fn access(&self) -> AccessMask
    {
        self.access
    }

    pub(crate) fn check(&self, needed: AccessMask) -> Result<()>
    {
        if self.access.contains(needed) {
            Ok(())
        } else {
            Err(HostError::InsufficientRights.into())
        }
    }
}

/// Open thread handle. Closed on drop.
///
/// Handles of system threads also own the OS thread running the routine.
#[derive(Debug)]
pub struct SimThreadHandle
{
    pub(crate) thread: Arc<SimThread>,
    pub(crate) access: AccessMask,
    pub(crate) worker: Option<JoinHandle<()>>,
    pub(crate) _open: HandleCount,
}

impl SimThreadHandle
{
    /// The thread this handle names.
    pub fn thread(&self) -> &Arc<SimThread>
    {
        &self.thread
    }

    /// Rights granted at open.
    pub fn access(&self) -> AccessMask
    {
        self.access
    }

    /// Wait for a system thread's routine to finish.
    ///
    /// Returns `false` if the routine panicked; `true` for threads with no
    /// routine.
    pub fn join(&mut self) -> bool
    {
        match self.worker.take() {
            Some(worker) => worker.join().is_ok(),
            None => true,
        }
    }

    pub(crate) fn check(&self, needed: AccessMask) -> Result<()>
    {
        if self.access.contains(needed) {
            Ok(())
        } else {
            Err(HostError::InsufficientRights.into())
        }
    }
}

/// What [`SimHost`](super::SimHost) saves on attach: the depth of the attach
/// stack before the switch.
#[derive(Debug)]
pub struct SimSavedContext
{
    pub(crate) depth: usize,
    pub(crate) pid: ProcessId,
}

impl SimSavedContext
{
    /// The process that was attached to.
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }
}
