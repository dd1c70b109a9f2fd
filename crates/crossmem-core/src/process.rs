//! # Process and Thread Collaborators
//!
//! Everything around the transfer path that a memory agent also needs:
//! descriptor lookup, handles, suspend/resume, address-space attach, thread
//! context, information classes and thread creation.
//!
//! These are forwarding calls. [`ProcessHost`] is what each host implements;
//! [`Processes`] is the front door callers use. It adds the one thing the
//! host calls do not do themselves: checking the host's
//! [`CapabilityTable`] so that a primitive missing on this host version
//! fails with `NotImplemented` without ever reaching the host.
//!
//! ## Example
//!
//! ```rust
//! use crossmem_core::process::Processes;
//! use crossmem_core::sim::SimHost;
//! use crossmem_core::types::{Address, ProcessId};
//!
//! let host = SimHost::new();
//! host.spawn_process(4242).add_region(Address::new(0x40_0000), 0x1000)?;
//!
//! let processes = Processes::new(&host);
//! processes.write_memory(ProcessId(4242), Address::new(0x40_0000), b"hello")?;
//!
//! let mut buffer = [0u8; 5];
//! processes.read_memory(ProcessId(4242), Address::new(0x40_0000), &mut buffer)?;
//! assert_eq!(&buffer, b"hello");
//! # Ok::<(), crossmem_core::error::CrossmemError>(())
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::capability::{Capability, CapabilityTable};
use crate::error::{CrossmemError, HostError, Result};
use crate::host::MemoryHost;
use crate::transfer::ProcessMemory;
use crate::types::{AccessMask, Address, ClientId, ProcessId, ProcessorMode, Protection, ThreadContext, ThreadId};

/// Body of a thread started in the privileged context.
pub type SystemThreadRoutine = Box<dyn FnOnce() + Send + 'static>;

/// Information class codes understood by every host.
///
/// Hosts may accept more; unknown classes are rejected with
/// [`HostError::BadInformationClass`](crate::error::HostError::BadInformationClass).
pub mod info_class
{
    /// Basic process or thread information (read-only)
    pub const BASIC: u32 = 0;

    /// Size of the process `BASIC` record: exit status (i32), suspend count
    /// (u32), pid (u32), thread count (u32), little-endian.
    pub const PROCESS_BASIC_LEN: usize = 16;

    /// Exit status reported for a process that is still running.
    pub const STILL_ACTIVE: i32 = 259;

    /// Size of the thread `BASIC` record: tid (u64), pid (u32), suspend count
    /// (u32), little-endian.
    pub const THREAD_BASIC_LEN: usize = 16;
}

/// Copy an information record into a caller buffer; returns its length.
///
/// ## Errors
///
/// - `Host(BadInformationClass)`: `buffer` is shorter than the record
pub(crate) fn write_info_record(class: u32, record: &[u8], buffer: &mut [u8]) -> Result<usize>
{
    if buffer.len() < record.len() {
        return Err(HostError::BadInformationClass {
            class,
            reason: "buffer too small",
        }
        .into());
    }
    buffer[..record.len()].copy_from_slice(record);
    Ok(record.len())
}

/// Host primitives for process and thread control.
///
/// Methods tied to a [`Capability`] may assume it is present; [`Processes`]
/// checks before forwarding.
pub trait ProcessHost: MemoryHost
{
    /// Thread descriptor.
    type Thread: ?Sized;
    /// Open process handle; closed on drop.
    type ProcessHandle;
    /// Open thread handle; closed on drop.
    type ThreadHandle;
    /// State saved by [`ProcessHost::attach_process`].
    type SavedContext;

    /// Optional primitives on this host, resolved once.
    fn capabilities(&self) -> &CapabilityTable;

    /// Resolve a process id to a counted descriptor.
    fn lookup_process(&self, pid: ProcessId) -> Option<Arc<Self::Process>>;

    /// Resolve a thread id to a counted descriptor.
    fn lookup_thread(&self, tid: ThreadId) -> Option<Arc<Self::Thread>>;

    /// Open a handle with the given rights.
    fn open_process(&self, pid: ProcessId, access: AccessMask) -> Result<Self::ProcessHandle>;

    /// Open a thread handle with the given rights.
    fn open_thread(&self, tid: ThreadId, access: AccessMask) -> Result<Self::ThreadHandle>;

    /// Terminate the process behind `handle`.
    fn terminate_process(&self, handle: &Self::ProcessHandle, exit_status: i32) -> Result<()>;

    /// Suspend every thread ([`Capability::SuspendProcess`]).
    fn suspend_process(&self, process: &Self::Process) -> Result<()>;

    /// Resume every thread ([`Capability::ResumeProcess`]).
    fn resume_process(&self, process: &Self::Process) -> Result<()>;

    /// Switch into `process`'s address space ([`Capability::AttachProcess`]).
    fn attach_process(&self, process: &Self::Process) -> Result<Self::SavedContext>;

    /// Undo one [`ProcessHost::attach_process`].
    fn detach_process(&self, saved: Self::SavedContext);

    /// Read registers ([`Capability::GetContextThread`]).
    fn get_context_thread(&self, thread: &Self::Thread, context: &mut ThreadContext, mode: ProcessorMode) -> Result<()>;

    /// Write registers ([`Capability::SetContextThread`]).
    fn set_context_thread(&self, thread: &Self::Thread, context: &ThreadContext, mode: ProcessorMode) -> Result<()>;

    /// Start a thread at `start` inside another process ([`Capability::CreateUserThread`]).
    fn create_user_thread(
        &self,
        process: &Self::ProcessHandle,
        start: Address,
        argument: u64,
        create_suspended: bool,
    ) -> Result<(Self::ThreadHandle, ClientId)>;

    /// Start a thread in the privileged context, optionally on behalf of a process.
    fn create_system_thread(
        &self,
        process: Option<&Self::ProcessHandle>,
        routine: SystemThreadRoutine,
    ) -> Result<(Self::ThreadHandle, ClientId)>;

    /// Fill `buffer` with information of `class`; returns bytes written
    /// ([`Capability::QueryInformationThread`]).
    fn query_information_thread(&self, thread: &Self::ThreadHandle, class: u32, buffer: &mut [u8]) -> Result<usize>;

    /// Set information of `class` from `buffer`.
    fn set_information_thread(&self, thread: &Self::ThreadHandle, class: u32, buffer: &[u8]) -> Result<()>;

    /// Fill `buffer` with information of `class`; returns bytes written
    /// ([`Capability::QueryInformationProcess`]).
    fn query_information_process(&self, process: &Self::ProcessHandle, class: u32, buffer: &mut [u8]) -> Result<usize>;

    /// Set information of `class` from `buffer`.
    fn set_information_process(&self, process: &Self::ProcessHandle, class: u32, buffer: &[u8]) -> Result<()>;

    /// Commit `size` bytes in the target; returns the base.
    fn allocate_virtual_memory(&self, process: &Self::ProcessHandle, size: usize, protection: Protection) -> Result<Address>;

    /// Release an allocation made by [`ProcessHost::allocate_virtual_memory`].
    fn free_virtual_memory(&self, process: &Self::ProcessHandle, base: Address) -> Result<()>;
}

/// Capability-checked front end over a [`ProcessHost`].
pub struct Processes<'h, H: ProcessHost + ?Sized>
{
    host: &'h H,
}

impl<H: ProcessHost + ?Sized> Clone for Processes<'_, H>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<H: ProcessHost + ?Sized> Copy for Processes<'_, H> {}

impl<'h, H: ProcessHost + ?Sized> Processes<'h, H>
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

    /// Transfer front end over the same host.
    pub fn memory(&self) -> ProcessMemory<'h, H>
    {
        ProcessMemory::new(self.host)
    }

    /// The host's capability table.
    pub fn capabilities(&self) -> &'h CapabilityTable
    {
        self.host.capabilities()
    }

    fn require(&self, capability: Capability) -> Result<()>
    {
        self.host.capabilities().require(capability)
    }

    /// Resolve a process id. Dropping the result releases the reference.
    pub fn lookup_process(&self, pid: ProcessId) -> Option<Arc<H::Process>>
    {
        self.host.lookup_process(pid)
    }

    /// Resolve a process id, failing with `ProcessNotFound`.
    ///
    /// ## Errors
    ///
    /// - `ProcessNotFound`: no such process
    pub fn process(&self, pid: ProcessId) -> Result<Arc<H::Process>>
    {
        self.host
            .lookup_process(pid)
            .ok_or(CrossmemError::ProcessNotFound(pid.0))
    }

    /// Resolve a thread id. Dropping the result releases the reference.
    pub fn lookup_thread(&self, tid: ThreadId) -> Option<Arc<H::Thread>>
    {
        self.host.lookup_thread(tid)
    }

    /// Resolve a thread id, failing with `ThreadNotFound`.
    ///
    /// ## Errors
    ///
    /// - `ThreadNotFound`: no such thread
    pub fn thread(&self, tid: ThreadId) -> Result<Arc<H::Thread>>
    {
        self.host
            .lookup_thread(tid)
            .ok_or(CrossmemError::ThreadNotFound(tid.0))
    }

    /// Open a process handle.
    ///
    /// ## Errors
    ///
    /// Whatever the host reports (`ProcessNotFound`, `Host`, ...).
    pub fn open_process(&self, pid: ProcessId, access: AccessMask) -> Result<H::ProcessHandle>
    {
        self.host.open_process(pid, access)
    }

    /// Open a thread handle.
    ///
    /// ## Errors
    ///
    /// Whatever the host reports (`ThreadNotFound`, `Host`, ...).
    pub fn open_thread(&self, tid: ThreadId, access: AccessMask) -> Result<H::ThreadHandle>
    {
        self.host.open_thread(tid, access)
    }

    /// Terminate through an open handle.
    ///
    /// ## Errors
    ///
    /// Whatever the host reports.
    pub fn terminate_process(&self, handle: &H::ProcessHandle, exit_status: i32) -> Result<()>
    {
        self.host.terminate_process(handle, exit_status)
    }

    /// Open, terminate and close in one call.
    ///
    /// ## Errors
    ///
    /// Whatever opening or terminating reports.
    pub fn terminate_process_by_id(&self, pid: ProcessId, exit_status: i32) -> Result<()>
    {
        let handle = self.host.open_process(pid, AccessMask::TERMINATE)?;
        info!(%pid, exit_status, "terminating process");
        self.host.terminate_process(&handle, exit_status)
    }

    /// Suspend a process.
    ///
    /// ## Errors
    ///
    /// - `NotImplemented`: no suspend primitive on this host
    pub fn suspend(&self, process: &H::Process) -> Result<()>
    {
        self.require(Capability::SuspendProcess)?;
        self.host.suspend_process(process)
    }

    /// Resume a process.
    ///
    /// ## Errors
    ///
    /// - `NotImplemented`: no resume primitive on this host
    pub fn resume(&self, process: &H::Process) -> Result<()>
    {
        self.require(Capability::ResumeProcess)?;
        self.host.resume_process(process)
    }

    /// Switch into `process`'s address space until the guard is dropped.
    ///
    /// ## Errors
    ///
    /// - `NotImplemented`: the host cannot attach
    pub fn attach(&self, process: &H::Process) -> Result<AttachGuard<'h, H>>
    {
        self.require(Capability::AttachProcess)?;
        let saved = self.host.attach_process(process)?;
        debug!("attached to foreign address space");
        Ok(AttachGuard {
            host: self.host,
            saved: Some(saved),
        })
    }

    /// Look up `pid` and attach to it. The descriptor is released once the
    /// switch is done; the guard only holds the saved context.
    ///
    /// ## Errors
    ///
    /// - `ProcessNotFound`: no such process
    /// - `NotImplemented`: the host cannot attach
    pub fn attach_by_id(&self, pid: ProcessId) -> Result<AttachGuard<'h, H>>
    {
        let process = self.process(pid)?;
        self.attach(&process)
    }

    /// Read a thread's registers into `context` (fields chosen by `context.flags`).
    ///
    /// ## Errors
    ///
    /// - `NotImplemented`: no context primitive on this host
    pub fn get_context_thread(&self, thread: &H::Thread, context: &mut ThreadContext, mode: ProcessorMode) -> Result<()>
    {
        self.require(Capability::GetContextThread)?;
        self.host.get_context_thread(thread, context, mode)
    }

    /// Write a thread's registers from `context` (fields chosen by `context.flags`).
    ///
    /// ## Errors
    ///
    /// - `NotImplemented`: no context primitive on this host
    pub fn set_context_thread(&self, thread: &H::Thread, context: &ThreadContext, mode: ProcessorMode) -> Result<()>
    {
        self.require(Capability::SetContextThread)?;
        self.host.set_context_thread(thread, context, mode)
    }

    /// Start a thread inside another process.
    ///
    /// ## Errors
    ///
    /// - `NotImplemented`: no user-thread primitive on this host
    pub fn create_user_thread(
        &self,
        process: &H::ProcessHandle,
        start: Address,
        argument: u64,
        create_suspended: bool,
    ) -> Result<(H::ThreadHandle, ClientId)>
    {
        self.require(Capability::CreateUserThread)?;
        let (handle, client) = self.host.create_user_thread(process, start, argument, create_suspended)?;
        info!(pid = %client.process, tid = %client.thread, %start, "created user thread");
        Ok((handle, client))
    }

    /// Start a thread in the privileged context.
    ///
    /// ## Errors
    ///
    /// Whatever the host reports.
    pub fn create_system_thread<F>(&self, process: Option<&H::ProcessHandle>, routine: F) -> Result<(H::ThreadHandle, ClientId)>
    where
        F: FnOnce() + Send + 'static,
    {
        let (handle, client) = self.host.create_system_thread(process, Box::new(routine))?;
        info!(pid = %client.process, tid = %client.thread, "created system thread");
        Ok((handle, client))
    }

    /// Query thread information.
    ///
    /// ## Errors
    ///
    /// - `NotImplemented`: no query primitive on this host
    pub fn query_information_thread(&self, thread: &H::ThreadHandle, class: u32, buffer: &mut [u8]) -> Result<usize>
    {
        self.require(Capability::QueryInformationThread)?;
        self.host.query_information_thread(thread, class, buffer)
    }

    /// Set thread information.
    ///
    /// ## Errors
    ///
    /// Whatever the host reports.
    pub fn set_information_thread(&self, thread: &H::ThreadHandle, class: u32, buffer: &[u8]) -> Result<()>
    {
        self.host.set_information_thread(thread, class, buffer)
    }

    /// Query process information.
    ///
    /// ## Errors
    ///
    /// - `NotImplemented`: no query primitive on this host
    pub fn query_information_process(&self, process: &H::ProcessHandle, class: u32, buffer: &mut [u8]) -> Result<usize>
    {
        self.require(Capability::QueryInformationProcess)?;
        self.host.query_information_process(process, class, buffer)
    }

    /// Set process information.
    ///
    /// ## Errors
    ///
    /// Whatever the host reports.
    pub fn set_information_process(&self, process: &H::ProcessHandle, class: u32, buffer: &[u8]) -> Result<()>
    {
        self.host.set_information_process(process, class, buffer)
    }

    /// Commit memory in another process.
    ///
    /// ## Errors
    ///
    /// Whatever the host reports.
    pub fn allocate_virtual_memory(&self, process: &H::ProcessHandle, size: usize, protection: Protection) -> Result<Address>
    {
        self.host.allocate_virtual_memory(process, size, protection)
    }

    /// Release memory committed by [`Processes::allocate_virtual_memory`].
    ///
    /// ## Errors
    ///
    /// Whatever the host reports.
    pub fn free_virtual_memory(&self, process: &H::ProcessHandle, base: Address) -> Result<()>
    {
        self.host.free_virtual_memory(process, base)
    }

    /// Look up `pid` and read from it.
    ///
    /// If the process does not exist no transfer is attempted.
    ///
    /// ## Errors
    ///
    /// - `ProcessNotFound`: no such process
    /// - anything [`ProcessMemory::read`] reports
    pub fn read_memory(&self, pid: ProcessId, address: Address, buffer: &mut [u8]) -> Result<()>
    {
        let process = self.process(pid)?;
        self.memory().read(&process, address, buffer)
    }

    /// Look up `pid` and write to it.
    ///
    /// If the process does not exist no transfer is attempted.
    ///
    /// ## Errors
    ///
    /// - `ProcessNotFound`: no such process
    /// - anything [`ProcessMemory::write`] reports
    pub fn write_memory(&self, pid: ProcessId, address: Address, buffer: &[u8]) -> Result<()>
    {
        let process = self.process(pid)?;
        self.memory().write(&process, address, buffer)
    }
}

/// RAII guard for an address-space attach; detaches when dropped.
pub struct AttachGuard<'h, H: ProcessHost + ?Sized>
{
    host: &'h H,
    saved: Option<H::SavedContext>,
}

impl<H: ProcessHost + ?Sized> AttachGuard<'_, H>
{
    /// Detach now rather than at drop.
    pub fn detach(mut self)
    {
        self.restore();
    }

    fn restore(&mut self)
    {
        if let Some(saved) = self.saved.take() {
            self.host.detach_process(saved);
            debug!("detached from foreign address space");
        }
    }
}

impl<H: ProcessHost + ?Sized> Drop for AttachGuard<'_, H>
{
    fn drop(&mut self)
    {
        self.restore();
    }
}

impl<H: ProcessHost + ?Sized> fmt::Debug for AttachGuard<'_, H>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("AttachGuard")
            .field("attached", &self.saved.is_some())
            .finish_non_exhaustive()
    }
}
