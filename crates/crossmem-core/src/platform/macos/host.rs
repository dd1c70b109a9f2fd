//! # Mach Host
//!
//! [`MachHost`] implements the host traits on top of Mach task and thread
//! ports.
//!
//! ## Transfer primitives
//!
//! - **secure (foreign)**: `mach_make_memory_entry_64()` on the target task.
//!   The entry holds a reference on the backing VM object, so the pages stay
//!   valid while the entry port lives even if the target unmaps them.
//! - **secure (local)**: `mlock()` on the agent's own buffer.
//! - **map**: `mach_vm_map()` of the entry into the agent's task. Local
//!   buffers are already addressable and alias themselves.
//! - **guarded copy**: `mach_vm_read_overwrite()` against the agent's own
//!   task. The kernel does the copy and reports `KERN_INVALID_ADDRESS` or
//!   `KERN_PROTECTION_FAILURE` instead of faulting the caller.
//!
//! ## Thread ids
//!
//! Mach has no system-wide thread lookup. A [`ThreadId`] here is the owning
//! pid in the high 32 bits and the thread's index in `task_threads()` in the
//! low 32 bits.
//!
//! ## Permissions
//!
//! `task_for_pid()` needs root or the `com.apple.security.cs.debugger`
//! entitlement. Without them every foreign lookup fails; `libproc` is used to
//! tell a missing process apart from a permission problem.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use libc::{c_int, mach_msg_type_number_t, mach_port_t, natural_t, thread_act_t};
use mach2::kern_return::{kern_return_t, KERN_FAILURE, KERN_SUCCESS};
use mach2::port::MACH_PORT_NULL;
use mach2::task::{task_resume, task_suspend, task_threads};
use mach2::traps::mach_task_self;
use mach2::vm::{mach_vm_allocate, mach_vm_deallocate, mach_vm_protect, mach_vm_read_overwrite};
use mach2::vm_inherit::VM_INHERIT_NONE;
use mach2::vm_prot::{VM_PROT_READ, VM_PROT_WRITE};
use mach2::vm_statistics::VM_FLAGS_ANYWHERE;
use once_cell::sync::Lazy;
use tracing::{debug, trace, warn};

use crate::capability::{Capability, CapabilityTable, LazyCapabilities};
use crate::error::{AccessFault, CrossmemError, HostError, HostResult, Parameter, Result};
use crate::host::{MappedView, MemoryHost, SecureToken};
use crate::platform::macos::context::{prime_thread, read_context, write_context};
use crate::platform::macos::error::MachError;
use crate::platform::macos::ffi;
use crate::process::{info_class, write_info_record, ProcessHost, SystemThreadRoutine};
use crate::types::{
    AccessIntent, AccessMask, Address, AddressSpace, CacheMode, ClientId, ContextFlags, MemoryRegion, ProcessId,
    ProcessorMode, Protection, ThreadContext, ThreadId,
};

static SYSTEM_PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as u64
    }
});

/// Stack reserved for threads started by `create_user_thread`.
pub const USER_STACK_SIZE: u64 = 512 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T>
{
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn check(result: kern_return_t) -> std::result::Result<(), MachError>
{
    if result == KERN_SUCCESS {
        Ok(())
    } else {
        Err(MachError::from(result))
    }
}

fn encode_tid(pid: ProcessId, index: usize) -> ThreadId
{
    ThreadId((u64::from(pid.0) << 32) | (index as u64 & 0xffff_ffff))
}

fn decode_tid(tid: ThreadId) -> (ProcessId, usize)
{
    (ProcessId((tid.0 >> 32) as u32), (tid.0 & 0xffff_ffff) as usize)
}

fn own_pid() -> ProcessId
{
    ProcessId(std::process::id())
}

/// A Mach task port for one process.
#[derive(Debug)]
pub struct MachProcess
{
    pid: ProcessId,
    task: mach_port_t,
    owned: bool,
}

impl MachProcess
{
    /// Process id.
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// The task port.
    pub fn task(&self) -> mach_port_t
    {
        self.task
    }

    /// Short process name from `libproc`, if available.
    pub fn name(&self) -> Option<String>
    {
        libproc::proc_pid::name(self.pid.0 as i32).ok()
    }

    fn open(pid: ProcessId) -> Result<Self>
    {
        if pid == own_pid() {
            // SAFETY: mach_task_self has no preconditions.
            let task = unsafe { mach_task_self() };
            return Ok(Self {
                pid,
                task,
                owned: false,
            });
        }

        let mut task: mach_port_t = 0;
        // SAFETY: `task` is a valid out-pointer.
        let result = unsafe { ffi::task_for_pid(mach_task_self(), pid.0 as c_int, &mut task) };
        if result == KERN_SUCCESS {
            return Ok(Self {
                pid,
                task,
                owned: true,
            });
        }

        // task_for_pid() reports KERN_FAILURE both for a missing process and
        // for a permission problem.
        if result == KERN_FAILURE {
            return match libproc::proc_pid::name(pid.0 as i32) {
                Ok(name) => {
                    warn!(%pid, %name, "task_for_pid denied; run with sudo or the debugger entitlement");
                    Err(MachError::ProtectionFailure.into())
                }
                Err(_) => Err(CrossmemError::ProcessNotFound(pid.0)),
            };
        }
        Err(MachError::from(result).into())
    }

    fn thread_ports(&self) -> Result<Vec<thread_act_t>>
    {
        let mut list: *mut thread_act_t = std::ptr::null_mut();
        let mut count: mach_msg_type_number_t = 0;
        // SAFETY: both out-pointers are valid.
        check(unsafe { task_threads(self.task, &mut list, &mut count) })?;
        if list.is_null() {
            return Ok(Vec::new());
        }
        // SAFETY: the kernel returned `count` ports at `list`.
        let ports = unsafe { std::slice::from_raw_parts(list, count as usize) }.to_vec();
        let size = (count as usize).saturating_mul(mem::size_of::<thread_act_t>()) as u64;
        // SAFETY: `list` was allocated in our task by task_threads().
        unsafe {
            let _ = mach_vm_deallocate(mach_task_self(), list as u64, size);
        }
        Ok(ports)
    }
}

impl Drop for MachProcess
{
    fn drop(&mut self)
    {
        if self.owned {
            // SAFETY: we hold one send right on `task`.
            unsafe {
                let _ = ffi::mach_port_deallocate(mach_task_self(), self.task);
            }
        }
    }
}

fn release_ports(ports: impl IntoIterator<Item = thread_act_t>)
{
    for port in ports {
        // SAFETY: each port carries one right from task_threads().
        unsafe {
            let _ = ffi::mach_port_deallocate(mach_task_self(), port);
        }
    }
}

/// A Mach thread port and the task it belongs to.
#[derive(Debug)]
pub struct MachThread
{
    process: Arc<MachProcess>,
    port: thread_act_t,
    tid: ThreadId,
}

impl MachThread
{
    /// Encoded thread id.
    pub fn tid(&self) -> ThreadId
    {
        self.tid
    }

    /// The owning task.
    pub fn process(&self) -> &Arc<MachProcess>
    {
        &self.process
    }

    /// The thread port.
    pub fn port(&self) -> thread_act_t
    {
        self.port
    }
}

impl Drop for MachThread
{
    fn drop(&mut self)
    {
        release_ports([self.port]);
    }
}

/// Open process handle.
#[derive(Debug)]
pub struct MachProcessHandle
{
    process: Arc<MachProcess>,
    access: AccessMask,
}

impl MachProcessHandle
{
    /// The process this handle names.
    pub fn process(&self) -> &Arc<MachProcess>
    {
        &self.process
    }

    fn check(&self, needed: AccessMask) -> Result<()>
    {
        if self.access.contains(needed) {
            Ok(())
        } else {
            Err(HostError::InsufficientRights.into())
        }
    }
}

/// Open thread handle. Handles of system threads also own the OS thread.
#[derive(Debug)]
pub struct MachThreadHandle
{
    thread: Arc<MachThread>,
    access: AccessMask,
    worker: Option<JoinHandle<()>>,
}

impl MachThreadHandle
{
    /// The thread this handle names.
    pub fn thread(&self) -> &Arc<MachThread>
    {
        &self.thread
    }

    /// Wait for a system thread's routine to finish.
    ///
    /// Returns `false` if the routine panicked.
    pub fn join(&mut self) -> bool
    {
        match self.worker.take() {
            Some(worker) => worker.join().is_ok(),
            None => true,
        }
    }

    fn check(&self, needed: AccessMask) -> Result<()>
    {
        if self.access.contains(needed) {
            Ok(())
        } else {
            Err(HostError::InsufficientRights.into())
        }
    }
}

/// Mach cannot switch a thread into another task's address space, so no
/// saved context ever exists.
#[derive(Debug)]
pub enum MachSavedContext {}

enum Pin
{
    // Named memory entry over whole pages of a foreign task
    Entry
    {
        port: mach_port_t,
        page_base: u64,
        len: u64,
        writable: bool,
    },
    // mlock()ed range of our own task
    Wired
    {
        base: u64,
        size: usize,
    },
}

struct Mapping
{
    // Page-aligned start in our task; None for identity aliases
    page_base: Option<u64>,
    len: u64,
}

/// Host backed by Mach task ports.
///
/// ## Example
///
/// ```rust,no_run
/// use crossmem_core::platform::macos::MachHost;
/// use crossmem_core::process::Processes;
/// use crossmem_core::types::{Address, ProcessId};
///
/// let host = MachHost::new();
/// let mut buffer = [0u8; 16];
/// Processes::new(&host).read_memory(ProcessId(12345), Address::new(0x1_0000_0000), &mut buffer)?;
/// # Ok::<(), crossmem_core::error::CrossmemError>(())
/// ```
pub struct MachHost
{
    pins: Mutex<HashMap<u64, Pin>>,
    maps: Mutex<HashMap<u64, Mapping>>,
    allocations: Mutex<HashMap<(ProcessId, u64), u64>>,
    next_token: AtomicU64,
    capabilities: LazyCapabilities,
}

impl Default for MachHost
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl MachHost
{
    /// A host with no pins or mappings.
    pub fn new() -> Self
    {
        Self {
            pins: Mutex::new(HashMap::new()),
            maps: Mutex::new(HashMap::new()),
            allocations: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            capabilities: LazyCapabilities::new(),
        }
    }

    fn token(&self) -> u64
    {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    fn symbol(capability: Capability) -> Option<&'static [u8]>
    {
        match capability {
            Capability::SuspendProcess => Some(b"task_suspend\0"),
            Capability::ResumeProcess => Some(b"task_resume\0"),
            Capability::GetContextThread => Some(b"thread_get_state\0"),
            Capability::SetContextThread => Some(b"thread_set_state\0"),
            Capability::CreateUserThread => Some(b"thread_create\0"),
            Capability::QueryInformationThread => Some(b"thread_info\0"),
            Capability::QueryInformationProcess => Some(b"task_info\0"),
            Capability::AttachProcess => None,
        }
    }

    fn probe(capability: Capability) -> bool
    {
        match Self::symbol(capability) {
            // SAFETY: `name` is NUL-terminated.
            Some(name) => unsafe { !libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr().cast()).is_null() },
            None => false,
        }
    }

    fn thread_at(process: Arc<MachProcess>, index: usize) -> Result<MachThread>
    {
        let mut ports = process.thread_ports()?;
        if index >= ports.len() {
            let tid = encode_tid(process.pid(), index);
            release_ports(ports);
            return Err(CrossmemError::ThreadNotFound(tid.0));
        }
        let port = ports.swap_remove(index);
        release_ports(ports);
        let tid = encode_tid(process.pid(), index);
        Ok(MachThread { process, port, tid })
    }

    fn index_of(process: &MachProcess, port: thread_act_t) -> usize
    {
        match process.thread_ports() {
            Ok(ports) => {
                let index = ports.iter().position(|p| *p == port).unwrap_or(0xffff_ffff);
                release_ports(ports);
                index
            }
            Err(_) => 0xffff_ffff,
        }
    }
}

impl MemoryHost for MachHost
{
    type Process = MachProcess;

    fn secure(&self, region: &MemoryRegion<'_, MachProcess>, protection: Protection) -> HostResult<SecureToken>
    {
        let base = region.base();
        let size = region.size();

        let pin = match region.space() {
            AddressSpace::Local => {
                // SAFETY: mlock only changes residency of our own pages.
                if unsafe { libc::mlock(base.as_mut_ptr().cast(), size) } != 0 {
                    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
                    return Err(match errno {
                        libc::EAGAIN | libc::ENOMEM => HostError::QuotaExceeded {
                            requested: size,
                            available: 0,
                        },
                        code => HostError::Native {
                            operation: "mlock",
                            code,
                        },
                    });
                }
                Pin::Wired {
                    base: base.value(),
                    size,
                }
            }
            AddressSpace::Foreign(process) => {
                let page = *SYSTEM_PAGE_SIZE;
                let page_base = base.align_down(page).value();
                let end = region.end().value().checked_add(page - 1).ok_or(HostError::Unmapped(base))? & !(page - 1);

                let mut entry = None;
                // Prefer a writable entry so the same pin can back a write mapping.
                for permission in [VM_PROT_READ | VM_PROT_WRITE, VM_PROT_READ] {
                    let mut len = end - page_base;
                    let mut port: mach_port_t = MACH_PORT_NULL;
                    // SAFETY: out-pointers are valid; `process.task` is a live task port.
                    let result = unsafe {
                        ffi::mach_make_memory_entry_64(
                            process.task,
                            &mut len,
                            page_base,
                            permission | ffi::MAP_MEM_VM_SHARE,
                            &mut port,
                            MACH_PORT_NULL,
                        )
                    };
                    match check(result) {
                        Ok(()) => {
                            entry = Some((port, len, permission & VM_PROT_WRITE != 0));
                            break;
                        }
                        Err(err) if permission & VM_PROT_WRITE != 0 => {
                            trace!(%base, "writable memory entry refused: {err}");
                        }
                        Err(err) => return Err(err.into_host("mach_make_memory_entry_64", base)),
                    }
                }
                let (port, len, writable) = entry.ok_or(HostError::Protected(base))?;
                if protection.allows_write() && !writable {
                    release_ports([port]);
                    return Err(HostError::Protected(base));
                }
                Pin::Entry {
                    port,
                    page_base,
                    len,
                    writable,
                }
            }
        };

        let token = self.token();
        lock(&self.pins).insert(token, pin);
        Ok(SecureToken::new(token))
    }

    fn unsecure(&self, _region: &MemoryRegion<'_, MachProcess>, token: SecureToken)
    {
        match lock(&self.pins).remove(&token.raw()) {
            Some(Pin::Entry { port, .. }) => release_ports([port]),
            Some(Pin::Wired { base, size }) => {
                // SAFETY: the range was mlock()ed by `secure`.
                unsafe {
                    let _ = libc::munlock(Address::new(base).as_mut_ptr().cast(), size);
                }
            }
            None => warn!(token = token.raw(), "unsecure of unknown token"),
        }
    }

    fn map(
        &self,
        region: &MemoryRegion<'_, MachProcess>,
        token: SecureToken,
        size: usize,
        intent: AccessIntent,
        cache: CacheMode,
    ) -> HostResult<MappedView>
    {
        let base = region.base();
        if size > region.size() {
            return Err(HostError::OutOfRange {
                requested: size,
                secured: region.size(),
            });
        }
        // User-space mappings always use the default cache policy.
        trace!(?cache, "cache mode is advisory on Mach");

        let (mapping, alias) = {
            let pins = lock(&self.pins);
            match pins.get(&token.raw()) {
                None => return Err(HostError::StaleHandle),
                Some(Pin::Wired { .. }) => (
                    Mapping {
                        page_base: None,
                        len: size as u64,
                    },
                    base,
                ),
                Some(Pin::Entry {
                    port,
                    page_base,
                    len,
                    writable,
                }) => {
                    if intent.writable() && !writable {
                        return Err(HostError::AccessDenied(base));
                    }
                    let protection = if intent.writable() {
                        VM_PROT_READ | VM_PROT_WRITE
                    } else {
                        VM_PROT_READ
                    };
                    let mut address: u64 = 0;
                    // SAFETY: `port` is a live memory entry covering `len` bytes.
                    let result = unsafe {
                        ffi::mach_vm_map(
                            mach_task_self(),
                            &mut address,
                            *len,
                            0,
                            VM_FLAGS_ANYWHERE,
                            *port,
                            0,
                            0,
                            protection,
                            protection,
                            VM_INHERIT_NONE,
                        )
                    };
                    check(result).map_err(|err| match err {
                        MachError::NoSpace => HostError::NoWindow(size),
                        other => other.into_host("mach_vm_map", base),
                    })?;
                    let offset = base.value() - page_base;
                    (
                        Mapping {
                            page_base: Some(address),
                            len: *len,
                        },
                        Address::new(address + offset),
                    )
                }
            }
        };

        let id = self.token();
        lock(&self.maps).insert(id, mapping);
        Ok(MappedView {
            token: id,
            base: alias,
            size,
        })
    }

    fn unmap(&self, view: MappedView)
    {
        match lock(&self.maps).remove(&view.token) {
            Some(Mapping {
                page_base: Some(address),
                len,
            }) => {
                // SAFETY: the range was mapped by `map` and nothing else refers to it.
                unsafe {
                    let _ = mach_vm_deallocate(mach_task_self(), address, len);
                }
            }
            Some(_) => {}
            None => warn!(token = view.token, "unmap of unknown view"),
        }
    }

    unsafe fn guarded_copy(&self, destination: Address, source: Address, len: usize) -> std::result::Result<(), AccessFault>
    {
        let mut copied: u64 = 0;
        // SAFETY: the kernel validates both ranges in our own task and fails
        // the call instead of faulting.
        let result = unsafe {
            mach_vm_read_overwrite(mach_task_self(), source.value(), len as u64, destination.value(), &mut copied)
        };
        if result == KERN_SUCCESS {
            Ok(())
        } else {
            debug!(%source, %destination, len, code = result, "mach_vm_read_overwrite failed");
            Err(AccessFault {
                address: Some(source),
                copied: 0,
            })
        }
    }
}

impl ProcessHost for MachHost
{
    type Thread = MachThread;
    type ProcessHandle = MachProcessHandle;
    type ThreadHandle = MachThreadHandle;
    type SavedContext = MachSavedContext;

    fn capabilities(&self) -> &CapabilityTable
    {
        self.capabilities.get_or_resolve(Self::probe)
    }

    fn lookup_process(&self, pid: ProcessId) -> Option<Arc<MachProcess>>
    {
        match MachProcess::open(pid) {
            Ok(process) => Some(Arc::new(process)),
            Err(err) => {
                debug!(%pid, "process lookup failed: {err}");
                None
            }
        }
    }

    fn lookup_thread(&self, tid: ThreadId) -> Option<Arc<MachThread>>
    {
        let (pid, index) = decode_tid(tid);
        let process = Arc::new(MachProcess::open(pid).ok()?);
        Self::thread_at(process, index).ok().map(Arc::new)
    }

    fn open_process(&self, pid: ProcessId, access: AccessMask) -> Result<MachProcessHandle>
    {
        Ok(MachProcessHandle {
            process: Arc::new(MachProcess::open(pid)?),
            access,
        })
    }

    fn open_thread(&self, tid: ThreadId, access: AccessMask) -> Result<MachThreadHandle>
    {
        let (pid, index) = decode_tid(tid);
        let process = Arc::new(MachProcess::open(pid)?);
        Ok(MachThreadHandle {
            thread: Arc::new(Self::thread_at(process, index)?),
            access,
            worker: None,
        })
    }

    fn terminate_process(&self, handle: &MachProcessHandle, exit_status: i32) -> Result<()>
    {
        handle.check(AccessMask::TERMINATE)?;
        // Mach has no way to choose the exit status.
        debug!(pid = %handle.process.pid(), exit_status, "task_terminate");
        // SAFETY: the handle holds a live task port.
        check(unsafe { ffi::task_terminate(handle.process.task) })?;
        Ok(())
    }

    fn suspend_process(&self, process: &MachProcess) -> Result<()>
    {
        // SAFETY: live task port.
        check(unsafe { task_suspend(process.task) })?;
        Ok(())
    }

    fn resume_process(&self, process: &MachProcess) -> Result<()>
    {
        // SAFETY: live task port.
        check(unsafe { task_resume(process.task) })?;
        Ok(())
    }

    fn attach_process(&self, _process: &MachProcess) -> Result<MachSavedContext>
    {
        Err(CrossmemError::NotImplemented(Capability::AttachProcess.name()))
    }

    fn detach_process(&self, saved: MachSavedContext)
    {
        match saved {}
    }

    fn get_context_thread(&self, thread: &MachThread, context: &mut ThreadContext, _mode: ProcessorMode) -> Result<()>
    {
        let current = read_context(thread.port)?;
        context.apply_from(&current);
        Ok(())
    }

    fn set_context_thread(&self, thread: &MachThread, context: &ThreadContext, mode: ProcessorMode) -> Result<()>
    {
        if mode == ProcessorMode::Unprivileged && context.flags.contains(ContextFlags::CONTROL) {
            let classifier = self.classifier();
            for register in [context.pc, context.sp] {
                if classifier.is_privileged(register) {
                    return Err(HostError::AccessDenied(register).into());
                }
            }
        }
        write_context(thread.port, context)
    }

    fn create_user_thread(
        &self,
        process: &MachProcessHandle,
        start: Address,
        argument: u64,
        create_suspended: bool,
    ) -> Result<(MachThreadHandle, ClientId)>
    {
        let task = process.process.task;

        let mut stack: u64 = 0;
        // SAFETY: out-pointer is valid; live task port.
        check(unsafe { mach_vm_allocate(task, &mut stack, USER_STACK_SIZE, VM_FLAGS_ANYWHERE) })?;
        let stack_top = Address::new(stack + USER_STACK_SIZE - 16);

        let mut port: thread_act_t = 0;
        // SAFETY: out-pointer is valid; live task port.
        if let Err(err) = check(unsafe { ffi::thread_create(task, &mut port) }) {
            // SAFETY: `stack` was allocated above.
            unsafe {
                let _ = mach_vm_deallocate(task, stack, USER_STACK_SIZE);
            }
            return Err(err.into());
        }
        prime_thread(port, start, argument, stack_top)?;
        if !create_suspended {
            // SAFETY: `port` is the thread just created.
            check(unsafe { ffi::thread_resume(port) })?;
        }

        let tid = encode_tid(process.process.pid(), Self::index_of(&process.process, port));
        let client = ClientId {
            process: process.process.pid(),
            thread: tid,
        };
        let thread = MachThread {
            process: Arc::clone(&process.process),
            port,
            tid,
        };
        Ok((
            MachThreadHandle {
                thread: Arc::new(thread),
                access: AccessMask::ALL,
                worker: None,
            },
            client,
        ))
    }

    fn create_system_thread(
        &self,
        process: Option<&MachProcessHandle>,
        routine: SystemThreadRoutine,
    ) -> Result<(MachThreadHandle, ClientId)>
    {
        if process.is_some() {
            return Err(CrossmemError::NotImplemented("create_system_thread in a foreign task"));
        }

        let (sender, receiver) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("crossmem-system".into())
            .spawn(move || {
                // SAFETY: no preconditions; the right is released by MachThread's drop.
                let _ = sender.send(unsafe { ffi::mach_thread_self() });
                routine();
            })?;
        let port = receiver
            .recv()
            .map_err(|_| HostError::Native {
                operation: "mach_thread_self",
                code: -1,
            })?;

        let own = Arc::new(MachProcess::open(own_pid())?);
        let tid = encode_tid(own.pid(), Self::index_of(&own, port));
        let client = ClientId {
            process: own.pid(),
            thread: tid,
        };
        let thread = MachThread {
            process: own,
            port,
            tid,
        };
        Ok((
            MachThreadHandle {
                thread: Arc::new(thread),
                access: AccessMask::ALL,
                worker: Some(worker),
            },
            client,
        ))
    }

    fn query_information_thread(&self, thread: &MachThreadHandle, class: u32, buffer: &mut [u8]) -> Result<usize>
    {
        thread.check(AccessMask::QUERY)?;
        if class != info_class::BASIC {
            return Err(HostError::BadInformationClass {
                class,
                reason: "unknown class",
            }
            .into());
        }
        let mut info = ffi::ThreadBasicInfo::default();
        let mut count = ffi::THREAD_BASIC_INFO_COUNT;
        // SAFETY: `info` is a repr(C) mirror `count` words long.
        check(unsafe {
            ffi::thread_info(
                thread.thread.port,
                ffi::THREAD_BASIC_INFO,
                (&mut info as *mut ffi::ThreadBasicInfo).cast::<natural_t>(),
                &mut count,
            )
        })?;

        let mut record = Vec::with_capacity(info_class::THREAD_BASIC_LEN);
        record.extend_from_slice(&thread.thread.tid.raw().to_le_bytes());
        record.extend_from_slice(&thread.thread.process.pid().0.to_le_bytes());
        record.extend_from_slice(&(info.suspend_count.max(0) as u32).to_le_bytes());
        write_info_record(class, &record, buffer)
    }

    fn set_information_thread(&self, thread: &MachThreadHandle, class: u32, _buffer: &[u8]) -> Result<()>
    {
        thread.check(AccessMask::SET_INFORMATION)?;
        Err(HostError::BadInformationClass {
            class,
            reason: "no settable classes on this host",
        }
        .into())
    }

    fn query_information_process(&self, process: &MachProcessHandle, class: u32, buffer: &mut [u8]) -> Result<usize>
    {
        process.check(AccessMask::QUERY)?;
        if class != info_class::BASIC {
            return Err(HostError::BadInformationClass {
                class,
                reason: "unknown class",
            }
            .into());
        }
        let mut info = ffi::MachTaskBasicInfo::default();
        let mut count = ffi::MACH_TASK_BASIC_INFO_COUNT;
        // SAFETY: `info` is a repr(C) mirror `count` words long.
        check(unsafe {
            ffi::task_info(
                process.process.task,
                ffi::MACH_TASK_BASIC_INFO,
                (&mut info as *mut ffi::MachTaskBasicInfo).cast::<natural_t>(),
                &mut count,
            )
        })?;
        let ports = process.process.thread_ports()?;
        let threads = ports.len() as u32;
        release_ports(ports);
        let suspend_count = info.suspend_count;

        let mut record = Vec::with_capacity(info_class::PROCESS_BASIC_LEN);
        record.extend_from_slice(&info_class::STILL_ACTIVE.to_le_bytes());
        record.extend_from_slice(&(suspend_count.max(0) as u32).to_le_bytes());
        record.extend_from_slice(&process.process.pid().0.to_le_bytes());
        record.extend_from_slice(&threads.to_le_bytes());
        write_info_record(class, &record, buffer)
    }

    fn set_information_process(&self, process: &MachProcessHandle, class: u32, _buffer: &[u8]) -> Result<()>
    {
        process.check(AccessMask::SET_INFORMATION)?;
        Err(HostError::BadInformationClass {
            class,
            reason: "no settable classes on this host",
        }
        .into())
    }

    fn allocate_virtual_memory(&self, process: &MachProcessHandle, size: usize, protection: Protection) -> Result<Address>
    {
        process.check(AccessMask::VM_OPERATION)?;
        if size == 0 {
            return Err(CrossmemError::invalid(Parameter::Size));
        }
        let task = process.process.task;
        let mut address: u64 = 0;
        // SAFETY: out-pointer is valid; live task port.
        check(unsafe { mach_vm_allocate(task, &mut address, size as u64, VM_FLAGS_ANYWHERE) })?;
        if protection == Protection::ReadOnly {
            // SAFETY: the range was just allocated in `task`.
            check(unsafe { mach_vm_protect(task, address, size as u64, 0, VM_PROT_READ) })?;
        }
        lock(&self.allocations).insert((process.process.pid(), address), size as u64);
        Ok(Address::new(address))
    }

    fn free_virtual_memory(&self, process: &MachProcessHandle, base: Address) -> Result<()>
    {
        process.check(AccessMask::VM_OPERATION)?;
        let size = lock(&self.allocations)
            .remove(&(process.process.pid(), base.value()))
            .ok_or(HostError::Unmapped(base))?;
        // SAFETY: the range was allocated by `allocate_virtual_memory`.
        check(unsafe { mach_vm_deallocate(process.process.task, base.value(), size) })?;
        Ok(())
    }
}
