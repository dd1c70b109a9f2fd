//! The simulated host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::capability::{CapabilityTable, LazyCapabilities};
use crate::classify::AddressClassifier;
use crate::error::{AccessFault, CrossmemError, HostError, HostResult, Parameter, Result};
use crate::host::{MappedView, MemoryHost, SecureToken};
use crate::process::{info_class, write_info_record, ProcessHost, SystemThreadRoutine};
use crate::types::{
    AccessIntent, AccessMask, Address, AddressSpace, CacheMode, ClientId, ContextFlags, MemoryRegion, ProcessId,
    ProcessorMode, Protection, ThreadContext, ThreadId,
};

use super::config::SimConfig;
use super::fault::{FailPoint, FaultPlan};
use super::memory::{PageProtection, SimRegion};
use super::process::{lock, HandleCount, SimProcess, SimProcessHandle, SimSavedContext, SimThread, SimThreadHandle};

/// General-purpose registers in a simulated context.
pub const GENERAL_REGISTERS: usize = 16;

/// Pid given to threads created without an owning process.
pub const SYSTEM_PID: ProcessId = ProcessId(0);

struct PinRecord
{
    base: Address,
    size: usize,
    // None for pins in the agent's own space
    region: Option<Arc<SimRegion>>,
}

#[derive(Default)]
struct PinTable
{
    records: HashMap<u64, PinRecord>,
    bytes: usize,
}

struct MapRecord
{
    pin: u64,
    alias: Address,
    size: usize,
    region: Option<Arc<SimRegion>>,
}

#[derive(Debug, Default)]
struct Counters
{
    secure_calls: AtomicUsize,
    map_calls: AtomicUsize,
    copy_calls: AtomicUsize,
    ordering_violations: AtomicUsize,
    capability_probes: AtomicUsize,
}

/// In-process host with simulated processes, resource accounting and fault
/// injection.
///
/// Foreign regions are real heap allocations, so mapped views are real
/// pointers. Local pins and maps are bookkeeping only: a local mapping aliases
/// the buffer itself.
///
/// ## Example
///
/// ```rust
/// use crossmem_core::sim::{FailPoint, SimHost};
/// use crossmem_core::transfer::ProcessMemory;
/// use crossmem_core::types::Address;
///
/// let host = SimHost::new();
/// let process = host.spawn_process(7);
/// process.add_region(Address::new(0x1000), 0x1000)?;
///
/// host.fail_next(FailPoint::Map);
/// let mut buffer = [0u8; 4];
/// let err = ProcessMemory::new(&host)
///     .read(&process, Address::new(0x1000), &mut buffer)
///     .unwrap_err();
/// assert!(matches!(err, crossmem_core::CrossmemError::NotMappedView(_)));
/// assert_eq!(host.live_pins(), 0);
/// assert_eq!(host.live_maps(), 0);
/// # Ok::<(), crossmem_core::CrossmemError>(())
/// ```
pub struct SimHost
{
    config: SimConfig,
    classifier: AddressClassifier,
    processes: Mutex<HashMap<ProcessId, Arc<SimProcess>>>,
    threads: Mutex<HashMap<ThreadId, Arc<SimThread>>>,
    pins: Mutex<PinTable>,
    maps: Mutex<HashMap<u64, MapRecord>>,
    next_token: AtomicU64,
    next_tid: AtomicU64,
    counters: Counters,
    faults: FaultPlan,
    capabilities: LazyCapabilities,
    attached: Mutex<Vec<ProcessId>>,
    open_handles: Arc<AtomicUsize>,
}

impl Default for SimHost
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl SimHost
{
    /// Host with [`SimConfig::default`].
    pub fn new() -> Self
    {
        Self::with_config(SimConfig::default())
    }

    /// Host with the given limits and capabilities.
    pub fn with_config(config: SimConfig) -> Self
    {
        Self {
            classifier: AddressClassifier::with_user_limit(config.user_limit),
            config,
            processes: Mutex::new(HashMap::new()),
            threads: Mutex::new(HashMap::new()),
            pins: Mutex::new(PinTable::default()),
            maps: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            next_tid: AtomicU64::new(1),
            counters: Counters::default(),
            faults: FaultPlan::default(),
            capabilities: LazyCapabilities::new(),
            attached: Mutex::new(Vec::new()),
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The configuration this host was built with.
    pub fn config(&self) -> &SimConfig
    {
        &self.config
    }

    /// Create a process with one (main) thread and no regions.
    ///
    /// Replaces any process already registered under `pid`.
    pub fn spawn_process(&self, pid: u32) -> Arc<SimProcess>
    {
        let pid = ProcessId(pid);
        let process = Arc::new(SimProcess::new(pid));
        let context = ThreadContext {
            general: vec![0; GENERAL_REGISTERS],
            ..ThreadContext::default()
        };
        self.register_thread(Some(&process), context, false);
        lock(&self.processes).insert(pid, Arc::clone(&process));
        debug!(%pid, "spawned simulated process");
        process
    }

    fn register_thread(&self, process: Option<&Arc<SimProcess>>, context: ThreadContext, suspended: bool) -> Arc<SimThread>
    {
        let tid = ThreadId(self.next_tid.fetch_add(1, Ordering::Relaxed));
        let pid = process.map_or(SYSTEM_PID, |p| p.pid());
        let thread = Arc::new(SimThread::new(tid, pid, context, suspended));
        if let Some(process) = process {
            process.add_thread(tid);
        }
        lock(&self.threads).insert(tid, Arc::clone(&thread));
        thread
    }

    fn thread_handle(&self, thread: Arc<SimThread>, access: AccessMask, worker: Option<std::thread::JoinHandle<()>>) -> SimThreadHandle
    {
        SimThreadHandle {
            thread,
            access,
            worker,
            _open: HandleCount::open(&self.open_handles),
        }
    }

    fn token(&self) -> u64
    {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Fail the next call at `point`.
    pub fn fail_next(&self, point: FailPoint)
    {
        self.faults.arm(point, 0);
    }

    /// Let `skip` calls at `point` through, then fail one.
    pub fn fail_nth(&self, point: FailPoint, skip: usize)
    {
        self.faults.arm(point, skip);
    }

    /// Drop every armed failure.
    pub fn clear_faults(&self)
    {
        self.faults.clear();
    }

    /// Pins currently held.
    pub fn live_pins(&self) -> usize
    {
        lock(&self.pins).records.len()
    }

    /// Bytes currently pinned.
    pub fn pinned_bytes(&self) -> usize
    {
        lock(&self.pins).bytes
    }

    /// Mappings currently live.
    pub fn live_maps(&self) -> usize
    {
        lock(&self.maps).len()
    }

    /// Calls to `secure` so far, including failed ones.
    pub fn secure_calls(&self) -> usize
    {
        self.counters.secure_calls.load(Ordering::Acquire)
    }

    /// Calls to `map` so far, including failed ones.
    pub fn map_calls(&self) -> usize
    {
        self.counters.map_calls.load(Ordering::Acquire)
    }

    /// Calls to `guarded_copy` so far.
    pub fn copy_calls(&self) -> usize
    {
        self.counters.copy_calls.load(Ordering::Acquire)
    }

    /// Releases that broke the pin/map contract: an unsecure with live
    /// mappings on the pin, or a release of an unknown token.
    pub fn ordering_violations(&self) -> usize
    {
        self.counters.ordering_violations.load(Ordering::Acquire)
    }

    /// Times the capability probe ran.
    pub fn capability_probes(&self) -> usize
    {
        self.counters.capability_probes.load(Ordering::Acquire)
    }

    /// Process and thread handles currently open.
    pub fn open_handles(&self) -> usize
    {
        self.open_handles.load(Ordering::Acquire)
    }

    /// The innermost attached process, if any.
    pub fn attached_process(&self) -> Option<ProcessId>
    {
        lock(&self.attached).last().copied()
    }

    fn violation(&self, what: &str)
    {
        self.counters.ordering_violations.fetch_add(1, Ordering::AcqRel);
        warn!("release contract violated: {what}");
    }

    fn live_process(process: &SimProcess) -> Result<()>
    {
        if process.has_exited() {
            Err(HostError::ProcessGone.into())
        } else {
            Ok(())
        }
    }

    // Region of a live mapping that fully covers the range, if any.
    fn mapped_region(&self, address: Address, len: usize) -> Option<Option<Arc<SimRegion>>>
    {
        let end = address.checked_add(len as u64)?;
        lock(&self.maps)
            .values()
            .find(|m| address >= m.alias && end <= m.alias + m.size as u64)
            .map(|m| m.region.clone())
    }
}

impl MemoryHost for SimHost
{
    type Process = SimProcess;

    fn classifier(&self) -> AddressClassifier
    {
        self.classifier
    }

    fn secure(&self, region: &MemoryRegion<'_, SimProcess>, protection: Protection) -> HostResult<SecureToken>
    {
        self.counters.secure_calls.fetch_add(1, Ordering::AcqRel);
        let base = region.base();
        let size = region.size();

        if self.faults.trip(FailPoint::Secure) {
            return Err(HostError::Unmapped(base));
        }

        let backing = match region.space() {
            AddressSpace::Local => None,
            AddressSpace::Foreign(process) => {
                if process.has_exited() {
                    return Err(HostError::ProcessGone);
                }
                let backing = process
                    .region_at(base, size)
                    .ok_or_else(|| HostError::Unmapped(process.unmapped_at(base)))?;
                let pages = backing.protection();
                if !pages.readable() || (protection.allows_write() && !pages.writable()) {
                    return Err(HostError::Protected(base));
                }
                Some(backing)
            }
        };

        let mut pins = lock(&self.pins);
        let available = self.config.pin_quota_bytes.saturating_sub(pins.bytes);
        if size > available {
            return Err(HostError::QuotaExceeded {
                requested: size,
                available,
            });
        }
        let token = self.token();
        pins.records.insert(
            token,
            PinRecord {
                base,
                size,
                region: backing,
            },
        );
        pins.bytes += size;
        Ok(SecureToken::new(token))
    }

    fn unsecure(&self, region: &MemoryRegion<'_, SimProcess>, token: SecureToken)
    {
        let dependants = lock(&self.maps).values().filter(|m| m.pin == token.raw()).count();
        if dependants > 0 {
            self.violation("unsecure with live mappings");
        }

        let removed = {
            let mut pins = lock(&self.pins);
            let removed = pins.records.remove(&token.raw());
            if let Some(record) = &removed {
                pins.bytes -= record.size;
            }
            removed
        };
        match removed {
            Some(record) if record.base != region.base() => self.violation("unsecure with a different region"),
            Some(_) => {}
            None => self.violation("unsecure of an unknown token"),
        }
    }

    fn map(
        &self,
        region: &MemoryRegion<'_, SimProcess>,
        token: SecureToken,
        size: usize,
        intent: AccessIntent,
        _cache: CacheMode,
    ) -> HostResult<MappedView>
    {
        self.counters.map_calls.fetch_add(1, Ordering::AcqRel);
        let base = region.base();

        if self.faults.trip(FailPoint::Map) {
            return Err(HostError::NoWindow(size));
        }

        let (pinned_base, pinned_size, backing) = lock(&self.pins)
            .records
            .get(&token.raw())
            .map(|p| (p.base, p.size, p.region.clone()))
            .ok_or(HostError::StaleHandle)?;
        if pinned_base != base {
            return Err(HostError::StaleHandle);
        }
        if size > pinned_size {
            return Err(HostError::OutOfRange {
                requested: size,
                secured: pinned_size,
            });
        }
        if size > self.config.max_map_window {
            return Err(HostError::NoWindow(size));
        }

        let alias = match &backing {
            Some(pages) => {
                let protection = pages.protection();
                if !protection.readable() || (intent.writable() && !protection.writable()) {
                    return Err(HostError::AccessDenied(base));
                }
                pages.alias_of(base)
            }
            None => base,
        };

        let id = self.token();
        lock(&self.maps).insert(
            id,
            MapRecord {
                pin: token.raw(),
                alias,
                size,
                region: backing,
            },
        );
        Ok(MappedView {
            token: id,
            base: alias,
            size,
        })
    }

    fn unmap(&self, view: MappedView)
    {
        if lock(&self.maps).remove(&view.token).is_none() {
            self.violation("unmap of an unknown view");
        }
    }

    unsafe fn guarded_copy(&self, destination: Address, source: Address, len: usize) -> std::result::Result<(), AccessFault>
    {
        self.counters.copy_calls.fetch_add(1, Ordering::AcqRel);

        // Page state is checked at copy time, so a protection change racing
        // with a live mapping surfaces here as a fault.
        if let Some(Some(pages)) = self.mapped_region(source, len) {
            if !pages.protection().readable() {
                return Err(AccessFault {
                    address: Some(source),
                    copied: 0,
                });
            }
        }
        if let Some(Some(pages)) = self.mapped_region(destination, len) {
            if !pages.protection().writable() {
                return Err(AccessFault {
                    address: Some(destination),
                    copied: 0,
                });
            }
        }

        if self.faults.trip(FailPoint::Copy) {
            let copied = len / 2;
            // SAFETY: the caller guarantees both ranges are live for `len` bytes.
            unsafe { std::ptr::copy(source.as_mut_ptr(), destination.as_mut_ptr(), copied) };
            return Err(AccessFault {
                address: Some(source + copied as u64),
                copied,
            });
        }

        // SAFETY: the caller guarantees both ranges are live for `len` bytes.
        unsafe { std::ptr::copy(source.as_mut_ptr(), destination.as_mut_ptr(), len) };
        Ok(())
    }
}

impl ProcessHost for SimHost
{
    type Thread = SimThread;
    type ProcessHandle = SimProcessHandle;
    type ThreadHandle = SimThreadHandle;
    type SavedContext = SimSavedContext;

    fn capabilities(&self) -> &CapabilityTable
    {
        self.capabilities.get_or_resolve(|capability| {
            self.counters.capability_probes.fetch_add(1, Ordering::AcqRel);
            self.config.capabilities.is_available(capability)
        })
    }

    fn lookup_process(&self, pid: ProcessId) -> Option<Arc<SimProcess>>
    {
        lock(&self.processes).get(&pid).cloned()
    }

    fn lookup_thread(&self, tid: ThreadId) -> Option<Arc<SimThread>>
    {
        lock(&self.threads).get(&tid).cloned()
    }

    fn open_process(&self, pid: ProcessId, access: AccessMask) -> Result<SimProcessHandle>
    {
        let process = self.lookup_process(pid).ok_or(CrossmemError::ProcessNotFound(pid.0))?;
        Ok(SimProcessHandle {
            process,
            access,
            _open: HandleCount::open(&self.open_handles),
        })
    }

    fn open_thread(&self, tid: ThreadId, access: AccessMask) -> Result<SimThreadHandle>
    {
        let thread = self.lookup_thread(tid).ok_or(CrossmemError::ThreadNotFound(tid.0))?;
        Ok(self.thread_handle(thread, access, None))
    }

    fn terminate_process(&self, handle: &SimProcessHandle, exit_status: i32) -> Result<()>
    {
        handle.check(AccessMask::TERMINATE)?;
        let process = &handle.process;
        Self::live_process(process)?;
        process.exit(exit_status);

        let pid = process.pid();
        lock(&self.processes).remove(&pid);
        let mut threads = lock(&self.threads);
        for tid in process.threads() {
            threads.remove(&tid);
        }
        info!(%pid, exit_status, "simulated process terminated");
        Ok(())
    }

    fn suspend_process(&self, process: &SimProcess) -> Result<()>
    {
        Self::live_process(process)?;
        let count = process.suspend();
        for tid in process.threads() {
            if let Some(thread) = self.lookup_thread(tid) {
                thread.adjust_suspend(true);
            }
        }
        debug!(pid = %process.pid(), count, "suspended");
        Ok(())
    }

    fn resume_process(&self, process: &SimProcess) -> Result<()>
    {
        Self::live_process(process)?;
        let count = process.resume();
        for tid in process.threads() {
            if let Some(thread) = self.lookup_thread(tid) {
                thread.adjust_suspend(false);
            }
        }
        debug!(pid = %process.pid(), count, "resumed");
        Ok(())
    }

    fn attach_process(&self, process: &SimProcess) -> Result<SimSavedContext>
    {
        Self::live_process(process)?;
        let mut attached = lock(&self.attached);
        let depth = attached.len();
        attached.push(process.pid());
        Ok(SimSavedContext {
            depth,
            pid: process.pid(),
        })
    }

    fn detach_process(&self, saved: SimSavedContext)
    {
        let mut attached = lock(&self.attached);
        if attached.len() != saved.depth + 1 {
            drop(attached);
            self.violation("detach out of order");
            lock(&self.attached).truncate(saved.depth);
            return;
        }
        attached.truncate(saved.depth);
    }

    fn get_context_thread(&self, thread: &SimThread, context: &mut ThreadContext, mode: ProcessorMode) -> Result<()>
    {
        let current = thread.context();
        context.apply_from(&current);
        debug!(tid = %thread.tid(), ?mode, flags = context.flags.0, "read thread context");
        Ok(())
    }

    fn set_context_thread(&self, thread: &SimThread, context: &ThreadContext, mode: ProcessorMode) -> Result<()>
    {
        // An unprivileged caller may not point a thread into privileged memory.
        if mode == ProcessorMode::Unprivileged && context.flags.contains(ContextFlags::CONTROL) {
            for register in [context.pc, context.sp] {
                if self.classifier.is_privileged(register) {
                    return Err(HostError::AccessDenied(register).into());
                }
            }
        }
        context.store_into(&mut thread.context_mut());
        debug!(tid = %thread.tid(), ?mode, flags = context.flags.0, "wrote thread context");
        Ok(())
    }

    fn create_user_thread(
        &self,
        process: &SimProcessHandle,
        start: Address,
        argument: u64,
        create_suspended: bool,
    ) -> Result<(SimThreadHandle, ClientId)>
    {
        Self::live_process(&process.process)?;
        let mut general = vec![0; GENERAL_REGISTERS];
        general[0] = argument;
        let context = ThreadContext {
            pc: start,
            general,
            ..ThreadContext::default()
        };
        let thread = self.register_thread(Some(&process.process), context, create_suspended);
        let client = ClientId {
            process: thread.pid(),
            thread: thread.tid(),
        };
        Ok((self.thread_handle(thread, AccessMask::ALL, None), client))
    }

    fn create_system_thread(
        &self,
        process: Option<&SimProcessHandle>,
        routine: SystemThreadRoutine,
    ) -> Result<(SimThreadHandle, ClientId)>
    {
        let owner = process.map(|handle| &handle.process);
        if let Some(owner) = owner {
            Self::live_process(owner)?;
        }
        let thread = self.register_thread(owner, ThreadContext::default(), false);
        let worker = std::thread::Builder::new()
            .name(format!("crossmem-system-{}", thread.tid()))
            .spawn(routine)?;
        let client = ClientId {
            process: thread.pid(),
            thread: thread.tid(),
        };
        Ok((self.thread_handle(thread, AccessMask::ALL, Some(worker)), client))
    }

    fn query_information_thread(&self, thread: &SimThreadHandle, class: u32, buffer: &mut [u8]) -> Result<usize>
    {
        thread.check(AccessMask::QUERY)?;
        let record = match class {
            info_class::BASIC => {
                let thread = &thread.thread;
                let mut record = Vec::with_capacity(info_class::THREAD_BASIC_LEN);
                record.extend_from_slice(&thread.tid().raw().to_le_bytes());
                record.extend_from_slice(&thread.pid().0.to_le_bytes());
                record.extend_from_slice(&thread.suspend_count().to_le_bytes());
                record
            }
            other => thread.thread.info(other).ok_or(HostError::BadInformationClass {
                class,
                reason: "unknown class",
            })?,
        };
        write_info_record(class, &record, buffer)
    }

    fn set_information_thread(&self, thread: &SimThreadHandle, class: u32, buffer: &[u8]) -> Result<()>
    {
        thread.check(AccessMask::SET_INFORMATION)?;
        if class == info_class::BASIC {
            return Err(HostError::BadInformationClass {
                class,
                reason: "class is read-only",
            }
            .into());
        }
        thread.thread.set_info(class, buffer);
        Ok(())
    }

    fn query_information_process(&self, process: &SimProcessHandle, class: u32, buffer: &mut [u8]) -> Result<usize>
    {
        process.check(AccessMask::QUERY)?;
        let record = match class {
            info_class::BASIC => {
                let process = &process.process;
                let exit = process.exit_status().unwrap_or(info_class::STILL_ACTIVE);
                let threads = u32::try_from(process.threads().len()).unwrap_or(u32::MAX);
                let mut record = Vec::with_capacity(info_class::PROCESS_BASIC_LEN);
                record.extend_from_slice(&exit.to_le_bytes());
                record.extend_from_slice(&process.suspend_count().to_le_bytes());
                record.extend_from_slice(&process.pid().0.to_le_bytes());
                record.extend_from_slice(&threads.to_le_bytes());
                record
            }
            other => process.process.info(other).ok_or(HostError::BadInformationClass {
                class,
                reason: "unknown class",
            })?,
        };
        write_info_record(class, &record, buffer)
    }

    fn set_information_process(&self, process: &SimProcessHandle, class: u32, buffer: &[u8]) -> Result<()>
    {
        process.check(AccessMask::SET_INFORMATION)?;
        if class == info_class::BASIC {
            return Err(HostError::BadInformationClass {
                class,
                reason: "class is read-only",
            }
            .into());
        }
        process.process.set_info(class, buffer);
        Ok(())
    }

    fn allocate_virtual_memory(&self, process: &SimProcessHandle, size: usize, protection: Protection) -> Result<Address>
    {
        process.check(AccessMask::VM_OPERATION)?;
        Self::live_process(&process.process)?;
        if size == 0 {
            return Err(CrossmemError::invalid(Parameter::Size));
        }
        let page = self.config.page_size;
        let len = size
            .checked_next_multiple_of(page)
            .ok_or_else(|| CrossmemError::invalid(Parameter::Size))?;

        // One unmapped guard page between allocations.
        let reserved = len
            .checked_add(page)
            .ok_or_else(|| CrossmemError::invalid(Parameter::Size))?;
        let base = process.process.reserve(reserved as u64);
        let pages = match protection {
            Protection::ReadOnly => PageProtection::ReadOnly,
            Protection::ReadWrite => PageProtection::ReadWrite,
        };
        process.process.add_region_with(base, len, pages)?;
        debug!(pid = %process.process.pid(), %base, len, "allocated virtual memory");
        Ok(base)
    }

    fn free_virtual_memory(&self, process: &SimProcessHandle, base: Address) -> Result<()>
    {
        process.check(AccessMask::VM_OPERATION)?;
        process.process.remove_region(base)?;
        debug!(pid = %process.process.pid(), %base, "freed virtual memory");
        Ok(())
    }
}
