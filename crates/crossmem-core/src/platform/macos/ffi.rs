//! # macOS Mach API FFI Declarations
//!
//! `extern "C"` declarations for the Mach calls the `mach2` crate does not
//! provide (restricted task/thread calls and memory-entry mapping).
//!
//! ## Safety Notes
//!
//! Everything here talks directly to the kernel. Callers pass ports they own
//! and buffers sized for the requested flavor.
//!
//! ## References
//!
//! - [Apple Mach Kernel Programming](https://developer.apple.com/library/archive/documentation/Darwin/Conceptual/KernelProgramming/Mach/Mach.html)
//! - [XNU osfmk/mach/mach_vm.defs](https://github.com/apple-oss-distributions/xnu)

// Allow doc comments in extern blocks - they're useful for developers even if rustdoc doesn't generate docs
#![allow(unused_doc_comments)]

use libc::{c_int, c_uint, kern_return_t, mach_msg_type_number_t, mach_port_t, natural_t, thread_act_t};

/// Share the target's pages instead of copying them when making a memory entry.
pub const MAP_MEM_VM_SHARE: c_int = 0x0040_0000;

/// `MACH_TASK_BASIC_INFO` flavor for `task_info()`.
pub const MACH_TASK_BASIC_INFO: c_int = 20;

/// `THREAD_BASIC_INFO` flavor for `thread_info()`.
pub const THREAD_BASIC_INFO: c_int = 3;

/// Mirror of `time_value_t`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeValue
{
    /// Seconds
    pub seconds: c_int,
    /// Microseconds
    pub microseconds: c_int,
}

/// Mirror of `mach_task_basic_info_data_t`.
#[repr(C, packed(4))]
#[derive(Debug, Default, Clone, Copy)]
pub struct MachTaskBasicInfo
{
    /// Virtual memory size in bytes
    pub virtual_size: u64,
    /// Resident memory size in bytes
    pub resident_size: u64,
    /// Peak resident size in bytes
    pub resident_size_max: u64,
    /// Total user run time of terminated threads
    pub user_time: TimeValue,
    /// Total system run time of terminated threads
    pub system_time: TimeValue,
    /// Default scheduling policy
    pub policy: c_int,
    /// Suspend count for the task
    pub suspend_count: c_int,
}

/// `natural_t` count for [`MachTaskBasicInfo`].
pub const MACH_TASK_BASIC_INFO_COUNT: mach_msg_type_number_t =
    (std::mem::size_of::<MachTaskBasicInfo>() / std::mem::size_of::<natural_t>()) as mach_msg_type_number_t;

/// Mirror of `thread_basic_info_data_t`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadBasicInfo
{
    /// User run time
    pub user_time: TimeValue,
    /// System run time
    pub system_time: TimeValue,
    /// Scaled CPU usage percentage
    pub cpu_usage: c_int,
    /// Scheduling policy in effect
    pub policy: c_int,
    /// Run state
    pub run_state: c_int,
    /// Various flags
    pub flags: c_int,
    /// Suspend count for the thread
    pub suspend_count: c_int,
    /// Seconds the thread has been sleeping
    pub sleep_time: c_int,
}

/// `natural_t` count for [`ThreadBasicInfo`].
pub const THREAD_BASIC_INFO_COUNT: mach_msg_type_number_t =
    (std::mem::size_of::<ThreadBasicInfo>() / std::mem::size_of::<natural_t>()) as mach_msg_type_number_t;

// Task and Process Management Functions
#[link(name = "c", kind = "dylib")]
extern "C" {
    /// Get a Mach port to a process by PID
    ///
    /// Requires root or the `com.apple.security.cs.debugger` entitlement;
    /// otherwise returns `KERN_FAILURE` or `KERN_PROTECTION_FAILURE`.
    pub fn task_for_pid(target_task: mach_port_t, pid: c_int, task: *mut mach_port_t) -> kern_return_t;

    /// Release one user reference on a port name.
    pub fn mach_port_deallocate(target_task: mach_port_t, name: mach_port_t) -> kern_return_t;

    /// Terminate a task and all its threads.
    pub fn task_terminate(target_task: mach_port_t) -> kern_return_t;

    /// Query task information by flavor.
    pub fn task_info(
        target_task: mach_port_t,
        flavor: c_int,
        task_info_out: *mut natural_t,
        task_info_count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;
}

// Thread Functions
#[link(name = "c", kind = "dylib")]
extern "C" {
    /// Read thread state (registers) for a flavor.
    pub fn thread_get_state(
        target_act: thread_act_t,
        flavor: c_int,
        old_state: *mut natural_t,
        old_state_count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;

    /// Write thread state (registers) for a flavor.
    pub fn thread_set_state(
        target_act: thread_act_t,
        flavor: c_int,
        new_state: *const natural_t,
        new_state_count: mach_msg_type_number_t,
    ) -> kern_return_t;

    /// Create a thread in a task. The thread starts suspended.
    pub fn thread_create(parent_task: mach_port_t, child_act: *mut thread_act_t) -> kern_return_t;

    /// Resume a thread.
    pub fn thread_resume(target_act: thread_act_t) -> kern_return_t;

    /// Query thread information by flavor.
    pub fn thread_info(
        target_act: thread_act_t,
        flavor: c_int,
        thread_info_out: *mut natural_t,
        thread_info_count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;

    /// Port for the calling thread.
    pub fn mach_thread_self() -> thread_act_t;
}

// Memory Entry Functions
#[link(name = "c", kind = "dylib")]
extern "C" {
    /// Create a named memory entry for `[offset, offset + *size)` in
    /// `target_task`.
    ///
    /// The entry holds a reference on the backing VM object, so the pages
    /// stay valid for as long as the entry port lives, even if the task
    /// unmaps them. `*size` is rounded to whole pages on return.
    pub fn mach_make_memory_entry_64(
        target_task: mach_port_t,
        size: *mut u64,
        offset: u64,
        permission: c_int,
        object_handle: *mut mach_port_t,
        parent_entry: mach_port_t,
    ) -> kern_return_t;

    /// Map a memory entry into `target_task`.
    pub fn mach_vm_map(
        target_task: mach_port_t,
        address: *mut u64,
        size: u64,
        mask: u64,
        flags: c_int,
        object: mach_port_t,
        offset: u64,
        copy: c_int,
        cur_protection: c_int,
        max_protection: c_int,
        inheritance: c_uint,
    ) -> kern_return_t;
}
