//! Process and thread identifiers.

use std::fmt;

/// Process identifier (PID)
///
/// Using a newtype instead of a raw `u32` keeps a PID from being passed where
/// a thread id or an exit status is expected.
///
/// ## Example
///
/// ```rust
/// use crossmem_core::types::ProcessId;
///
/// let pid = ProcessId::from(4242);
/// assert_eq!(u32::from(pid), 4242);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier
///
/// Stored as a `u64` so every host can fit its native representation
/// (a Mach thread port, a kernel TID, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Get the raw `u64` representation of the thread identifier
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Process/thread pair returned by thread creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId
{
    /// Owning process
    pub process: ProcessId,
    /// The new thread
    pub thread: ThreadId,
}

/// Requested rights when opening a process handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessMask(pub u32);

impl AccessMask
{
    /// Query limited information only.
    pub const QUERY: Self = AccessMask(0x0400);
    /// Terminate the process.
    pub const TERMINATE: Self = AccessMask(0x0001);
    /// Read and write process memory.
    pub const VM_OPERATION: Self = AccessMask(0x0008 | 0x0010 | 0x0020);
    /// Suspend and resume.
    pub const SUSPEND_RESUME: Self = AccessMask(0x0800);
    /// Change process or thread information.
    pub const SET_INFORMATION: Self = AccessMask(0x0200);
    /// Everything.
    pub const ALL: Self = AccessMask(0x001f_ffff);

    /// Whether every right in `other` is also in `self`.
    pub const fn contains(self, other: AccessMask) -> bool
    {
        self.0 & other.0 == other.0
    }
}

impl Default for AccessMask
{
    fn default() -> Self
    {
        Self::ALL
    }
}

/// Mode the caller claims to run in when touching thread context.
///
/// Context reads on behalf of an unprivileged caller are probed against that
/// caller's address space; privileged callers are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessorMode
{
    /// The agent itself
    #[default]
    Privileged,
    /// Forwarded from an unprivileged caller
    Unprivileged,
}
