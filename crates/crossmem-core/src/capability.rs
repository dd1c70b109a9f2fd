//! # Optional Host Capabilities
//!
//! Some host primitives are not present on every host version. Each host
//! resolves them once, on first use, into a [`CapabilityTable`] that is
//! read-only afterwards. A missing entry becomes
//! [`CrossmemError::NotImplemented`] at the call site instead of a build or
//! link failure.

use std::fmt;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::error::{CrossmemError, Result};

/// An optional host primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability
{
    /// Suspend every thread of a process
    SuspendProcess,
    /// Resume every thread of a process
    ResumeProcess,
    /// Read a thread's register context
    GetContextThread,
    /// Write a thread's register context
    SetContextThread,
    /// Start a thread inside another process
    CreateUserThread,
    /// Query thread information by class
    QueryInformationThread,
    /// Query process information by class
    QueryInformationProcess,
    /// Switch into another address space
    AttachProcess,
}

impl Capability
{
    /// Number of capabilities.
    pub const COUNT: usize = 8;

    /// Every capability, in table order.
    pub const ALL: [Capability; Self::COUNT] = [
        Capability::SuspendProcess,
        Capability::ResumeProcess,
        Capability::GetContextThread,
        Capability::SetContextThread,
        Capability::CreateUserThread,
        Capability::QueryInformationThread,
        Capability::QueryInformationProcess,
        Capability::AttachProcess,
    ];

    /// Human-readable name used in `NotImplemented` errors.
    pub fn name(self) -> &'static str
    {
        match self {
            Capability::SuspendProcess => "suspend_process",
            Capability::ResumeProcess => "resume_process",
            Capability::GetContextThread => "get_context_thread",
            Capability::SetContextThread => "set_context_thread",
            Capability::CreateUserThread => "create_user_thread",
            Capability::QueryInformationThread => "query_information_thread",
            Capability::QueryInformationProcess => "query_information_process",
            Capability::AttachProcess => "attach_process",
        }
    }

    fn index(self) -> usize
    {
        self as usize
    }
}

impl fmt::Display for Capability
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// Which optional primitives the running host provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityTable
{
    present: [bool; Capability::COUNT],
}

impl CapabilityTable
{
    /// Probe each capability once.
    pub fn resolve<F>(mut probe: F) -> Self
    where
        F: FnMut(Capability) -> bool,
    {
        let mut present = [false; Capability::COUNT];
        for capability in Capability::ALL {
            present[capability.index()] = probe(capability);
            debug!(%capability, present = present[capability.index()], "resolved capability");
        }
        Self { present }
    }

    /// A table with every capability present.
    pub fn all() -> Self
    {
        Self {
            present: [true; Capability::COUNT],
        }
    }

    /// A table with nothing present.
    pub fn none() -> Self
    {
        Self {
            present: [false; Capability::COUNT],
        }
    }

    /// Whether `capability` is present.
    pub fn is_available(&self, capability: Capability) -> bool
    {
        self.present[capability.index()]
    }

    /// `Ok` if present, `NotImplemented` otherwise.
    ///
    /// ## Errors
    ///
    /// - `NotImplemented`: the host does not provide `capability`
    pub fn require(&self, capability: Capability) -> Result<()>
    {
        if self.is_available(capability) {
            Ok(())
        } else {
            Err(CrossmemError::NotImplemented(capability.name()))
        }
    }

    /// Every capability with its availability.
    pub fn iter(&self) -> impl Iterator<Item = (Capability, bool)> + '_
    {
        Capability::ALL.into_iter().map(|c| (c, self.is_available(c)))
    }
}

/// A capability table resolved on first access and cached.
#[derive(Debug, Default)]
pub struct LazyCapabilities
{
    cell: OnceCell<CapabilityTable>,
}

impl LazyCapabilities
{
    /// An unresolved table.
    pub const fn new() -> Self
    {
        Self { cell: OnceCell::new() }
    }

    /// The table, resolving it with `probe` the first time.
    ///
    /// Later calls return the cached table and never run `probe`.
    pub fn get_or_resolve<F>(&self, probe: F) -> &CapabilityTable
    where
        F: FnMut(Capability) -> bool,
    {
        self.cell.get_or_init(|| CapabilityTable::resolve(probe))
    }

    /// The table if it has been resolved.
    pub fn get(&self) -> Option<&CapabilityTable>
    {
        self.cell.get()
    }
}
