//! Thread register context.

use super::Address;

/// Which parts of a [`ThreadContext`] a get/set call touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextFlags(pub u32);

impl ContextFlags
{
    /// Program counter, stack pointer, frame pointer and status
    pub const CONTROL: Self = ContextFlags(0x1);
    /// General-purpose registers
    pub const INTEGER: Self = ContextFlags(0x2);
    /// Everything above
    pub const FULL: Self = ContextFlags(0x3);

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: ContextFlags) -> bool
    {
        self.0 & other.0 == other.0
    }
}

impl Default for ContextFlags
{
    fn default() -> Self
    {
        Self::FULL
    }
}

/// Register snapshot of one thread.
///
/// `flags` selects which fields a get fills in or a set applies; the rest are
/// left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadContext
{
    /// Parts of the context in use
    pub flags: ContextFlags,
    /// Program counter
    pub pc: Address,
    /// Stack pointer
    pub sp: Address,
    /// Frame pointer
    pub fp: Address,
    /// General-purpose registers (architecture-specific count)
    pub general: Vec<u64>,
    /// Status/flags register
    pub status: u64,
}

impl ThreadContext
{
    /// Empty context requesting `flags`.
    pub fn with_flags(flags: ContextFlags) -> Self
    {
        Self {
            flags,
            ..Self::default()
        }
    }

    /// Copy the parts selected by `self.flags` from `source`.
    pub fn apply_from(&mut self, source: &ThreadContext)
    {
        copy_parts(self.flags, source, self);
    }

    /// Copy the parts selected by `self.flags` into `target`, leaving the
    /// rest of `target` as it was.
    pub fn store_into(&self, target: &mut ThreadContext)
    {
        copy_parts(self.flags, self, target);
    }
}

fn copy_parts(flags: ContextFlags, from: &ThreadContext, to: &mut ThreadContext)
{
    if flags.contains(ContextFlags::CONTROL) {
        to.pc = from.pc;
        to.sp = from.sp;
        to.fp = from.fp;
        to.status = from.status;
    }
    if flags.contains(ContextFlags::INTEGER) {
        to.general.clone_from(&from.general);
    }
}
