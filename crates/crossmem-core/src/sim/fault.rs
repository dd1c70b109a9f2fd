//! Fault injection for the simulated host.

use std::sync::Mutex;

/// Host primitive a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint
{
    /// `MemoryHost::secure` (foreign and local pins alike)
    Secure,
    /// `MemoryHost::map`
    Map,
    /// `MemoryHost::guarded_copy`; copies half the bytes, then faults
    Copy,
}

/// Pending injected failures, consumed in arming order.
#[derive(Debug, Default)]
pub(crate) struct FaultPlan
{
    // (point, calls still to let through before failing)
    pending: Mutex<Vec<(FailPoint, usize)>>,
}

impl FaultPlan
{
    pub(crate) fn arm(&self, point: FailPoint, skip: usize)
    {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push((point, skip));
        }
    }

    /// Record one call at `point`; `true` if it must fail.
    ///
    /// Only the earliest armed entry for `point` sees the call.
    pub(crate) fn trip(&self, point: FailPoint) -> bool
    {
        let Ok(mut pending) = self.pending.lock() else {
            return false;
        };
        let Some(index) = pending.iter().position(|(armed, _)| *armed == point) else {
            return false;
        };
        let skip = &mut pending[index].1;
        if *skip > 0 {
            *skip -= 1;
            return false;
        }
        pending.remove(index);
        true
    }

    pub(crate) fn clear(&self)
    {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

