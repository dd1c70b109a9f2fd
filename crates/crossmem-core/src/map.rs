//! # Region Mapping
//!
//! Turns a secured range into a local alias the copy step can dereference
//! directly. For a foreign range this is the only way its bytes are reached:
//! the agent never dereferences a foreign address itself.
//!
//! The alias is a [`MappedRegion`] guard that borrows the [`SecuredRegion`] it
//! was derived from, so it always goes away before the pin does.

use std::fmt;

use tracing::{debug, warn};

use crate::copy::CopyView;
use crate::error::{CrossmemError, HostError, Result};
use crate::host::{MappedView, MemoryHost};
use crate::secure::SecuredRegion;
use crate::types::{AccessIntent, Address, CacheMode};

/// Map the first `size` bytes of a secured region with the given intent.
///
/// `Read` yields a read-only alias; `Write` and `Modify` yield a writable one.
///
/// ## Errors
///
/// - `NotMappedView`: `size` exceeds the secured range, the handle is stale,
///   no contiguous window is free, or the pages do not allow the intent.
pub fn map_memory<'s, 'a, H>(
    secured: &'s SecuredRegion<'a, H>,
    size: usize,
    intent: AccessIntent,
    cache: CacheMode,
) -> Result<MappedRegion<'s, 'a, H>>
where
    H: MemoryHost + ?Sized,
{
    let region = secured.region();
    if size == 0 || size > region.size() {
        let err = HostError::OutOfRange {
            requested: size,
            secured: region.size(),
        };
        warn!(base = %region.base(), "map rejected: {err}");
        return Err(CrossmemError::NotMappedView(err));
    }

    match secured.host().map(region, secured.token(), size, intent, cache) {
        Ok(view) => {
            debug!(
                source = %region.base(),
                alias = %view.base,
                size,
                ?intent,
                ?cache,
                "mapped region"
            );
            Ok(MappedRegion {
                secured,
                view,
                intent,
                active: true,
            })
        }
        Err(err) => {
            warn!(base = %region.base(), size, ?intent, "map failed: {err}");
            Err(CrossmemError::NotMappedView(err))
        }
    }
}

/// RAII guard for one local alias of a secured range.
pub struct MappedRegion<'s, 'a, H: MemoryHost + ?Sized>
{
    secured: &'s SecuredRegion<'a, H>,
    view: MappedView,
    intent: AccessIntent,
    active: bool,
}

impl<'s, 'a, H: MemoryHost + ?Sized> MappedRegion<'s, 'a, H>
{
    /// Local address of the first mapped byte.
    pub fn base(&self) -> Address
    {
        self.view.base
    }

    /// Mapped length in bytes.
    pub fn size(&self) -> usize
    {
        self.view.size
    }

    /// Intent the alias was created with.
    pub fn intent(&self) -> AccessIntent
    {
        self.intent
    }

    /// The pin this alias was derived from.
    pub fn secured(&self) -> &'s SecuredRegion<'a, H>
    {
        self.secured
    }

    /// View of this alias for [`crate::copy::copy_bytes`].
    pub fn view(&self) -> CopyView<'_>
    {
        CopyView::mapped(self.view.base, self.view.size, self.intent)
    }

    /// Unmap now rather than at drop.
    pub fn unmap(mut self)
    {
        self.release();
    }

    fn release(&mut self)
    {
        if self.active {
            self.active = false;
            self.secured.host().unmap(self.view);
            debug!(alias = %self.view.base, size = self.view.size, "unmapped region");
        }
    }
}

impl<H: MemoryHost + ?Sized> Drop for MappedRegion<'_, '_, H>
{
    fn drop(&mut self)
    {
        self.release();
    }
}

impl<H: MemoryHost + ?Sized> fmt::Debug for MappedRegion<'_, '_, H>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("MappedRegion")
            .field("view", &self.view)
            .field("intent", &self.intent)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
