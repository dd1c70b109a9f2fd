//! # Region Securing
//!
//! Pins a virtual range so its pages cannot be freed or paged out while the
//! returned [`SecuredRegion`] guard is alive.
//!
//! Securing does not make the range dereferenceable from here; that is what
//! [`crate::map`] is for. A mapping borrows the guard it was made from, so the
//! compiler rejects any attempt to release a pin while an alias of it is
//! still live.
//!
//! ## Example
//!
//! ```rust
//! use crossmem_core::secure::secure;
//! use crossmem_core::sim::SimHost;
//! use crossmem_core::types::{Address, AddressSpace, MemoryRegion, Protection};
//!
//! let host = SimHost::new();
//! let process = host.spawn_process(4242);
//! process.add_region(Address::new(0x10000), 0x1000)?;
//!
//! let region = MemoryRegion::new(Address::new(0x10000), 16, AddressSpace::Foreign(&*process))
//!     .expect("valid region");
//! let pin = secure(&host, region, Protection::ReadOnly)?;
//! assert_eq!(host.live_pins(), 1);
//! pin.release();
//! assert_eq!(host.live_pins(), 0);
//! # Ok::<(), crossmem_core::error::CrossmemError>(())
//! ```

use std::fmt;

use tracing::{debug, warn};

use crate::error::{CrossmemError, Result};
use crate::host::{MemoryHost, SecureToken};
use crate::types::{MemoryRegion, Protection};

/// Pin a region, returning a guard that unpins it on drop.
///
/// ## Errors
///
/// - `NotLocked`: the range spans unmapped pages, exceeds the pin quota or
///   covers protected pages. The host's reason is kept as the source.
pub fn secure<'a, H>(host: &'a H, region: MemoryRegion<'a, H::Process>, protection: Protection) -> Result<SecuredRegion<'a, H>>
where
    H: MemoryHost + ?Sized,
{
    match host.secure(&region, protection) {
        Ok(token) => {
            debug!(
                base = %region.base(),
                size = region.size(),
                space = ?region.space(),
                ?protection,
                token = token.raw(),
                "secured region"
            );
            Ok(SecuredRegion {
                host,
                region,
                token,
                protection,
                active: true,
            })
        }
        Err(err) => {
            warn!(base = %region.base(), size = region.size(), space = ?region.space(), "secure failed: {err}");
            Err(CrossmemError::NotLocked(err))
        }
    }
}

/// RAII guard for one pinned range.
///
/// Releases the pin exactly once: either through [`SecuredRegion::release`]
/// or when dropped.
pub struct SecuredRegion<'a, H: MemoryHost + ?Sized>
{
    host: &'a H,
    region: MemoryRegion<'a, H::Process>,
    token: SecureToken,
    protection: Protection,
    active: bool,
}

impl<'a, H: MemoryHost + ?Sized> SecuredRegion<'a, H>
{
    /// The pinned range.
    pub fn region(&self) -> &MemoryRegion<'a, H::Process>
    {
        &self.region
    }

    /// The host token backing this pin.
    pub fn token(&self) -> SecureToken
    {
        self.token
    }

    /// Protection the range was pinned with.
    pub fn protection(&self) -> Protection
    {
        self.protection
    }

    /// The host this pin belongs to.
    pub fn host(&self) -> &'a H
    {
        self.host
    }

    /// Release the pin now rather than at drop.
    pub fn release(mut self)
    {
        self.unsecure();
    }

    fn unsecure(&mut self)
    {
        if self.active {
            self.active = false;
            self.host.unsecure(&self.region, self.token);
            debug!(base = %self.region.base(), token = self.token.raw(), "released region");
        }
    }
}

impl<H: MemoryHost + ?Sized> Drop for SecuredRegion<'_, H>
{
    fn drop(&mut self)
    {
        self.unsecure();
    }
}

impl<H: MemoryHost + ?Sized> fmt::Debug for SecuredRegion<'_, H>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("SecuredRegion")
            .field("region", &self.region)
            .field("token", &self.token)
            .field("protection", &self.protection)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
