//! Simulated host configuration.

use crate::capability::{Capability, CapabilityTable};
use crate::classify::DEFAULT_USER_LIMIT;
use crate::types::Address;

/// Default pin quota: 64 MiB.
pub const DEFAULT_PIN_QUOTA: usize = 64 * 1024 * 1024;

/// Default largest single mapping: 4 MiB.
pub const DEFAULT_MAP_WINDOW: usize = 4 * 1024 * 1024;

/// Default page size.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Limits and features of a [`SimHost`](super::SimHost).
///
/// ## Example
///
/// ```rust
/// use crossmem_core::capability::Capability;
/// use crossmem_core::sim::{SimConfig, SimHost};
///
/// let config = SimConfig::default()
///     .with_pin_quota(8192)
///     .without_capability(Capability::AttachProcess);
/// let host = SimHost::with_config(config);
/// assert_eq!(host.config().pin_quota_bytes, 8192);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig
{
    /// Total bytes that may be pinned at once, local and foreign together
    pub pin_quota_bytes: usize,
    /// Largest mapping the host will create
    pub max_map_window: usize,
    /// Highest unprivileged address
    pub user_limit: Address,
    /// Granularity of virtual memory allocations
    pub page_size: usize,
    /// Optional primitives the host reports as present
    pub capabilities: CapabilityTable,
}

impl Default for SimConfig
{
    fn default() -> Self
    {
        Self {
            pin_quota_bytes: DEFAULT_PIN_QUOTA,
            max_map_window: DEFAULT_MAP_WINDOW,
            user_limit: DEFAULT_USER_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            capabilities: CapabilityTable::all(),
        }
    }
}

impl SimConfig
{
    /// Set the pin quota.
    #[must_use]
    pub fn with_pin_quota(mut self, bytes: usize) -> Self
    {
        self.pin_quota_bytes = bytes;
        self
    }

    /// Set the largest mapping window.
    #[must_use]
    pub fn with_max_map_window(mut self, bytes: usize) -> Self
    {
        self.max_map_window = bytes;
        self
    }

    /// Set the highest unprivileged address.
    #[must_use]
    pub fn with_user_limit(mut self, limit: Address) -> Self
    {
        self.user_limit = limit;
        self
    }

    /// Set the page size. Must be a power of two.
    #[must_use]
    pub fn with_page_size(mut self, bytes: usize) -> Self
    {
        self.page_size = bytes;
        self
    }

    /// Replace the capability table.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilityTable) -> Self
    {
        self.capabilities = capabilities;
        self
    }

    /// Report `capability` as absent.
    #[must_use]
    pub fn without_capability(mut self, capability: Capability) -> Self
    {
        let current = self.capabilities;
        self.capabilities = CapabilityTable::resolve(|c| c != capability && current.is_available(c));
        self
    }
}
