//! # Address Classification
//!
//! Splits the address range into a privileged upper part and a
//! process-owned lower part.
//!
//! The transfer path uses this twice: a foreign target in the privileged part
//! is always rejected, and a local buffer in the unprivileged part must be
//! pinned before it is copied into or out of. Privileged buffers are already
//! resident and are used as-is.

use crate::types::Address;

/// Highest process-owned address on 64-bit hosts with a 47-bit lower half.
pub const DEFAULT_USER_LIMIT: Address = Address::new(0x0000_7fff_ffff_ffff);

/// Which part of the address range an address falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressClass
{
    /// Owned by the privileged context itself
    Privileged,
    /// Owned by some process
    Unprivileged,
}

/// Pure predicate over addresses.
///
/// Anything strictly above `user_limit` is privileged.
///
/// ```rust
/// use crossmem_core::classify::{AddressClass, AddressClassifier};
/// use crossmem_core::types::Address;
///
/// let classifier = AddressClassifier::default();
/// assert_eq!(classifier.classify(Address::new(0x1000)), AddressClass::Unprivileged);
/// assert_eq!(classifier.classify(Address::new(0xffff_8000_0000_0000)), AddressClass::Privileged);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressClassifier
{
    user_limit: Address,
}

impl Default for AddressClassifier
{
    fn default() -> Self
    {
        Self::with_user_limit(DEFAULT_USER_LIMIT)
    }
}

impl AddressClassifier
{
    /// Classifier whose last unprivileged address is `user_limit`.
    pub const fn with_user_limit(user_limit: Address) -> Self
    {
        Self { user_limit }
    }

    /// Last unprivileged address.
    pub fn user_limit(&self) -> Address
    {
        self.user_limit
    }

    /// Classify a single address.
    pub fn classify(&self, address: Address) -> AddressClass
    {
        if address > self.user_limit {
            AddressClass::Privileged
        } else {
            AddressClass::Unprivileged
        }
    }

    /// `true` if the address is privileged.
    pub fn is_privileged(&self, address: Address) -> bool
    {
        self.classify(address) == AddressClass::Privileged
    }

    /// `true` if the address is process-owned.
    pub fn is_unprivileged(&self, address: Address) -> bool
    {
        self.classify(address) == AddressClass::Unprivileged
    }
}

/// Classify with the default user limit.
pub fn classify(address: Address) -> AddressClass
{
    AddressClassifier::default().classify(address)
}
