//! # Types
//!
//! Host-agnostic types used throughout the crate.
//!
//! These let the transfer path talk about addresses, regions and processes
//! without knowing whether the host is Mach or the in-process simulator.

pub mod address;
pub mod context;
pub mod process;
pub mod region;

// Re-export all public types
pub use address::Address;
pub use context::{ContextFlags, ThreadContext};
pub use process::{AccessMask, ClientId, ProcessId, ProcessorMode, ThreadId};
pub use region::{AccessIntent, AddressSpace, CacheMode, Direction, MemoryRegion, Protection, RegionError};
