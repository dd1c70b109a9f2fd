//! # crossmem-core
//!
//! Fault-contained cross-process memory transfer.
//!
//! A transfer pins the foreign range, maps it into the agent, copies inside a
//! fault boundary and releases everything in reverse order. The pieces:
//!
//! - [`classify`]: privileged/unprivileged address split
//! - [`secure`]: pinning a region ([`SecuredRegion`](secure::SecuredRegion))
//! - [`map`]: aliasing a pinned region locally ([`MappedRegion`](map::MappedRegion))
//! - [`copy`]: copying between aliases without crashing on a fault
//! - [`transfer`]: [`ProcessMemory`], the whole read/write sequence
//! - [`process`]: process and thread collaborators behind [`Processes`]
//! - [`capability`]: which optional host routines exist
//!
//! ## Hosts
//!
//! - **macOS**: [`platform::macos::MachHost`], Mach task ports and memory entries
//! - **Any platform**: [`sim::SimHost`], an in-process model used by the tests
//!   and the CLI demo
//!
//! ## Why unsafe code is needed
//!
//! Mapping another task's pages and copying through the alias means calling
//! kernel APIs and dereferencing raw addresses. The unsafe calls are kept
//! inside the hosts and the copy engine; the public API is safe.

#![allow(unsafe_code)] // Required for Mach calls and raw alias copies

pub mod capability;
pub mod classify;
pub mod copy;
pub mod error;
pub mod host;
pub mod map;
pub mod platform;
pub mod process;
pub mod secure;
pub mod sim;
pub mod transfer;
pub mod types;

pub use capability::{Capability, CapabilityTable};
pub use classify::{AddressClass, AddressClassifier};
pub use error::{CrossmemError, Result, Status};
pub use host::MemoryHost;
#[cfg(target_os = "macos")]
pub use platform::macos::MachHost;
pub use process::{ProcessHost, Processes};
pub use sim::SimHost;
pub use transfer::ProcessMemory;
pub use types::{Address, ProcessId, ThreadId};
