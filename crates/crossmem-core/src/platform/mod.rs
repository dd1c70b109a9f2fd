//! # Platform Hosts
//!
//! Native implementations of [`MemoryHost`](crate::host::MemoryHost) and
//! [`ProcessHost`](crate::process::ProcessHost).
//!
//! - **macOS**: Mach memory entries, `mach_vm_map` and task/thread ports
//!   (see [`macos::MachHost`])
//!
//! Other targets only have the simulated host in [`crate::sim`].

#[cfg(target_os = "macos")]
pub mod macos;
