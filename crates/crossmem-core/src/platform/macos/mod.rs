//! # macOS Host
//!
//! Mach-backed implementation of the host traits.
//!
//! - [`host`]: [`MachHost`], task/thread ports and the transfer primitives
//! - [`context`]: thread state flavors to and from `ThreadContext`
//! - [`error`]: `kern_return_t` codes as [`MachError`](error::MachError)
//! - [`ffi`]: Mach calls `mach2` does not bind

pub mod context;
pub mod error;
pub mod ffi;
pub mod host;

pub use error::MachError;
pub use host::{MachHost, MachProcess, MachProcessHandle, MachSavedContext, MachThread, MachThreadHandle, USER_STACK_SIZE};
