//! # Simulated Host
//!
//! [`SimHost`] implements [`MemoryHost`](crate::host::MemoryHost) and
//! [`ProcessHost`](crate::process::ProcessHost) entirely in-process. It is the
//! host the test suite runs against and the one the CLI `demo` command uses.
//!
//! What it models:
//!
//! - processes made of heap-backed regions with page protections
//! - a pin quota and a maximum mapping window
//! - counters for every pin, map and copy, plus a count of releases that
//!   break the pin/map contract
//! - injected failures at secure, map or copy ([`FailPoint`])
//! - threads with register contexts, suspend counts and information classes
//! - an attach stack and open-handle accounting

mod config;
mod fault;
mod host;
mod memory;
mod process;

pub use config::{SimConfig, DEFAULT_MAP_WINDOW, DEFAULT_PAGE_SIZE, DEFAULT_PIN_QUOTA};
pub use fault::FailPoint;
pub use host::{SimHost, GENERAL_REGISTERS, SYSTEM_PID};
pub use memory::{PageProtection, SimRegion};
pub use process::{SimProcess, SimProcessHandle, SimSavedContext, SimThread, SimThreadHandle, ALLOCATION_BASE};
