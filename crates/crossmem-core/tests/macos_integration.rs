//! Integration tests for the Mach host
//!
//! Transfers against our own pid need no special rights; anything touching
//! another process needs sudo or the debugger entitlement and is left to
//! manual runs of the `crossmem` CLI.

#![cfg(target_os = "macos")]

use crossmem_core::capability::Capability;
use crossmem_core::error::CrossmemError;
use crossmem_core::process::{info_class, Processes};
use crossmem_core::types::{AccessMask, Address, ProcessId};
use crossmem_core::MachHost;

fn own_pid() -> ProcessId
{
    ProcessId(std::process::id())
}

#[test]
fn test_read_own_memory()
{
    let host = MachHost::new();
    let processes = Processes::new(&host);

    let source: Vec<u8> = (0u8..64).collect();
    let mut destination = vec![0u8; source.len()];
    processes
        .read_memory(own_pid(), Address::from_ptr(source.as_ptr()), &mut destination)
        .unwrap();

    assert_eq!(destination, source);
}

#[test]
fn test_write_own_memory()
{
    let host = MachHost::new();
    let processes = Processes::new(&host);

    let mut target = vec![0u8; 32];
    processes
        .write_memory(own_pid(), Address::from_ptr(target.as_mut_ptr()), &[0x11; 32])
        .unwrap();

    assert_eq!(target, vec![0x11; 32]);
}

#[test]
fn test_invalid_pid()
{
    let host = MachHost::new();
    let processes = Processes::new(&host);
    let mut buffer = [0u8; 8];

    let result = processes.read_memory(ProcessId(u32::MAX), Address::new(0x1000), &mut buffer);
    assert!(result.is_err());
    match result.unwrap_err() {
        CrossmemError::ProcessNotFound(_) | CrossmemError::MachError(_) => {}
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_capabilities_resolve()
{
    let host = MachHost::new();
    let processes = Processes::new(&host);
    let table = processes.capabilities();

    assert!(table.is_available(Capability::SuspendProcess));
    assert!(table.is_available(Capability::QueryInformationProcess));
    assert!(!table.is_available(Capability::AttachProcess));
}

#[test]
fn test_query_own_basic_information()
{
    let host = MachHost::new();
    let processes = Processes::new(&host);
    let handle = processes.open_process(own_pid(), AccessMask::QUERY).unwrap();

    let mut record = [0u8; info_class::PROCESS_BASIC_LEN];
    processes
        .query_information_process(&handle, info_class::BASIC, &mut record)
        .unwrap();
    let threads = u32::from_le_bytes(record[12..16].try_into().unwrap());
    assert!(threads >= 1);
}
