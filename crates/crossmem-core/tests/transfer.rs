//! End-to-end transfers against the simulated host

use std::sync::Arc;

use crossmem_core::classify::DEFAULT_USER_LIMIT;
use crossmem_core::error::{CrossmemError, HostError, Parameter, Status};
use crossmem_core::sim::{FailPoint, PageProtection, SimConfig, SimHost, SimProcess};
use crossmem_core::transfer::{ProcessMemory, TransferRequest};
use crossmem_core::types::{Address, Direction};

const BASE: Address = Address::new(0x40_0000);

fn host_with_region(len: usize) -> (SimHost, Arc<SimProcess>)
{
    let host = SimHost::new();
    let process = host.spawn_process(4242);
    process.add_region(BASE, len).unwrap();
    (host, process)
}

fn assert_released(host: &SimHost)
{
    assert_eq!(host.live_pins(), 0, "pins leaked");
    assert_eq!(host.live_maps(), 0, "mappings leaked");
    assert_eq!(host.pinned_bytes(), 0);
    assert_eq!(host.ordering_violations(), 0, "released out of order");
}

#[test]
fn test_write_then_read_sixteen_bytes()
{
    let (host, process) = host_with_region(0x1000);
    let memory = ProcessMemory::new(&host);
    let target = Address::new(0x40_0010);

    memory.write(&process, target, &[0x11; 16]).unwrap();
    assert_eq!(process.peek(target, 16).unwrap(), vec![0x11; 16]);

    let mut readback = [0u8; 16];
    memory.read(&process, target, &mut readback).unwrap();
    assert_eq!(readback, [0x11; 16]);

    // Two pins per transfer: the foreign range and the local buffer
    assert_eq!(host.secure_calls(), 4);
    assert_eq!(host.map_calls(), 4);
    assert_eq!(host.copy_calls(), 2);
    assert_released(&host);
}

#[test]
fn test_round_trip_sizes_at_odd_alignment()
{
    let (host, process) = host_with_region(0x20000);
    let memory = ProcessMemory::new(&host);

    for size in [1usize, 8, 4096, 65536] {
        let target = BASE + 0x3;
        let pattern: Vec<u8> = (0..size).map(|i| (i * 7 + size) as u8).collect();

        memory.write(&process, target, &pattern).unwrap();
        let mut readback = vec![0u8; size];
        memory.read(&process, target, &mut readback).unwrap();

        assert_eq!(readback, pattern, "size {size}");
        assert_released(&host);
    }
}

#[test]
fn test_read_leaves_neighbouring_bytes_alone()
{
    let (host, process) = host_with_region(0x1000);
    process.fill(BASE, &[0xaa; 32]).unwrap();
    let memory = ProcessMemory::new(&host);

    memory.write(&process, BASE + 8, &[0x55; 8]).unwrap();

    let mut expected = vec![0xaa; 32];
    expected[8..16].fill(0x55);
    assert_eq!(process.peek(BASE, 32).unwrap(), expected);
}

#[test]
fn test_privileged_foreign_address_is_rejected_before_any_pin()
{
    let (host, process) = host_with_region(0x1000);
    let memory = ProcessMemory::new(&host);
    let mut buffer = [0u8; 8];

    let err = memory.read(&process, DEFAULT_USER_LIMIT + 1, &mut buffer).unwrap_err();
    assert_eq!(err.status(), Status::InvalidParameter(Parameter::Address));
    assert_eq!(host.secure_calls(), 0);
}

#[test]
fn test_range_running_into_privileged_space_is_rejected()
{
    let (host, process) = host_with_region(0x1000);
    let memory = ProcessMemory::new(&host);
    let mut buffer = [0u8; 16];

    let err = memory.read(&process, DEFAULT_USER_LIMIT - 7, &mut buffer).unwrap_err();
    assert!(matches!(
        err,
        CrossmemError::InvalidParameter {
            which: Parameter::Address
        }
    ));
    assert_eq!(host.secure_calls(), 0);
}

#[test]
fn test_null_foreign_address_is_rejected()
{
    let (host, process) = host_with_region(0x1000);
    let mut buffer = [0u8; 4];
    let err = ProcessMemory::new(&host)
        .read(&process, Address::ZERO, &mut buffer)
        .unwrap_err();
    assert_eq!(err.status(), Status::InvalidParameter(Parameter::Address));
}

#[test]
fn test_zero_size_is_rejected()
{
    let (host, process) = host_with_region(0x1000);
    let err = ProcessMemory::new(&host).write(&process, BASE, &[]).unwrap_err();
    assert_eq!(err.status(), Status::InvalidParameter(Parameter::Size));
    assert_eq!(host.secure_calls(), 0);
}

#[test]
fn test_validation_order()
{
    let classifier = crossmem_core::classify::AddressClassifier::default();

    // Everything wrong: the process is reported first
    let request: TransferRequest<'_, SimProcess> = TransferRequest {
        process: None,
        foreign: Address::ZERO,
        local: Address::ZERO,
        size: 0,
        direction: Direction::Read,
    };
    let err = request.validate(&classifier).err().unwrap();
    assert_eq!(err.status(), Status::InvalidParameter(Parameter::Process));

    let host = SimHost::new();
    let process = host.spawn_process(1);

    let request = TransferRequest {
        process: Some(&*process),
        foreign: BASE,
        local: Address::ZERO,
        size: 0,
        direction: Direction::Read,
    };
    let err = request.validate(&classifier).err().unwrap();
    assert_eq!(err.status(), Status::InvalidParameter(Parameter::Buffer));

    let request = TransferRequest {
        process: Some(&*process),
        foreign: BASE,
        local: Address::new(0x1000),
        size: 0,
        direction: Direction::Read,
    };
    let err = request.validate(&classifier).err().unwrap();
    assert_eq!(err.status(), Status::InvalidParameter(Parameter::Size));

    let request = TransferRequest {
        process: Some(&*process),
        foreign: BASE,
        local: Address::new(0x1000),
        size: 64,
        direction: Direction::Write,
    };
    let validated = request.validate(&classifier).unwrap();
    assert_eq!(validated.size(), 64);
    assert_eq!(validated.direction(), Direction::Write);
    assert_eq!(validated.foreign(), BASE);
}

#[test]
fn test_unmapped_foreign_range_is_not_locked()
{
    let (host, process) = host_with_region(0x1000);
    let mut buffer = [0u8; 32];

    // Runs 16 bytes past the end of the region
    let err = ProcessMemory::new(&host)
        .read(&process, BASE + 0x1000 - 16, &mut buffer)
        .unwrap_err();
    assert!(matches!(err, CrossmemError::NotLocked(HostError::Unmapped(_))));
    assert_eq!(err.status(), Status::NotLocked);
    assert_released(&host);
}

#[test]
fn test_write_to_read_only_pages_is_not_mapped()
{
    let host = SimHost::new();
    let process = host.spawn_process(7);
    process
        .add_region_with(BASE, 0x1000, PageProtection::ReadOnly)
        .unwrap();
    let memory = ProcessMemory::new(&host);

    // The foreign pin is read-only, so it succeeds; the writable mapping does not
    let err = memory.write(&process, BASE, &[1, 2, 3]).unwrap_err();
    assert!(matches!(err, CrossmemError::NotMappedView(HostError::AccessDenied(_))));
    assert_released(&host);

    // Reading the same pages is fine
    let mut buffer = [0xffu8; 3];
    memory.read(&process, BASE, &mut buffer).unwrap();
    assert_eq!(buffer, [0, 0, 0]);
}

#[test]
fn test_no_access_pages_are_not_locked()
{
    let (host, process) = host_with_region(0x1000);
    process.protect(BASE, PageProtection::NoAccess).unwrap();
    let mut buffer = [0u8; 8];

    let err = ProcessMemory::new(&host).read(&process, BASE, &mut buffer).unwrap_err();
    assert!(matches!(err, CrossmemError::NotLocked(HostError::Protected(_))));
    assert_released(&host);
}

#[test]
fn test_injected_failure_at_each_step_releases_everything()
{
    // (point, skip, expected status)
    let cases = [
        (FailPoint::Secure, 0, Status::NotLocked),     // foreign pin
        (FailPoint::Secure, 1, Status::NotLocked),     // local pin
        (FailPoint::Map, 0, Status::NotMappedView),    // foreign map
        (FailPoint::Map, 1, Status::NotMappedView),    // local map
        (FailPoint::Copy, 0, Status::Unsuccessful),    // copy
    ];

    for direction in [Direction::Read, Direction::Write] {
        for (point, skip, expected) in cases {
            let (host, process) = host_with_region(0x1000);
            host.fail_nth(point, skip);

            let memory = ProcessMemory::new(&host);
            let mut buffer = [0x33u8; 64];
            let result = match direction {
                Direction::Read => memory.read(&process, BASE, &mut buffer),
                Direction::Write => memory.write(&process, BASE, &buffer),
            };

            assert_eq!(Status::of(&result), expected, "{direction} {point:?} after {skip}");
            assert_released(&host);
        }
    }
}

#[test]
fn test_armed_failures_fire_in_arming_order()
{
    let (host, process) = host_with_region(0x1000);
    let memory = ProcessMemory::new(&host);
    // One copy per transfer: let the first through, then fail the next two
    host.fail_nth(FailPoint::Copy, 1);
    host.fail_next(FailPoint::Copy);

    let statuses: Vec<Status> = (0..4)
        .map(|_| Status::of(&memory.write(&process, BASE, &[0x21; 16])))
        .collect();

    assert_eq!(
        statuses,
        [Status::Success, Status::Unsuccessful, Status::Unsuccessful, Status::Success]
    );
    assert_eq!(host.copy_calls(), 4);
    assert_released(&host);
}

#[test]
fn test_copy_fault_reports_partial_progress()
{
    let (host, process) = host_with_region(0x1000);
    process.fill(BASE, &[0x77; 64]).unwrap();
    host.fail_next(FailPoint::Copy);

    let mut buffer = [0u8; 64];
    let err = ProcessMemory::new(&host).read(&process, BASE, &mut buffer).unwrap_err();

    match err {
        CrossmemError::Unsuccessful(fault) => {
            assert_eq!(fault.copied, 32);
            assert!(fault.address.is_some());
        }
        other => panic!("expected Unsuccessful, got {other:?}"),
    }
    // The destination may be partially written
    assert_eq!(&buffer[..32], &[0x77; 32]);
    assert_eq!(&buffer[32..], &[0; 32]);
    assert_released(&host);
}

#[test]
fn test_write_copy_fault_reports_partial_progress()
{
    let (host, process) = host_with_region(0x1000);
    host.fail_next(FailPoint::Copy);

    let err = ProcessMemory::new(&host)
        .write(&process, BASE, &[0x33; 64])
        .unwrap_err();

    match err {
        CrossmemError::Unsuccessful(fault) => assert_eq!(fault.copied, 32),
        other => panic!("expected Unsuccessful, got {other:?}"),
    }
    // The foreign range may be partially written
    let written = process.peek(BASE, 64).unwrap();
    assert_eq!(&written[..32], &[0x33; 32]);
    assert_eq!(&written[32..], &[0; 32]);
    assert_released(&host);
}

#[test]
fn test_host_is_usable_after_a_failure()
{
    let (host, process) = host_with_region(0x1000);
    let memory = ProcessMemory::new(&host);
    host.fail_next(FailPoint::Map);

    assert!(memory.write(&process, BASE, &[9; 4]).is_err());
    memory.write(&process, BASE, &[9; 4]).unwrap();
    assert_eq!(process.peek(BASE, 4).unwrap(), vec![9; 4]);
    assert_released(&host);
}

#[test]
fn test_pin_quota_exceeded()
{
    // Room for the foreign pin but not the local one
    let host = SimHost::with_config(SimConfig::default().with_pin_quota(6000));
    let process = host.spawn_process(11);
    process.add_region(BASE, 0x2000).unwrap();

    let mut buffer = vec![0u8; 4000];
    let err = ProcessMemory::new(&host).read(&process, BASE, &mut buffer).unwrap_err();
    assert!(matches!(
        err,
        CrossmemError::NotLocked(HostError::QuotaExceeded {
            requested: 4000,
            available: 2000
        })
    ));
    assert_released(&host);

    // Within the quota it works
    let mut buffer = vec![0u8; 3000];
    ProcessMemory::new(&host).read(&process, BASE, &mut buffer).unwrap();
}

#[test]
fn test_map_window_exceeded()
{
    let host = SimHost::with_config(SimConfig::default().with_max_map_window(1024));
    let process = host.spawn_process(12);
    process.add_region(BASE, 0x1000).unwrap();

    let mut buffer = vec![0u8; 2048];
    let err = ProcessMemory::new(&host).read(&process, BASE, &mut buffer).unwrap_err();
    assert!(matches!(err, CrossmemError::NotMappedView(HostError::NoWindow(2048))));
    assert_released(&host);
}

#[test]
fn test_terminated_process_is_not_locked()
{
    use crossmem_core::process::Processes;
    use crossmem_core::types::AccessMask;

    let (host, process) = host_with_region(0x1000);
    let processes = Processes::new(&host);
    let handle = processes.open_process(process.pid(), AccessMask::TERMINATE).unwrap();
    processes.terminate_process(&handle, 0).unwrap();

    // A descriptor held from before the exit no longer pins
    let mut buffer = [0u8; 8];
    let err = ProcessMemory::new(&host).read(&process, BASE, &mut buffer).unwrap_err();
    assert!(matches!(err, CrossmemError::NotLocked(HostError::ProcessGone)));
}

#[test]
fn test_resident_privileged_buffer_is_not_pinned()
{
    // Everything above 16 MiB counts as privileged, so heap buffers are
    // treated as resident privileged memory.
    let limit = Address::new(0x0100_0000);
    let host = SimHost::with_config(SimConfig::default().with_user_limit(limit));
    let process = host.spawn_process(13);
    process.add_region(BASE, 0x1000).unwrap();
    let memory = ProcessMemory::new(&host);

    let mut buffer = vec![0u8; 128];
    assert!(Address::from_ptr(buffer.as_ptr()) > limit);
    process.fill(BASE, &[0x42; 128]).unwrap();

    memory.read(&process, BASE, &mut buffer).unwrap();
    assert_eq!(buffer, vec![0x42; 128]);
    assert_eq!(host.secure_calls(), 1, "only the foreign range is pinned");
    assert_eq!(host.map_calls(), 1);
    assert_released(&host);
}

#[test]
fn test_resident_privileged_buffer_is_not_pinned_on_write()
{
    let limit = Address::new(0x0100_0000);
    let host = SimHost::with_config(SimConfig::default().with_user_limit(limit));
    let process = host.spawn_process(14);
    process.add_region(BASE, 0x1000).unwrap();

    let pattern = vec![0x5a; 128];
    assert!(Address::from_ptr(pattern.as_ptr()) > limit);

    ProcessMemory::new(&host).write(&process, BASE, &pattern).unwrap();
    assert_eq!(process.peek(BASE, 128).unwrap(), pattern);
    assert_eq!(host.secure_calls(), 1, "only the foreign range is pinned");
    assert_eq!(host.map_calls(), 1);
    assert_released(&host);
}

#[test]
fn test_concurrent_transfers_do_not_interfere()
{
    let host = SimHost::new();
    let process = host.spawn_process(4242);
    for slot in 0..8u64 {
        process.add_region(BASE + slot * 0x1000, 0x1000).unwrap();
    }
    let memory = ProcessMemory::new(&host);

    std::thread::scope(|scope| {
        for slot in 0..8u64 {
            let process = &process;
            scope.spawn(move || {
                let target = BASE + slot * 0x1000 + 0x10;
                let pattern = [slot as u8 + 1; 256];
                for _ in 0..50 {
                    memory.write(process, target, &pattern).unwrap();
                    let mut readback = [0u8; 256];
                    memory.read(process, target, &mut readback).unwrap();
                    assert_eq!(readback, pattern);
                }
            });
        }
    });

    assert_eq!(host.secure_calls(), 8 * 50 * 4);
    assert_released(&host);
}

#[test]
fn test_concurrent_transfers_against_separate_processes()
{
    // Both processes use the same virtual base
    let host = SimHost::new();
    let processes: Vec<Arc<SimProcess>> = (1..=2u32)
        .map(|pid| {
            let process = host.spawn_process(pid);
            process.add_region(BASE, 0x1000).unwrap();
            process
        })
        .collect();
    let memory = ProcessMemory::new(&host);

    std::thread::scope(|scope| {
        for (index, process) in processes.iter().enumerate() {
            scope.spawn(move || {
                let pattern = [0xc0 | index as u8; 512];
                for _ in 0..200 {
                    memory.write(process, BASE, &pattern).unwrap();
                    let mut readback = [0u8; 512];
                    memory.read(process, BASE, &mut readback).unwrap();
                    assert_eq!(readback, pattern);
                }
            });
        }
    });

    assert_eq!(processes[0].peek(BASE, 512).unwrap(), vec![0xc0; 512]);
    assert_eq!(processes[1].peek(BASE, 512).unwrap(), vec![0xc1; 512]);
    assert_eq!(host.secure_calls(), 2 * 200 * 4);
    assert_released(&host);
}
