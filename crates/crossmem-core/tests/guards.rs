//! Tests for the secure/map/copy guards used on their own

use crossmem_core::copy::copy_bytes;
use crossmem_core::error::{CrossmemError, HostError, Parameter, Status};
use crossmem_core::map::map_memory;
use crossmem_core::secure::secure;
use crossmem_core::sim::{PageProtection, SimHost};
use crossmem_core::types::{AccessIntent, Address, AddressSpace, CacheMode, MemoryRegion, Protection, RegionError};

const BASE: Address = Address::new(0x40_0000);

#[test]
fn test_memory_region_invariants()
{
    let space = AddressSpace::<()>::Local;
    assert_eq!(MemoryRegion::new(BASE, 0, space).err(), Some(RegionError::Empty));
    assert_eq!(MemoryRegion::new(Address::ZERO, 16, space).err(), Some(RegionError::Null));
    assert!(matches!(
        MemoryRegion::new(Address::new(u64::MAX - 4), 16, space),
        Err(RegionError::Overflow { size: 16, .. })
    ));

    let region = MemoryRegion::new(BASE, 0x100, space).unwrap();
    assert_eq!(region.end(), BASE + 0x100);
    assert!(region.contains_range(BASE + 0x80, 0x80));
    assert!(!region.contains_range(BASE + 0x80, 0x81));
    assert!(!region.space().is_foreign());
}

#[test]
fn test_secure_and_release()
{
    let host = SimHost::new();
    let process = host.spawn_process(1);
    process.add_region(BASE, 0x1000).unwrap();

    let region = MemoryRegion::new(BASE, 0x200, AddressSpace::Foreign(&*process)).unwrap();
    let pin = secure(&host, region, Protection::ReadOnly).unwrap();
    assert_eq!(host.live_pins(), 1);
    assert_eq!(host.pinned_bytes(), 0x200);
    assert_eq!(pin.protection(), Protection::ReadOnly);

    pin.release();
    assert_eq!(host.live_pins(), 0);
    assert_eq!(host.ordering_violations(), 0);
}

#[test]
fn test_secured_region_released_on_drop()
{
    let host = SimHost::new();
    let process = host.spawn_process(1);
    process.add_region(BASE, 0x1000).unwrap();

    {
        let region = MemoryRegion::new(BASE, 0x10, AddressSpace::Foreign(&*process)).unwrap();
        let _pin = secure(&host, region, Protection::ReadWrite).unwrap();
        assert_eq!(host.live_pins(), 1);
    }
    assert_eq!(host.live_pins(), 0);
}

#[test]
fn test_secure_unmapped_range_reports_first_hole()
{
    let host = SimHost::new();
    let process = host.spawn_process(1);
    process.add_region(BASE, 0x1000).unwrap();

    let region = MemoryRegion::new(BASE + 0xf00, 0x200, AddressSpace::Foreign(&*process)).unwrap();
    let err = secure(&host, region, Protection::ReadOnly).unwrap_err();
    match err {
        CrossmemError::NotLocked(HostError::Unmapped(at)) => assert_eq!(at, BASE + 0x1000),
        other => panic!("expected NotLocked(Unmapped), got {other:?}"),
    }
    assert_eq!(host.live_pins(), 0);
}

#[test]
fn test_secure_read_write_on_read_only_pages()
{
    let host = SimHost::new();
    let process = host.spawn_process(1);
    process
        .add_region_with(BASE, 0x1000, PageProtection::ReadOnly)
        .unwrap();

    let region = MemoryRegion::new(BASE, 0x10, AddressSpace::Foreign(&*process)).unwrap();
    let err = secure(&host, region, Protection::ReadWrite).unwrap_err();
    assert!(matches!(err, CrossmemError::NotLocked(HostError::Protected(_))));
}

#[test]
fn test_mapping_is_released_before_its_pin()
{
    let host = SimHost::new();
    let process = host.spawn_process(1);
    process.add_region(BASE, 0x1000).unwrap();
    process.fill(BASE, b"abcdef").unwrap();

    let region = MemoryRegion::new(BASE, 6, AddressSpace::Foreign(&*process)).unwrap();
    let pin = secure(&host, region, Protection::ReadOnly).unwrap();
    let mapping = map_memory(&pin, 6, AccessIntent::Read, CacheMode::NonCached).unwrap();

    assert_eq!(host.live_maps(), 1);
    assert_eq!(mapping.size(), 6);
    assert_eq!(mapping.intent(), AccessIntent::Read);
    assert_ne!(mapping.base(), BASE, "foreign ranges get a distinct alias");

    mapping.unmap();
    assert_eq!(host.live_maps(), 0);
    drop(pin);

    assert_eq!(host.live_pins(), 0);
    assert_eq!(host.ordering_violations(), 0);
}

#[test]
fn test_map_larger_than_secured_range()
{
    let host = SimHost::new();
    let process = host.spawn_process(1);
    process.add_region(BASE, 0x1000).unwrap();

    let region = MemoryRegion::new(BASE, 0x10, AddressSpace::Foreign(&*process)).unwrap();
    let pin = secure(&host, region, Protection::ReadOnly).unwrap();

    let err = map_memory(&pin, 0x11, AccessIntent::Read, CacheMode::Cached).unwrap_err();
    assert!(matches!(
        err,
        CrossmemError::NotMappedView(HostError::OutOfRange {
            requested: 0x11,
            secured: 0x10
        })
    ));
    let err = map_memory(&pin, 0, AccessIntent::Read, CacheMode::Cached).unwrap_err();
    assert_eq!(err.status(), Status::NotMappedView);
    assert_eq!(host.map_calls(), 0, "rejected before reaching the host");
}

#[test]
fn test_copy_between_views()
{
    let host = SimHost::new();
    let process = host.spawn_process(1);
    process.add_region(BASE, 0x1000).unwrap();
    process.fill(BASE, b"crossmem").unwrap();

    let mut local = [0u8; 8];
    let local_base = Address::from_ptr(local.as_mut_ptr());

    {
        let foreign = MemoryRegion::new(BASE, 8, AddressSpace::Foreign(&*process)).unwrap();
        let foreign_pin = secure(&host, foreign, Protection::ReadOnly).unwrap();
        let local_region = MemoryRegion::new(local_base, 8, AddressSpace::Local).unwrap();
        let local_pin = secure(&host, local_region, Protection::ReadWrite).unwrap();

        let source = map_memory(&foreign_pin, 8, AccessIntent::Read, CacheMode::NonCached).unwrap();
        let destination = map_memory(&local_pin, 8, AccessIntent::Modify, CacheMode::NonCached).unwrap();
        assert_eq!(destination.base(), local_base, "local ranges alias themselves");

        // Wrong direction: a read-only view cannot be a destination
        let err = copy_bytes(&host, destination.view(), source.view(), 8).unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter(Parameter::Buffer));

        // Larger than the views
        let err = copy_bytes(&host, source.view(), destination.view(), 9).unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter(Parameter::Size));

        copy_bytes(&host, source.view(), destination.view(), 8).unwrap();
        assert_eq!(host.copy_calls(), 1);
    }

    assert_eq!(&local, b"crossmem");
    assert_eq!(host.live_pins(), 0);
    assert_eq!(host.live_maps(), 0);
    assert_eq!(host.ordering_violations(), 0);
}

#[test]
fn test_revoked_pages_fault_inside_the_boundary()
{
    let host = SimHost::new();
    let process = host.spawn_process(1);
    process.add_region(BASE, 0x1000).unwrap();

    let mut local = [0u8; 16];
    let local_base = Address::from_ptr(local.as_mut_ptr());

    let foreign = MemoryRegion::new(BASE, 16, AddressSpace::Foreign(&*process)).unwrap();
    let foreign_pin = secure(&host, foreign, Protection::ReadOnly).unwrap();
    let local_region = MemoryRegion::new(local_base, 16, AddressSpace::Local).unwrap();
    let local_pin = secure(&host, local_region, Protection::ReadWrite).unwrap();
    let source = map_memory(&foreign_pin, 16, AccessIntent::Read, CacheMode::NonCached).unwrap();
    let destination = map_memory(&local_pin, 16, AccessIntent::Modify, CacheMode::NonCached).unwrap();

    // The target revokes access while the mapping is live
    process.protect(BASE, PageProtection::NoAccess).unwrap();

    let err = copy_bytes(&host, source.view(), destination.view(), 16).unwrap_err();
    match err {
        CrossmemError::Unsuccessful(fault) => {
            assert_eq!(fault.address, Some(source.base()));
            assert_eq!(fault.copied, 0);
        }
        other => panic!("expected Unsuccessful, got {other:?}"),
    }

    drop(destination);
    drop(source);
    drop(local_pin);
    drop(foreign_pin);
    assert_eq!(host.live_pins(), 0);
    assert_eq!(host.ordering_violations(), 0);
}

#[test]
fn test_pin_keeps_backing_alive_after_region_removal()
{
    let host = SimHost::new();
    let process = host.spawn_process(1);
    process.add_region(BASE, 0x1000).unwrap();
    process.fill(BASE, &[0x5a; 4]).unwrap();

    let foreign = MemoryRegion::new(BASE, 4, AddressSpace::Foreign(&*process)).unwrap();
    let pin = secure(&host, foreign, Protection::ReadOnly).unwrap();
    let mapping = map_memory(&pin, 4, AccessIntent::Read, CacheMode::NonCached).unwrap();

    // The target frees the range; the pinned pages stay valid for the alias
    process.remove_region(BASE).unwrap();
    assert_eq!(process.region_count(), 0);

    let mut local = [0u8; 4];
    let local_view = {
        let region = MemoryRegion::new(Address::from_ptr(local.as_mut_ptr()), 4, AddressSpace::Local).unwrap();
        secure(&host, region, Protection::ReadWrite).unwrap()
    };
    let local_map = map_memory(&local_view, 4, AccessIntent::Modify, CacheMode::NonCached).unwrap();
    copy_bytes(&host, mapping.view(), local_map.view(), 4).unwrap();

    drop(local_map);
    drop(local_view);
    drop(mapping);
    drop(pin);
    assert_eq!(local, [0x5a; 4]);
    assert_eq!(host.live_pins(), 0);
}
