//! Tests for platform-agnostic types and address classification

use crossmem_core::classify::{self, AddressClass, AddressClassifier, DEFAULT_USER_LIMIT};
use crossmem_core::types::{
    AccessIntent, AccessMask, Address, ContextFlags, Direction, ProcessId, Protection, ThreadContext, ThreadId,
};

#[test]
fn test_process_id_conversions()
{
    let pid = ProcessId::from(4242);
    assert_eq!(pid.0, 4242);
    let value: u32 = pid.into();
    assert_eq!(value, 4242);
    assert_eq!(pid.to_string(), "4242");
    assert_ne!(pid, ProcessId(4243));
}

#[test]
fn test_thread_id_raw()
{
    let tid = ThreadId::from((7u64 << 32) | 2);
    assert_eq!(tid.raw(), 0x7_0000_0002);
}

#[test]
fn test_address_arithmetic()
{
    let address = Address::new(0x40_0000);
    assert_eq!((address + 0x10).value(), 0x40_0010);
    assert_eq!((address - 0x10).value(), 0x3f_fff0);
    assert_eq!(address.checked_add(u64::MAX), None);
    assert_eq!(Address::ZERO.checked_sub(1), None);
    assert_eq!(Address::new(0x40_0123).align_down(0x1000), address);
    assert_eq!(Address::new(0x40_0123).offset_from(address), Some(0x123));
    assert_eq!(address.offset_from(Address::new(0x40_0123)), None);
    assert!(Address::ZERO.is_null());
    assert!(!address.is_null());
}

#[test]
fn test_address_display()
{
    assert_eq!(Address::new(0x1000).to_string(), "0x0000000000001000");
    assert_eq!(format!("{:x}", Address::new(0xbeef)), "beef");
    assert_eq!(u64::from(Address::from(0x20u64)), 0x20);
}

#[test]
fn test_classifier_boundary()
{
    let classifier = AddressClassifier::default();
    assert_eq!(classifier.user_limit(), DEFAULT_USER_LIMIT);
    assert_eq!(classifier.classify(DEFAULT_USER_LIMIT), AddressClass::Unprivileged);
    assert_eq!(classifier.classify(DEFAULT_USER_LIMIT + 1), AddressClass::Privileged);
    assert!(classifier.is_unprivileged(Address::ZERO));
    assert!(classifier.is_privileged(Address::new(u64::MAX)));
}

#[test]
fn test_classifier_custom_limit()
{
    let classifier = AddressClassifier::with_user_limit(Address::new(0xffff));
    assert!(classifier.is_unprivileged(Address::new(0xffff)));
    assert!(classifier.is_privileged(Address::new(0x1_0000)));
    // The free function always uses the default limit
    assert_eq!(classify::classify(Address::new(0x1_0000)), AddressClass::Unprivileged);
}

#[test]
fn test_access_intents()
{
    assert!(AccessIntent::Read.readable());
    assert!(!AccessIntent::Read.writable());
    assert!(AccessIntent::Modify.readable() && AccessIntent::Modify.writable());
    assert!(!AccessIntent::Write.readable());

    assert_eq!(AccessIntent::Read.complement(), AccessIntent::Modify);
    assert_eq!(AccessIntent::Modify.complement(), AccessIntent::Read);
    assert_eq!(Direction::Read.foreign_intent(), AccessIntent::Read);
    assert_eq!(Direction::Write.foreign_intent(), AccessIntent::Modify);
    assert_eq!(Direction::Write.to_string(), "write");

    assert!(Protection::ReadWrite.allows_write());
    assert!(!Protection::ReadOnly.allows_write());
}

#[test]
fn test_access_mask_contains()
{
    assert!(AccessMask::ALL.contains(AccessMask::VM_OPERATION));
    assert!(AccessMask::ALL.contains(AccessMask::SET_INFORMATION));
    assert!(!AccessMask::QUERY.contains(AccessMask::TERMINATE));
    assert_eq!(AccessMask::default(), AccessMask::ALL);
}

#[test]
fn test_thread_context_flags()
{
    let source = ThreadContext {
        flags: ContextFlags::FULL,
        pc: Address::new(0x1000),
        sp: Address::new(0x2000),
        fp: Address::new(0x2100),
        general: vec![1, 2, 3],
        status: 0x60,
    };

    let mut integer = ThreadContext::with_flags(ContextFlags::INTEGER);
    integer.apply_from(&source);
    assert_eq!(integer.general, vec![1, 2, 3]);
    assert_eq!(integer.pc, Address::ZERO);

    let mut target = ThreadContext::default();
    target.general = vec![9];
    let control = ThreadContext {
        flags: ContextFlags::CONTROL,
        ..source.clone()
    };
    control.store_into(&mut target);
    assert_eq!(target.pc, Address::new(0x1000));
    assert_eq!(target.status, 0x60);
    assert_eq!(target.general, vec![9], "integer part left untouched");

    assert!(ContextFlags::FULL.contains(ContextFlags::CONTROL));
    assert!(!ContextFlags::CONTROL.contains(ContextFlags::INTEGER));
}
