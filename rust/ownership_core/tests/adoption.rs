//! Detection of resources adopted by more than one handle.
#![cfg(debug_assertions)]

use ownership_core::{DefaultRelease, Error, ExclusiveHandle, NoopRelease, SharedHandle};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;
use test_log::test;

#[test]
fn shared_adoption_of_owned_resource_fails() {
    let exclusive = ExclusiveHandle::new(17u64);
    let raw = exclusive.as_ptr().map_or(std::ptr::null_mut(), NonNull::as_ptr);

    // Safety: Adoption is rejected before the resource is touched.
    let result = unsafe { SharedHandle::from_raw_with(raw, NoopRelease) };
    assert_eq!(
        result.map(|_| ()),
        Err(Error::ResourceAlreadyOwned {
            address: raw as usize
        })
    );
    assert_eq!(*exclusive, 17);
}

#[test]
fn exclusive_adoption_of_owned_resource_panics() {
    let shared = SharedHandle::from_exclusive(ExclusiveHandle::new(5u32)).unwrap();
    let raw = SharedHandle::as_ptr(&shared).map_or(std::ptr::null_mut(), NonNull::as_ptr);

    let adopted = catch_unwind(AssertUnwindSafe(|| {
        // Safety: The noop action never touches the resource.
        unsafe { ExclusiveHandle::from_raw_with(raw, NoopRelease) }
    }));
    assert!(adopted.is_err());
    assert_eq!(*shared, 5);
}

#[test]
fn released_resource_can_be_adopted_again() {
    let mut first = ExclusiveHandle::new(String::from("moved"));
    let raw = first.release().unwrap();

    // Safety: `raw` was released above.
    let shared = unsafe { SharedHandle::from_raw_with(raw.as_ptr(), DefaultRelease) }.unwrap();
    assert_eq!(shared.as_str(), "moved");

    drop(shared);
    // The allocator may hand out the same address again.
    let value = ExclusiveHandle::new(String::from("fresh"));
    assert_eq!(value.as_str(), "fresh");
}

#[test]
fn independent_resources_coexist() {
    let shared = SharedHandle::new(1u8);
    let exclusive = ExclusiveHandle::new(2u8);
    assert_eq!(*shared + *exclusive, 3);
}
