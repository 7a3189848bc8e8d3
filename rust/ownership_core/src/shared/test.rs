use crate::{upcast, ExclusiveHandle, FnRelease, SharedHandle, WeakHandle};
use std::cell::RefCell;
use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Canary(Arc<AtomicUsize>);

impl Drop for Canary {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn canary() -> (Arc<AtomicUsize>, Canary) {
    let drops = Arc::new(AtomicUsize::new(0));
    (drops.clone(), Canary(drops))
}

#[test]
fn float_nan_ne() {
    let x = SharedHandle::new(f32::NAN);
    assert_ne!(x, x);
    assert!(!(x == x));
}

#[test]
fn partial_eq() {
    struct TestPEq(RefCell<usize>);
    impl PartialEq for TestPEq {
        fn eq(&self, other: &TestPEq) -> bool {
            *self.0.borrow_mut() += 1;
            *other.0.borrow_mut() += 1;
            true
        }
    }
    let x = SharedHandle::new(TestPEq(RefCell::new(0)));
    assert!(x == x);
    assert!(!(x != x));
    assert_eq!(*x.0.borrow(), 4);
}

#[test]
fn ordering_and_hash() {
    let five = SharedHandle::new(5);
    let six = SharedHandle::new(6);
    assert!(five < six);
    assert_eq!(five.cmp(&five.clone()), std::cmp::Ordering::Equal);
    assert!(SharedHandle::<i32>::empty() < five);

    let set: HashSet<_> = [five.clone(), SharedHandle::new(5), six].into_iter().collect();
    assert_eq!(set.len(), 2);
}

#[test]
fn release_exactly_once() {
    let (drops, value) = canary();
    let a = SharedHandle::new(value);
    let b = a.clone();
    let c = b.clone();

    drop(a);
    drop(c);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(b);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn copy_three_destroy_three() {
    let (drops, value) = canary();
    let first = SharedHandle::new(value);
    let copies: Vec<_> = (0..3).map(|_| first.clone()).collect();
    assert_eq!(SharedHandle::use_count(&first), 4);

    for (destroyed, copy) in copies.into_iter().enumerate() {
        drop(copy);
        assert_eq!(SharedHandle::use_count(&first), 3 - destroyed);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(SharedHandle::use_count(&first), 1);

    drop(first);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn use_count_tracks_handles() {
    let mut a = SharedHandle::new(String::from("counted"));
    assert_eq!(SharedHandle::use_count(&a), 1);

    let b = a.clone();
    let weak = SharedHandle::downgrade(&b);
    assert_eq!(SharedHandle::use_count(&a), 2);
    assert_eq!(SharedHandle::weak_count(&a), 1);
    assert_eq!(weak.use_count(), 2);

    let moved = b;
    assert_eq!(SharedHandle::use_count(&moved), 2);

    SharedHandle::reset(&mut a);
    SharedHandle::reset(&mut a);
    assert!(SharedHandle::is_empty(&a));
    assert_eq!(SharedHandle::use_count(&a), 0);
    assert_eq!(SharedHandle::use_count(&moved), 1);
}

#[test]
fn empty_handle() {
    let empty = SharedHandle::<u8>::empty();
    assert!(SharedHandle::get(&empty).is_none());
    assert_eq!(SharedHandle::use_count(&empty), 0);
    assert_eq!(SharedHandle::weak_count(&empty), 0);
    assert!(SharedHandle::ptr_eq(&empty, &empty.clone()));
    assert_eq!(format!("{empty:?}"), "(empty)");
    assert!(SharedHandle::into_raw_parts(empty).is_none());
}

#[test]
#[should_panic(expected = "dereferenced an empty `SharedHandle`")]
fn deref_empty_panics() {
    let empty = SharedHandle::<u8>::empty();
    let _ = *empty;
}

#[test]
fn get_mut_requires_uniqueness() {
    let mut x = SharedHandle::new(3);
    *SharedHandle::get_mut(&mut x).unwrap() = 4;
    assert_eq!(*x, 4);

    let y = x.clone();
    assert!(SharedHandle::get_mut(&mut x).is_none());
    drop(y);
    assert!(SharedHandle::get_mut(&mut x).is_some());

    let weak = SharedHandle::downgrade(&x);
    assert!(!SharedHandle::is_unique(&mut x));
    drop(weak);
    assert!(SharedHandle::is_unique(&mut x));
}

#[test]
fn raw_parts_round_trip() {
    let (drops, value) = canary();
    let handle = SharedHandle::new(value);
    let weak = SharedHandle::downgrade(&handle);

    let (ptr, block) = SharedHandle::into_raw_parts(handle).unwrap();
    assert_eq!(weak.use_count(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    // Safety: The parts were returned by `into_raw_parts` above.
    let handle = unsafe { SharedHandle::from_raw_parts(ptr, block) };
    assert_eq!(SharedHandle::as_ptr(&handle), Some(ptr));
    drop(handle);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(weak.expired());
}

#[test]
fn upcast_releases_concrete_type() {
    trait Named {
        fn name(&self) -> &'static str;
    }

    impl Named for Canary {
        fn name(&self) -> &'static str {
            "canary"
        }
    }

    let (drops, value) = canary();
    let concrete = SharedHandle::new(value);
    let weak: WeakHandle<dyn Named> = upcast!(SharedHandle::downgrade(&concrete) => dyn Named);
    let erased: SharedHandle<dyn Named> = upcast!(concrete => dyn Named);
    assert_eq!(erased.name(), "canary");
    assert_eq!(weak.lock().map(|h| h.name()), Some("canary"));

    drop(erased);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(weak.lock().is_none());
}

#[test]
fn adopted_release_runs_once() {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let release = FnRelease::new(move |ptr: NonNull<[u32]>| {
        counter.fetch_add(1, Ordering::SeqCst);
        // Safety: The resource was boxed below.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    });

    let raw = Box::into_raw(vec![1u32, 2, 3].into_boxed_slice());
    // Safety: `raw` is not owned by anything else.
    let a = unsafe { SharedHandle::from_raw_with(raw, release) }.unwrap();
    let b = a.clone();
    assert_eq!(b.iter().sum::<u32>(), 6);

    drop(a);
    assert_eq!(released.load(Ordering::SeqCst), 0);
    drop(b);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn adopt_null_is_empty() {
    let release = FnRelease::new(|_: NonNull<u8>| unreachable!());
    // Safety: A null pointer is never released.
    let handle = unsafe { SharedHandle::from_raw_with(std::ptr::null_mut(), release) }.unwrap();
    assert!(SharedHandle::is_empty(&handle));
}

#[test]
fn from_exclusive_keeps_release_action() {
    let (drops, value) = canary();
    let exclusive = ExclusiveHandle::new(value);
    let shared = SharedHandle::from_exclusive(exclusive).unwrap();
    let other = shared.clone();
    drop(shared);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(other);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    let empty = SharedHandle::from_exclusive(ExclusiveHandle::<u8>::empty()).unwrap();
    assert!(SharedHandle::is_empty(&empty));
}

#[test]
fn conversions() {
    let from: SharedHandle<i32> = 7.into();
    assert_eq!(*from, 7);

    let default = SharedHandle::<String>::default();
    assert_eq!(default.as_str(), "");
    assert_eq!(SharedHandle::use_count(&default), 1);

    assert_eq!(from.to_string(), "7");
    assert_eq!(
        format!("{from:p}"),
        format!("{:p}", SharedHandle::as_ptr(&from).unwrap())
    );
}

#[test]
fn methods_of_the_resource_are_not_shadowed() {
    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Counter {
        fn reset(&self) {
            self.0.store(0, Ordering::SeqCst);
        }

        fn map_ptr(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    let counter = SharedHandle::new(Counter(AtomicUsize::new(3)));
    let other = counter.clone();
    assert_eq!(counter.map_ptr(), 3);

    counter.reset();
    assert_eq!(other.map_ptr(), 0);
    assert_eq!(SharedHandle::use_count(&counter), 2);

    let upcast: SharedHandle<Counter> = upcast!(counter => Counter);
    assert!(SharedHandle::ptr_eq(&upcast, &other));
}
