//! Allocation accounting of the handles, using an instrumented global allocator.
//!
//! The adoption registry allocates on its own, so the suite is skipped when it
//! is compiled in.
#![cfg(not(feature = "track-adoption"))]

use ownership_core::{Error, ExclusiveHandle, FnRelease, SharedHandle, WeakHandle};
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::Mutex;

struct Instrumented;

thread_local! {
    static LIVE: Cell<isize> = const { Cell::new(0) };
    static FAIL_NEXT: Cell<bool> = const { Cell::new(false) };
}

unsafe impl GlobalAlloc for Instrumented {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if FAIL_NEXT.with(|fail| fail.replace(false)) {
            return std::ptr::null_mut();
        }

        // Safety: Forwarded from the caller.
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            LIVE.with(|live| live.set(live.get() + 1));
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        LIVE.with(|live| live.set(live.get() - 1));
        // Safety: Forwarded from the caller.
        unsafe { System.dealloc(ptr, layout) };
    }
}

#[global_allocator]
static ALLOCATOR: Instrumented = Instrumented;

/// Returns the allocations made by `f` on the current thread, which are still
/// alive after it returns.
fn leaked_by(f: impl FnOnce()) -> isize {
    let before = LIVE.with(Cell::get);
    f();
    LIVE.with(Cell::get) - before
}

#[test]
fn weak_cycle_does_not_leak() {
    struct Peer {
        other: Mutex<WeakHandle<Peer>>,
        _payload: Vec<u64>,
    }

    let peer = || {
        SharedHandle::new(Peer {
            other: Mutex::new(WeakHandle::new()),
            _payload: vec![1, 2, 3],
        })
    };

    let leaked = leaked_by(|| {
        let a = peer();
        let b = peer();
        *a.other.lock().unwrap() = SharedHandle::downgrade(&b);
        *b.other.lock().unwrap() = SharedHandle::downgrade(&a);

        assert!(a.other.lock().unwrap().lock().is_some());
        drop(a);
        assert!(b.other.lock().unwrap().lock().is_none());
        drop(b);
    });
    assert_eq!(leaked, 0);
}

#[test]
fn weak_keeps_only_the_block() {
    let mut weak = WeakHandle::new();
    let leaked = leaked_by(|| {
        let shared = SharedHandle::new(vec![0u8; 64]);
        weak = SharedHandle::downgrade(&shared);
    });
    // The vector buffer is gone, the control block is not.
    assert_eq!(leaked, 1);
    assert!(weak.lock().is_none());

    let freed = leaked_by(|| drop(weak));
    assert_eq!(freed, -1);
}

#[test]
fn failed_adoption_releases_resource() {
    let released = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let leaked = leaked_by(|| {
        let counter = released.clone();
        let release = FnRelease::new(move |ptr: NonNull<String>| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            // Safety: The resource was boxed below.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        });
        let raw = Box::into_raw(Box::new(String::from("adopted")));

        FAIL_NEXT.with(|fail| fail.set(true));
        // Safety: `raw` is owned by nothing else.
        let result = unsafe { SharedHandle::from_raw_with(raw, release) };
        assert!(matches!(result, Err(Error::AllocationFailure { .. })));
    });

    assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(leaked, 0);
}

#[test]
fn failed_allocation_is_reported() {
    FAIL_NEXT.with(|fail| fail.set(true));
    let result = SharedHandle::try_new([0u64; 4]);
    assert_eq!(
        result.map(|_| ()),
        Err(Error::AllocationFailure {
            layout: Layout::new::<SharedHandleBlock>()
        })
    );
}

#[test]
fn failed_exclusive_allocation_is_reported() {
    let leaked = leaked_by(|| {
        let value = [String::from("dropped"), String::from("on failure")];
        FAIL_NEXT.with(|fail| fail.set(true));
        let result = ExclusiveHandle::try_new(value);
        assert_eq!(
            result.map(|_| ()),
            Err(Error::AllocationFailure {
                layout: Layout::new::<[String; 2]>()
            })
        );
    });
    assert_eq!(leaked, 0);

    let handle = ExclusiveHandle::try_new(7u32).unwrap();
    assert_eq!(*handle, 7);
}

// Header of three words followed by the value.
#[repr(C)]
struct SharedHandleBlock {
    _counts: [usize; 3],
    _value: [u64; 4],
}
