use crate::{SharedHandle, WeakHandle};
use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::sync::Arc;
use loom::thread;

struct Canary(Arc<AtomicUsize>);

impl Drop for Canary {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn concurrent_drop_releases_once() {
    loom::model(|| {
        let drops = Arc::new(AtomicUsize::new(0));
        let a = SharedHandle::new(Canary(drops.clone()));
        let b = a.clone();

        let worker = thread::spawn(move || drop(b));
        drop(a);
        worker.join().expect("joining can not fail");

        assert_eq!(drops.load(Ordering::SeqCst), 1);
    })
}

#[test]
fn lock_races_with_last_drop() {
    loom::model(|| {
        let drops = Arc::new(AtomicUsize::new(0));
        let shared = SharedHandle::new(Canary(drops.clone()));
        let weak: WeakHandle<Canary> = SharedHandle::downgrade(&shared);

        let worker = thread::spawn(move || {
            // Either the resource is still alive while locked, or it is gone.
            match weak.lock() {
                Some(locked) => assert_eq!(locked.0.load(Ordering::SeqCst), 0),
                None => assert!(weak.expired()),
            }
        });
        drop(shared);
        worker.join().expect("joining can not fail");

        assert_eq!(drops.load(Ordering::SeqCst), 1);
    })
}

#[test]
fn downgrade_races_with_uniqueness_check() {
    loom::model(|| {
        let mut shared = SharedHandle::new(0usize);
        let other = shared.clone();

        let worker = thread::spawn(move || {
            let weak = SharedHandle::downgrade(&other);
            drop(other);
            assert!(!weak.expired());
        });

        // Races with the weak count lock taken by the worker's downgrade.
        let _ = SharedHandle::is_unique(&mut shared);
        worker.join().expect("joining can not fail");

        assert!(SharedHandle::is_unique(&mut shared));
        assert_eq!(SharedHandle::get_mut(&mut shared).map(|v| *v), Some(0));
    })
}
