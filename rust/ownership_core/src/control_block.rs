//! Reference counts and type-erased release actions of shared resources.
// The counting protocol follows the arc and weak types found in the std
// library, which is dual-licensed under Apache 2.0 and MIT terms.

use crate::adoption;
use crate::error::{Error, Result};
use crate::panic::abort_on_panic;
use crate::release::Release;
use crate::sync::atomic::Ordering::{Acquire, Relaxed, Release as ReleaseOrd, SeqCst};
use crate::sync::atomic::{self, AtomicUsize};
use crate::MAX_REFCOUNT;
use std::alloc::Layout;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::process::abort;
use std::ptr::{addr_of_mut, NonNull};

macro_rules! acquire {
    ($x:expr) => {
        atomic::fence(Acquire)
    };
}

/// Value of the weak count while `is_unique` holds it locked.
const WEAK_LOCKED: usize = usize::MAX;

/// Header shared by every control block layout.
#[repr(C)]
pub(crate) struct ControlBlock {
    strong: AtomicUsize,

    // the value `WEAK_LOCKED` acts as a sentinel for temporarily "locking" the
    // ability to downgrade strong references; this is used to avoid races in
    // `try_lock_unique`.
    weak: AtomicUsize,
    vtable: &'static BlockVTable,
}

/// Operations bound to the concrete layout of a control block.
pub(crate) struct BlockVTable {
    /// Destroys the managed object.
    release: unsafe fn(NonNull<ControlBlock>),
    /// Frees the block allocation.
    deallocate: unsafe fn(NonNull<ControlBlock>),
}

/// Object and control block pointer of a shared or weak handle.
pub(crate) struct RawShared<T: ?Sized> {
    pub(crate) ptr: NonNull<T>,
    pub(crate) block: NonNull<ControlBlock>,
}

impl<T: ?Sized> Clone for RawShared<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for RawShared<T> {}

impl<T: ?Sized> RawShared<T> {
    /// Returns the control block.
    ///
    /// # Safety
    ///
    /// The caller must own a strong or weak reference to the block.
    #[inline]
    pub(crate) unsafe fn block<'a>(self) -> &'a ControlBlock {
        // Safety: The block is alive while the caller owns a reference.
        unsafe { self.block.as_ref() }
    }

    /// Replaces the object pointer, keeping the block.
    #[inline]
    pub(crate) fn map<U: ?Sized>(self, f: impl FnOnce(NonNull<T>) -> NonNull<U>) -> RawShared<U> {
        RawShared {
            ptr: f(self.ptr),
            block: self.block,
        }
    }
}

impl ControlBlock {
    fn new(vtable: &'static BlockVTable) -> Self {
        Self {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            vtable,
        }
    }

    /// Returns the number of strong references.
    #[inline]
    pub(crate) fn strong_count(&self) -> usize {
        self.strong.load(SeqCst)
    }

    /// Returns the number of weak references, excluding the one held
    /// collectively by the strong references.
    #[inline]
    pub(crate) fn weak_count(&self) -> usize {
        let weak = self.weak.load(SeqCst);
        let strong = self.strong.load(SeqCst);
        // If the weak count is currently locked, the value of the count was 1
        // just before taking the lock.
        if strong == 0 || weak == WEAK_LOCKED {
            0
        } else {
            // Since we observed that there was at least one strong reference
            // after reading the weak count, the implicit weak reference
            // was still around when we observed the weak count.
            weak - 1
        }
    }

    /// Increments the strong count.
    ///
    /// The caller must own a strong reference.
    #[inline]
    pub(crate) fn increment_strong(&self) {
        // Using a relaxed ordering is alright here, as knowledge of the
        // original reference prevents other threads from erroneously deleting
        // the object.
        let old_size = self.strong.fetch_add(1, Relaxed);

        // Guard against massive refcounts in case someone is leaking handles.
        if old_size > MAX_REFCOUNT {
            abort();
        }
    }

    /// Increments the strong count, unless it already dropped to zero.
    ///
    /// The caller must own a weak reference.
    #[inline]
    pub(crate) fn try_increment_strong(&self) -> bool {
        // We use a CAS loop to increment the strong count instead of a
        // fetch_add as this function must never take the reference count
        // from zero to one.
        //
        // Relaxed load because any write of 0 that we can observe leaves the
        // field in a permanently zero state, and any other value is confirmed
        // via the CAS below.
        let mut n = self.strong.load(Relaxed);

        loop {
            if n == 0 {
                return false;
            }

            if n > MAX_REFCOUNT {
                abort();
            }

            // Acquire on success synchronizes with the construction of a
            // self-referencing object, whose weak reference may be locked
            // on another thread.
            match self
                .strong
                .compare_exchange_weak(n, n + 1, Acquire, Relaxed)
            {
                Ok(_) => return true,
                Err(old) => n = old,
            }
        }
    }

    /// Increments the weak count on behalf of a strong reference.
    ///
    /// The caller must own a strong reference.
    #[inline]
    pub(crate) fn downgrade(&self) {
        // This Relaxed is OK because we're checking the value in the CAS
        // below.
        let mut cur = self.weak.load(Relaxed);

        loop {
            // check if the weak counter is currently "locked"; if so, spin.
            if cur == WEAK_LOCKED {
                crate::sync::spin_loop();
                cur = self.weak.load(Relaxed);
                continue;
            }

            if cur > MAX_REFCOUNT {
                abort();
            }

            // Acquire synchronizes with the release of the lock in
            // `try_lock_unique`.
            match self
                .weak
                .compare_exchange_weak(cur, cur + 1, Acquire, Relaxed)
            {
                Ok(_) => return,
                Err(old) => cur = old,
            }
        }
    }

    /// Increments the weak count on behalf of a weak reference.
    ///
    /// The caller must own a weak reference.
    #[inline]
    pub(crate) fn increment_weak(&self) {
        // The weak count can only be locked when there are no other weak
        // references in existence, so we can ignore the lock here.
        let old_size = self.weak.fetch_add(1, Relaxed);
        if old_size > MAX_REFCOUNT {
            abort();
        }
    }

    /// Returns whether the caller owns the only strong reference and no weak
    /// references exist.
    ///
    /// The caller must own a strong reference.
    pub(crate) fn try_lock_unique(&self) -> bool {
        // lock the weak count if we appear to be the sole weak reference
        // holder.
        //
        // The acquire here ensures a happens-before relationship with any
        // writes to `strong` prior to decrements of the `weak` count.
        if self
            .weak
            .compare_exchange(1, WEAK_LOCKED, Acquire, Relaxed)
            .is_ok()
        {
            // This needs to be an `Acquire` to synchronize with the decrement
            // of the `strong` counter in `release_strong`.
            let unique = self.strong.load(Acquire) == 1;

            // The release write here synchronizes with a read in `downgrade`,
            // effectively preventing the above read of `strong` from happening
            // after the write.
            self.weak.store(1, ReleaseOrd);
            unique
        } else {
            false
        }
    }

    /// Drops a strong reference, releasing the resource if it was the last one.
    ///
    /// # Safety
    ///
    /// The caller must own a strong reference, which is consumed.
    #[inline]
    pub(crate) unsafe fn release_strong(this: NonNull<Self>) {
        // Safety: The block is alive, as we own a strong reference.
        let block = unsafe { this.as_ref() };

        // Because `fetch_sub` is already atomic, we do not need to synchronize
        // with other threads unless we are going to release the object.
        if block.strong.fetch_sub(1, ReleaseOrd) != 1 {
            return;
        }

        // This fence is needed to prevent reordering of use of the data and
        // release of the data. Use of the data through any other reference
        // happens before decreasing the count, which happens before this
        // fence, which happens before the release.
        acquire!(block.strong);

        // Safety: We performed the transition to zero.
        unsafe { Self::drop_slow(this) };
    }

    // Non-inlined part of `release_strong`.
    #[inline(never)]
    unsafe fn drop_slow(this: NonNull<Self>) {
        // Safety: The block is alive, the implicit weak reference is still held.
        let release = unsafe { this.as_ref().vtable.release };

        // Destroy the object at this time, even though we must not free the
        // block itself (there might still be weak references lying around).
        log::trace!("releasing resource of control block {this:p}");
        // Safety: The strong count reached zero, so the release runs exactly once.
        abort_on_panic(|| unsafe { release(this) });

        // Drop the weak reference collectively held by all strong references.
        //
        // Safety: The implicit weak reference is owned by the strong group.
        unsafe { Self::release_weak(this) };
    }

    /// Drops a weak reference, deallocating the block if it was the last one.
    ///
    /// # Safety
    ///
    /// The caller must own a weak reference, which is consumed.
    #[inline]
    pub(crate) unsafe fn release_weak(this: NonNull<Self>) {
        // Safety: The block is alive, as we own a weak reference.
        let block = unsafe { this.as_ref() };

        // It's not necessary to check for the locked state here, because the
        // weak count can only be locked if there was precisely one weak
        // reference, which is held by a strong reference running
        // `try_lock_unique`.
        if block.weak.fetch_sub(1, ReleaseOrd) != 1 {
            return;
        }

        acquire!(block.weak);
        let deallocate = block.vtable.deallocate;

        log::trace!("deallocating control block {this:p}");
        // Safety: Both counts are zero, nobody can observe the block anymore.
        unsafe { deallocate(this) };
    }
}

/// Allocates uninitialized memory for a block.
fn allocate<B>() -> Result<NonNull<B>> {
    let layout = Layout::new::<B>();
    debug_assert_ne!(layout.size(), 0, "blocks contain the counts");

    // Safety: The layout has a non-zero size.
    let ptr = unsafe { std::alloc::alloc(layout) };
    NonNull::new(ptr.cast::<B>()).ok_or_else(|| {
        log::debug!("control block allocation of {layout:?} failed");
        Error::AllocationFailure { layout }
    })
}

/// Drops the header in place and frees the block.
///
/// # Safety
///
/// `this` must have been allocated by [`allocate::<B>`], with the header as
/// its first field. The block may not be used afterwards.
unsafe fn deallocate<B>(this: NonNull<ControlBlock>) {
    // Safety: The header is initialized and not used anymore.
    unsafe { std::ptr::drop_in_place(this.as_ptr()) };

    // Safety: The block was allocated with the layout of `B`.
    unsafe { std::alloc::dealloc(this.as_ptr().cast(), Layout::new::<B>()) };
}

/// Block sharing its allocation with the managed object.
#[repr(C)]
pub(crate) struct InlineBlock<T> {
    header: ControlBlock,
    value: MaybeUninit<T>,
}

impl<T> InlineBlock<T> {
    const VTABLE: BlockVTable = BlockVTable {
        release: Self::release,
        deallocate: deallocate::<Self>,
    };

    /// Moves `value` into a new combined allocation.
    ///
    /// The returned block owns one strong and one weak reference.
    pub(crate) fn try_new(value: T) -> Result<RawShared<T>> {
        let block = allocate::<Self>()?;
        // Safety: The allocation is valid for writes of `Self`.
        unsafe {
            block.as_ptr().write(InlineBlock {
                header: ControlBlock::new(&Self::VTABLE),
                value: MaybeUninit::new(value),
            })
        };

        // Safety: The pointer is derived from a non-null allocation.
        let ptr = unsafe { NonNull::new_unchecked(addr_of_mut!((*block.as_ptr()).value)) };
        Ok(RawShared {
            ptr: ptr.cast(),
            block: block.cast(),
        })
    }

    unsafe fn release(this: NonNull<ControlBlock>) {
        let this = this.cast::<Self>();
        // Safety: The value was initialized in `try_new` and is dropped only once.
        unsafe { (*addr_of_mut!((*this.as_ptr()).value)).assume_init_drop() };
    }
}

/// Block adopting a separately allocated object.
#[repr(C)]
pub(crate) struct AdoptedBlock<T: ?Sized, R> {
    header: ControlBlock,
    ptr: NonNull<T>,
    release: ManuallyDrop<R>,
}

impl<T: ?Sized, R: Release<T>> AdoptedBlock<T, R> {
    const VTABLE: BlockVTable = BlockVTable {
        release: Self::release,
        deallocate: deallocate::<Self>,
    };

    /// Allocates a block owning `ptr`.
    ///
    /// On failure the ownership of `ptr` and `release` is handed back.
    ///
    /// # Safety
    ///
    /// `ptr` must be releasable by `release`.
    pub(crate) unsafe fn try_new(ptr: NonNull<T>, release: R) -> Result<RawShared<T>, (Error, R)> {
        let block = match allocate::<Self>() {
            Ok(block) => block,
            Err(e) => return Err((e, release)),
        };

        // Safety: The allocation is valid for writes of `Self`.
        unsafe {
            block.as_ptr().write(AdoptedBlock {
                header: ControlBlock::new(&Self::VTABLE),
                ptr,
                release: ManuallyDrop::new(release),
            })
        };

        Ok(RawShared {
            ptr,
            block: block.cast(),
        })
    }

    unsafe fn release(this: NonNull<ControlBlock>) {
        let this = this.cast::<Self>().as_ptr();

        // Safety: The block is initialized and the release action is taken
        // only once.
        let (ptr, mut release) =
            unsafe { ((*this).ptr, ManuallyDrop::take(&mut (*this).release)) };

        // Safety: The object is still alive.
        unsafe { adoption::relinquish(ptr) };

        // Safety: The object is owned by the block and not used anymore.
        unsafe { release.release(ptr) };
    }
}
