//! Release actions.
//!
//! A release action destroys a resource through its original concrete type. The
//! exclusive handle stores it by value, while shared handles move it into the
//! control block, where it is erased behind the block vtable.
use std::fmt::{Debug, Formatter};
use std::ptr::NonNull;

/// Action releasing a resource of type `T`.
///
/// Implementations must not panic. Release actions are invoked from destructors,
/// where a panic aborts the process.
pub trait Release<T: ?Sized> {
    /// Releases the resource.
    ///
    /// # Safety
    ///
    /// `ptr` must be a resource owned by the caller, matching this action, which is
    /// not accessed anymore after the call.
    unsafe fn release(&mut self, ptr: NonNull<T>);
}

/// Releases resources allocated with the global allocator by a [`Box`].
///
/// Covers single objects as well as slices, so a `[T]` resource is always
/// released as an array.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefaultRelease;

impl<T: ?Sized> Release<T> for DefaultRelease {
    #[inline]
    unsafe fn release(&mut self, ptr: NonNull<T>) {
        // Safety: By the contract of `Release` the pointer originates from a `Box`.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

/// Release action which does nothing.
///
/// Useful for resources whose storage is managed elsewhere, e.g. statics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoopRelease;

impl<T: ?Sized> Release<T> for NoopRelease {
    #[inline]
    unsafe fn release(&mut self, _ptr: NonNull<T>) {}
}

/// Release action backed by a closure.
///
/// # Examples
///
/// ```
/// use ownership_core::{ExclusiveHandle, FnRelease};
/// use std::ptr::NonNull;
///
/// let raw = Box::into_raw(Box::new(5));
/// let release = FnRelease::new(|ptr: NonNull<i32>| unsafe {
///     drop(Box::from_raw(ptr.as_ptr()));
/// });
///
/// // Safety: `raw` is not owned by any other handle.
/// let handle = unsafe { ExclusiveHandle::from_raw_with(raw, release) };
/// assert_eq!(*handle, 5);
/// ```
#[derive(Clone, Copy)]
pub struct FnRelease<F>(F);

impl<F> FnRelease<F> {
    /// Wraps the closure.
    #[inline]
    pub const fn new(f: F) -> Self {
        Self(f)
    }

    /// Extracts the closure.
    #[inline]
    pub fn into_inner(self) -> F {
        self.0
    }
}

impl<T: ?Sized, F: FnMut(NonNull<T>)> Release<T> for FnRelease<F> {
    #[inline]
    unsafe fn release(&mut self, ptr: NonNull<T>) {
        (self.0)(ptr);
    }
}

impl<F> Debug for FnRelease<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FnRelease")
            .field(&std::any::type_name::<F>())
            .finish()
    }
}
