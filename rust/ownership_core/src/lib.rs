//! Ownership and reference-lifetime handles.
//!
//! The crate provides three kinds of owning or observing handles:
//!
//! - [`ExclusiveHandle`]: sole ownership of a resource, released exactly once when
//!   the handle is dropped, reset or replaced.
//! - [`SharedHandle`]: cooperative ownership through an atomic reference count
//!   stored in a control block, together with a type-erased release action.
//! - [`WeakHandle`]: a non-owning observer of a shared resource, which may be
//!   locked back into a [`SharedHandle`] while the resource is alive.
//!
//! Types that need a handle to themselves embed a [`SelfReference`] and implement
//! [`SharedFromSelf`]. [`ScopeGuard`] is the deferred-action primitive used on the
//! failure paths of the handles.
//!
//! # Examples
//!
//! ```
//! use ownership_core::{SharedHandle, WeakHandle};
//!
//! let shared = SharedHandle::new(5);
//! let weak: WeakHandle<i32> = SharedHandle::downgrade(&shared);
//! assert_eq!(*weak.lock().unwrap(), 5);
//!
//! drop(shared);
//! assert!(weak.lock().is_none());
//! ```
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links
)]

extern crate static_assertions as sa;

mod adoption;
mod control_block;
mod sync;

#[cfg(all(test, loom))]
mod loom;

pub mod error;
pub mod exclusive;
pub mod panic;
pub mod release;
pub mod scope_guard;
pub mod self_ref;
pub mod shared;
pub mod weak;

pub use error::{Error, Result};
pub use exclusive::ExclusiveHandle;
pub use release::{DefaultRelease, FnRelease, NoopRelease, Release};
pub use scope_guard::ScopeGuard;
pub use self_ref::{SelfReference, SharedFromSelf};
pub use shared::SharedHandle;
pub use weak::WeakHandle;

/// A soft limit on the amount of references that may be made to a shared resource.
///
/// Going above this limit will abort the program, although not necessarily at
/// _exactly_ `MAX_REFCOUNT + 1` references.
pub const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Coerces a handle to a handle of an unsized type, e.g. a trait object.
///
/// Works with [`SharedHandle`], [`WeakHandle`] and [`ExclusiveHandle`]. The
/// conversion only performs an unsizing coercion of the object pointer, so the
/// result refers to the same object and is released through its original type.
///
/// # Examples
///
/// ```
/// use ownership_core::{upcast, SharedHandle};
/// use std::fmt::Display;
///
/// let x = SharedHandle::new(5u32);
/// let y: SharedHandle<dyn Display> = upcast!(x => dyn Display);
/// assert_eq!(y.to_string(), "5");
/// ```
#[macro_export]
macro_rules! upcast {
    ($handle:expr => $target:ty) => {{
        let handle = $handle;
        // Safety: The closure is an unsizing coercion, which keeps the address.
        unsafe {
            $crate::__private::Upcast(handle)
                .map_ptr(|ptr| -> ::core::ptr::NonNull<$target> { ptr })
        }
    }};
}

#[doc(hidden)]
pub mod __private {
    use crate::{ExclusiveHandle, Release, SharedHandle, WeakHandle};
    use std::ptr::NonNull;

    /// Handle wrapper used by [`upcast!`](crate::upcast).
    ///
    /// The wrapper does not deref to the resource, so `map_ptr` always resolves
    /// to the handle's own pointer mapping.
    #[derive(Debug)]
    pub struct Upcast<H>(pub H);

    impl<T: ?Sized> Upcast<SharedHandle<T>> {
        /// # Safety
        ///
        /// See [`SharedHandle::map_ptr`].
        #[inline]
        pub unsafe fn map_ptr<U: ?Sized>(
            self,
            f: impl FnOnce(NonNull<T>) -> NonNull<U>,
        ) -> SharedHandle<U> {
            // Safety: Guaranteed by the caller.
            unsafe { SharedHandle::map_ptr(self.0, f) }
        }
    }

    impl<T: ?Sized> Upcast<WeakHandle<T>> {
        /// # Safety
        ///
        /// See [`WeakHandle::map_ptr`].
        #[inline]
        pub unsafe fn map_ptr<U: ?Sized>(
            self,
            f: impl FnOnce(NonNull<T>) -> NonNull<U>,
        ) -> WeakHandle<U> {
            // Safety: Guaranteed by the caller.
            unsafe { WeakHandle::map_ptr(self.0, f) }
        }
    }

    impl<T: ?Sized, R: Release<T>> Upcast<ExclusiveHandle<T, R>> {
        /// # Safety
        ///
        /// See [`ExclusiveHandle::map_ptr`].
        #[inline]
        pub unsafe fn map_ptr<U: ?Sized>(
            self,
            f: impl FnOnce(NonNull<T>) -> NonNull<U>,
        ) -> ExclusiveHandle<U, R>
        where
            R: Release<U>,
        {
            // Safety: Guaranteed by the caller.
            unsafe { ExclusiveHandle::map_ptr(self.0, f) }
        }
    }
}
