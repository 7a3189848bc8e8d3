//! Definition of a handle with shared ownership of a resource.
use crate::adoption;
use crate::control_block::{AdoptedBlock, ControlBlock, InlineBlock, RawShared};
use crate::error::{Error, Result};
use crate::exclusive::ExclusiveHandle;
use crate::panic::abort_on_panic;
use crate::release::Release;
use crate::scope_guard::ScopeGuard;
use crate::self_ref::SharedFromSelf;
use crate::weak::WeakHandle;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter, Pointer};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;

#[cfg(test)]
mod test;

/// A thread-safe reference-counting handle, akin to an [`Arc`](std::sync::Arc)
/// that may be empty and may adopt resources with a custom release action.
///
/// The reference counts live in a control block, which is either allocated
/// together with the object or separately when adopting an existing resource.
/// The release action is stored in the control block, so the resource is always
/// released through its concrete type, even after an [`upcast!`](crate::upcast).
///
/// Most operations are associated functions, like `SharedHandle::downgrade(&h)`,
/// so that they do not shadow methods of the inner type.
///
/// # Examples
///
/// ```
/// use ownership_core::SharedHandle;
///
/// let a = SharedHandle::new(vec![1, 2, 3]);
/// let b = a.clone();
/// assert_eq!(SharedHandle::use_count(&a), 2);
///
/// drop(a);
/// assert_eq!(SharedHandle::use_count(&b), 1);
/// assert_eq!(b.len(), 3);
/// ```
pub struct SharedHandle<T: ?Sized> {
    inner: Option<RawShared<T>>,
    phantom: PhantomData<T>,
}

impl<T> SharedHandle<T> {
    /// Moves the value into a new combined allocation.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::SharedHandle;
    ///
    /// let five = SharedHandle::new(5);
    /// assert_eq!(*five, 5);
    /// ```
    #[inline]
    pub fn new(value: T) -> Self {
        Self::try_new(value).unwrap_or_else(allocation_failed)
    }

    /// Moves the value into a new combined allocation, reporting an allocation
    /// failure instead of aborting.
    #[inline]
    pub fn try_new(value: T) -> Result<Self> {
        InlineBlock::try_new(value).map(Self::from_raw_shared)
    }

    /// Moves the value into a new combined allocation and attaches the handle to
    /// the [`SelfReference`](crate::SelfReference) of the value.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::{SelfReference, SharedFromSelf, SharedHandle};
    ///
    /// struct Node {
    ///     this: SelfReference<Node>,
    /// }
    ///
    /// impl SharedFromSelf for Node {
    ///     fn self_reference(&self) -> &SelfReference<Self> {
    ///         &self.this
    ///     }
    /// }
    ///
    /// let node = SharedHandle::new_cyclic_self(Node { this: SelfReference::new() });
    /// let again = node.shared_from_self().unwrap();
    /// assert!(SharedHandle::ptr_eq(&node, &again));
    /// ```
    #[inline]
    pub fn new_cyclic_self(value: T) -> Self
    where
        T: SharedFromSelf,
    {
        Self::try_new_cyclic_self(value).unwrap_or_else(allocation_failed)
    }

    /// Fallible version of [`SharedHandle::new_cyclic_self`].
    pub fn try_new_cyclic_self(value: T) -> Result<Self>
    where
        T: SharedFromSelf,
    {
        let this = Self::try_new(value)?;
        Self::attach_self_reference(&this);
        Ok(this)
    }
}

impl<T: ?Sized> SharedHandle<T> {
    /// Constructs a handle owning nothing.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            inner: None,
            phantom: PhantomData,
        }
    }

    /// Adopts a resource, which is released with `release` once the last strong
    /// handle is gone. A null pointer yields an empty handle.
    ///
    /// If the control block can not be allocated, `release` is invoked on the
    /// resource before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the control block can not be
    /// allocated. With the `track-adoption` feature enabled, debug builds return
    /// [`Error::ResourceAlreadyOwned`] without touching the resource if it is
    /// owned by another handle.
    ///
    /// # Safety
    ///
    /// The pointer must be releasable by `release` and may not be owned by
    /// anything else.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::{FnRelease, SharedHandle};
    /// use std::ptr::NonNull;
    ///
    /// let raw = Box::into_raw(Box::new(String::from("adopted")));
    /// let release = FnRelease::new(|ptr: NonNull<String>| unsafe {
    ///     drop(Box::from_raw(ptr.as_ptr()));
    /// });
    ///
    /// // Safety: `raw` is not owned by anything else.
    /// let shared = unsafe { SharedHandle::from_raw_with(raw, release) }.unwrap();
    /// assert_eq!(shared.as_str(), "adopted");
    /// ```
    pub unsafe fn from_raw_with<R>(raw: *mut T, release: R) -> Result<Self>
    where
        R: Release<T> + Send + 'static,
    {
        match NonNull::new(raw) {
            // Safety: Guaranteed by the caller.
            Some(ptr) => unsafe { Self::adopt(ptr, release) },
            None => Ok(Self::empty()),
        }
    }

    /// Adopts a resource like [`SharedHandle::from_raw_with`] and attaches the
    /// new handle to the [`SelfReference`](crate::SelfReference) of the resource.
    ///
    /// # Errors
    ///
    /// See [`SharedHandle::from_raw_with`].
    ///
    /// # Safety
    ///
    /// See [`SharedHandle::from_raw_with`].
    pub unsafe fn from_raw_with_cyclic_self<R>(raw: *mut T, release: R) -> Result<Self>
    where
        T: SharedFromSelf,
        R: Release<T> + Send + 'static,
    {
        // Safety: Guaranteed by the caller.
        let this = unsafe { Self::from_raw_with(raw, release)? };
        Self::attach_self_reference(&this);
        Ok(this)
    }

    /// Transfers the resource of an [`ExclusiveHandle`] into shared ownership.
    ///
    /// An empty exclusive handle yields an empty shared handle.
    ///
    /// # Errors
    ///
    /// See [`SharedHandle::from_raw_with`].
    pub fn from_exclusive<R>(handle: ExclusiveHandle<T, R>) -> Result<Self>
    where
        R: Release<T> + Send + 'static,
    {
        match handle.into_raw() {
            // Safety: The exclusive handle owned the resource and its release action.
            (Some(ptr), release) => unsafe { Self::adopt(ptr, release) },
            (None, _) => Ok(Self::empty()),
        }
    }

    /// Transfers the resource of an [`ExclusiveHandle`] into shared ownership and
    /// attaches the new handle to the [`SelfReference`](crate::SelfReference) of
    /// the resource.
    ///
    /// # Errors
    ///
    /// See [`SharedHandle::from_raw_with`].
    pub fn from_exclusive_cyclic_self<R>(handle: ExclusiveHandle<T, R>) -> Result<Self>
    where
        T: SharedFromSelf,
        R: Release<T> + Send + 'static,
    {
        let this = Self::from_exclusive(handle)?;
        Self::attach_self_reference(&this);
        Ok(this)
    }

    /// # Safety
    ///
    /// See [`SharedHandle::from_raw_with`].
    unsafe fn adopt<R>(ptr: NonNull<T>, release: R) -> Result<Self>
    where
        R: Release<T> + Send + 'static,
    {
        // A resource owned by another handle is left untouched.
        //
        // Safety: The resource is alive.
        unsafe { adoption::claim(ptr)? };

        // Safety: Guaranteed by the caller.
        match unsafe { AdoptedBlock::try_new(ptr, release) } {
            Ok(inner) => Ok(Self::from_raw_shared(inner)),
            Err((e, mut release)) => {
                // The resource is released before the error reaches the caller.
                let _guard = ScopeGuard::new(move || {
                    // Safety: The resource is still alive.
                    unsafe { adoption::relinquish(ptr) };
                    // Safety: The adoption failed, so we are the sole owner.
                    abort_on_panic(|| unsafe { release.release(ptr) });
                });
                Err(e)
            }
        }
    }

    /// Takes ownership of one strong reference.
    #[inline]
    pub(crate) fn from_raw_shared(inner: RawShared<T>) -> Self {
        Self {
            inner: Some(inner),
            phantom: PhantomData,
        }
    }

    /// Attaches the handle to the [`SelfReference`](crate::SelfReference) of
    /// the resource, so that [`SharedFromSelf::shared_from_self`] succeeds from
    /// now on.
    ///
    /// The constructors ending in `_cyclic_self` attach on their own. Handles
    /// built by [`SharedHandle::new`], [`SharedHandle::from_raw_with`] or
    /// [`SharedHandle::from_exclusive`] may be attached afterwards. Attaching
    /// an empty handle, or a resource that is already attached, has no effect.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::{SelfReference, SharedFromSelf, SharedHandle};
    ///
    /// #[derive(Default)]
    /// struct Node {
    ///     this: SelfReference<Node>,
    /// }
    ///
    /// impl SharedFromSelf for Node {
    ///     fn self_reference(&self) -> &SelfReference<Self> {
    ///         &self.this
    ///     }
    /// }
    ///
    /// let node = SharedHandle::new(Node::default());
    /// SharedHandle::attach_self_reference(&node);
    /// assert!(node.shared_from_self().is_ok());
    /// ```
    pub fn attach_self_reference(this: &Self)
    where
        T: SharedFromSelf,
    {
        if let Some(value) = Self::get(this) {
            value.self_reference().attach(Self::downgrade(this));
        }
    }

    /// Returns a reference to the resource, if any.
    #[inline]
    pub fn get(this: &Self) -> Option<&T> {
        // Safety: The resource is alive while we own a strong reference.
        this.inner.map(|inner| unsafe { &*inner.ptr.as_ptr() })
    }

    /// Returns whether the handle owns nothing.
    #[inline]
    pub fn is_empty(this: &Self) -> bool {
        this.inner.is_none()
    }

    /// Returns the pointer to the resource, if any.
    #[inline]
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.inner.map(|inner| inner.ptr)
    }

    /// Gets the number of strong handles to the resource, or `0` for an empty
    /// handle.
    ///
    /// The value is only a snapshot, as other threads may change the count at
    /// any time.
    #[inline]
    pub fn use_count(this: &Self) -> usize {
        // Safety: We own a strong reference.
        this.inner
            .map_or(0, |inner| unsafe { inner.block() }.strong_count())
    }

    /// Gets the number of [`WeakHandle`] observers of the resource.
    #[inline]
    pub fn weak_count(this: &Self) -> usize {
        // Safety: We own a strong reference.
        this.inner
            .map_or(0, |inner| unsafe { inner.block() }.weak_count())
    }

    /// Creates a new [`WeakHandle`] to the resource.
    ///
    /// Downgrading an empty handle yields an empty weak handle.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::SharedHandle;
    ///
    /// let five = SharedHandle::new(5);
    /// let weak_five = SharedHandle::downgrade(&five);
    /// assert_eq!(SharedHandle::weak_count(&five), 1);
    /// assert!(!weak_five.expired());
    /// ```
    pub fn downgrade(this: &Self) -> WeakHandle<T> {
        match this.inner {
            Some(inner) => {
                // Safety: We own a strong reference.
                unsafe { inner.block() }.downgrade();
                // Safety: The weak reference was acquired above.
                unsafe { WeakHandle::from_raw_shared(inner) }
            }
            None => WeakHandle::new(),
        }
    }

    /// Returns `true` if the two handles point to the same resource, or if both
    /// are empty.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        let this = Self::as_ptr(this).map(NonNull::cast::<u8>);
        let other = Self::as_ptr(other).map(NonNull::cast::<u8>);
        this == other
    }

    /// Returns whether this is the only handle to the resource, strong or weak.
    pub fn is_unique(this: &mut Self) -> bool {
        // Safety: We own a strong reference.
        this.inner
            .is_some_and(|inner| unsafe { inner.block() }.try_lock_unique())
    }

    /// Returns a mutable reference to the resource, if no other strong or weak
    /// handles to it exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::SharedHandle;
    ///
    /// let mut x = SharedHandle::new(3);
    /// *SharedHandle::get_mut(&mut x).unwrap() = 4;
    /// assert_eq!(*x, 4);
    ///
    /// let _y = x.clone();
    /// assert!(SharedHandle::get_mut(&mut x).is_none());
    /// ```
    #[inline]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        if Self::is_unique(this) {
            // Safety: No other handle can observe the resource.
            this.inner.map(|inner| unsafe { &mut *inner.ptr.as_ptr() })
        } else {
            None
        }
    }

    /// Releases the strong reference, leaving the handle empty.
    ///
    /// Resetting an empty handle has no effect.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::SharedHandle;
    ///
    /// let mut a = SharedHandle::new(5);
    /// let b = a.clone();
    /// SharedHandle::reset(&mut a);
    /// assert!(SharedHandle::is_empty(&a));
    /// assert_eq!(SharedHandle::use_count(&b), 1);
    /// ```
    #[inline]
    pub fn reset(this: &mut Self) {
        if let Some(inner) = this.inner.take() {
            // Safety: We owned a strong reference, which is not reachable anymore.
            unsafe { ControlBlock::release_strong(inner.block) };
        }
    }

    /// Consumes the handle, returning the resource pointer and the opaque
    /// control block pointer.
    ///
    /// The strong reference is transferred to the caller, who must pass both
    /// pointers to [`SharedHandle::from_raw_parts`] to avoid a leak.
    #[must_use = "the strong reference is leaked if the pointers are discarded"]
    pub fn into_raw_parts(this: Self) -> Option<(NonNull<T>, NonNull<()>)> {
        let this = ManuallyDrop::new(this);
        this.inner.map(|inner| (inner.ptr, inner.block.cast()))
    }

    /// Reconstructs a handle from the parts returned by
    /// [`SharedHandle::into_raw_parts`].
    ///
    /// # Safety
    ///
    /// The parts must originate from a call to [`SharedHandle::into_raw_parts`]
    /// of a handle with the same type, and may be used only once.
    pub unsafe fn from_raw_parts(ptr: NonNull<T>, block: NonNull<()>) -> Self {
        Self::from_raw_shared(RawShared {
            ptr,
            block: block.cast(),
        })
    }

    /// Maps the resource pointer to a pointer of another type, keeping the
    /// control block.
    ///
    /// Prefer the [`upcast!`](crate::upcast) macro for unsizing coercions.
    ///
    /// # Safety
    ///
    /// `f` must return a pointer to the same object, or to a part of it that
    /// lives as long as the object.
    pub unsafe fn map_ptr<U: ?Sized>(
        this: Self,
        f: impl FnOnce(NonNull<T>) -> NonNull<U>,
    ) -> SharedHandle<U> {
        let this = ManuallyDrop::new(this);
        SharedHandle {
            inner: this.inner.map(|inner| inner.map(f)),
            phantom: PhantomData,
        }
    }
}

unsafe impl<T: ?Sized + Sync + Send> Send for SharedHandle<T> {}

unsafe impl<T: ?Sized + Sync + Send> Sync for SharedHandle<T> {}

sa::assert_impl_all!(SharedHandle<String>: Send, Sync);
sa::assert_not_impl_any!(SharedHandle<std::cell::Cell<u8>>: Send, Sync);
sa::assert_eq_size!(SharedHandle<u8>, [usize; 2]);

impl<T: ?Sized> Clone for SharedHandle<T> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(inner) = self.inner {
            // Safety: We own a strong reference.
            unsafe { inner.block() }.increment_strong();
        }

        Self {
            inner: self.inner,
            phantom: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for SharedHandle<T> {
    #[inline]
    fn drop(&mut self) {
        Self::reset(self);
    }
}

impl<T: ?Sized> Deref for SharedHandle<T> {
    type Target = T;

    #[inline]
    #[track_caller]
    fn deref(&self) -> &Self::Target {
        match Self::get(self) {
            Some(value) => value,
            None => empty_handle(),
        }
    }
}

#[cold]
#[track_caller]
fn empty_handle() -> ! {
    panic!("dereferenced an empty `SharedHandle`")
}

#[cold]
fn allocation_failed<T>(e: Error) -> T {
    match e {
        Error::AllocationFailure { layout } => std::alloc::handle_alloc_error(layout),
        e => panic!("{e}"),
    }
}

impl<T: ?Sized> AsRef<T> for SharedHandle<T> {
    #[inline]
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized> Borrow<T> for SharedHandle<T> {
    #[inline]
    fn borrow(&self) -> &T {
        self
    }
}

impl<T: ?Sized + Debug> Debug for SharedHandle<T> {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match Self::get(self) {
            Some(value) => Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized + Display> Display for SharedHandle<T> {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match Self::get(self) {
            Some(value) => Display::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized> Pointer for SharedHandle<T> {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let ptr = Self::as_ptr(self).map_or(std::ptr::null(), |p| {
            p.as_ptr().cast::<()>().cast_const()
        });
        Pointer::fmt(&ptr, f)
    }
}

impl<T: Default> Default for SharedHandle<T> {
    #[inline]
    fn default() -> Self {
        SharedHandle::new(Default::default())
    }
}

impl<T> From<T> for SharedHandle<T> {
    #[inline]
    fn from(t: T) -> Self {
        SharedHandle::new(t)
    }
}

impl<T: ?Sized + Hash> Hash for SharedHandle<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        Hash::hash(&Self::get(self), state)
    }
}

impl<T: ?Sized + PartialEq> PartialEq for SharedHandle<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Self::get(self) == Self::get(other)
    }
}

impl<T: ?Sized + Eq> Eq for SharedHandle<T> {}

impl<T: ?Sized + PartialOrd> PartialOrd for SharedHandle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        PartialOrd::partial_cmp(&Self::get(self), &Self::get(other))
    }
}

impl<T: ?Sized + Ord> Ord for SharedHandle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        Ord::cmp(&Self::get(self), &Self::get(other))
    }
}
