//! Definition of a handle with sole ownership of a resource.
use crate::adoption;
use crate::error::{Error, Result};
use crate::panic::abort_on_panic;
use crate::release::{DefaultRelease, Release};
use std::alloc::Layout;
use std::borrow::{Borrow, BorrowMut};
use std::fmt::{Debug, Display, Formatter, Pointer};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// A handle with sole ownership of a resource, akin to a [`Box`] that may be empty
/// and may carry a custom release action.
///
/// The release action runs exactly once for every adopted resource: when the
/// handle is dropped, reset, or when a new resource is adopted in its place.
/// A handle can not be cloned, and moving it transfers the resource.
///
/// # Examples
///
/// ```
/// use ownership_core::ExclusiveHandle;
///
/// let mut handle = ExclusiveHandle::new(5);
/// assert_eq!(*handle, 5);
///
/// handle.reset();
/// assert!(handle.is_empty());
/// ```
pub struct ExclusiveHandle<T: ?Sized, R: Release<T> = DefaultRelease> {
    ptr: Option<NonNull<T>>,
    release: R,
    phantom: PhantomData<T>,
}

impl<T> ExclusiveHandle<T> {
    /// Moves the value into a new allocation.
    #[inline]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Moves the value into a new allocation, reporting an allocation failure
    /// instead of aborting.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::ExclusiveHandle;
    ///
    /// let handle = ExclusiveHandle::try_new(5).unwrap();
    /// assert_eq!(*handle, 5);
    /// ```
    pub fn try_new(value: T) -> Result<Self> {
        let layout = Layout::new::<T>();
        let ptr = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            // Safety: The layout has a non-zero size.
            let raw = unsafe { std::alloc::alloc(layout) }.cast::<T>();
            NonNull::new(raw).ok_or(Error::AllocationFailure { layout })?
        };

        // Safety: The pointer is valid for writes of `T`, and the memory was
        // allocated with the layout a `Box<T>` uses.
        unsafe {
            ptr.as_ptr().write(value);
            Ok(Self::from_raw(ptr.as_ptr()))
        }
    }
}

impl<T: ?Sized> ExclusiveHandle<T> {
    /// Constructs a handle owning nothing.
    #[inline]
    pub const fn empty() -> Self {
        Self::empty_with(DefaultRelease)
    }

    /// Takes ownership of the boxed value.
    #[inline]
    pub fn from_box(b: Box<T>) -> Self {
        // Safety: The box owned the pointer until now.
        unsafe { Self::from_raw(Box::into_raw(b)) }
    }

    /// Adopts a pointer allocated by a [`Box`]. A null pointer yields an empty
    /// handle.
    ///
    /// # Safety
    ///
    /// The pointer must originate from [`Box::into_raw`] and may not be owned by
    /// anything else.
    #[inline]
    pub unsafe fn from_raw(raw: *mut T) -> Self {
        // Safety: Guaranteed by the caller.
        unsafe { Self::from_raw_with(raw, DefaultRelease) }
    }

    /// Converts the handle back into a [`Box`], if it owns a resource.
    pub fn into_box(self) -> Option<Box<T>> {
        let (ptr, _) = self.into_raw();
        // Safety: Resources of the default release action are boxed.
        ptr.map(|ptr| unsafe { Box::from_raw(ptr.as_ptr()) })
    }
}

impl<T> ExclusiveHandle<[T]> {
    /// Constructs an array with `len` elements, produced by calling `f` with the
    /// index of each element.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::ExclusiveHandle;
    ///
    /// let squares = ExclusiveHandle::new_slice(4, |i| i * i);
    /// assert_eq!(&*squares, &[0, 1, 4, 9]);
    /// ```
    pub fn new_slice(len: usize, f: impl FnMut(usize) -> T) -> Self {
        Self::from_box((0..len).map(f).collect())
    }

    /// Takes ownership of the elements of the vector.
    #[inline]
    pub fn from_vec(v: Vec<T>) -> Self {
        Self::from_boxed_slice(v.into_boxed_slice())
    }

    /// Takes ownership of the boxed elements.
    #[inline]
    pub fn from_boxed_slice(b: Box<[T]>) -> Self {
        Self::from_box(b)
    }
}

impl<T: ?Sized, R: Release<T>> ExclusiveHandle<T, R> {
    /// Constructs a handle owning nothing, which releases later adopted
    /// resources with `release`.
    #[inline]
    pub const fn empty_with(release: R) -> Self {
        Self {
            ptr: None,
            release,
            phantom: PhantomData,
        }
    }

    /// Adopts a resource, which is released with `release`. A null pointer
    /// yields an empty handle.
    ///
    /// # Safety
    ///
    /// The pointer must be releasable by `release` and may not be owned by
    /// anything else.
    ///
    /// # Panics
    ///
    /// With the `track-adoption` feature enabled, debug builds panic if the
    /// resource is already owned by another handle.
    pub unsafe fn from_raw_with(raw: *mut T, release: R) -> Self {
        let ptr = NonNull::new(raw);
        if let Some(ptr) = ptr {
            // Safety: The caller guarantees that the resource is alive.
            let claimed = unsafe { adoption::claim(ptr) };
            debug_assert!(claimed.is_ok(), "{claimed:?}");
        }

        Self {
            ptr,
            release,
            phantom: PhantomData,
        }
    }

    /// Returns a reference to the resource, if any.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // Safety: The resource is alive while owned by the handle.
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Returns a mutable reference to the resource, if any.
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // Safety: The resource is alive and uniquely owned by the handle.
        self.ptr.map(|ptr| unsafe { &mut *ptr.as_ptr() })
    }

    /// Returns the pointer to the resource without giving up ownership.
    #[inline]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Returns whether the handle owns nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr.is_none()
    }

    /// Returns the release action.
    #[inline]
    pub fn release_action(&self) -> &R {
        &self.release
    }

    /// Returns the release action mutably.
    #[inline]
    pub fn release_action_mut(&mut self) -> &mut R {
        &mut self.release
    }

    /// Releases the resource, leaving the handle empty.
    ///
    /// Resetting an empty handle has no effect.
    #[inline]
    pub fn reset(&mut self) {
        // The pointer is cleared before releasing, so the release can never run
        // twice for the same resource.
        if let Some(ptr) = self.ptr.take() {
            Self::release_resource(&mut self.release, ptr);
        }
    }

    /// Releases the current resource, if any, and adopts `raw` in its place.
    ///
    /// # Safety
    ///
    /// See [`ExclusiveHandle::from_raw_with`].
    pub unsafe fn reset_to(&mut self, raw: *mut T) {
        let ptr = NonNull::new(raw);
        if let Some(ptr) = ptr {
            // Safety: The caller guarantees that the resource is alive.
            let claimed = unsafe { adoption::claim(ptr) };
            debug_assert!(claimed.is_ok(), "{claimed:?}");
        }

        // The new resource is stored before the old one is released.
        if let Some(old) = std::mem::replace(&mut self.ptr, ptr) {
            Self::release_resource(&mut self.release, old);
        }
    }

    /// Relinquishes ownership of the resource without releasing it.
    ///
    /// The caller becomes responsible for releasing the returned resource.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::ExclusiveHandle;
    ///
    /// let mut handle = ExclusiveHandle::new(5);
    /// let raw = handle.release().unwrap();
    /// assert!(handle.is_empty());
    ///
    /// // Safety: `raw` was released from a handle using the default release action.
    /// let handle = unsafe { ExclusiveHandle::from_raw(raw.as_ptr()) };
    /// assert_eq!(*handle, 5);
    /// ```
    #[inline]
    #[must_use = "the resource is leaked if the pointer is discarded"]
    pub fn release(&mut self) -> Option<NonNull<T>> {
        let ptr = self.ptr.take()?;
        // Safety: The resource is still alive.
        unsafe { adoption::relinquish(ptr) };
        Some(ptr)
    }

    /// Consumes the handle, returning the resource and the release action.
    pub fn into_raw(self) -> (Option<NonNull<T>>, R) {
        let mut this = ManuallyDrop::new(self);
        let ptr = this.release();
        // Safety: `this` is never dropped, so the action is moved out exactly once.
        let release = unsafe { std::ptr::read(&this.release) };
        (ptr, release)
    }

    /// Maps the resource pointer to a pointer of another type.
    ///
    /// Prefer the [`upcast!`](crate::upcast) macro for unsizing coercions.
    ///
    /// # Safety
    ///
    /// `f` must return a pointer to the same allocation, which the release action
    /// is able to release.
    pub unsafe fn map_ptr<U: ?Sized>(
        self,
        f: impl FnOnce(NonNull<T>) -> NonNull<U>,
    ) -> ExclusiveHandle<U, R>
    where
        R: Release<U>,
    {
        let this = ManuallyDrop::new(self);
        // Safety: `this` is never dropped, so the action is moved out exactly once.
        let release = unsafe { std::ptr::read(&this.release) };
        ExclusiveHandle {
            ptr: this.ptr.map(f),
            release,
            phantom: PhantomData,
        }
    }

    fn release_resource(release: &mut R, ptr: NonNull<T>) {
        // Safety: The resource is still alive.
        unsafe { adoption::relinquish(ptr) };
        // Safety: The handle owned the resource, which is not reachable anymore.
        abort_on_panic(|| unsafe { release.release(ptr) });
    }
}

unsafe impl<T: ?Sized + Send, R: Release<T> + Send> Send for ExclusiveHandle<T, R> {}

unsafe impl<T: ?Sized + Sync, R: Release<T> + Sync> Sync for ExclusiveHandle<T, R> {}

sa::assert_impl_all!(ExclusiveHandle<String>: Send, Sync);
sa::assert_not_impl_any!(ExclusiveHandle<std::rc::Rc<u8>>: Send, Sync);

impl<T: ?Sized, R: Release<T>> Drop for ExclusiveHandle<T, R> {
    #[inline]
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized, R: Release<T>> Deref for ExclusiveHandle<T, R> {
    type Target = T;

    #[inline]
    #[track_caller]
    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(value) => value,
            None => empty_handle(),
        }
    }
}

impl<T: ?Sized, R: Release<T>> DerefMut for ExclusiveHandle<T, R> {
    #[inline]
    #[track_caller]
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.get_mut() {
            Some(value) => value,
            None => empty_handle(),
        }
    }
}

#[cold]
#[track_caller]
fn empty_handle() -> ! {
    panic!("dereferenced an empty `ExclusiveHandle`")
}

impl<T: ?Sized, R: Release<T>> AsRef<T> for ExclusiveHandle<T, R> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized, R: Release<T>> AsMut<T> for ExclusiveHandle<T, R> {
    fn as_mut(&mut self) -> &mut T {
        self
    }
}

impl<T: ?Sized, R: Release<T>> Borrow<T> for ExclusiveHandle<T, R> {
    fn borrow(&self) -> &T {
        self
    }
}

impl<T: ?Sized, R: Release<T>> BorrowMut<T> for ExclusiveHandle<T, R> {
    fn borrow_mut(&mut self) -> &mut T {
        self
    }
}

impl<T: ?Sized, R: Release<T> + Default> Default for ExclusiveHandle<T, R> {
    fn default() -> Self {
        Self::empty_with(R::default())
    }
}

impl<T: ?Sized> From<Box<T>> for ExclusiveHandle<T> {
    fn from(b: Box<T>) -> Self {
        Self::from_box(b)
    }
}

impl<T: ?Sized + Debug, R: Release<T>> Debug for ExclusiveHandle<T, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(value) => Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized + Display, R: Release<T>> Display for ExclusiveHandle<T, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(value) => Display::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized, R: Release<T>> Pointer for ExclusiveHandle<T, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let ptr = self.ptr.map_or(std::ptr::null(), |p| {
            p.as_ptr().cast::<()>().cast_const()
        });
        Pointer::fmt(&ptr, f)
    }
}
