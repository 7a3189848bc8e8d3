//! Definition of a non-owning observer of a shared resource.
use crate::control_block::{ControlBlock, RawShared};
use crate::shared::SharedHandle;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

/// `WeakHandle` is a version of [`SharedHandle`] that holds a non-owning
/// reference to the resource, akin to a [`std::sync::Weak`].
///
/// A weak handle keeps the control block alive, but never the resource. It must
/// be [`locked`](WeakHandle::lock) to access the resource, which fails once the
/// last strong handle is gone.
///
/// # Examples
///
/// Breaking a cycle between a parent and its children:
///
/// ```
/// use ownership_core::{SharedHandle, WeakHandle};
/// use std::sync::Mutex;
///
/// struct Parent {
///     children: Mutex<Vec<SharedHandle<Child>>>,
/// }
///
/// struct Child {
///     parent: WeakHandle<Parent>,
/// }
///
/// let parent = SharedHandle::new(Parent { children: Mutex::new(Vec::new()) });
/// let child = SharedHandle::new(Child { parent: SharedHandle::downgrade(&parent) });
/// parent.children.lock().unwrap().push(child.clone());
///
/// assert!(child.parent.lock().is_some());
/// drop(parent);
/// assert!(child.parent.expired());
/// ```
pub struct WeakHandle<T: ?Sized> {
    inner: Option<RawShared<T>>,
    phantom: PhantomData<T>,
}

impl<T: ?Sized> WeakHandle<T> {
    /// Constructs a `WeakHandle` observing nothing.
    ///
    /// Calling [`WeakHandle::lock`] on the return value always gives [`None`].
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::WeakHandle;
    ///
    /// let empty: WeakHandle<i64> = WeakHandle::new();
    /// assert!(empty.lock().is_none());
    /// ```
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: None,
            phantom: PhantomData,
        }
    }

    /// Takes ownership of one weak reference.
    ///
    /// # Safety
    ///
    /// The caller must own a weak reference to the block of `inner`.
    #[inline]
    pub(crate) unsafe fn from_raw_shared(inner: RawShared<T>) -> Self {
        Self {
            inner: Some(inner),
            phantom: PhantomData,
        }
    }

    /// Attempts to acquire a [`SharedHandle`] to the resource.
    ///
    /// Returns [`None`] if the resource has already been released. The strong
    /// count is never incremented from zero, so a resource that is being
    /// released can not be revived.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownership_core::SharedHandle;
    ///
    /// let five = SharedHandle::new(5);
    /// let weak_five = SharedHandle::downgrade(&five);
    ///
    /// let strong_five = weak_five.lock();
    /// assert!(strong_five.is_some());
    ///
    /// drop(strong_five);
    /// drop(five);
    /// assert!(weak_five.lock().is_none());
    /// ```
    pub fn lock(&self) -> Option<SharedHandle<T>> {
        let inner = self.inner?;
        // Safety: We own a weak reference.
        if unsafe { inner.block() }.try_increment_strong() {
            Some(SharedHandle::from_raw_shared(inner))
        } else {
            None
        }
    }

    /// Returns whether the resource has already been released.
    ///
    /// The answer may be outdated as soon as it is returned, so it is only
    /// useful for diagnostics. Use [`WeakHandle::lock`] to access the resource.
    #[inline]
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Gets the number of strong handles to the resource.
    ///
    /// Returns `0` if the handle observes nothing.
    #[inline]
    pub fn use_count(&self) -> usize {
        // Safety: We own a weak reference.
        self.inner
            .map_or(0, |inner| unsafe { inner.block() }.strong_count())
    }

    /// Gets the number of weak handles to the resource.
    ///
    /// Returns `0` if the handle observes nothing or if no strong handles
    /// remain.
    #[inline]
    pub fn weak_count(&self) -> usize {
        // Safety: We own a weak reference.
        self.inner
            .map_or(0, |inner| unsafe { inner.block() }.weak_count())
    }

    /// Returns `true` if the two handles observe the same resource, or if both
    /// observe nothing.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        let this = self.inner.map(|inner| inner.ptr.cast::<u8>());
        let other = other.inner.map(|inner| inner.ptr.cast::<u8>());
        this == other
    }

    /// Drops the weak reference, leaving the handle observing nothing.
    #[inline]
    pub fn reset(&mut self) {
        if let Some(inner) = self.inner.take() {
            // Safety: We owned a weak reference, which is not reachable anymore.
            unsafe { ControlBlock::release_weak(inner.block) };
        }
    }

    /// Maps the resource pointer to a pointer of another type, keeping the
    /// control block.
    ///
    /// # Safety
    ///
    /// See [`SharedHandle::map_ptr`]. The pointer passed to `f` may dangle, so
    /// `f` must not dereference it.
    pub unsafe fn map_ptr<U: ?Sized>(
        self,
        f: impl FnOnce(NonNull<T>) -> NonNull<U>,
    ) -> WeakHandle<U> {
        let this = ManuallyDrop::new(self);
        WeakHandle {
            inner: this.inner.map(|inner| inner.map(f)),
            phantom: PhantomData,
        }
    }
}

unsafe impl<T: ?Sized + Sync + Send> Send for WeakHandle<T> {}

unsafe impl<T: ?Sized + Sync + Send> Sync for WeakHandle<T> {}

sa::assert_impl_all!(WeakHandle<String>: Send, Sync);
sa::assert_not_impl_any!(WeakHandle<std::rc::Rc<u8>>: Send, Sync);

impl<T: ?Sized> Clone for WeakHandle<T> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(inner) = self.inner {
            // Safety: We own a weak reference.
            unsafe { inner.block() }.increment_weak();
        }

        Self {
            inner: self.inner,
            phantom: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for WeakHandle<T> {
    #[inline]
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for WeakHandle<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> From<&SharedHandle<T>> for WeakHandle<T> {
    #[inline]
    fn from(handle: &SharedHandle<T>) -> Self {
        SharedHandle::downgrade(handle)
    }
}

impl<T: ?Sized> Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(Weak)")
    }
}
