//! Access to the shared handle owning an object from within the object.
use crate::error::{Error, Result};
use crate::shared::SharedHandle;
use crate::weak::WeakHandle;
use std::fmt::{Debug, Formatter};
use std::sync::OnceLock;

/// Slot for the weak reference of an object to itself.
///
/// The slot is filled once, when the object is first owned by a
/// [`SharedHandle`] constructed through [`SharedHandle::new_cyclic_self`] or one
/// of its variants. Cloning a `SelfReference` yields an empty slot, since the
/// clone is a different object.
pub struct SelfReference<T: ?Sized> {
    weak: OnceLock<WeakHandle<T>>,
}

sa::assert_impl_all!(SelfReference<String>: Send, Sync);

impl<T: ?Sized> SelfReference<T> {
    /// Constructs an empty slot.
    #[inline]
    pub const fn new() -> Self {
        Self {
            weak: OnceLock::new(),
        }
    }

    /// Returns whether a handle has been attached.
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.weak.get().is_some()
    }

    /// Stores the weak reference, unless one was attached before.
    pub(crate) fn attach(&self, weak: WeakHandle<T>) {
        if self.weak.set(weak).is_err() {
            log::debug!("self reference is already attached");
        }
    }

    fn lock(&self) -> Result<SharedHandle<T>> {
        self.weak
            .get()
            .and_then(WeakHandle::lock)
            .ok_or(Error::InvalidSelfReference)
    }

    fn downgrade(&self) -> WeakHandle<T> {
        self.weak.get().cloned().unwrap_or_default()
    }
}

impl<T: ?Sized> Default for SelfReference<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for SelfReference<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Debug for SelfReference<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfReference")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Objects able to produce a [`SharedHandle`] to themselves.
///
/// Implementors embed a [`SelfReference`] and return it from
/// [`SharedFromSelf::self_reference`].
///
/// # Examples
///
/// ```
/// use ownership_core::{Error, SelfReference, SharedFromSelf, SharedHandle};
///
/// #[derive(Default)]
/// struct Session {
///     this: SelfReference<Session>,
/// }
///
/// impl SharedFromSelf for Session {
///     fn self_reference(&self) -> &SelfReference<Self> {
///         &self.this
///     }
/// }
///
/// let unowned = Session::default();
/// assert_eq!(unowned.shared_from_self().err(), Some(Error::InvalidSelfReference));
///
/// let owned = SharedHandle::new_cyclic_self(Session::default());
/// let again = owned.shared_from_self().unwrap();
/// assert_eq!(SharedHandle::use_count(&owned), 2);
/// # drop(again);
/// ```
pub trait SharedFromSelf {
    /// Returns the slot of the weak reference to `self`.
    fn self_reference(&self) -> &SelfReference<Self>;

    /// Returns a new strong handle to `self`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelfReference`] if `self` was never owned by a
    /// [`SharedHandle`], or if it is being released.
    #[inline]
    fn shared_from_self(&self) -> Result<SharedHandle<Self>> {
        self.self_reference().lock()
    }

    /// Returns a new weak handle to `self`.
    ///
    /// The handle observes nothing if `self` was never owned by a
    /// [`SharedHandle`].
    #[inline]
    fn weak_from_self(&self) -> WeakHandle<Self> {
        self.self_reference().downgrade()
    }
}
