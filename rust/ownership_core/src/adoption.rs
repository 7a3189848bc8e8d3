//! Bookkeeping of adopted resources.
//!
//! With the `track-adoption` feature enabled in a debug build, every resource
//! owned by a handle is recorded in a process-wide set, so that adopting the same
//! pointer a second time is detected. Otherwise all functions compile to no-ops.
use crate::error::Result;
use std::ptr::NonNull;

#[cfg(all(feature = "track-adoption", debug_assertions))]
mod registry {
    use crate::error::{Error, Result};
    use lazy_static::lazy_static;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    lazy_static! {
        static ref OWNED: Mutex<HashSet<usize>> = Mutex::new(HashSet::new());
    }

    pub(super) fn claim(address: usize) -> Result<()> {
        if OWNED.lock().insert(address) {
            Ok(())
        } else {
            log::debug!("resource at {address:#x} adopted by a second handle");
            Err(Error::ResourceAlreadyOwned { address })
        }
    }

    pub(super) fn relinquish(address: usize) {
        OWNED.lock().remove(&address);
    }
}

/// Returns the address to track for the resource, if any.
///
/// Zero-sized resources share their addresses and are never tracked.
///
/// # Safety
///
/// `ptr` must point to a live value.
#[cfg(all(feature = "track-adoption", debug_assertions))]
unsafe fn tracked_address<T: ?Sized>(ptr: NonNull<T>) -> Option<usize> {
    // Safety: Guaranteed by the caller.
    let size = unsafe { std::mem::size_of_val(ptr.as_ref()) };
    (size != 0).then(|| ptr.cast::<u8>().as_ptr() as usize)
}

/// Records that the resource is now owned by a handle.
///
/// # Safety
///
/// `ptr` must point to a live value.
#[cfg(all(feature = "track-adoption", debug_assertions))]
pub(crate) unsafe fn claim<T: ?Sized>(ptr: NonNull<T>) -> Result<()> {
    // Safety: Guaranteed by the caller.
    match unsafe { tracked_address(ptr) } {
        Some(address) => registry::claim(address),
        None => Ok(()),
    }
}

/// Records that the resource is no longer owned by a handle.
///
/// # Safety
///
/// `ptr` must point to a live value.
#[cfg(all(feature = "track-adoption", debug_assertions))]
pub(crate) unsafe fn relinquish<T: ?Sized>(ptr: NonNull<T>) {
    // Safety: Guaranteed by the caller.
    if let Some(address) = unsafe { tracked_address(ptr) } {
        registry::relinquish(address);
    }
}

#[cfg(not(all(feature = "track-adoption", debug_assertions)))]
#[inline(always)]
pub(crate) unsafe fn claim<T: ?Sized>(_ptr: NonNull<T>) -> Result<()> {
    Ok(())
}

#[cfg(not(all(feature = "track-adoption", debug_assertions)))]
#[inline(always)]
pub(crate) unsafe fn relinquish<T: ?Sized>(_ptr: NonNull<T>) {}
