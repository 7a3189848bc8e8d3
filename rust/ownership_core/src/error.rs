//! Error type.
use std::alloc::Layout;

/// Errors surfaced while constructing handles.
///
/// Destruction never reports errors: release actions are required to be
/// infallible and a panicking one aborts the process (see [`crate::panic`]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A handle to `self` was requested from an object that is not owned by a
    /// [`SharedHandle`](crate::SharedHandle), or that is already being released.
    #[error("the object is not owned by a shared handle")]
    InvalidSelfReference,
    /// The raw pointer is already owned by another handle.
    ///
    /// Only detected with the `track-adoption` feature in debug builds.
    #[error("the resource at {address:#x} is already owned by another handle")]
    ResourceAlreadyOwned {
        /// Address of the resource.
        address: usize,
    },
    /// The allocator could not satisfy the request.
    #[error("could not allocate {} bytes with an alignment of {}", .layout.size(), .layout.align())]
    AllocationFailure {
        /// Layout of the failed allocation.
        layout: Layout,
    },
}

/// Result type with [`Error`] as the default error.
pub type Result<T, E = Error> = std::result::Result<T, E>;
