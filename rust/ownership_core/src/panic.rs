//! Panic utilities.
//!
//! Release actions run from destructors and must not fail. A release action that
//! panics is treated as a fatal programming error: the panic is logged and the
//! process is aborted instead of unwinding through the destructor.

use std::panic::AssertUnwindSafe;

/// Invokes a closure, aborting the process if a panic occurs.
pub fn abort_on_panic<R>(f: impl FnOnce() -> R) -> R {
    std::panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|e| {
        let msg = match e.downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match e.downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        log::error!("release action panicked, aborting: {msg}");
        std::process::abort()
    })
}
