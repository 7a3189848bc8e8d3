#[cfg(loom)]
use loom::{hint, sync};

#[cfg(not(loom))]
use std::{hint, sync};

pub(crate) mod atomic {
    pub(crate) use super::sync::atomic::{fence, AtomicUsize, Ordering};
}

pub(crate) use hint::spin_loop;
