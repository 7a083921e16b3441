//! Atomics used by the segment ring, swapped for loom's under `--features loom` tests.

#[cfg(all(test, feature = "loom"))]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(not(all(test, feature = "loom")))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(not(all(test, feature = "loom")))]
pub(crate) use crossbeam_utils::Backoff;

/// Spin-wait stand-in that hands control back to the loom scheduler.
#[cfg(all(test, feature = "loom"))]
pub(crate) struct Backoff;

#[cfg(all(test, feature = "loom"))]
impl Backoff {
    pub(crate) fn new() -> Self {
        Backoff
    }

    pub(crate) fn snooze(&self) {
        loom::thread::yield_now();
    }
}
