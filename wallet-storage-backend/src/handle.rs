//! Open-handle accounting shared by the builtin storage types

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Decrements the factory's open-handle counter exactly once, on `release`
/// or on drop, whichever comes first.
#[derive(Debug)]
pub(crate) struct HandleGuard {
    counter: Arc<AtomicUsize>,
    released: AtomicBool,
}

impl HandleGuard {
    pub(crate) fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.release();
    }
}
