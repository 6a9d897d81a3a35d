//! Epoch-based garbage collector.
//!
//! # Examples
//!
//! ```
//! use faa_array_queue::Collector;
//!
//! let collector = Collector::new();
//!
//! let handle = collector.register();
//! drop(collector); // `handle` still works after dropping `collector`
//!
//! handle.pin().flush();
//! ```
use std::fmt;
use std::sync::Arc;

use crate::guard::Guard;
use crate::internal::{Global, Local};

/// An epoch-based garbage collector.
pub struct Collector {
    pub(crate) global: Arc<Global>,
}

unsafe impl Send for Collector {}
unsafe impl Sync for Collector {}

impl Collector {
    /// Creates a new collector.
    pub fn new() -> Self {
        Collector {
            global: Arc::new(Global::new()),
        }
    }

    /// Registers a new handle for the collector.
    pub fn register(&self) -> LocalHandle {
        Local::register(self)
    }
}

impl Clone for Collector {
    /// Creates another reference to the same garbage collector.
    fn clone(&self) -> Self {
        Collector {
            global: self.global.clone(),
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad("Collector { .. }")
    }
}

impl PartialEq for Collector {
    /// Checks if both handles point to the same collector.
    fn eq(&self, rhs: &Collector) -> bool {
        Arc::ptr_eq(&self.global, &rhs.global)
    }
}

impl Eq for Collector {}

/// A handle to a garbage collector.
///
/// A handle is bound to the thread that registered it: it is neither `Send` nor `Sync`.
pub struct LocalHandle {
    local: *const Local,
}

impl LocalHandle {
    pub(crate) fn from_local(local: *const Local) -> Self {
        LocalHandle { local }
    }

    /// Pins the handle.
    #[inline]
    pub fn pin(&self) -> Guard {
        unsafe { (*self.local).pin() }
    }

    /// Returns `true` if the handle is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        unsafe { (*self.local).is_pinned() }
    }

    /// Returns the `Collector` associated with this handle.
    #[inline]
    pub fn collector(&self) -> &Collector {
        unsafe { (*self.local).collector() }
    }
}

impl Clone for LocalHandle {
    fn clone(&self) -> Self {
        unsafe { (*self.local).acquire_handle() };
        LocalHandle { local: self.local }
    }
}

impl Drop for LocalHandle {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            Local::release_handle(&*self.local);
        }
    }
}

impl fmt::Debug for LocalHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad("LocalHandle { .. }")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crossbeam_utils::thread;

    use super::*;
    use crate::atomic::Owned;

    const NUM_THREADS: usize = 8;

    #[test]
    fn pin_reentrant() {
        let collector = Collector::new();
        let handle = collector.register();
        drop(collector);

        assert!(!handle.is_pinned());
        {
            let _guard = &handle.pin();
            assert!(handle.is_pinned());
            {
                let _guard = &handle.pin();
                assert!(handle.is_pinned());
            }
            assert!(handle.is_pinned());
        }
        assert!(!handle.is_pinned());
    }

    #[test]
    fn pin_holds_advance() {
        let collector = Collector::new();

        thread::scope(|scope| {
            for _ in 0..NUM_THREADS {
                scope.spawn(|_| {
                    let handle = collector.register();
                    for _ in 0..10_000 {
                        let guard = &handle.pin();

                        let before = collector.global.epoch.load(Ordering::Relaxed);
                        collector.global.collect(guard);
                        let after = collector.global.epoch.load(Ordering::Relaxed);

                        assert!(after.wrapping_sub(before) <= 2);
                    }
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn deferred_destruction_eventually_runs() {
        struct Elem(Arc<AtomicUsize>);

        impl Drop for Elem {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        const COUNT: usize = 100;
        let dropped = Arc::new(AtomicUsize::new(0));
        let collector = Collector::new();
        let handle = collector.register();

        for _ in 0..COUNT {
            let guard = &handle.pin();
            let a = Owned::new(Elem(dropped.clone())).into_shared(guard);
            unsafe { guard.defer_destroy(a) };
        }

        for _ in 0..COUNT {
            if dropped.load(Ordering::Relaxed) == COUNT {
                break;
            }
            handle.pin().flush();
        }
        assert_eq!(dropped.load(Ordering::Relaxed), COUNT);
    }

    #[test]
    fn dropping_collector_runs_pending_garbage() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let collector = Collector::new();
            let handle = collector.register();
            let guard = &handle.pin();
            for _ in 0..10 {
                let count = count.clone();
                guard.defer(move || {
                    count.fetch_add(1, Ordering::Relaxed);
                });
            }
        }
        assert_eq!(count.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn handle_clone_keeps_participant() {
        let collector = Collector::new();
        let h1 = collector.register();
        let h2 = h1.clone();
        drop(h1);
        assert!(!h2.is_pinned());
        let _guard = h2.pin();
        assert!(h2.is_pinned());
        assert_eq!(h2.collector(), &collector);
    }
}
