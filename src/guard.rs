//! Guards that keep a participant pinned.

use std::fmt;
use std::ptr;

use crate::atomic::Shared;
use crate::garbage::Garbage;
use crate::internal::Local;

/// A guard that keeps the current participant pinned.
///
/// # Pinning
///
/// The current thread is pinned by calling [`pin`], which returns a new guard:
///
/// ```
/// use faa_array_queue as faa;
///
/// // It is often convenient to prefix a call to `pin` with a `&` in order to create a reference.
/// // This is not really necessary, but makes passing references to the guard a bit easier.
/// let guard = &faa::pin();
/// ```
///
/// When a guard gets dropped, the current thread is automatically unpinned.
///
/// # Multiple guards
///
/// Pinning is reentrant and it is perfectly legal to create multiple guards. In that case, the
/// thread will be pinned only when the first guard is created and unpinned when the last one is
/// dropped:
///
/// ```
/// use faa_array_queue as faa;
///
/// let guard1 = faa::pin();
/// let guard2 = faa::pin();
/// assert!(faa::is_pinned());
/// drop(guard1);
/// assert!(faa::is_pinned());
/// drop(guard2);
/// assert!(!faa::is_pinned());
/// ```
///
/// [`pin`]: fn.pin.html
pub struct Guard {
    pub(crate) local: *const Local,
}

impl Guard {
    /// Stores a function so that it can be executed at some point after all currently pinned
    /// threads get unpinned.
    ///
    /// This method first stores `f` into the participant-local bag. If this bag becomes full, it
    /// is sealed and moved into the global queue. At the same time, some bags from the global
    /// queue may get destroyed in order to incrementally clean up as they fill up.
    ///
    /// There is no guarantee when exactly `f` will be executed. The only guarantee is that it
    /// won't be executed until all currently pinned threads get unpinned.
    ///
    /// If this method is called from an [`unprotected`] guard, the function will simply be
    /// executed immediately.
    ///
    /// [`unprotected`]: fn.unprotected.html
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        unsafe { self.defer_garbage(Garbage::new(f)) }
    }

    /// Stores a destructor for an object so that it can be deallocated and dropped at some point
    /// after all currently pinned threads get unpinned.
    ///
    /// # Safety
    ///
    /// The object must be unreachable for any thread that pins after this call, it must have
    /// been allocated through `Owned` (or `Box`), and it must not be destroyed by anyone else.
    ///
    /// # Examples
    ///
    /// ```
    /// use faa_array_queue::{self as faa, Atomic, Owned};
    /// use std::sync::atomic::Ordering::{Acquire, Release};
    ///
    /// let a = Atomic::new("foo");
    /// let guard = &faa::pin();
    ///
    /// let p = a.load(Acquire, guard);
    /// a.store(Owned::new("bar").into_shared(guard), Release);
    ///
    /// // The object `p` is pointing to is now unreachable.
    /// unsafe { guard.defer_destroy(p) };
    /// # unsafe { drop(a.load(Acquire, guard).into_owned()) }
    /// ```
    pub unsafe fn defer_destroy<T: Send>(&self, ptr: Shared<T>) {
        self.defer_garbage(Garbage::new_destroy(ptr.as_raw() as *mut T))
    }

    unsafe fn defer_garbage(&self, garbage: Garbage) {
        match self.local.as_ref() {
            Some(local) => local.defer(garbage, self),
            None => drop(garbage),
        }
    }

    /// Moves the participant-local bag into the global queue, then tries to advance the epoch and
    /// destroy some expired bags.
    ///
    /// Call this method after deferring destruction of a large object if you want it to happen
    /// as soon as possible.
    ///
    /// If this method is called from an [`unprotected`] guard, it is a no-op.
    ///
    /// [`unprotected`]: fn.unprotected.html
    pub fn flush(&self) {
        if let Some(local) = unsafe { self.local.as_ref() } {
            local.flush(self);
        }
    }
}

impl Drop for Guard {
    #[inline]
    fn drop(&mut self) {
        if let Some(local) = unsafe { self.local.as_ref() } {
            local.unpin();
        }
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Guard")
            .field("protected", &!self.local.is_null())
            .finish()
    }
}

/// Returns a reference to a dummy guard that allows unprotected access to [`Atomic`]s.
///
/// This guard does not pin any participant. Calling [`defer`] or [`defer_destroy`] with it
/// executes the destruction immediately.
///
/// # Safety
///
/// Loading and dereferencing data from an [`Atomic`] using a dummy guard is safe only if the
/// [`Atomic`] is not being concurrently modified by other threads. The most common use is
/// constructing or destructing a data structure.
///
/// [`Atomic`]: struct.Atomic.html
/// [`defer`]: struct.Guard.html#method.defer
/// [`defer_destroy`]: struct.Guard.html#method.defer_destroy
#[inline]
pub unsafe fn unprotected() -> Guard {
    Guard { local: ptr::null() }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn unprotected_defer_runs_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        unsafe {
            unprotected().defer(move || {
                c.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
