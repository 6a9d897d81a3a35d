//! Memory reclamation schemes for lock-free containers.
//!
//! A container never frees a node that other threads might still be reading. Instead it asks a
//! [`Reclaimer`] to protect the nodes it reads and to retire the nodes it unlinks. A retired node
//! is destroyed once no protected reference to it can remain.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;

use crate::atomic::{Atomic, Shared};
use crate::guard::Guard;

/// A safe memory reclamation scheme.
///
/// The scheme is selected at the type level, so all of its operations are associated functions.
///
/// # Safety
///
/// [`GuardPtr`] hands out references to whatever `protect` returns, so implementations must
/// uphold the following:
///
/// - `protect` returns either null or a pointer to a live object, and that object must not be
///   destroyed while `guard` is alive.
/// - An object passed to `retire` is destroyed only after every guard that could have protected
///   it has been dropped.
///
/// [`GuardPtr`]: struct.GuardPtr.html
pub unsafe trait Reclaimer {
    /// The witness that keeps loaded pointers alive.
    type Guard;

    /// Enters a critical region in which loaded pointers stay valid.
    fn guard() -> Self::Guard;

    /// Loads a pointer from `src` and protects the pointee for as long as `guard` lives.
    fn protect<'g, T>(src: &Atomic<T>, ord: Ordering, guard: &'g Self::Guard) -> Shared<'g, T>;

    /// Hands over an unlinked object for deferred destruction.
    ///
    /// # Safety
    ///
    /// `ptr` must be unreachable for threads that protect after this call, it must have been
    /// allocated through `Owned`, and it must not be retired twice.
    unsafe fn retire<T: Send + 'static>(ptr: Shared<'_, T>, guard: &Self::Guard);
}

/// Reclamation through the default epoch-based collector.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpochReclaimer;

// A pinned participant holds back the epoch, so nothing retired after the load is destroyed
// before the guard is dropped.
unsafe impl Reclaimer for EpochReclaimer {
    type Guard = Guard;

    #[inline]
    fn guard() -> Guard {
        crate::default::pin()
    }

    #[inline]
    fn protect<'g, T>(src: &Atomic<T>, ord: Ordering, guard: &'g Guard) -> Shared<'g, T> {
        src.load(ord, guard)
    }

    #[inline]
    unsafe fn retire<T: Send + 'static>(ptr: Shared<'_, T>, guard: &Guard) {
        guard.defer_destroy(ptr);
    }
}

/// A protected pointer to a node owned by a lock-free container.
///
/// The pointer stays valid until it is re-acquired or reclaimed, or until the guard goes away.
/// It may be null, so the pointee is reached through [`as_ref`].
///
/// [`as_ref`]: struct.GuardPtr.html#method.as_ref
pub struct GuardPtr<'g, T, R: Reclaimer = EpochReclaimer> {
    ptr: Shared<'g, T>,
    guard: &'g R::Guard,
    _marker: PhantomData<R>,
}

impl<'g, T, R: Reclaimer> GuardPtr<'g, T, R> {
    /// Returns an empty pointer bound to `guard`.
    #[inline]
    pub(crate) fn null(guard: &'g R::Guard) -> Self {
        GuardPtr {
            ptr: Shared::null(),
            guard,
            _marker: PhantomData,
        }
    }

    /// Loads and protects the current value of `src`.
    #[inline]
    pub fn acquire(src: &Atomic<T>, ord: Ordering, guard: &'g R::Guard) -> Self {
        GuardPtr {
            ptr: R::protect(src, ord, guard),
            guard,
            _marker: PhantomData,
        }
    }

    /// Re-loads this pointer from `src`.
    #[inline]
    pub fn reacquire(&mut self, src: &Atomic<T>, ord: Ordering) {
        self.ptr = R::protect(src, ord, self.guard);
    }

    /// Returns the raw shared pointer.
    #[inline]
    pub fn shared(&self) -> Shared<'g, T> {
        self.ptr
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Returns a reference to the protected object, or `None` if the pointer is null.
    #[inline]
    pub fn as_ref(&self) -> Option<&'g T> {
        unsafe { self.ptr.as_ref() }
    }

    /// Dereferences the protected pointer.
    ///
    /// # Safety
    ///
    /// The pointer must not be null.
    #[inline]
    pub unsafe fn deref(&self) -> &'g T {
        debug_assert!(!self.ptr.is_null(), "dereferencing a null GuardPtr");
        self.ptr.deref()
    }

    /// Retires the pointed-to object and leaves this pointer null.
    ///
    /// # Safety
    ///
    /// Same contract as [`Reclaimer::retire`].
    pub unsafe fn reclaim(&mut self)
    where
        T: Send + 'static,
    {
        if !self.ptr.is_null() {
            R::retire(self.ptr, self.guard);
            self.ptr = Shared::null();
        }
    }
}

impl<'g, T, R: Reclaimer> Clone for GuardPtr<'g, T, R> {
    fn clone(&self) -> Self {
        GuardPtr {
            ptr: self.ptr,
            guard: self.guard,
            _marker: PhantomData,
        }
    }
}

impl<'g, T, R: Reclaimer> PartialEq<Shared<'g, T>> for GuardPtr<'g, T, R> {
    fn eq(&self, other: &Shared<'g, T>) -> bool {
        self.ptr == *other
    }
}

impl<'g, T, R: Reclaimer> PartialEq for GuardPtr<'g, T, R> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<'g, T, R: Reclaimer> fmt::Debug for GuardPtr<'g, T, R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("GuardPtr").field(&self.ptr.as_raw()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering::{Acquire, Relaxed};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::atomic::Owned;

    #[test]
    fn acquire_follows_updates() {
        let guard = &EpochReclaimer::guard();
        let a = Atomic::new(1u64);

        let mut p = GuardPtr::<u64, EpochReclaimer>::acquire(&a, Acquire, guard);
        assert_eq!(p.as_ref(), Some(&1));

        let old = a.load(Relaxed, guard);
        a.store(Owned::new(2u64).into_shared(guard), Relaxed);
        assert!(p == old);

        p.reacquire(&a, Acquire);
        assert_eq!(unsafe { *p.deref() }, 2);
        assert!(p != old);

        unsafe {
            EpochReclaimer::retire(old, guard);
            p.reclaim();
        }
        assert!(p.is_null());
    }

    #[test]
    fn null_pointer_has_no_referent() {
        let guard = &EpochReclaimer::guard();
        let a = Atomic::<u64>::null();

        let mut p = GuardPtr::<u64, EpochReclaimer>::acquire(&a, Acquire, guard);
        assert!(p.is_null());
        assert!(p.as_ref().is_none());

        // Reclaiming a null pointer is a no-op.
        unsafe { p.reclaim() };
        assert!(p.as_ref().is_none());

        let empty = GuardPtr::<u64, EpochReclaimer>::null(guard);
        assert!(empty == p);
        assert!(empty.as_ref().is_none());
    }

    #[test]
    fn reclaimed_objects_are_dropped() {
        struct Elem(Arc<AtomicUsize>);

        impl Drop for Elem {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        {
            let guard = &EpochReclaimer::guard();
            let a = Atomic::new(Elem(dropped.clone()));
            let mut p = GuardPtr::<Elem, EpochReclaimer>::acquire(&a, Acquire, guard);
            unsafe { p.reclaim() };
        }

        for _ in 0..1000 {
            if dropped.load(Ordering::Relaxed) == 1 {
                break;
            }
            EpochReclaimer::guard().flush();
        }
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }
}
