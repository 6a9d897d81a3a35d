//! Object handles the queue can carry.
//!
//! The queue never copies values around: it moves *handles* to heap-resident objects in and out
//! of its slots as bare addresses. A [`Storage`] converts a handle into such an address and back.

use std::sync::Arc;

/// A handle that can be converted into a raw pointer and back.
///
/// # Safety
///
/// `from_raw(into_raw(x))` must yield a handle equivalent to `x`, and `into_raw` must transfer
/// whatever ownership the handle carries to the raw pointer. Handles that are never null must not
/// return null from `into_raw`.
pub unsafe trait Storage<T>: Sized {
    /// Consumes the handle and returns the address of the object it refers to.
    fn into_raw(self) -> *mut T;

    /// Rebuilds the handle from an address returned by [`into_raw`].
    ///
    /// # Safety
    ///
    /// `raw` must come from a call to `into_raw` on the same handle type, and must be converted
    /// back at most once.
    ///
    /// [`into_raw`]: trait.Storage.html#tymethod.into_raw
    unsafe fn from_raw(raw: *mut T) -> Self;
}

unsafe impl<T> Storage<T> for Box<T> {
    fn into_raw(self) -> *mut T {
        Box::into_raw(self)
    }

    unsafe fn from_raw(raw: *mut T) -> Self {
        Box::from_raw(raw)
    }
}

unsafe impl<T> Storage<T> for Arc<T> {
    fn into_raw(self) -> *mut T {
        Arc::into_raw(self) as *mut T
    }

    unsafe fn from_raw(raw: *mut T) -> Self {
        Arc::from_raw(raw as *const T)
    }
}

/// Raw pointers carry no ownership; the caller keeps the pointee alive for as long as the queue
/// can hand the pointer out again. Null is representable here and rejected by `push`.
unsafe impl<T> Storage<T> for *mut T {
    fn into_raw(self) -> *mut T {
        self
    }

    unsafe fn from_raw(raw: *mut T) -> Self {
        raw
    }
}
