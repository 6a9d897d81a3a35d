use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory orderings for compare-and-set operations.
///
/// A compare-and-set operation can have different memory orderings depending on whether it
/// succeeds or fails. This trait generalizes both cases: a single [`Ordering`] picks the
/// strongest appropriate failure ordering on its own, while a pair `(success, failure)` spells
/// both out.
///
/// [`Ordering`]: https://doc.rust-lang.org/std/sync/atomic/enum.Ordering.html
pub trait CompareAndSetOrdering {
    /// The ordering of the operation when it succeeds.
    fn success(&self) -> Ordering;

    /// The ordering of the load operation when the comparison fails.
    fn failure(&self) -> Ordering;
}

impl CompareAndSetOrdering for Ordering {
    #[inline]
    fn success(&self) -> Ordering {
        *self
    }

    #[inline]
    fn failure(&self) -> Ordering {
        strongest_failure_ordering(*self)
    }
}

impl CompareAndSetOrdering for (Ordering, Ordering) {
    #[inline]
    fn success(&self) -> Ordering {
        self.0
    }

    #[inline]
    fn failure(&self) -> Ordering {
        self.1
    }
}

/// Given ordering for the success case in a compare-exchange operation, returns the strongest
/// appropriate ordering for the failure case.
#[inline]
fn strongest_failure_ordering(ord: Ordering) -> Ordering {
    use self::Ordering::*;
    match ord {
        Relaxed | Release => Relaxed,
        Acquire | AcqRel => Acquire,
        _ => SeqCst,
    }
}

/// Panics if the pointer is not properly aligned.
#[inline]
pub(crate) fn ensure_aligned<T>(raw: *const T) {
    assert!(raw as usize & low_bits::<T>() == 0, "unaligned pointer");
}

/// Returns a bitmask containing the unused least significant bits of an aligned pointer to `T`.
#[inline]
pub(crate) fn low_bits<T>() -> usize {
    (1 << mem::align_of::<T>().trailing_zeros()) - 1
}

/// Given a tagged pointer `data`, returns the same pointer, but tagged with `tag`.
///
/// Panics if the tag doesn't fit into the unused bits of the pointer.
#[inline]
fn data_with_tag<T>(data: usize, tag: usize) -> usize {
    let mask = low_bits::<T>();
    assert!(tag <= mask, "tag too large to fit into the unused bits: {} > {}", tag, mask);
    (data & !mask) | tag
}

/// An atomic pointer that can be safely shared between threads.
///
/// The pointer must be properly aligned. Since it is aligned, a tag can be stored into the unused
/// least significant bits of the address. This is the "markable" pointer the queue links its
/// segments with.
///
/// Every method that loads the pointer takes a reference to a witness `G` whose borrow bounds
/// the lifetime of the returned [`Shared`]. With the epoch scheme the witness is a [`Guard`];
/// other schemes pass whatever their protection token is.
///
/// [`Shared`]: struct.Shared.html
/// [`Guard`]: struct.Guard.html
pub struct Atomic<T> {
    data: AtomicUsize,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send + Sync> Send for Atomic<T> {}
unsafe impl<T: Send + Sync> Sync for Atomic<T> {}

impl<T> Atomic<T> {
    fn from_data(data: usize) -> Self {
        Atomic {
            data: AtomicUsize::new(data),
            _marker: PhantomData,
        }
    }

    /// Returns a new null atomic pointer.
    ///
    /// # Examples
    ///
    /// ```
    /// use faa_array_queue::Atomic;
    ///
    /// let a = Atomic::<i32>::null();
    /// ```
    pub fn null() -> Self {
        Self::from_data(0)
    }

    /// Allocates `value` on the heap and returns a new atomic pointer pointing to it.
    ///
    /// # Examples
    ///
    /// ```
    /// use faa_array_queue::Atomic;
    ///
    /// let a = Atomic::new(1234);
    /// ```
    pub fn new(value: T) -> Self {
        Self::from_owned(Owned::new(value))
    }

    /// Returns a new atomic pointer pointing to `owned`.
    pub fn from_owned(owned: Owned<T>) -> Self {
        Self::from_data(owned.into_data())
    }

    /// Loads a `Shared` from the atomic pointer.
    ///
    /// This method takes an [`Ordering`] argument which describes the memory ordering of this
    /// operation.
    ///
    /// [`Ordering`]: https://doc.rust-lang.org/std/sync/atomic/enum.Ordering.html
    ///
    /// # Examples
    ///
    /// ```
    /// use faa_array_queue::{self as faa, Atomic};
    /// use std::sync::atomic::Ordering::SeqCst;
    ///
    /// let a = Atomic::new(1234);
    /// let guard = &faa::pin();
    /// let p = a.load(SeqCst, guard);
    /// assert!(!p.is_null());
    /// # unsafe { drop(a.load(SeqCst, guard).into_owned()); }
    /// ```
    pub fn load<'g, G>(&self, ord: Ordering, _: &'g G) -> Shared<'g, T> {
        Shared::from_data(self.data.load(ord))
    }

    /// Stores a `Shared` into the atomic pointer.
    pub fn store(&self, new: Shared<T>, ord: Ordering) {
        self.data.store(new.data, ord);
    }

    /// Stores `new` into the atomic pointer if the current value is the same as `current`.
    ///
    /// The return value is a result indicating whether the new pointer was written. On success
    /// the written pointer is returned, on failure the actual current value.
    ///
    /// This method takes a [`CompareAndSetOrdering`] argument which describes the memory
    /// ordering of this operation.
    ///
    /// [`CompareAndSetOrdering`]: trait.CompareAndSetOrdering.html
    ///
    /// # Examples
    ///
    /// ```
    /// use faa_array_queue::{self as faa, Atomic, Shared};
    /// use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
    ///
    /// let a = Atomic::<i32>::null();
    /// let guard = &faa::pin();
    /// let curr = a.load(Acquire, guard);
    /// assert!(a.compare_and_set(curr, Shared::null(), (Release, Relaxed), guard).is_ok());
    /// ```
    pub fn compare_and_set<'g, O, G>(
        &self,
        current: Shared<T>,
        new: Shared<T>,
        ord: O,
        _: &'g G,
    ) -> Result<Shared<'g, T>, Shared<'g, T>>
    where
        O: CompareAndSetOrdering,
    {
        match self
            .data
            .compare_exchange(current.data, new.data, ord.success(), ord.failure())
        {
            Ok(_) => Ok(Shared::from_data(new.data)),
            Err(previous) => Err(Shared::from_data(previous)),
        }
    }

    /// Stores the owned pointer `new` into the atomic pointer if the current value is the same
    /// as `current`.
    ///
    /// On success the pointer that was written is returned and ownership passes to the atomic.
    /// On failure the actual current value and `new` are handed back.
    pub fn compare_and_set_owned<'g, O, G>(
        &self,
        current: Shared<T>,
        new: Owned<T>,
        ord: O,
        _: &'g G,
    ) -> Result<Shared<'g, T>, (Shared<'g, T>, Owned<T>)>
    where
        O: CompareAndSetOrdering,
    {
        match self
            .data
            .compare_exchange(current.data, new.data, ord.success(), ord.failure())
        {
            Ok(_) => Ok(Shared::from_data(new.into_data())),
            Err(previous) => Err((Shared::from_data(previous), new)),
        }
    }

    /// Like [`compare_and_set_owned`], but allowed to fail spuriously even when the comparison
    /// succeeds, which can result in more efficient code inside a retry loop.
    ///
    /// [`compare_and_set_owned`]: struct.Atomic.html#method.compare_and_set_owned
    pub fn compare_and_set_weak_owned<'g, O, G>(
        &self,
        current: Shared<T>,
        new: Owned<T>,
        ord: O,
        _: &'g G,
    ) -> Result<Shared<'g, T>, (Shared<'g, T>, Owned<T>)>
    where
        O: CompareAndSetOrdering,
    {
        match self
            .data
            .compare_exchange_weak(current.data, new.data, ord.success(), ord.failure())
        {
            Ok(_) => Ok(Shared::from_data(new.into_data())),
            Err(previous) => Err((Shared::from_data(previous), new)),
        }
    }

    /// Bitwise "or" with the current tag.
    ///
    /// Performs a bitwise "or" operation on the current tag and the argument `tag`, and sets the
    /// new tag to the result. Returns the previous pointer.
    pub fn fetch_or<'g, G>(&self, tag: usize, ord: Ordering, _: &'g G) -> Shared<'g, T> {
        Shared::from_data(self.data.fetch_or(tag & low_bits::<T>(), ord))
    }

    /// Takes ownership of the pointee.
    ///
    /// # Safety
    ///
    /// This method may be called only if the pointer is valid and nobody else is holding a
    /// reference to the same object.
    pub unsafe fn into_owned(self) -> Owned<T> {
        Owned::from_data(self.data.into_inner())
    }
}

impl<T> fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let data = self.data.load(Ordering::SeqCst);
        f.debug_struct("Atomic")
            .field("raw", &((data & !low_bits::<T>()) as *const T))
            .field("tag", &(data & low_bits::<T>()))
            .finish()
    }
}

impl<T> Default for Atomic<T> {
    fn default() -> Self {
        Atomic::null()
    }
}

impl<'g, T> From<Shared<'g, T>> for Atomic<T> {
    fn from(ptr: Shared<'g, T>) -> Self {
        Self::from_data(ptr.data)
    }
}

/// An owned heap-allocated object.
///
/// This type is very similar to `Box<T>`.
///
/// The pointer must be properly aligned. Since it is aligned, a tag can be stored into the unused
/// least significant bits of the address.
pub struct Owned<T> {
    data: usize,
    _marker: PhantomData<Box<T>>,
}

impl<T> Owned<T> {
    fn from_data(data: usize) -> Self {
        debug_assert!(data != 0, "converting null into `Owned`");
        Owned {
            data,
            _marker: PhantomData,
        }
    }

    fn into_data(self) -> usize {
        let data = self.data;
        mem::forget(self);
        data
    }

    /// Allocates `value` on the heap and returns a new owned pointer pointing to it.
    ///
    /// # Examples
    ///
    /// ```
    /// use faa_array_queue::Owned;
    ///
    /// let o = Owned::new(1234);
    /// assert_eq!(*o, 1234);
    /// ```
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Returns a new owned pointer initialized with `b`.
    pub fn from_box(b: Box<T>) -> Self {
        unsafe { Self::from_raw(Box::into_raw(b)) }
    }

    /// Returns a new owned pointer initialized with `raw`.
    ///
    /// # Panics
    ///
    /// Panics if `raw` is not properly aligned.
    ///
    /// # Safety
    ///
    /// `raw` must come from `Box::into_raw` and must not be owned by anyone else.
    pub unsafe fn from_raw(raw: *mut T) -> Self {
        ensure_aligned(raw);
        Self::from_data(raw as usize)
    }

    /// Converts the owned pointer into a `Box`, dropping the tag.
    pub fn into_box(self) -> Box<T> {
        let raw = (self.into_data() & !low_bits::<T>()) as *mut T;
        unsafe { Box::from_raw(raw) }
    }

    /// Converts the owned pointer into a [`Shared`] whose lifetime is bound by `witness`.
    ///
    /// [`Shared`]: struct.Shared.html
    pub fn into_shared<'g, G>(self, _: &'g G) -> Shared<'g, T> {
        Shared::from_data(self.into_data())
    }

    /// Returns the tag stored within the pointer.
    ///
    /// # Examples
    ///
    /// ```
    /// use faa_array_queue::Owned;
    ///
    /// assert_eq!(Owned::new(0u64).tag(), 0);
    /// ```
    pub fn tag(&self) -> usize {
        self.data & low_bits::<T>()
    }

    /// Returns the same pointer, but tagged with `tag`.
    pub fn with_tag(self, tag: usize) -> Self {
        let data = self.into_data();
        Self::from_data(data_with_tag::<T>(data, tag))
    }
}

impl<T> Drop for Owned<T> {
    fn drop(&mut self) {
        let raw = (self.data & !low_bits::<T>()) as *mut T;
        unsafe {
            drop(Box::from_raw(raw));
        }
    }
}

impl<T> Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*((self.data & !low_bits::<T>()) as *const T) }
    }
}

impl<T> DerefMut for Owned<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *((self.data & !low_bits::<T>()) as *mut T) }
    }
}

impl<T: fmt::Debug> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Owned")
            .field("value", &**self)
            .field("tag", &self.tag())
            .finish()
    }
}

/// A pointer to an object protected by a reclamation scheme.
///
/// The pointer is valid for use only within `'g`.
///
/// The pointer must be properly aligned. Since it is aligned, a tag can be stored into the unused
/// least significant bits of the address.
pub struct Shared<'g, T: 'g> {
    data: usize,
    _marker: PhantomData<(&'g (), *const T)>,
}

impl<'g, T> Clone for Shared<'g, T> {
    fn clone(&self) -> Self {
        Shared {
            data: self.data,
            _marker: PhantomData,
        }
    }
}

impl<'g, T> Copy for Shared<'g, T> {}

impl<'g, T> PartialEq<Shared<'g, T>> for Shared<'g, T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<'g, T> Eq for Shared<'g, T> {}

impl<'g, T> Shared<'g, T> {
    fn from_data(data: usize) -> Self {
        Shared {
            data,
            _marker: PhantomData,
        }
    }

    /// Returns a new null pointer.
    ///
    /// # Examples
    ///
    /// ```
    /// use faa_array_queue::Shared;
    ///
    /// let p = Shared::<i32>::null();
    /// assert!(p.is_null());
    /// ```
    pub fn null() -> Self {
        Self::from_data(0)
    }

    /// Returns `true` if the pointer is null (ignoring the tag).
    pub fn is_null(&self) -> bool {
        self.as_raw().is_null()
    }

    /// Converts the pointer to a raw pointer (without the tag).
    pub fn as_raw(&self) -> *const T {
        (self.data & !low_bits::<T>()) as *const T
    }

    /// Dereferences the pointer.
    ///
    /// Returns a reference to the pointee that is valid during the lifetime `'g`.
    ///
    /// # Safety
    ///
    /// The pointer must be non-null and point to an object that is protected for `'g`. Another
    /// source of unsafety is the possibility of unsynchronized reads: a relaxed load does not
    /// synchronize with the initialization of the object. Use `Acquire` (or stronger) loads
    /// paired with `Release` stores.
    pub unsafe fn deref(&self) -> &'g T {
        &*self.as_raw()
    }

    /// Converts the pointer to a reference, or `None` if it is null.
    ///
    /// # Safety
    ///
    /// Same as [`deref`], except that null is checked for.
    ///
    /// [`deref`]: struct.Shared.html#method.deref
    pub unsafe fn as_ref(&self) -> Option<&'g T> {
        self.as_raw().as_ref()
    }

    /// Takes ownership of the pointee.
    ///
    /// # Safety
    ///
    /// The pointer must be non-null, and nobody else may hold or later obtain a reference to the
    /// same object.
    pub unsafe fn into_owned(self) -> Owned<T> {
        Owned::from_data(self.data)
    }

    /// Returns the tag stored within the pointer.
    pub fn tag(&self) -> usize {
        self.data & low_bits::<T>()
    }

    /// Returns the same pointer, but tagged with `tag`.
    ///
    /// # Examples
    ///
    /// ```
    /// use faa_array_queue::{self as faa, Atomic};
    /// use std::sync::atomic::Ordering::SeqCst;
    ///
    /// let a = Atomic::new(0u64);
    /// let guard = &faa::pin();
    /// let p1 = a.load(SeqCst, guard);
    /// let p2 = p1.with_tag(1);
    ///
    /// assert_eq!(p1.tag(), 0);
    /// assert_eq!(p2.tag(), 1);
    /// assert_eq!(p1.as_raw(), p2.as_raw());
    /// # unsafe { drop(p1.into_owned()); }
    /// ```
    pub fn with_tag(&self, tag: usize) -> Self {
        Self::from_data(data_with_tag::<T>(self.data, tag))
    }
}

impl<'g, T> Default for Shared<'g, T> {
    fn default() -> Self {
        Shared::null()
    }
}

impl<'g, T> fmt::Debug for Shared<'g, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Shared")
            .field("raw", &self.as_raw())
            .field("tag", &self.tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

    use super::*;

    #[test]
    fn failure_ordering() {
        assert_eq!(Release.failure(), Relaxed);
        assert_eq!(Ordering::AcqRel.failure(), Acquire);
        assert_eq!((Release, Acquire).failure(), Acquire);
        assert_eq!((Release, Acquire).success(), Release);
    }

    #[test]
    fn tag_round_trip() {
        let o = Owned::new(7u64).with_tag(3);
        assert_eq!(o.tag(), 3);
        assert_eq!(*o, 7);
    }

    #[test]
    #[should_panic(expected = "tag too large")]
    fn tag_overflow() {
        drop(Owned::new(7u16).with_tag(2));
    }

    #[test]
    fn compare_and_set_owned_hands_back_on_failure() {
        let witness = ();
        let a = Atomic::new(1u64);
        let wrong = Shared::null();

        match a.compare_and_set_owned(wrong, Owned::new(2u64), (Release, Relaxed), &witness) {
            Ok(_) => panic!("compare_and_set_owned should fail"),
            Err((current, new)) => {
                assert!(!current.is_null());
                assert_eq!(*new, 2);
            }
        }

        let current = a.load(Acquire, &witness);
        let installed = a
            .compare_and_set_owned(current, Owned::new(3u64), Release, &witness)
            .unwrap();
        unsafe {
            assert_eq!(*installed.deref(), 3);
            drop(current.into_owned());
            drop(a.into_owned());
        }
    }

    #[test]
    fn fetch_or_marks() {
        let witness = ();
        let a = Atomic::new(5u32);
        let prev = a.fetch_or(1, Release, &witness);
        assert_eq!(prev.tag(), 0);
        assert_eq!(a.load(Acquire, &witness).tag(), 1);
        unsafe { drop(a.into_owned()) }
    }
}
