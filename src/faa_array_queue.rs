//! Ramalhete and Correia's FAA array queue.
//!
//! An unbounded lock-free MPMC queue built from a linked chain of fixed-size segments. Producers
//! and consumers claim slots with a single fetch-and-add on a per-segment cursor instead of
//! retrying a compare-and-set on a shared head or tail.
//!
//! Ramalhete and Correia.  FAAArrayQueue - MPMC lock-free queue (part 4 of 4).
//! http://concurrencyfreaks.blogspot.com/2016/11/faaarrayqueue-mpmc-lock-free-queue-part.html

use std::fmt;
use std::hint;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::atomic::{Atomic, Shared};
use crate::backoff::{Backoff, NoBackoff};
use crate::config::Config;
use crate::error::{ConfigError, PushError};
use crate::guard::unprotected;
use crate::reclaim::{EpochReclaimer, GuardPtr, Reclaimer};
use crate::segment::Segment;
use crate::storage::Storage;

/// An unbounded multi-producer multi-consumer queue of object handles.
///
/// The queue stores handles `S` to heap-resident values of type `T` (`Box<T>` by default) as bare
/// addresses. Segments that consumers have drained are handed to the reclaimer `R`, and every
/// failed retry invokes a fresh backoff `B`.
///
/// # Examples
///
/// ```
/// use faa_array_queue::FaaArrayQueue;
///
/// let q = FaaArrayQueue::<String>::new();
/// q.push(Box::new("a".to_string())).unwrap();
/// q.push(Box::new("b".to_string())).unwrap();
///
/// assert_eq!(q.try_pop().as_deref().map(String::as_str), Some("a"));
/// assert_eq!(q.try_pop().as_deref().map(String::as_str), Some("b"));
/// assert!(q.try_pop().is_none());
/// ```
pub struct FaaArrayQueue<T, S = Box<T>, R = EpochReclaimer, B = NoBackoff>
where
    S: Storage<T>,
    R: Reclaimer,
    B: Backoff,
{
    head: CachePadded<Atomic<Segment>>,
    tail: CachePadded<Atomic<Segment>>,
    config: Config,
    _marker: PhantomData<(S, fn() -> (T, R, B))>,
}

// Handles only ever move between threads, they are never shared.
unsafe impl<T, S, R, B> Sync for FaaArrayQueue<T, S, R, B>
where
    S: Storage<T> + Send,
    R: Reclaimer,
    B: Backoff,
{
}

impl<T, S, R, B> FaaArrayQueue<T, S, R, B>
where
    S: Storage<T>,
    R: Reclaimer,
    B: Backoff,
{
    /// Creates an empty queue with the default [`Config`].
    ///
    /// # Panics
    ///
    /// Panics if `T` is aligned to a single byte, since slots keep a tag in the low address bit.
    /// Use [`with_config`] to get an error instead.
    ///
    /// [`Config`]: struct.Config.html
    /// [`with_config`]: struct.FaaArrayQueue.html#method.with_config
    pub fn new() -> Self {
        match Self::with_config(Config::default()) {
            Ok(q) => q,
            Err(err) => panic!("{}", err),
        }
    }

    /// Creates an empty queue with the given configuration.
    ///
    /// Fails if the configuration is invalid or if `T` is aligned to a single byte, since slots
    /// keep a tag in the low address bit.
    pub fn with_config(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        if mem::align_of::<T>() < 2 {
            return Err(ConfigError::UnalignedValue {
                align: mem::align_of::<T>(),
            });
        }
        Ok(Self::build(config))
    }

    fn build(config: Config) -> Self {
        let q = FaaArrayQueue {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
            config,
            _marker: PhantomData,
        };
        let sentinel = Segment::sentinel(config.get_entries_per_node(), config.stride());
        unsafe {
            let guard = &unprotected();
            let sentinel = sentinel.into_shared(guard);
            q.head.store(sentinel, Relaxed);
            q.tail.store(sentinel, Relaxed);
        }
        q
    }

    /// Returns the configuration this queue was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Adds `value` to the back of the queue.
    ///
    /// A null or odd address is rejected with [`PushError::InvalidArgument`] and the queue stays
    /// untouched. If a new segment is needed but cannot be allocated, the value is handed back in
    /// [`PushError::AllocationFailed`].
    ///
    /// [`PushError::InvalidArgument`]: enum.PushError.html#variant.InvalidArgument
    /// [`PushError::AllocationFailed`]: enum.PushError.html#variant.AllocationFailed
    pub fn push(&self, value: S) -> Result<(), PushError<S>> {
        let raw = value.into_raw();
        let item = raw as usize;
        // The low bit is the slot's retired tag.
        if raw.is_null() || item & 1 != 0 {
            return Err(PushError::InvalidArgument);
        }

        let guard = R::guard();
        let mut backoff = B::default();
        let mut tail = GuardPtr::<Segment, R>::null(&guard);

        loop {
            tail.reacquire(&self.tail, Acquire);
            // Head and tail always point to a segment.
            let t = unsafe { tail.deref() };

            let idx = t.push_idx.fetch_add(1, Relaxed);
            if idx < t.capacity() {
                if t.slot(idx).publish(item) {
                    return Ok(());
                }
                // A consumer got to this slot first and poisoned it.
                backoff.backoff();
                continue;
            }

            // This segment is full.
            if tail != self.tail.load(Relaxed, &guard) {
                continue;
            }

            let next = t.next.load(Relaxed, &guard);
            if next.is_null() {
                let segment = match Segment::new(t.capacity(), self.config.stride(), item) {
                    Ok(segment) => segment,
                    Err(err) => {
                        debug!(error = %err, "failed to allocate segment");
                        return Err(PushError::AllocationFailed(unsafe { S::from_raw(raw) }));
                    }
                };

                match t
                    .next
                    .compare_and_set_owned(Shared::null(), segment, (Release, Relaxed), &guard)
                {
                    Ok(new) => {
                        let _ = self
                            .tail
                            .compare_and_set(tail.shared(), new, (Release, Relaxed), &guard);
                        trace!(segment = ?new.as_raw(), "appended segment");
                        return Ok(());
                    }
                    Err((_, segment)) => {
                        // Somebody else linked a segment. Ours still holds only an address.
                        drop(segment);
                    }
                }
            } else {
                let next = t.next.load(Acquire, &guard);
                let _ = self
                    .tail
                    .compare_and_set(tail.shared(), next, (Release, Relaxed), &guard);
            }
        }
    }

    /// Removes a value from the front of the queue.
    ///
    /// Returns `None` if the queue is observed to be empty.
    pub fn try_pop(&self) -> Option<S> {
        let guard = R::guard();
        let mut backoff = B::default();
        let mut head = GuardPtr::<Segment, R>::null(&guard);

        loop {
            head.reacquire(&self.head, Acquire);
            let h = unsafe { head.deref() };

            if h.pop_idx.load(Relaxed) >= h.push_idx.load(Relaxed)
                && h.next.load(Relaxed, &guard).is_null()
            {
                return None;
            }

            let idx = h.pop_idx.fetch_add(1, Relaxed);
            if idx >= h.capacity() {
                // This segment is drained. Move on to the next one, if there is any.
                let next = h.next.load(Acquire, &guard);
                if next.is_null() {
                    return None;
                }

                if self
                    .head
                    .compare_and_set(head.shared(), next, (Release, Relaxed), &guard)
                    .is_ok()
                {
                    // Producers must not find the retired segment through a lagging tail.
                    let _ = self
                        .tail
                        .compare_and_set(head.shared(), next, (Release, Relaxed), &guard);
                    trace!(segment = ?head.shared().as_raw(), "retired segment");
                    unsafe { head.reclaim() };
                }
                continue;
            }

            let slot = h.slot(idx);
            for _ in 0..self.config.get_pop_retries() {
                if !slot.is_empty() {
                    break;
                }
                hint::spin_loop();
            }

            if let Some(item) = slot.consume() {
                return Some(unsafe { S::from_raw(item as *mut T) });
            }

            // The producer that claimed this slot was too slow. It will publish elsewhere.
            backoff.backoff();
        }
    }

    /// Returns `true` if the queue looked empty at some point during the call.
    ///
    /// Concurrent pushes and pops may change the answer right away.
    pub fn is_empty(&self) -> bool {
        let guard = R::guard();
        let mut curr = R::protect(&self.head, Acquire, &guard);

        while let Some(segment) = unsafe { curr.as_ref() } {
            if !segment.is_drained() {
                return false;
            }
            curr = R::protect(&segment.next, Acquire, &guard);
        }
        true
    }
}

impl<T, S, R, B> Drop for FaaArrayQueue<T, S, R, B>
where
    S: Storage<T>,
    R: Reclaimer,
    B: Backoff,
{
    fn drop(&mut self) {
        unsafe {
            let guard = &unprotected();

            // Frees every segment from head on, also when dropping a value below panics.
            let segments = scopeguard::guard(self.head.load(Relaxed, guard), |mut curr| {
                while let Some(segment) = curr.as_ref() {
                    let next = segment.next.load(Relaxed, guard);
                    drop(curr.into_owned());
                    curr = next;
                }
            });

            let mut curr = *segments;
            while let Some(segment) = curr.as_ref() {
                for slot in segment.entries() {
                    if let Some(item) = slot.take() {
                        drop(S::from_raw(item as *mut T));
                    }
                }
                curr = segment.next.load(Relaxed, guard);
            }
        }
    }
}

impl<T, S, R, B> Default for FaaArrayQueue<T, S, R, B>
where
    S: Storage<T>,
    R: Reclaimer,
    B: Backoff,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S, R, B> fmt::Debug for FaaArrayQueue<T, S, R, B>
where
    S: Storage<T>,
    R: Reclaimer,
    B: Backoff,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FaaArrayQueue")
            .field("config", &self.config)
            .finish()
    }
}
