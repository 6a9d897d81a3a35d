//! Michael-Scott lock-free queue.
//!
//! Usable with any number of producers and consumers.
//!
//! Michael and Scott.  Simple, Fast, and Practical Non-Blocking and Blocking Concurrent Queue
//! Algorithms.  PODC 1996.  http://dl.acm.org/citation.cfm?id=248106
//!
//! The collector keeps its sealed garbage bags here. The FAA array queue cannot take this role,
//! since it relies on the collector itself for reclaiming its segments.

use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::atomic::{Atomic, Owned, Shared};
use crate::guard::{unprotected, Guard};

// The representation here is a singly-linked list, with a sentinel node at the front. In general
// the `tail` pointer may lag behind the actual tail.
#[derive(Debug)]
pub struct Queue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
}

#[derive(Debug)]
struct Node<T> {
    /// The slot in which a value of type `T` can be stored.
    ///
    /// The type of `data` is `MaybeUninit<T>` because a `Node<T>` doesn't always contain a `T`.
    /// For example, the sentinel node in a queue never contains a value: its slot is always
    /// empty. Other nodes start their life with a push operation and contain a value until it
    /// gets popped out. After that such empty nodes get added to the collector for destruction.
    data: MaybeUninit<T>,

    next: Atomic<Node<T>>,
}

// Any particular `T` should never be accessed concurrently, so no need for `Sync`.
unsafe impl<T: Send> Sync for Queue<T> {}
unsafe impl<T: Send> Send for Queue<T> {}

impl<T> Queue<T> {
    /// Create a new, empty queue.
    pub fn new() -> Queue<T> {
        let q = Queue {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
        };
        let sentinel = Owned::new(Node {
            data: MaybeUninit::uninit(),
            next: Atomic::null(),
        });
        unsafe {
            let guard = &unprotected();
            let sentinel = sentinel.into_shared(guard);
            q.head.store(sentinel, Relaxed);
            q.tail.store(sentinel, Relaxed);
        }
        q
    }

    /// Attempts to atomically place `new` into the `next` pointer of `onto`, and returns `true`
    /// on success. The queue's `tail` pointer may be updated.
    #[inline(always)]
    fn push_internal(&self, onto: Shared<Node<T>>, new: Shared<Node<T>>, guard: &Guard) -> bool {
        // is `onto` the actual tail?
        let o = unsafe { onto.deref() };
        let next = o.next.load(Acquire, guard);
        if unsafe { next.as_ref().is_some() } {
            // if not, try to "help" by moving the tail pointer forward
            let _ = self.tail.compare_and_set(onto, next, Release, guard);
            false
        } else {
            // looks like the actual tail; attempt to link in `new`
            let result = o
                .next
                .compare_and_set(Shared::null(), new, Release, guard)
                .is_ok();
            if result {
                // try to move the tail pointer forward
                let _ = self.tail.compare_and_set(onto, new, Release, guard);
            }
            result
        }
    }

    /// Adds `t` to the back of the queue.
    pub fn push(&self, t: T, guard: &Guard) {
        let new = Owned::new(Node {
            data: MaybeUninit::new(t),
            next: Atomic::null(),
        });
        let new = Owned::into_shared(new, guard);

        loop {
            // We push onto the tail, so we'll start optimistically by looking there first.
            let tail = self.tail.load(Acquire, guard);

            // Attempt to push onto the `tail` snapshot; fails if `tail.next` has changed.
            if self.push_internal(tail, new, guard) {
                break;
            }
        }
    }

    /// Attempts to pop a data node, if the data satisfies the given condition. `Ok(None)` if
    /// the queue is empty or the data does not satisfy the condition; `Err(())` if lost race to
    /// pop.
    #[inline(always)]
    fn pop_if_internal<F>(&self, condition: F, guard: &Guard) -> Result<Option<T>, ()>
    where
        T: Send + Sync,
        F: Fn(&T) -> bool,
    {
        let head = self.head.load(Acquire, guard);
        let h = unsafe { head.deref() };
        let next = h.next.load(Acquire, guard);
        match unsafe { next.as_ref() } {
            Some(n) if condition(unsafe { &*n.data.as_ptr() }) => unsafe {
                self.head
                    .compare_and_set(head, next, Release, guard)
                    .map(|_| {
                        let tail = self.tail.load(Relaxed, guard);
                        // Advance the tail so that we don't retire a pointer to a reachable node.
                        if head == tail {
                            let _ = self.tail.compare_and_set(tail, next, Release, guard);
                        }
                        guard.defer_destroy(head);
                        Some(ptr::read(n.data.as_ptr()))
                    })
                    .map_err(|_| ())
            },
            None | Some(_) => Ok(None),
        }
    }

    /// Attempts to dequeue from the front, if the item satisfies the given condition.
    ///
    /// Returns `None` if the queue is observed to be empty, or the head does not satisfy the
    /// given condition.
    pub fn try_pop_if<F>(&self, condition: F, guard: &Guard) -> Option<T>
    where
        T: Send + Sync,
        F: Fn(&T) -> bool,
    {
        loop {
            if let Ok(head) = self.pop_if_internal(&condition, guard) {
                return head;
            }
        }
    }

    /// Attempts to dequeue from the front.
    ///
    /// Returns `None` if the queue is observed to be empty.
    pub fn try_pop(&self, guard: &Guard) -> Option<T>
    where
        T: Send + Sync,
    {
        self.try_pop_if(|_| true, guard)
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = &unprotected();

            // Drain the remaining values. With an unprotected guard every popped node is
            // destroyed right away.
            loop {
                let head = self.head.load(Relaxed, guard);
                let next = head.deref().next.load(Relaxed, guard);
                match next.as_ref() {
                    None => break,
                    Some(n) => {
                        drop(ptr::read(n.data.as_ptr()));
                        self.head.store(next, Relaxed);
                        drop(head.into_owned());
                    }
                }
            }

            // Destroy the remaining sentinel node.
            let sentinel = self.head.load(Relaxed, guard);
            drop(sentinel.into_owned());
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use crossbeam_utils::thread;

    use super::*;
    use crate::Collector;

    const CONC_COUNT: i64 = 100_000;

    #[test]
    fn push_try_pop_1() {
        let collector = Collector::new();
        let handle = collector.register();
        let q: Queue<i64> = Queue::new();

        q.push(37, &handle.pin());
        assert_eq!(q.try_pop(&handle.pin()), Some(37));
        assert_eq!(q.try_pop(&handle.pin()), None);
    }

    #[test]
    fn push_try_pop_many_seq() {
        let collector = Collector::new();
        let handle = collector.register();
        let q: Queue<i64> = Queue::new();

        for i in 0..200 {
            q.push(i, &handle.pin());
        }
        for i in 0..200 {
            assert_eq!(q.try_pop(&handle.pin()), Some(i));
        }
        assert_eq!(q.try_pop(&handle.pin()), None);
    }

    #[test]
    fn try_pop_if_respects_condition() {
        let collector = Collector::new();
        let handle = collector.register();
        let q: Queue<i64> = Queue::new();

        q.push(3, &handle.pin());
        q.push(4, &handle.pin());
        assert_eq!(q.try_pop_if(|x| *x % 2 == 0, &handle.pin()), None);
        assert_eq!(q.try_pop_if(|x| *x % 2 == 1, &handle.pin()), Some(3));
        assert_eq!(q.try_pop_if(|x| *x % 2 == 0, &handle.pin()), Some(4));
    }

    #[test]
    fn drop_releases_values() {
        use std::sync::Arc;

        let value = Arc::new(());
        {
            let collector = Collector::new();
            let handle = collector.register();
            let q = Queue::new();
            for _ in 0..10 {
                q.push(value.clone(), &handle.pin());
            }
            assert_eq!(Arc::strong_count(&value), 11);
        }
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn push_try_pop_many_spsc() {
        let collector = Collector::new();
        let q: Queue<i64> = Queue::new();

        thread::scope(|scope| {
            scope.spawn(|_| {
                let handle = collector.register();
                let mut next = 0;

                while next < CONC_COUNT {
                    if let Some(elem) = q.try_pop(&handle.pin()) {
                        assert_eq!(elem, next);
                        next += 1;
                    }
                }
            });

            let handle = collector.register();
            for i in 0..CONC_COUNT {
                q.push(i, &handle.pin())
            }
        })
        .unwrap();
    }
}
