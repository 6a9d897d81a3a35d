//! Michael's lock-free linked list.
//!
//! Michael.  High Performance Dynamic Lock-Free Hash Tables and List-Based Sets.  SPAA 2002.
//! http://dl.acm.org/citation.cfm?id=564870.564881
//!
//! Only insertion at the head and logical deletion are supported. Deleted entries are physically
//! unlinked by whoever iterates over them next.

use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::atomic::{Atomic, Owned, Shared};
use crate::guard::{unprotected, Guard};

/// An entry in the linked list.
struct NodeInner<T> {
    /// The data in the entry.
    data: T,

    /// The next entry in the linked list.
    /// If the tag is 1, this entry is marked as deleted.
    next: Atomic<Node<T>>,
}

pub struct Node<T>(CachePadded<NodeInner<T>>);

pub struct List<T> {
    head: Atomic<Node<T>>,
}

pub struct Iter<'g, T: 'g> {
    /// The guard that protects the iteration.
    guard: &'g Guard,

    /// Pointer from the predecessor to the current entry.
    pred: &'g Atomic<Node<T>>,

    /// The current entry.
    curr: Shared<'g, Node<T>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum IterError {
    /// Iterator lost a race in deleting a node by a concurrent iterator.
    LostRace,
}

impl<T> Node<T> {
    fn new(data: T) -> Self {
        Node(CachePadded::new(NodeInner {
            data,
            next: Atomic::null(),
        }))
    }

    /// Returns the data in this entry.
    pub fn get(&self) -> &T {
        &self.0.data
    }

    /// Marks this entry as deleted.
    pub fn delete(&self, guard: &Guard) {
        self.0.next.fetch_or(1, Release, guard);
    }
}

impl<T> List<T> {
    /// Returns a new, empty linked list.
    pub fn new() -> Self {
        List { head: Atomic::null() }
    }

    /// Inserts `data` into the head of the list.
    pub fn insert<'g>(&'g self, data: T, guard: &'g Guard) -> Shared<'g, Node<T>> {
        let mut new = Owned::new(Node::new(data));
        let mut next = self.head.load(Relaxed, guard);

        loop {
            new.0.next.store(next, Relaxed);
            match self
                .head
                .compare_and_set_weak_owned(next, new, Release, guard)
            {
                Ok(node) => return node,
                Err((n, c)) => {
                    next = n;
                    new = c;
                }
            }
        }
    }

    /// Returns an iterator over all data.
    ///
    /// # Caveat
    ///
    /// Every datum that is inserted at the moment this function is called and persists at least
    /// until the end of iteration will be returned. Since this iterator traverses a lock-free
    /// linked list that may be concurrently modified, some additional caveats apply:
    ///
    /// 1. If a new datum is inserted during iteration, it may or may not be returned.
    /// 2. If a datum is deleted during iteration, it may or may not be returned.
    /// 3. It may not return all data if a concurrent thread continues to iterate the same list.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        let pred = &self.head;
        let curr = pred.load(Acquire, guard);
        Iter { guard, pred, curr }
    }
}

impl<T> Drop for List<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = &unprotected();
            let mut curr = self.head.load(Relaxed, guard);
            while let Some(c) = curr.as_ref() {
                let succ = c.0.next.load(Relaxed, guard);
                drop(curr.into_owned());
                curr = succ.with_tag(0);
            }
        }
    }
}

impl<'g, T: Send + Sync> Iterator for Iter<'g, T> {
    type Item = Result<&'g T, IterError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(c) = unsafe { self.curr.as_ref() } {
            let succ = c.0.next.load(Acquire, self.guard);

            if succ.tag() == 1 {
                // This entry was removed. Try unlinking it from the list.
                let succ = succ.with_tag(0);

                match self
                    .pred
                    .compare_and_set(self.curr, succ, Acquire, self.guard)
                {
                    Ok(_) => {
                        unsafe {
                            self.guard.defer_destroy(self.curr);
                        }
                        self.curr = succ;
                    }
                    Err(current) => {
                        // We lost the race to delete the entry by a concurrent iterator. Set
                        // `self.curr` to the updated pointer, and report the lost.
                        self.curr = current;
                        return Some(Err(IterError::LostRace));
                    }
                }

                continue;
            }

            // Move one step forward.
            self.pred = &c.0.next;
            self.curr = succ;

            return Some(Ok(&c.0.data));
        }

        // We reached the end of the list.
        None
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_utils::thread;

    use super::*;
    use crate::Collector;

    #[test]
    fn insert_iter_delete() {
        let collector = Collector::new();
        let handle = collector.register();
        let guard = &handle.pin();

        let list = List::new();
        let a = list.insert(1u32, guard);
        list.insert(2u32, guard);
        list.insert(3u32, guard);

        let seen: Vec<u32> = list.iter(guard).map(|x| *x.unwrap()).collect();
        assert_eq!(seen, vec![3, 2, 1]);

        unsafe { a.deref().delete(guard) };
        let seen: Vec<u32> = list.iter(guard).map(|x| *x.unwrap()).collect();
        assert_eq!(seen, vec![3, 2]);
    }

    #[test]
    fn concurrent_insert() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 500;

        let collector = Collector::new();
        let list = List::new();

        thread::scope(|s| {
            for t in 0..THREADS {
                let list = &list;
                let collector = &collector;
                s.spawn(move |_| {
                    let handle = collector.register();
                    for i in 0..PER_THREAD {
                        list.insert(t * PER_THREAD + i, &handle.pin());
                    }
                });
            }
        })
        .unwrap();

        let handle = collector.register();
        let guard = &handle.pin();
        let mut seen: Vec<usize> = list.iter(guard).map(|x| *x.unwrap()).collect();
        seen.sort();
        assert_eq!(seen, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
    }
}
