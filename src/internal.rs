//! The global data and participant for garbage collection.
//!
//! # Registration
//!
//! In order to track all participants in one place, we need some form of participant
//! registration. When a participant is created, it is registered to a global lock-free
//! singly-linked list of registries; and when a participant is leaving, it is unregistered from
//! the list.
//!
//! # Pinning
//!
//! Every participant contains an integer that tells whether the participant is pinned and if so,
//! what was the global epoch at the time it was pinned. Participants also hold a pin counter that
//! aids in periodic global epoch advancement.
//!
//! When a participant is pinned, a `Guard` is returned as a witness that the participant is
//! pinned. Guards are necessary for performing atomic operations, and for freeing/dropping
//! locations.

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic;
use std::sync::atomic::Ordering::{Relaxed, SeqCst};

use crate::collector::{Collector, LocalHandle};
use crate::epoch::{Epoch, LocalEpoch};
use crate::garbage::{Bag, Garbage, SealedBag};
use crate::guard::{unprotected, Guard};
use crate::sync::list::{List, Node};
use crate::sync::queue::Queue;

/// The global data for a garbage collector.
pub struct Global {
    /// The intrusive linked list of `Local`s.
    locals: List<Local>,

    /// The global queue of bags of deferred functions.
    queue: Queue<SealedBag>,

    /// The global epoch.
    pub(crate) epoch: Epoch,
}

impl Global {
    /// Number of bags to destroy.
    const COLLECT_STEPS: usize = 8;

    /// Creates a new global data for garbage collection.
    #[inline]
    pub fn new() -> Self {
        Global {
            locals: List::new(),
            queue: Queue::new(),
            epoch: Epoch::new(),
        }
    }

    /// Pushes the bag into the global queue and replaces the bag with a new empty bag.
    pub fn push_bag(&self, bag: &mut Bag, guard: &Guard) {
        let bag = bag.take();
        atomic::fence(SeqCst);

        let epoch = self.epoch.load(Relaxed);
        self.queue.push(bag.seal(epoch), guard);
    }

    /// Collects several bags from the global queue and executes deferred functions in them.
    ///
    /// Note: This may itself produce garbage and in turn allocate new bags.
    ///
    /// `pin()` rarely calls `collect()`, so we want the compiler to place that call on a cold
    /// path. In other words, we want the compiler to optimize branching for the case when
    /// `collect()` is not called.
    #[cold]
    pub fn collect(&self, guard: &Guard) {
        let global_epoch = self.epoch.try_advance(&self.locals, guard);

        let mut collected = 0;
        for _ in 0..Self::COLLECT_STEPS {
            match self
                .queue
                .try_pop_if(|sealed: &SealedBag| sealed.is_expired(global_epoch), guard)
            {
                None => break,
                Some(sealed) => {
                    collected += sealed.len();
                    drop(sealed);
                }
            }
        }

        if collected > 0 {
            debug!(epoch = global_epoch, objects = collected, "collected garbage");
        }
    }

    fn register(&self, local: Local) -> *const Node<Local> {
        unsafe {
            // Since we dereference no pointers in this block, it is safe to use `unprotected`.
            self.locals.insert(local, &unprotected()).as_raw()
        }
    }
}

impl fmt::Debug for Global {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Global")
            .field("epoch", &self.epoch.load(Relaxed))
            .finish()
    }
}

impl Default for Global {
    fn default() -> Self {
        Self::new()
    }
}

/// Participant for garbage collection.
pub struct Local {
    /// This participant's entry in the registry list.
    ///
    /// Set once right after registration and read only by the owning thread.
    entry: Cell<*const Node<Local>>,

    /// The epoch this participant is pinned in.
    epoch: LocalEpoch,

    /// A reference to the global data.
    ///
    /// When all guards and handles get dropped, this reference is destroyed.
    collector: UnsafeCell<ManuallyDrop<Collector>>,

    /// The local bag of deferred functions.
    bag: UnsafeCell<Bag>,

    /// The number of guards keeping this participant pinned.
    guard_count: Cell<usize>,

    /// The number of active handles.
    handle_count: Cell<usize>,

    /// Total number of pinnings performed.
    ///
    /// This is just an auxilliary counter that sometimes kicks off collection.
    pin_count: Cell<usize>,
}

// Other participants only ever touch `epoch`. Everything else belongs to the owning thread.
unsafe impl Send for Local {}
unsafe impl Sync for Local {}

impl Local {
    /// Number of pinnings after which a participant will execute some deferred functions from the
    /// global queue.
    const PINS_BETWEEN_COLLECT: usize = 128;

    /// Registers a new `Local` in the provided `Global`.
    pub fn register(collector: &Collector) -> LocalHandle {
        let local = Local {
            entry: Cell::new(ptr::null()),
            epoch: LocalEpoch::new(),
            collector: UnsafeCell::new(ManuallyDrop::new(collector.clone())),
            bag: UnsafeCell::new(Bag::new()),
            guard_count: Cell::new(0),
            handle_count: Cell::new(1),
            pin_count: Cell::new(0),
        };

        unsafe {
            let entry = collector.global.register(local);
            let local = (*entry).get();
            local.entry.set(entry);
            trace!(participant = ?(local as *const Local), "registered participant");
            LocalHandle::from_local(local)
        }
    }

    /// Returns a reference to the `Global` in which this `Local` resides.
    #[inline]
    pub fn global(&self) -> &Global {
        &self.collector().global
    }

    /// Returns a reference to the `Collector` in which this `Local` resides.
    #[inline]
    pub fn collector(&self) -> &Collector {
        unsafe { &**self.collector.get() }
    }

    /// Returns the epoch this participant is pinned in.
    #[inline]
    pub fn epoch(&self) -> &LocalEpoch {
        &self.epoch
    }

    /// Returns `true` if the current participant is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.guard_count.get() > 0
    }

    /// Adds `garbage` to the local bag, flushing full bags into the global queue.
    pub fn defer(&self, mut garbage: Garbage, guard: &Guard) {
        let bag = unsafe { &mut *self.bag.get() };

        while let Err(g) = bag.try_push(garbage) {
            self.global().push_bag(bag, guard);
            garbage = g;
        }
    }

    pub fn flush(&self, guard: &Guard) {
        let bag = unsafe { &mut *self.bag.get() };

        if !bag.is_empty() {
            self.global().push_bag(bag, guard);
        }

        self.global().collect(guard);
    }

    /// Pins the `Local`.
    #[inline]
    pub fn pin(&self) -> Guard {
        let guard = Guard { local: self };

        let guard_count = self.guard_count.get();
        self.guard_count.set(guard_count + 1);

        if guard_count == 0 {
            let global_epoch = self.global().epoch.load(Relaxed);
            self.epoch.set_pinned(global_epoch);

            // Increment the pin counter.
            let count = self.pin_count.get();
            self.pin_count.set(count.wrapping_add(1));

            // After every `PINS_BETWEEN_COLLECT` try advancing the epoch and collecting some
            // garbage.
            if count % Self::PINS_BETWEEN_COLLECT == 0 {
                self.global().collect(&guard);
            }
        }

        guard
    }

    /// Unpins the `Local`.
    #[inline]
    pub fn unpin(&self) {
        let guard_count = self.guard_count.get();
        self.guard_count.set(guard_count - 1);

        if guard_count == 1 {
            self.epoch.set_unpinned();

            if self.handle_count.get() == 0 {
                self.finalize();
            }
        }
    }

    /// Increments the handle count.
    #[inline]
    pub fn acquire_handle(&self) {
        let handle_count = self.handle_count.get();
        debug_assert!(handle_count >= 1);
        self.handle_count.set(handle_count + 1);
    }

    /// Decrements the handle count.
    #[inline]
    pub fn release_handle(&self) {
        let guard_count = self.guard_count.get();
        let handle_count = self.handle_count.get();
        debug_assert!(handle_count >= 1);
        self.handle_count.set(handle_count - 1);

        if guard_count == 0 && handle_count == 1 {
            self.finalize();
        }
    }

    /// Removes the `Local` from the global linked list.
    #[cold]
    fn finalize(&self) {
        debug_assert_eq!(self.guard_count.get(), 0);
        debug_assert_eq!(self.handle_count.get(), 0);

        // Temporarily increment handle count. This is required so that the following call to
        // `pin` doesn't call `finalize` again.
        self.handle_count.set(1);
        {
            // Pin and move the local bag into the global queue. It's important that `push_bag`
            // doesn't defer destruction on any new garbage.
            let guard = &self.pin();
            self.global()
                .push_bag(unsafe { &mut *self.bag.get() }, guard);
        }
        // Revert the handle count back to zero.
        self.handle_count.set(0);

        unsafe {
            // Take the reference to the `Global` out of this `Local`. Since we're not protected
            // by a guard at this time, it's crucial that the reference is read before marking the
            // `Local` as deleted.
            let collector: Collector = ptr::read(&**self.collector.get());

            // Mark this node in the linked list as deleted.
            (*self.entry.get()).delete(&unprotected());

            trace!("unregistered participant");

            // Finally, drop the reference to the global. Note that this might be the last
            // reference to the `Global`. If so, the global data will be destroyed and all
            // deferred functions in its queue will be executed.
            drop(collector);
        }
    }
}
