//! Deferred destruction work and the bags that batch it.

use std::fmt;
use std::mem;

use arrayvec::ArrayVec;

cfg_if! {
    if #[cfg(feature = "sanitize")] {
        /// Maximum number of objects a bag can contain.
        const MAX_OBJECTS: usize = 4;
    } else {
        /// Maximum number of objects a bag can contain.
        const MAX_OBJECTS: usize = 64;
    }
}

/// A deferred piece of destruction work.
pub enum Garbage {
    /// An object that will later be destroyed using `destroy`.
    Destroy {
        object: *mut u8,
        destroy: unsafe fn(*mut u8),
    },
    /// A closure that will later be called.
    Fn { f: Option<Box<dyn FnOnce() + Send>> },
}

// Garbage is created by a pinned thread and may be destroyed by whichever thread collects it.
unsafe impl Send for Garbage {}
// Shared references expose nothing but the address for `Debug`.
unsafe impl Sync for Garbage {}

impl Garbage {
    /// Make a garbage object that will later be dropped and freed.
    ///
    /// The object must have been allocated with `Box::new` (or an `Owned`), and must be `Send`.
    pub fn new_destroy<T: Send>(object: *mut T) -> Self {
        unsafe fn destruct<T>(object: *mut u8) {
            drop(Box::from_raw(object as *mut T));
        }
        Garbage::Destroy {
            object: object as *mut u8,
            destroy: destruct::<T>,
        }
    }

    /// Make a closure that will later be called.
    pub fn new<F: FnOnce() + Send + 'static>(f: F) -> Self {
        Garbage::Fn { f: Some(Box::new(f)) }
    }
}

impl Drop for Garbage {
    fn drop(&mut self) {
        match self {
            Garbage::Destroy { object, destroy } => unsafe { (*destroy)(*object) },
            Garbage::Fn { f } => {
                if let Some(f) = f.take() {
                    f();
                }
            }
        }
    }
}

impl fmt::Debug for Garbage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Garbage::Destroy { object, .. } => f.debug_struct("Destroy").field("object", object).finish(),
            Garbage::Fn { .. } => f.pad("Fn"),
        }
    }
}

/// Bag of garbages.
#[derive(Default, Debug)]
pub struct Bag {
    objects: ArrayVec<Garbage, MAX_OBJECTS>,
}

impl Bag {
    /// Returns a new, empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Returns the number of objects in the bag.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Attempts to insert a garbage object into the bag. Hands it back if the bag is full.
    pub fn try_push(&mut self, garbage: Garbage) -> Result<(), Garbage> {
        self.objects.try_push(garbage).map_err(|e| e.element())
    }

    /// Seals the bag with the given epoch.
    pub fn seal(self, epoch: usize) -> SealedBag {
        SealedBag { epoch, bag: self }
    }

    /// Takes all objects out, leaving an empty bag behind.
    pub fn take(&mut self) -> Bag {
        mem::replace(self, Bag::new())
    }
}

/// A bag of garbages tagged with the global epoch at the time it was pushed.
#[derive(Debug)]
pub struct SealedBag {
    epoch: usize,
    bag: Bag,
}

impl SealedBag {
    /// Checks whether the bag can be destroyed in `global_epoch`.
    ///
    /// A pinned participant can witness at most one epoch advancement. Therefore, any bag that is
    /// within one advancement of the current epoch cannot be destroyed yet. Epochs advance by two.
    pub fn is_expired(&self, global_epoch: usize) -> bool {
        let diff = global_epoch.wrapping_sub(self.epoch);
        diff.min(0usize.wrapping_sub(diff)) > 2
    }

    pub fn len(&self) -> usize {
        self.bag.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn bag_runs_garbage_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut bag = Bag::new();

        for _ in 0..3 {
            let count = count.clone();
            bag.try_push(Garbage::new(move || {
                count.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
        }
        bag.try_push(Garbage::new_destroy(Box::into_raw(Box::new(5u64))))
            .unwrap();

        assert_eq!(bag.len(), 4);
        drop(bag);
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn full_bag_hands_back() {
        let mut bag = Bag::new();
        for _ in 0..MAX_OBJECTS {
            assert!(bag.try_push(Garbage::new(|| ())).is_ok());
        }
        assert!(bag.try_push(Garbage::new(|| ())).is_err());
        assert_eq!(bag.take().len(), MAX_OBJECTS);
        assert!(bag.is_empty());
    }

    #[test]
    fn expiry_needs_two_advancements() {
        let sealed = Bag::new().seal(10);
        assert!(!sealed.is_expired(10));
        assert!(!sealed.is_expired(12));
        assert!(sealed.is_expired(14));

        let wrapped = Bag::new().seal(usize::MAX - 1);
        assert!(!wrapped.is_expired(0));
        assert!(wrapped.is_expired(2));
    }
}
