//! The global epoch
//!
//! The last bit in this number is unused and is always zero. Every so often the global epoch is
//! incremented, i.e. we say it "advances". A pinned participant may advance the global epoch only
//! if all currently pinned participants have been pinned in the current epoch.
//!
//! If an object became garbage in some epoch, then we can be sure that after two advancements no
//! participant will hold a reference to it. That is the crux of safe memory reclamation.

use std::ops::Deref;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release, SeqCst};
use std::sync::atomic::{self, AtomicUsize};

use crossbeam_utils::CachePadded;

use crate::guard::Guard;
use crate::internal::Local;
use crate::sync::list::{IterError, List};

/// The global epoch is a (cache-padded) integer.
#[derive(Default, Debug)]
pub struct Epoch {
    epoch: CachePadded<AtomicUsize>,
}

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to advance the global epoch.
    ///
    /// The global epoch can advance only if all currently pinned participants have been pinned in
    /// the current epoch.
    ///
    /// Returns the current global epoch.
    ///
    /// `try_advance()` is annotated `#[cold]` because it is rarely called.
    #[cold]
    pub fn try_advance(&self, locals: &List<Local>, guard: &Guard) -> usize {
        let epoch = self.epoch.load(Relaxed);
        atomic::fence(SeqCst);

        for local in locals.iter(guard) {
            match local {
                Err(IterError::LostRace) => {
                    // We leave the job to the participant that won the race, which continues to
                    // iterate the registries and tries to advance to epoch.
                    return epoch;
                }
                Ok(local) => {
                    let (is_pinned, local_epoch) = local.epoch().get_state();

                    // If the participant was pinned in a different epoch, we cannot advance the
                    // global epoch just yet.
                    if is_pinned && local_epoch != epoch {
                        return epoch;
                    }
                }
            }
        }
        atomic::fence(Acquire);

        // All pinned participants were pinned in the current global epoch. Try advancing the
        // epoch. We increment by 2 and simply wrap around on overflow.
        let epoch_new = epoch.wrapping_add(2);
        self.epoch.store(epoch_new, Release);
        trace!(epoch = epoch_new, "advanced global epoch");
        epoch_new
    }
}

impl Deref for Epoch {
    type Target = AtomicUsize;

    fn deref(&self) -> &Self::Target {
        &self.epoch
    }
}

/// The epoch a participant is pinned in.
#[derive(Default, Debug)]
pub struct LocalEpoch {
    /// The least significant bit is set if the participant is currently pinned. The rest of the
    /// bits encode the epoch.
    state: AtomicUsize,
}

impl LocalEpoch {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns if the participant is pinned, and if so, the epoch at which it is pinned.
    #[inline]
    pub fn get_state(&self) -> (bool, usize) {
        let state = self.state.load(Relaxed);
        ((state & 1) == 1, state & !1)
    }

    /// Marks the participant as pinned.
    ///
    /// Must not be called if the participant is already pinned!
    #[inline]
    pub fn set_pinned(&self, epoch: usize) {
        let state = epoch | 1;

        // Now we must store `state` into `self.state`. It's important that any succeeding loads
        // don't get reordered with this store. In order words, this participant's epoch must be
        // fully announced to other participants. Only then it becomes safe to load from the
        // shared memory.
        if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
            // On x86 architectures we have a choice:
            // 1. `atomic::fence(SeqCst)`, which compiles to a `mfence` instruction.
            // 2. `compare_exchange(_, _, SeqCst, SeqCst)`, which compiles to a `lock cmpxchg`
            //    instruction.
            //
            // Both instructions have the effect of a full barrier, but the second one seems to be
            // faster in this particular case.
            let result = self.state.compare_exchange(0, state, SeqCst, SeqCst);
            debug_assert!(result.is_ok(), "LocalEpoch::set_pinned()'s CAS should succeed.");
        } else {
            self.state.store(state, Relaxed);
            atomic::fence(SeqCst);
        }
    }

    /// Marks the participant as unpinned.
    #[inline]
    pub fn set_unpinned(&self) {
        // We don't need to preserve the epoch, so just store the number zero.
        self.state.store(0, Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_epoch_state() {
        let e = LocalEpoch::new();
        assert_eq!(e.get_state(), (false, 0));
        e.set_pinned(6);
        assert_eq!(e.get_state(), (true, 6));
        e.set_unpinned();
        assert_eq!(e.get_state(), (false, 0));
    }
}
