//! Fixed-capacity segments of the FAA array queue.
//!
//! A segment is an array of single-use slots with two fetch-and-add cursors. Producers claim
//! slots through `push_idx`, consumers through `pop_idx`. Neither cursor is clamped, so a value
//! at or above the capacity means the segment is exhausted for that side.

use std::collections::TryReserveError;
use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::atomic::{Atomic, Owned};

/// The tag of a slot that can no longer be published to.
const RETIRED: usize = 1;

#[cfg(test)]
thread_local! {
    /// Makes the next `Segment::new` on this thread fail to reserve its slots.
    pub(crate) static FAIL_NEXT_ALLOC: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

/// The observable state of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SlotState {
    Empty,
    Filled,
    Retired,
}

/// A single-use cell holding the address of a value.
///
/// `0` is empty, `RETIRED` is retired and anything else is the address of a published value.
/// Addresses are at least 2-aligned, so the low bit doubles as the retired tag.
pub(crate) struct Slot(AtomicUsize);

impl Slot {
    #[inline]
    pub(crate) fn empty() -> Self {
        Slot(AtomicUsize::new(0))
    }

    /// Moves the slot from empty to filled. Fails if the slot was already filled or retired.
    #[inline]
    pub(crate) fn publish(&self, item: usize) -> bool {
        debug_assert!(item != 0 && item & RETIRED == 0);
        self.0
            .compare_exchange(0, item, Release, Relaxed)
            .is_ok()
    }

    /// Retires the slot and returns its value, if a value had been published.
    ///
    /// Retiring an empty slot poisons it: a producer that claimed it must move on.
    #[inline]
    pub(crate) fn consume(&self) -> Option<usize> {
        let prev = self.0.swap(RETIRED, Acquire);
        debug_assert_ne!(prev, RETIRED, "slot consumed twice");
        filled(prev)
    }

    /// Takes the value out of a slot during exclusive teardown.
    #[inline]
    pub(crate) fn take(&self) -> Option<usize> {
        filled(self.0.swap(RETIRED, Relaxed))
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.0.load(Relaxed) == 0
    }

    pub(crate) fn state(&self) -> SlotState {
        match self.0.load(Relaxed) {
            0 => SlotState::Empty,
            RETIRED => SlotState::Retired,
            _ => SlotState::Filled,
        }
    }
}

#[inline]
fn filled(raw: usize) -> Option<usize> {
    if raw == 0 || raw == RETIRED {
        None
    } else {
        Some(raw)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Slot").field(&self.state()).finish()
    }
}

/// A node in the chain of segments.
pub(crate) struct Segment {
    pub(crate) pop_idx: CachePadded<AtomicUsize>,
    pub(crate) push_idx: CachePadded<AtomicUsize>,
    pub(crate) next: Atomic<Segment>,
    entries: usize,
    stride: usize,
    slots: Box<[Slot]>,
}

impl Segment {
    /// Allocates a segment whose first slot already holds `first`.
    ///
    /// The slot array is reserved fallibly, so running out of memory is reported instead of
    /// aborting. `entries * stride` must not overflow.
    pub(crate) fn new(
        entries: usize,
        stride: usize,
        first: usize,
    ) -> Result<Owned<Segment>, TryReserveError> {
        let mut slots = Vec::new();
        if injected_failure() {
            slots.try_reserve_exact(usize::MAX)?;
        }
        slots.try_reserve_exact(entries * stride)?;
        slots.resize_with(entries * stride, Slot::empty);

        let segment = Segment::from_slots(entries, stride, slots);
        let published = segment.slots[0].publish(first);
        debug_assert!(published);
        segment.push_idx.store(1, Relaxed);
        Ok(Owned::new(segment))
    }

    /// Allocates the empty segment a new queue starts with.
    pub(crate) fn sentinel(entries: usize, stride: usize) -> Owned<Segment> {
        let mut slots = Vec::with_capacity(entries * stride);
        slots.resize_with(entries * stride, Slot::empty);
        Owned::new(Segment::from_slots(entries, stride, slots))
    }

    fn from_slots(entries: usize, stride: usize, slots: Vec<Slot>) -> Segment {
        debug_assert!(entries > 0 && stride > 0);
        Segment {
            pop_idx: CachePadded::new(AtomicUsize::new(0)),
            push_idx: CachePadded::new(AtomicUsize::new(0)),
            next: Atomic::null(),
            entries,
            stride,
            slots: slots.into_boxed_slice(),
        }
    }

    /// Number of usable entries.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.entries
    }

    /// Returns the slot for entry `idx`, skipping the padding cells.
    #[inline]
    pub(crate) fn slot(&self, idx: usize) -> &Slot {
        &self.slots[idx * self.stride]
    }

    /// Iterates over the usable slots.
    pub(crate) fn entries(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().step_by(self.stride)
    }

    /// Returns `true` if no value can be left for consumers in this segment.
    #[inline]
    pub(crate) fn is_drained(&self) -> bool {
        let pushed = self.push_idx.load(Relaxed).min(self.entries);
        self.pop_idx.load(Relaxed) >= pushed
    }
}

#[cfg(test)]
fn injected_failure() -> bool {
    FAIL_NEXT_ALLOC.with(|f| f.replace(false))
}

#[cfg(not(test))]
#[inline]
fn injected_failure() -> bool {
    false
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Segment")
            .field("entries", &self.entries)
            .field("push_idx", &self.push_idx.load(Relaxed))
            .field("pop_idx", &self.pop_idx.load(Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM: usize = 0x1000;

    #[test]
    fn slot_is_single_use() {
        let slot = Slot::empty();
        assert_eq!(slot.state(), SlotState::Empty);

        assert!(slot.publish(ITEM));
        assert_eq!(slot.state(), SlotState::Filled);
        assert!(!slot.publish(ITEM + 8));

        assert_eq!(slot.consume(), Some(ITEM));
        assert_eq!(slot.state(), SlotState::Retired);
        assert!(!slot.publish(ITEM));
    }

    #[test]
    fn consuming_empty_slot_poisons_it() {
        let slot = Slot::empty();
        assert_eq!(slot.consume(), None);
        assert_eq!(slot.state(), SlotState::Retired);
        assert!(!slot.publish(ITEM));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn new_segment_holds_first_value() {
        let segment = Segment::new(4, 2, ITEM).unwrap();
        assert_eq!(segment.capacity(), 4);
        assert_eq!(segment.push_idx.load(Relaxed), 1);
        assert_eq!(segment.pop_idx.load(Relaxed), 0);
        assert_eq!(segment.slot(0).state(), SlotState::Filled);
        assert_eq!(segment.entries().count(), 4);
        assert!(!segment.is_drained());
    }

    #[test]
    fn sentinel_is_empty() {
        let segment = Segment::sentinel(3, 1);
        assert_eq!(segment.push_idx.load(Relaxed), 0);
        assert!(segment.entries().all(|s| s.is_empty()));
        assert!(segment.is_drained());
    }

    #[test]
    fn padding_is_skipped() {
        let segment = Segment::sentinel(3, 3);
        assert!(segment.slot(1).publish(ITEM));
        assert_eq!(segment.slots[3].state(), SlotState::Filled);
        let filled: Vec<_> = segment.entries().map(|s| s.state()).collect();
        assert_eq!(
            filled,
            vec![SlotState::Empty, SlotState::Filled, SlotState::Empty]
        );
    }

    #[test]
    fn huge_segment_fails_to_allocate() {
        assert!(Segment::new(usize::MAX / 8, 1, ITEM).is_err());
    }

    #[test]
    fn injected_allocation_failure_is_one_shot() {
        FAIL_NEXT_ALLOC.with(|f| f.set(true));
        assert!(Segment::new(2, 1, ITEM).is_err());
        assert!(Segment::new(2, 1, ITEM).is_ok());
    }
}
