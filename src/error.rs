//! Errors returned by the queue.

use std::fmt;

use thiserror::Error;

/// The error returned by [`FaaArrayQueue::push`].
///
/// Lost races, poisoned slots and full segments are not errors: the queue retries those
/// internally. The value is handed back whenever one was supplied.
///
/// [`FaaArrayQueue::push`]: struct.FaaArrayQueue.html#method.push
#[derive(Error, PartialEq, Eq)]
pub enum PushError<S> {
    /// The handle was null or its address had the low bit set. The queue was not modified.
    #[error("value must be a non-null, 2-byte aligned pointer")]
    InvalidArgument,

    /// A new segment was needed but could not be allocated.
    #[error("failed to allocate a new segment")]
    AllocationFailed(S),
}

impl<S> PushError<S> {
    /// Returns the rejected value, if there was one.
    pub fn into_inner(self) -> Option<S> {
        match self {
            PushError::InvalidArgument => None,
            PushError::AllocationFailed(value) => Some(value),
        }
    }
}

// Handles are usually not `Debug` (raw pointers are, boxed trait objects often aren't), so the
// value is elided like `std::sync::mpsc::SendError` does.
impl<S> fmt::Debug for PushError<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PushError::InvalidArgument => f.write_str("InvalidArgument"),
            PushError::AllocationFailed(_) => f.write_str("AllocationFailed(..)"),
        }
    }
}

/// The error returned when a [`Config`] is rejected.
///
/// [`Config`]: struct.Config.html
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `entries_per_node` was zero.
    #[error("entries_per_node must be greater than zero")]
    ZeroEntriesPerNode,

    /// The slot array of a single segment does not fit into the address space.
    #[error("segment of {entries} entries with {padding} padding slots is too large")]
    SegmentTooLarge { entries: usize, padding: usize },

    /// The value type is aligned to a single byte, leaving no room for the slot tag.
    #[error("values must be at least 2-byte aligned, found alignment {align}")]
    UnalignedValue { align: usize },
}
