//! Contention backoff strategies.
//!
//! A fresh backoff is created at the start of every queue operation and invoked once per failed
//! retry.

use std::fmt;

/// A stateful contention-backoff strategy.
pub trait Backoff: Default {
    /// Called after a failed attempt, before retrying.
    fn backoff(&mut self);
}

/// Retries immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    #[inline]
    fn backoff(&mut self) {}
}

/// Spins with exponentially growing delays and eventually yields the thread.
#[derive(Default)]
pub struct ExponentialBackoff {
    inner: crossbeam_utils::Backoff,
}

impl Backoff for ExponentialBackoff {
    #[inline]
    fn backoff(&mut self) {
        self.inner.snooze();
    }
}

impl ExponentialBackoff {
    /// Returns `true` once backing off has reached the point where yielding the thread is
    /// preferable to spinning.
    pub fn is_completed(&self) -> bool {
        self.inner.is_completed()
    }
}

impl fmt::Debug for ExponentialBackoff {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExponentialBackoff")
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_completes() {
        let mut b = ExponentialBackoff::default();
        assert!(!b.is_completed());
        for _ in 0..64 {
            b.backoff();
        }
        assert!(b.is_completed());
    }
}
