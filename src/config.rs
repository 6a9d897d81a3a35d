//! Construction-time parameters of the queue.

use crate::error::ConfigError;

/// Construction-time parameters of a [`FaaArrayQueue`].
///
/// # Examples
///
/// ```
/// use faa_array_queue::{Config, FaaArrayQueue};
///
/// let config = Config::new().entries_per_node(64).padding_slots(0).pop_retries(0);
/// let q = FaaArrayQueue::<u64>::with_config(config).unwrap();
/// assert!(q.try_pop().is_none());
/// ```
///
/// [`FaaArrayQueue`]: struct.FaaArrayQueue.html
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    entries_per_node: usize,
    padding_slots: usize,
    pop_retries: usize,
}

impl Config {
    /// Default number of entries in every segment.
    pub const DEFAULT_ENTRIES_PER_NODE: usize = 512;

    /// Default number of padding cells after every entry.
    pub const DEFAULT_PADDING_SLOTS: usize = 1;

    /// Default number of spins on an empty entry before a consumer poisons it.
    pub const DEFAULT_POP_RETRIES: usize = 10;

    /// Returns the default configuration.
    pub fn new() -> Self {
        Config {
            entries_per_node: Self::DEFAULT_ENTRIES_PER_NODE,
            padding_slots: Self::DEFAULT_PADDING_SLOTS,
            pop_retries: Self::DEFAULT_POP_RETRIES,
        }
    }

    /// Sets the number of entries in every segment. Must be greater than zero.
    pub fn entries_per_node(mut self, entries: usize) -> Self {
        self.entries_per_node = entries;
        self
    }

    /// Sets the number of padding cells placed after every entry.
    ///
    /// Every padding cell is as large as an entry, so an entry occupies
    /// `padding_slots + 1` cells. Padding keeps concurrently accessed neighbours off the same
    /// cache line.
    pub fn padding_slots(mut self, padding: usize) -> Self {
        self.padding_slots = padding;
        self
    }

    /// Sets how often a consumer re-reads an empty entry before poisoning it. Zero disables the
    /// spin.
    pub fn pop_retries(mut self, retries: usize) -> Self {
        self.pop_retries = retries;
        self
    }

    /// Checks that a queue can be built from this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries_per_node == 0 {
            return Err(ConfigError::ZeroEntriesPerNode);
        }
        self.cells_per_node().map(|_| ())
    }

    pub fn get_entries_per_node(&self) -> usize {
        self.entries_per_node
    }

    pub fn get_padding_slots(&self) -> usize {
        self.padding_slots
    }

    pub fn get_pop_retries(&self) -> usize {
        self.pop_retries
    }

    /// Distance between two consecutive entries, in cells.
    pub(crate) fn stride(&self) -> usize {
        self.padding_slots.saturating_add(1)
    }

    /// Total number of cells backing one segment.
    pub(crate) fn cells_per_node(&self) -> Result<usize, ConfigError> {
        self.padding_slots
            .checked_add(1)
            .and_then(|stride| stride.checked_mul(self.entries_per_node))
            .filter(|cells| {
                cells
                    .checked_mul(std::mem::size_of::<usize>())
                    .map_or(false, |bytes| bytes <= isize::MAX as usize)
            })
            .ok_or(ConfigError::SegmentTooLarge {
                entries: self.entries_per_node,
                padding: self.padding_slots,
            })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.get_entries_per_node(), 512);
        assert_eq!(c.get_padding_slots(), 1);
        assert_eq!(c.get_pop_retries(), 10);
        assert_eq!(c.stride(), 2);
        assert_eq!(c.cells_per_node(), Ok(1024));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn zero_entries_rejected() {
        assert_eq!(
            Config::new().entries_per_node(0).validate(),
            Err(ConfigError::ZeroEntriesPerNode)
        );
    }

    #[test]
    fn oversized_segment_rejected() {
        let c = Config::new().entries_per_node(usize::MAX / 2).padding_slots(3);
        assert_eq!(
            c.validate(),
            Err(ConfigError::SegmentTooLarge {
                entries: usize::MAX / 2,
                padding: 3,
            })
        );
    }
}
