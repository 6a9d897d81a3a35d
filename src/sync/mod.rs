//! Synchronization primitives the collector is built from.

pub(crate) mod list;
pub(crate) mod queue;
