//! An unbounded lock-free FIFO queue with epoch-based memory reclamation.
//!
//! [`FaaArrayQueue`] is Ramalhete and Correia's FAA array queue: a chain of fixed-size segments
//! in which producers and consumers claim slots with a single fetch-and-add. The queue carries
//! object handles ([`Box`], [`Arc`] or raw pointers, see [`Storage`]) instead of copying values.
//!
//! Segments that consumers have drained cannot be freed right away, since other threads may
//! still be reading them. They are handed to a [`Reclaimer`]. The default one, [`EpochReclaimer`],
//! uses the epoch-based garbage collector that lives in this crate as well.
//!
//! # Pinning
//!
//! Before a segment can be read, a participant must be [`pin`]ned. By pinning a participant we
//! declare that any object that gets removed from now on must not be destructed just yet.
//! Garbage collection of newly removed objects is suspended until the participant gets unpinned.
//!
//! # Garbage
//!
//! Objects that get removed from concurrent collections must be stashed away until all currently
//! pinned participants get unpinned. Such objects can be stored into a thread-local or global
//! storage, where they are kept until the right time for their destruction comes.
//!
//! There is a global shared instance of garbage queue. You can [`defer`] the execution of an
//! arbitrary function until the global epoch is advanced enough. Most notably, concurrent data
//! structures may defer the deallocation of an object.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use crossbeam_utils::thread;
//! use faa_array_queue::{Config, FaaArrayQueue};
//!
//! let q: FaaArrayQueue<u64, Arc<u64>> =
//!     FaaArrayQueue::with_config(Config::new().entries_per_node(64)).unwrap();
//!
//! thread::scope(|s| {
//!     s.spawn(|_| {
//!         for i in 0..100 {
//!             q.push(Arc::new(i)).unwrap();
//!         }
//!     });
//! })
//! .unwrap();
//!
//! let mut sum = 0;
//! while let Some(v) = q.try_pop() {
//!     sum += *v;
//! }
//! assert_eq!(sum, 4950);
//! ```
//!
//! [`FaaArrayQueue`]: struct.FaaArrayQueue.html
//! [`Storage`]: trait.Storage.html
//! [`Reclaimer`]: trait.Reclaimer.html
//! [`EpochReclaimer`]: struct.EpochReclaimer.html
//! [`pin`]: fn.pin.html
//! [`defer`]: struct.Guard.html#method.defer
//! [`Box`]: https://doc.rust-lang.org/std/boxed/struct.Box.html
//! [`Arc`]: https://doc.rust-lang.org/std/sync/struct.Arc.html

#![warn(missing_debug_implementations)]

#[macro_use]
extern crate cfg_if;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate tracing;

mod atomic;
mod backoff;
mod collector;
mod config;
mod default;
mod epoch;
mod error;
mod faa_array_queue;
mod garbage;
mod guard;
mod internal;
mod reclaim;
mod segment;
mod storage;
mod sync;

pub use self::atomic::{Atomic, CompareAndSetOrdering, Owned, Shared};
pub use self::backoff::{Backoff, ExponentialBackoff, NoBackoff};
pub use self::collector::{Collector, LocalHandle};
pub use self::config::Config;
pub use self::default::{default_collector, is_pinned, pin};
pub use self::error::{ConfigError, PushError};
pub use self::faa_array_queue::FaaArrayQueue;
pub use self::guard::{unprotected, Guard};
pub use self::reclaim::{EpochReclaimer, GuardPtr, Reclaimer};
pub use self::storage::Storage;
