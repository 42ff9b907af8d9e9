//! A resizable concurrent hash table of intrusive, caller-owned entries.
//!
//! Entries embed a [`Link`] and implement [`Entry`] to expose their key; the table threads its
//! bucket chains through those links and never allocates, copies or frees an entry. It only
//! hands back references to what was inserted.
//!
//! # Concurrency
//!
//! [`HashTable::lookup`] takes no locks and never waits. [`HashTable::insert`] and
//! [`HashTable::remove`] take the striped lock covering the key's bucket, so writers that hash to
//! different stripes proceed in parallel. The number of stripes scales with the number of CPUs
//! (see [`Params::locks_mul`]).
//!
//! # Resizing
//!
//! When the number of entries crosses a percentage of the bucket count (75% to grow, 30% to
//! shrink by default), the thread whose write crossed the threshold doubles or halves the table.
//! Entries are moved to the new table one bucket at a time while readers and writers carry on:
//! a reader that misses in the old table also searches the new one, and each chain ends in a
//! marker naming its bucket, so a reader that was carried into another chain by a concurrent
//! move notices and rescans. Resizes can also be requested with [`HashTable::expand`] and
//! [`HashTable::shrink`], or driven manually with [`HashTable::run_pending_resize`] when
//! [`Params::auto_resize`] is off.
//!
//! Retired bucket tables are freed through epoch-based reclamation (the
//! [`seize`](https://docs.rs/seize) crate), once no reader can still be looking at them.
//!
//! # Walking
//!
//! A [`Walker`] visits every entry without blocking writers. It can be stopped and started again
//! later, and reports a [`Restart`] if a resize replaced the table underneath it. Entries that
//! stay linked throughout are seen at least once; some may be seen twice after a restart.
//!
//! # Logging
//!
//! Resizes are reported through the [`log`](https://docs.rs/log) facade: `debug!` for each
//! completed resize, `trace!` when one is scheduled, and `warn!` when an automatic resize fails.
#![deny(
    missing_docs,
    missing_debug_implementations,
    unreachable_pub,
    rustdoc::broken_intra_doc_links
)]
#![warn(rust_2018_idioms)]

mod entry;
mod error;
mod iter;
mod map;
mod params;
mod raw;
mod reclaim;
mod resize;

pub use entry::{Entry, Link};
pub use error::{Error, Restart};
pub use iter::Walker;
pub use map::HashTable;
pub use params::Params;
