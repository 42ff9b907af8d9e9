//! Growing and shrinking.
//!
//! A resize allocates a new bucket table, records it as the `future` of the current one, moves
//! every entry over one old bucket at a time, and finally points the handle at the new table and
//! retires the old one. Only the first and last of those steps hold the handle's resize lock.

use crate::entry::Entry;
use crate::map::HashTable;
use crate::raw::BucketTable;
use crate::reclaim::{RetireShared, Shared};
use crate::Error;
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Runs the automatic resize policy in whichever thread first notices it is needed.
#[derive(Debug, Default)]
pub(crate) struct Resizer {
    is_running: AtomicBool,
    pending: AtomicBool,
}

impl Resizer {
    fn try_start(&self) -> bool {
        self.is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.is_running.store(false, Ordering::Release);
    }
}

enum Outcome {
    Resized,
    /// Nothing to do, or another resize is in flight and the caller asked not to wait for it.
    Skipped,
}

impl<'a, E: Entry> HashTable<'a, E> {
    /// Doubles the number of buckets, up to the configured maximum.
    ///
    /// Waits for an in-flight resize to finish first. Does nothing if the table is already at
    /// its maximum size. On [`Error::OutOfMemory`] the table is left exactly as it was.
    pub fn expand(&self) -> Result<(), Error> {
        let max = self.config.max_size;
        self.resize(|_, size| Some((size * 2).min(max)), true)
            .map(drop)
    }

    /// Halves the number of buckets, down to the configured minimum.
    ///
    /// Waits for an in-flight resize to finish first. Does nothing if the table is already at
    /// its minimum size. On [`Error::OutOfMemory`] the table is left exactly as it was.
    pub fn shrink(&self) -> Result<(), Error> {
        let min = self.config.min_size;
        self.resize(|_, size| Some((size / 2).max(min)), true)
            .map(drop)
    }

    /// Applies the grow/shrink policy until the load factor is within bounds.
    ///
    /// Inserts and removes do this on their own when automatic resizing is enabled; this is for
    /// tables that have it turned off, or to settle the size at a convenient time.
    pub fn run_pending_resize(&self) -> Result<(), Error> {
        loop {
            match self.resize(Self::next_size, true)? {
                Outcome::Resized => continue,
                Outcome::Skipped => return Ok(()),
            }
        }
    }

    /// The size the policy wants a table of `size` buckets to have, if different.
    fn next_size(&self, size: usize) -> Option<usize> {
        let nelems = self.len();
        if self.config.grow_above(nelems, size) {
            Some((size * 2).min(self.config.max_size))
        } else if self.config.shrink_below(nelems, size) {
            Some((size / 2).max(self.config.min_size))
        } else {
            None
        }
    }

    /// Called after an insert or remove crossed a threshold, with no bucket lock held.
    ///
    /// If another thread is already running the policy, it will pick this request up.
    pub(crate) fn schedule_resize(&self) {
        trace!("resize scheduled at {} entries", self.len());
        self.resizer.pending.store(true, Ordering::SeqCst);

        while self.resizer.try_start() {
            while self.resizer.pending.swap(false, Ordering::SeqCst) {
                loop {
                    match self.resize(Self::next_size, false) {
                        Ok(Outcome::Resized) => continue,
                        Ok(Outcome::Skipped) => break,
                        Err(e) => {
                            // not the inserting caller's problem; the next threshold crossing
                            // tries again.
                            warn!("background resize failed: {}", e);
                            break;
                        }
                    }
                }
            }
            self.resizer.finish();

            // a request may have landed after our last check but before we let go
            if !self.resizer.pending.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    /// Moves the table to the size `decide` picks for the current size.
    ///
    /// If a resize is already in flight, waits for it when `wait` is set and otherwise skips.
    fn resize<F>(&self, decide: F, wait: bool) -> Result<Outcome, Error>
    where
        F: Fn(&Self, usize) -> Option<usize>,
    {
        let guard = self.collector.enter();

        let (old, new) = loop {
            let lock = self.lock.lock();
            let old = self.table.load(Ordering::SeqCst, &guard);
            // safety: the current table is never null, and we loaded it under `guard`.
            let t = unsafe { old.deref() };

            if !t.future(&guard).is_null() {
                drop(lock);
                if !wait {
                    return Ok(Outcome::Skipped);
                }
                thread::yield_now();
                continue;
            }

            let size = match decide(self, t.len()) {
                Some(size) if size != t.len() => size,
                _ => return Ok(Outcome::Skipped),
            };

            // nothing has been touched yet, so failing here leaves the old table in charge
            let new = BucketTable::alloc(size, self.config.locks_mul)?;
            let new = Shared::boxed(new, &self.collector);

            // from here on, lookups that miss in `t` also search `new`, and writers lock
            // their way into it
            t.set_future(new);
            break (old, new);
        };

        // safety: both were loaded or created under `guard` and are non-null.
        let (t, n) = unsafe { (old.deref(), new.deref()) };
        for bucket in 0..t.len() {
            self.rehash_bucket(t, n, bucket);
        }
        debug_assert!(t.is_drained());

        {
            let _lock = self.lock.lock();
            self.table.store(new, Ordering::SeqCst);
            for binding in t.walkers.lock().drain(..) {
                binding.invalidate();
            }
        }

        debug!(
            "resized hash table from {} to {} buckets ({} entries)",
            t.len(),
            n.len(),
            self.len()
        );

        // safety: `old` is no longer the current table, and no other table's `future` points at
        // it, so no thread can newly load it. threads that loaded it earlier did so under a
        // guard that was entered before this retirement, which keeps it alive for them.
        unsafe { guard.retire_shared(old) };
        Ok(Outcome::Resized)
    }

    /// Moves every entry of `old`'s bucket to `new`.
    ///
    /// The old bucket's lock is held for the whole bucket, and each new bucket's lock only while
    /// a single entry is spliced in. Entries are taken off the head of the old chain one at a
    /// time, and each is linked into its new chain before it leaves the old one.
    fn rehash_bucket(&self, old: &BucketTable<E>, new: &BucketTable<E>, bucket: usize) {
        let _lock = old.lock_bucket(bucket);
        while let Some(p) = old.first(bucket) {
            // safety: linked entries live for 'a.
            let entry = unsafe { &*p };
            let next = entry.link().next();
            let nbucket = new.bucket_index(self.hash(entry.key(), new));

            let _nlock = new.lock_bucket(nbucket);
            new.link_head(nbucket, entry);
            old.set_head(bucket, next);
        }
        old.mark_rehashed(bucket);
    }
}
