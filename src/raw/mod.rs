use crate::entry::{is_nulls, nulls, Entry};
use crate::iter::Binding;
use crate::reclaim::{Atomic, Guard, Shared};
use crate::Error;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

/// One generation of bucket chains, plus the striped locks that guard them.
///
/// The bucket array never changes size. A resize builds a new `BucketTable`, records it in
/// `future` and moves entries over bucket by bucket; once every bucket is moved the handle is
/// pointed at the new table and this one is retired.
pub(crate) struct BucketTable<E> {
    buckets: Box<[AtomicPtr<E>]>,
    locks: Box<[Mutex<()>]>,

    /// Number of buckets already moved to `future`.
    rehash: AtomicUsize,

    // safety: `future` is only ever set once, before the first bucket is moved, and is never
    // cleared. a reader that loaded _this_ table under a guard g may follow it: the future table
    // is either still current (and so not retired), or it was retired after g was entered, which
    // keeps it alive until g is dropped.
    future: Atomic<BucketTable<E>>,

    /// Walkers bound to this table while they are stopped.
    pub(crate) walkers: Mutex<Vec<Arc<Binding<E>>>>,

    pub(crate) seed: u64,
    pub(crate) hash_state: ahash::RandomState,
}

#[cfg(test)]
thread_local! {
    static FAIL_ALLOC: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

/// Makes the next bucket table allocation on this thread fail with `Error::OutOfMemory`.
#[cfg(test)]
pub(crate) fn fail_next_alloc() {
    FAIL_ALLOC.with(|f| f.set(true));
}

fn try_alloc_slice<T>(len: usize, mut init: impl FnMut() -> T) -> Result<Box<[T]>, Error> {
    #[cfg(test)]
    {
        if FAIL_ALLOC.with(|f| f.replace(false)) {
            return Err(Error::OutOfMemory);
        }
    }

    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    v.extend((0..len).map(|_| init()));
    Ok(v.into_boxed_slice())
}

/// Number of striped locks for a table of `size` buckets.
///
/// A power of two that scales with the host's parallelism, clamped to half the bucket count so
/// that every lock covers at least two buckets, and never zero.
pub(crate) fn nlocks(size: usize, locks_mul: usize) -> usize {
    num_cpus::get()
        .saturating_mul(locks_mul)
        .checked_next_power_of_two()
        .unwrap_or(usize::MAX / 2 + 1)
        .min(size / 2)
        .max(1)
}

impl<E> BucketTable<E> {
    /// Allocates an empty table with `size` buckets.
    ///
    /// Fails without side effects if either array cannot be allocated.
    pub(crate) fn alloc(size: usize, locks_mul: usize) -> Result<Self, Error> {
        assert!(size.is_power_of_two(), "table size must be a power of two");

        let buckets = try_alloc_slice(size, AtomicPtr::default)?;
        let locks = try_alloc_slice(nlocks(size, locks_mul), || Mutex::new(()))?;

        // the slice is on the heap, so the slot addresses baked into the terminators stay valid
        // for as long as the table lives.
        for slot in buckets.iter() {
            slot.store(nulls(slot), Ordering::Relaxed);
        }

        let hash_state = ahash::RandomState::new();
        let seed = hash_state.hash_one(size);
        Ok(Self {
            buckets,
            locks,
            rehash: AtomicUsize::new(0),
            future: Atomic::null(),
            walkers: Mutex::new(Vec::new()),
            seed,
            hash_state,
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(crate) fn nlocks(&self) -> usize {
        self.locks.len()
    }

    #[inline]
    pub(crate) fn bucket_index(&self, hash: u64) -> usize {
        let mask = self.buckets.len() as u64 - 1;
        (hash & mask) as usize
    }

    /// Takes the striped lock covering `bucket`.
    #[inline]
    pub(crate) fn lock_bucket(&self, bucket: usize) -> MutexGuard<'_, ()> {
        self.locks[bucket & (self.locks.len() - 1)].lock()
    }

    #[inline]
    pub(crate) fn head(&self, bucket: usize) -> *mut E {
        self.buckets[bucket].load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_terminator(&self, bucket: usize, p: *mut E) -> bool {
        p == nulls(&self.buckets[bucket])
    }

    #[inline]
    pub(crate) fn future<'g>(&'g self, guard: &'g Guard<'_>) -> Shared<'g, BucketTable<E>> {
        self.future.load(Ordering::SeqCst, guard)
    }

    pub(crate) fn set_future(&self, future: Shared<'_, BucketTable<E>>) {
        self.future.store(future, Ordering::SeqCst);
    }

    /// Whether every bucket has been moved to the future table.
    pub(crate) fn is_drained(&self) -> bool {
        self.rehash.load(Ordering::SeqCst) == self.buckets.len()
    }

    pub(crate) fn mark_rehashed(&self, bucket: usize) {
        let done = self.rehash.fetch_add(1, Ordering::SeqCst);
        debug_assert_eq!(done, bucket, "buckets are moved in order");
    }
}

impl<E: Entry> BucketTable<E> {
    /// Searches the chain at `bucket` for `key` without taking any lock.
    ///
    /// # Safety
    ///
    /// Every entry linked into this table must be alive for `'a`.
    pub(crate) unsafe fn find<'a>(&self, bucket: usize, key: &E::Key) -> Option<&'a E> {
        loop {
            let mut p = self.head(bucket);
            while !is_nulls(p) {
                // safety: chains only ever hold pointers to entries that outlive the table.
                let entry = unsafe { &*p };
                if entry.key() == key {
                    return Some(entry);
                }
                p = entry.link().next();
            }
            if self.is_terminator(bucket, p) {
                return None;
            }
            // an entry we passed through was moved to another chain while we were on it, and
            // the rest of this chain may be unvisited. go again.
        }
    }

    /// Splices `entry` in at the head of `bucket`.
    ///
    /// The caller must hold the bucket's lock.
    pub(crate) fn link_head(&self, bucket: usize, entry: &E) {
        let head = self.buckets[bucket].load(Ordering::Relaxed);
        entry.link().set_next(head);
        self.buckets[bucket].store(entry as *const E as *mut E, Ordering::Release);
    }

    /// Unlinks `entry` from `bucket`, if it is there.
    ///
    /// The caller must hold the bucket's lock. The entry's own link is left as is so that
    /// concurrent readers standing on it can carry on down the chain.
    pub(crate) fn unlink(&self, bucket: usize, entry: &E) -> bool {
        let target = entry as *const E as *mut E;
        let mut prev = &self.buckets[bucket];
        loop {
            let p = prev.load(Ordering::Relaxed);
            if is_nulls(p) {
                return false;
            }
            // safety: see `find`; writers are serialized by the bucket lock we hold.
            let link = unsafe { &*p }.link();
            if p == target {
                prev.store(link.next(), Ordering::Release);
                return true;
            }
            prev = &link.next;
        }
    }

    /// The first entry of `bucket`. The caller must hold the bucket's lock.
    pub(crate) fn first(&self, bucket: usize) -> Option<*mut E> {
        let p = self.buckets[bucket].load(Ordering::Relaxed);
        if is_nulls(p) {
            None
        } else {
            Some(p)
        }
    }

    pub(crate) fn set_head(&self, bucket: usize, p: *mut E) {
        self.buckets[bucket].store(p, Ordering::Release);
    }

    /// Unlinks every entry, calling `f` on each.
    ///
    /// The caller must make sure no other thread is using the table.
    pub(crate) fn drain<'a>(&self, mut f: impl FnMut(&'a E))
    where
        E: 'a,
    {
        for (bucket, slot) in self.buckets.iter().enumerate() {
            let mut p = slot.load(Ordering::Acquire);
            while !is_nulls(p) {
                // safety: see `find`.
                let entry: &'a E = unsafe { &*p };
                p = entry.link().next();
                f(entry);
            }
            debug_assert!(self.is_terminator(bucket, p));
            slot.store(nulls(slot), Ordering::Release);
        }
    }
}

impl<E> Drop for BucketTable<E> {
    fn drop(&mut self) {
        // a table that was moved away from must have had every entry carried over
        if cfg!(debug_assertions) && self.rehash.load(Ordering::Relaxed) > 0 {
            for slot in self.buckets.iter() {
                assert!(
                    is_nulls(slot.load(Ordering::Relaxed)),
                    "dropped migrated table with non-empty bucket"
                );
            }
        }
    }
}

impl<E> fmt::Debug for BucketTable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketTable")
            .field("size", &self.buckets.len())
            .field("locks", &self.nlocks())
            .field("rehash", &self.rehash.load(Ordering::Relaxed))
            .field("future", &self.future)
            .finish()
    }
}
