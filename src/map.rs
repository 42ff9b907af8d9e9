use crate::entry::Entry;
use crate::params::{Config, Hashing, Params};
use crate::raw::BucketTable;
use crate::reclaim::{Atomic, Collector, Shared};
use crate::resize::Resizer;
use crate::Error;
use parking_lot::Mutex;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A resizable concurrent hash table of caller-owned entries.
///
/// Lookups never lock. Inserts and removes take one striped bucket lock (two while a resize is
/// moving entries to a new table), so writers to different stripes run in parallel. Crossing the
/// load thresholds grows or shrinks the table; a resize moves entries bucket by bucket while
/// every operation, including lookups of entries that are mid-move, keeps working.
///
/// The table never allocates or frees entries. It borrows them for `'a` and threads its chains
/// through each entry's [`Link`](crate::Link).
///
/// # Examples
///
/// ```
/// use rhashtable::{Entry, HashTable, Link, Params};
///
/// struct Node {
///     key: u32,
///     link: Link<Node>,
/// }
///
/// impl Entry for Node {
///     type Key = u32;
///     fn key(&self) -> &u32 { &self.key }
///     fn link(&self) -> &Link<Self> { &self.link }
/// }
///
/// let nodes: Vec<Node> = (0..100).map(|key| Node { key, link: Link::new() }).collect();
/// let table = HashTable::new(Params::new().hash_fn(|k: &u32, seed| u64::from(*k) ^ seed))
///     .unwrap();
///
/// for node in &nodes {
///     table.insert(node).unwrap();
/// }
/// assert_eq!(table.lookup(&42).map(|n| n.key), Some(42));
///
/// assert!(table.remove(&nodes[42]));
/// assert!(table.lookup(&42).is_none());
/// ```
pub struct HashTable<'a, E: Entry> {
    /// The current bucket table. Always non-null. While a resize is in flight, its `future`
    /// points at the table entries are being moved to.
    pub(crate) table: Atomic<BucketTable<E>>,

    count: AtomicUsize,

    pub(crate) config: Config<E::Key>,

    /// Held while deciding on a resize, attaching or publishing a table, and while walkers
    /// (de)register. Never held by inserts, removes or lookups, nor while buckets are moved.
    pub(crate) lock: Mutex<()>,

    pub(crate) resizer: Resizer,

    /// Collector that retired bucket tables are handed to. Dropped (and so drained) together
    /// with the table.
    pub(crate) collector: Collector,

    _entries: PhantomData<&'a E>,
}

impl<'a, E: Entry> HashTable<'a, E> {
    /// Creates an empty table.
    ///
    /// Fails with [`Error::InvalidParams`] if `params` set no way to hash keys or are otherwise
    /// inconsistent, and with [`Error::OutOfMemory`] if the initial table cannot be allocated.
    pub fn new(params: Params<E::Key>) -> Result<Self, Error> {
        let (config, size) = Config::from_params(params)?;
        let collector = Collector::new();
        let table = BucketTable::alloc(size, config.locks_mul)?;
        let table = Atomic::from(Shared::boxed(table, &collector));

        Ok(Self {
            table,
            count: AtomicUsize::new(0),
            config,
            lock: Mutex::new(()),
            resizer: Resizer::default(),
            collector,
            _entries: PhantomData,
        })
    }

    /// Returns the number of linked entries.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns `true` if no entries are linked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of buckets in the current table.
    pub fn size(&self) -> usize {
        let guard = self.collector.enter();
        let table = self.table.load(Ordering::SeqCst, &guard);
        // safety: the current table is never null, and we loaded it under `guard`.
        unsafe { table.deref() }.len()
    }

    pub(crate) fn hash(&self, key: &E::Key, table: &BucketTable<E>) -> u64 {
        match self.config.hashing {
            Hashing::Function(ref f) => f(key, table.seed),
            Hashing::Bytes {
                project,
                offset,
                len,
            } => {
                let bytes = project(key);
                let window = bytes
                    .get(offset..)
                    .map(|rest| &rest[..len.min(rest.len())])
                    .unwrap_or(&[]);
                table.hash_state.hash_one(window)
            }
        }
    }

    /// Returns the entry whose key equals `key`, if any.
    ///
    /// Never blocks. An entry that is linked for the whole duration of the call is always found,
    /// even while a resize is moving it to another table.
    pub fn lookup(&self, key: &E::Key) -> Option<&'a E> {
        let guard = self.collector.enter();
        let mut table = self.table.load(Ordering::SeqCst, &guard);
        loop {
            // safety: the current table is never null, and a future table is only followed when
            // non-null. both were loaded under `guard`, so neither is freed before it is dropped.
            let t = unsafe { table.deref() };
            let bucket = t.bucket_index(self.hash(key, t));
            // safety: every linked entry lives for 'a, which outlives `self`.
            if let Some(entry) = unsafe { t.find(bucket, key) } {
                return Some(entry);
            }

            // an entry that is not in `t` may already have been moved on
            table = t.future(&guard);
            if table.is_null() {
                return None;
            }
        }
    }

    /// Returns `true` if an entry with key `key` is linked.
    pub fn contains_key(&self, key: &E::Key) -> bool {
        self.lookup(key).is_some()
    }

    /// Links `entry` into the table.
    ///
    /// If the table enforces unique keys (the default) and an entry with an equal key is already
    /// linked, this fails with [`Error::KeyExists`] and leaves the table unchanged.
    ///
    /// Linking an entry that is already linked, here or in another table, corrupts both chains.
    ///
    /// With automatic resizing on, the call that crosses a load threshold resizes the table
    /// before returning, moving every entry to a new bucket table. Requests from other threads
    /// that arrive meanwhile are served by the same call, so it may take as long as several
    /// migrations. Other threads only ever wait on the one bucket being moved.
    pub fn insert(&self, entry: &'a E) -> Result<(), Error> {
        let key = entry.key();
        let guard = self.collector.enter();
        let mut table = self.table.load(Ordering::SeqCst, &guard);
        // safety: the current table is never null and was loaded under `guard`.
        let size = unsafe { table.deref() }.len();

        loop {
            // safety: `table` is either the current table or a non-null future table, loaded
            // under `guard`.
            let t = unsafe { table.deref() };
            let bucket = t.bucket_index(self.hash(key, t));
            let _lock = t.lock_bucket(bucket);

            // safety: linked entries live for 'a.
            if self.config.unique_keys && unsafe { t.find(bucket, key) }.is_some() {
                return Err(Error::KeyExists);
            }

            let future = t.future(&guard);
            if future.is_null() {
                t.link_head(bucket, entry);
                break;
            }

            // `t` is being moved away from. new entries go straight to the table it is moving
            // to, taking its bucket lock while still holding ours: old before new, always.
            // safety: checked non-null above, loaded under `guard`.
            let f = unsafe { future.deref() };
            let fbucket = f.bucket_index(self.hash(key, f));
            let _flock = f.lock_bucket(fbucket);

            if !f.future(&guard).is_null() {
                // `f` is already moving on too, which means `t` has been fully drained.
                table = future;
                continue;
            }

            // safety: linked entries live for 'a.
            if self.config.unique_keys && unsafe { f.find(fbucket, key) }.is_some() {
                return Err(Error::KeyExists);
            }
            f.link_head(fbucket, entry);
            break;
        }

        let nelems = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        drop(guard);

        if self.config.auto_resize && self.config.grow_above(nelems, size) {
            self.schedule_resize();
        }
        Ok(())
    }

    /// Unlinks `entry`. Returns `false` if it was not linked into this table.
    ///
    /// The entry is free to be reused or dropped once this returns; a concurrent lookup that
    /// reached it beforehand may still return it.
    ///
    /// With automatic resizing on, the call that crosses a load threshold resizes the table
    /// before returning, moving every entry to a new bucket table. Requests from other threads
    /// that arrive meanwhile are served by the same call, so it may take as long as several
    /// migrations. Other threads only ever wait on the one bucket being moved.
    pub fn remove(&self, entry: &'a E) -> bool {
        let key = entry.key();
        let guard = self.collector.enter();
        let mut table = self.table.load(Ordering::SeqCst, &guard);
        // safety: the current table is never null and was loaded under `guard`.
        let size = unsafe { table.deref() }.len();

        let removed = loop {
            // safety: as in `insert`.
            let t = unsafe { table.deref() };
            let bucket = t.bucket_index(self.hash(key, t));
            let _lock = t.lock_bucket(bucket);
            if t.unlink(bucket, entry) {
                break true;
            }

            let future = t.future(&guard);
            if future.is_null() {
                break false;
            }

            // holding the old bucket's lock pins the entry: it is either still in `t`, or it was
            // moved (or inserted) into `f` before we got here.
            // safety: as in `insert`.
            let f = unsafe { future.deref() };
            let fbucket = f.bucket_index(self.hash(key, f));
            let _flock = f.lock_bucket(fbucket);
            if f.unlink(fbucket, entry) {
                break true;
            }
            if f.future(&guard).is_null() {
                break false;
            }
            table = future;
        };

        if removed {
            let nelems = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
            drop(guard);

            if self.config.auto_resize && self.config.shrink_below(nelems, size) {
                self.schedule_resize();
            }
        }
        removed
    }

    /// Frees the table.
    ///
    /// # Panics
    ///
    /// Panics if any entry is still linked; remove them first, or use
    /// [`free_and_destroy`](HashTable::free_and_destroy).
    pub fn destroy(self) {
        assert!(
            self.is_empty(),
            "destroyed a hash table that still has {} linked entries",
            self.len()
        );
    }

    /// Unlinks every entry, handing each to `f`, then frees the table.
    ///
    /// This is the place to release entries that were only kept alive for the table's sake.
    pub fn free_and_destroy<F>(mut self, f: F)
    where
        F: FnMut(&'a E),
    {
        let table = self.table.load_mut();
        // safety: we own `self`, so no other operation (and thus no resize) is in flight, and
        // the current table is never null.
        unsafe { &*table }.drain(f);
        self.count.store(0, Ordering::Relaxed);
    }
}

impl<E: Entry> Drop for HashTable<'_, E> {
    fn drop(&mut self) {
        // safety: we have &mut self, so no operation is in flight; resizes only ever run inside
        // one. the current table is thus the only table reachable from here, and nobody else
        // holds a reference to it. tables retired by earlier resizes are freed when
        // `self.collector` is dropped right after this.
        let table = unsafe { Shared::from(self.table.load_mut()).into_box() };
        drop(table);
    }
}

impl<E: Entry> Debug for HashTable<'_, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("len", &self.len())
            .field("size", &self.size())
            .field("min_size", &self.config.min_size)
            .field("max_size", &self.config.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Link;

    struct Item {
        key: u64,
        link: Link<Item>,
    }

    impl Entry for Item {
        type Key = u64;

        fn key(&self) -> &u64 {
            &self.key
        }

        fn link(&self) -> &Link<Self> {
            &self.link
        }
    }

    fn items(n: u64) -> Vec<Item> {
        (0..n)
            .map(|key| Item {
                key,
                link: Link::new(),
            })
            .collect()
    }

    /// Puts every key in the same bucket.
    fn colliding() -> Params<u64> {
        Params::new().hash_fn(|_: &u64, _| 0).auto_resize(false)
    }

    #[test]
    fn long_chain() {
        let items = items(64);
        let table = HashTable::new(colliding()).unwrap();
        for item in &items {
            table.insert(item).unwrap();
        }
        for item in &items {
            assert_eq!(table.lookup(&item.key).map(|e| e.key), Some(item.key));
        }
        for item in items.iter().step_by(2) {
            assert!(table.remove(item));
        }
        for item in &items {
            assert_eq!(table.lookup(&item.key).is_some(), item.key % 2 == 1);
        }
        assert_eq!(table.len(), 32);
        table.free_and_destroy(|_| {});
    }

    #[test]
    fn duplicates_allowed() {
        let a = Item {
            key: 1,
            link: Link::new(),
        };
        let b = Item {
            key: 1,
            link: Link::new(),
        };
        let table = HashTable::new(colliding().unique_keys(false)).unwrap();
        table.insert(&a).unwrap();
        table.insert(&b).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.remove(&a));
        assert!(std::ptr::eq(table.lookup(&1).unwrap(), &b));
        assert!(table.remove(&b));
        table.destroy();
    }

    #[test]
    fn free_and_destroy_visits_all() {
        let items = items(100);
        let table = HashTable::new(Params::new().hash_fn(|k: &u64, s| k ^ s)).unwrap();
        for item in &items {
            table.insert(item).unwrap();
        }
        let mut seen = 0;
        table.free_and_destroy(|_| seen += 1);
        assert_eq!(seen, 100);
    }

    #[test]
    #[should_panic]
    fn destroy_non_empty() {
        let items = items(1);
        let table = HashTable::new(colliding()).unwrap();
        table.insert(&items[0]).unwrap();
        table.destroy();
    }

    #[test]
    fn debug() {
        let table = HashTable::<Item>::new(colliding().min_size(8).nelem_hint(3)).unwrap();
        let s = format!("{:?}", table);
        assert!(s.contains("len: 0"));
        assert!(s.contains("size: 8"));
    }
}
