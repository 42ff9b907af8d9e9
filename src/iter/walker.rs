use super::Binding;
use crate::entry::{is_nulls, Entry};
use crate::map::HashTable;
use crate::raw::BucketTable;
use crate::reclaim::Guard;
use crate::Restart;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A resumable cursor over every entry of a [`HashTable`], in no particular order.
///
/// A walker alternates between stopped and started. It is created stopped by
/// [`HashTable::walker`]; [`start`](Walker::start) it, pull entries with
/// [`next`](Walker::next), and [`stop`](Walker::stop) it again. While started it holds up
/// reclamation of retired bucket tables, so long pauses should be spent stopped; a stopped
/// walker keeps its position.
///
/// If the table is resized under the walker, `start` or `next` return [`Restart`] and the walk
/// continues from the beginning of the new table. Entries may then be seen twice, but an entry
/// that stays linked for the whole walk is never missed.
///
/// # Examples
///
/// ```
/// use rhashtable::{Entry, HashTable, Link, Params};
/// use std::collections::HashSet;
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
/// let nodes: Vec<Node> = (0..10).map(|key| Node { key, link: Link::new() }).collect();
/// let table = HashTable::new(Params::new().hash_fn(|k: &u32, seed| u64::from(*k) ^ seed))
///     .unwrap();
/// for node in &nodes {
///     table.insert(node).unwrap();
/// }
///
/// let mut seen = HashSet::new();
/// let mut walker = table.walker();
/// let _ = walker.start();
/// loop {
///     match walker.next() {
///         Ok(Some(node)) => {
///             seen.insert(node.key);
///         }
///         Ok(None) => break,
///         Err(_restart) => seen.clear(),
///     }
/// }
/// walker.stop();
/// assert_eq!(seen.len(), 10);
/// ```
pub struct Walker<'t, 'a, E: Entry> {
    map: &'t HashTable<'a, E>,
    binding: Arc<Binding<E>>,

    /// Present while started.
    guard: Option<Guard<'t>>,

    /// Bucket currently being walked.
    slot: usize,
    /// Entries of `slot` already returned.
    skip: usize,
    /// The entry returned last, if it came from `slot`.
    last: Option<&'a E>,
}

impl<'a, E: Entry> HashTable<'a, E> {
    /// Creates a stopped walker bound to the current table.
    pub fn walker(&self) -> Walker<'_, 'a, E> {
        let guard = self.collector.enter();
        let _lock = self.lock.lock();
        let table = self.table.load(Ordering::SeqCst, &guard);
        let binding = Arc::new(Binding::new(table));
        // safety: the current table is never null, and we loaded it under `guard`.
        unsafe { table.deref() }
            .walkers
            .lock()
            .push(Arc::clone(&binding));

        Walker {
            map: self,
            binding,
            guard: None,
            slot: 0,
            skip: 0,
            last: None,
        }
    }
}

impl<'t, 'a, E: Entry> Walker<'t, 'a, E> {
    /// Starts (or resumes) the walk.
    ///
    /// Returns [`Restart`] if the table the walker was bound to has since been replaced; the
    /// walker is then started at the beginning of the current table.
    ///
    /// # Panics
    ///
    /// Panics if the walker is already started.
    pub fn start(&mut self) -> Result<(), Restart> {
        assert!(self.guard.is_none(), "walker started twice");
        let guard = self.map.collector.enter();
        let lock = self.map.lock.lock();

        let table = self.binding.table.load(Ordering::SeqCst, &guard);
        if table.is_null() {
            let current = self.map.table.load(Ordering::SeqCst, &guard);
            self.binding.table.store(current, Ordering::SeqCst);
            drop(lock);
            self.rewind();
            self.guard = Some(guard);
            return Err(Restart);
        }

        // safety: a resize clears the bindings of a table (under the lock we hold) before it
        // retires it, so a table we still find bound here has not been retired. `guard` was
        // entered before that check, so it stays valid for as long as we hold on to `guard`.
        let t = unsafe { table.deref() };
        t.walkers
            .lock()
            .retain(|binding| !Arc::ptr_eq(binding, &self.binding));
        drop(lock);

        self.reposition(t);
        self.guard = Some(guard);
        Ok(())
    }

    /// Returns the next entry, `Ok(None)` once the walk is complete, or [`Restart`] if a resize
    /// moved the walk to a new table.
    ///
    /// # Panics
    ///
    /// Panics if the walker is stopped.
    pub fn next(&mut self) -> Result<Option<&'a E>, Restart> {
        let guard = self.guard.as_ref().expect("walker used while stopped");
        let table = self.binding.table.load(Ordering::SeqCst, guard);
        // safety: while started, only this walker writes its binding, and always a non-null
        // table loaded under `guard`.
        let t = unsafe { table.deref() };

        while self.slot < t.len() {
            let p = match self.last {
                Some(last) => last.link().next(),
                None => Self::nth(t, self.slot, self.skip),
            };

            if !is_nulls(p) {
                // safety: linked entries live for 'a.
                let entry = unsafe { &*p };
                self.skip += 1;
                self.last = Some(entry);
                return Ok(Some(entry));
            }

            if !t.is_terminator(self.slot, p) {
                // we followed an entry into another chain; go over this bucket again
                self.skip = 0;
                self.last = None;
                continue;
            }

            self.slot += 1;
            self.skip = 0;
            self.last = None;
        }

        // entries not yet seen may have been moved on before we got to their bucket
        let future = t.future(guard);
        if future.is_null() {
            return Ok(None);
        }
        self.binding.table.store(future, Ordering::SeqCst);
        self.rewind();
        Err(Restart)
    }

    /// Stops the walk, keeping its position for the next [`start`](Walker::start).
    ///
    /// # Panics
    ///
    /// Panics if the walker is already stopped.
    pub fn stop(&mut self) {
        let guard = self.guard.take().expect("walker stopped twice");
        let _lock = self.map.lock.lock();
        let table = self.binding.table.load(Ordering::SeqCst, &guard);
        // safety: as in `next`.
        let t = unsafe { table.deref() };
        if t.is_drained() {
            // already fully moved; the table is about to go away
            self.binding.invalidate();
        } else {
            t.walkers.lock().push(Arc::clone(&self.binding));
        }
    }

    /// Returns `true` if the walker is started.
    pub fn is_started(&self) -> bool {
        self.guard.is_some()
    }

    fn rewind(&mut self) {
        self.slot = 0;
        self.skip = 0;
        self.last = None;
    }

    /// Finds where to continue in `slot` after a stop.
    ///
    /// Continues just past the last returned entry, which is exact even if entries were added
    /// or removed meanwhile. If that entry has left the bucket, the bucket is walked again from
    /// its head.
    fn reposition(&mut self, t: &BucketTable<E>) {
        let last = match self.last.take() {
            Some(last) if self.slot < t.len() => last,
            _ => return,
        };

        let mut p = t.head(self.slot);
        let mut seen = 0;
        while !is_nulls(p) {
            seen += 1;
            if std::ptr::eq(p, last) {
                self.skip = seen;
                self.last = Some(last);
                return;
            }
            // safety: linked entries live for 'a.
            p = unsafe { &*p }.link().next();
        }
        self.skip = 0;
    }

    /// The entry `skip` places into the chain at `slot`, or the chain's terminator.
    fn nth(t: &BucketTable<E>, slot: usize, skip: usize) -> *mut E {
        'chain: loop {
            let mut p = t.head(slot);
            for _ in 0..skip {
                if is_nulls(p) {
                    break;
                }
                // safety: linked entries live for 'a.
                p = unsafe { &*p }.link().next();
            }
            if is_nulls(p) && !t.is_terminator(slot, p) {
                continue 'chain;
            }
            return p;
        }
    }
}

impl<E: Entry> Drop for Walker<'_, '_, E> {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            // a started walker is not on any list
            return;
        }

        let guard = self.map.collector.enter();
        let _lock = self.map.lock.lock();
        let table = self.binding.table.load(Ordering::SeqCst, &guard);
        if table.is_null() {
            return;
        }
        // safety: as in `start`.
        unsafe { table.deref() }
            .walkers
            .lock()
            .retain(|binding| !Arc::ptr_eq(binding, &self.binding));
    }
}

impl<E: Entry> fmt::Debug for Walker<'_, '_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Walker")
            .field("started", &self.guard.is_some())
            .field("slot", &self.slot)
            .field("skip", &self.skip)
            .finish()
    }
}

