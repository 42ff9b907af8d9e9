mod walker;
pub use walker::Walker;

use crate::raw::BucketTable;
use crate::reclaim::{Atomic, Shared};
use std::sync::atomic::Ordering;

/// The bucket table a [`Walker`] is bound to.
///
/// While the walker is stopped, its binding sits in that table's `walkers` list so that a resize
/// can clear it before the table is retired. A cleared binding makes the next
/// [`Walker::start`] rebind to the current table and report a restart.
#[derive(Debug)]
pub(crate) struct Binding<E> {
    pub(crate) table: Atomic<BucketTable<E>>,
}

impl<E> Binding<E> {
    pub(crate) fn new(table: Shared<'_, BucketTable<E>>) -> Self {
        Self {
            table: Atomic::from(table),
        }
    }

    pub(crate) fn invalidate(&self) {
        self.table.store(Shared::null(), Ordering::SeqCst);
    }
}
