use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A record that can be linked into a [`HashTable`](crate::HashTable).
///
/// Entries are owned by the caller. The table only ever stores references to them, threaded
/// through the [`Link`] each entry embeds, so an entry can be in at most one table at a time.
///
/// # Examples
///
/// ```
/// use rhashtable::{Entry, Link};
///
/// struct Session {
///     id: u64,
///     link: Link<Session>,
/// }
///
/// impl Entry for Session {
///     type Key = u64;
///
///     fn key(&self) -> &u64 {
///         &self.id
///     }
///
///     fn link(&self) -> &Link<Self> {
///         &self.link
///     }
/// }
/// ```
pub trait Entry: Sized {
    /// The key entries are looked up by.
    type Key: ?Sized + Eq;

    /// The key of this entry. It must not change while the entry is linked.
    fn key(&self) -> &Self::Key;

    /// The intrusive link the table threads its bucket chains through.
    fn link(&self) -> &Link<Self>;
}

/// The intrusive chain pointer embedded in every [`Entry`].
///
/// While an entry is linked, `next` holds either the following entry of its bucket chain or the
/// chain's terminator. A terminator ("nulls" marker) is a tagged value with the low bit set that
/// identifies the bucket it ends; readers use it to notice that a concurrent move carried them
/// into a different chain.
pub struct Link<E> {
    pub(crate) next: AtomicPtr<E>,
}

impl<E> Link<E> {
    /// Creates an unlinked link.
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    pub(crate) fn next(&self) -> *mut E {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_next(&self, next: *mut E) {
        self.next.store(next, Ordering::Release)
    }
}

impl<E> Default for Link<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Link<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

/// Builds the terminator for the chain whose head lives at `slot`.
///
/// Bucket slots are pointer-aligned, so setting the low bit can never produce a real entry
/// address, and two live tables never share a slot address.
#[inline]
pub(crate) fn nulls<E>(slot: &AtomicPtr<E>) -> *mut E {
    (slot as *const AtomicPtr<E> as usize | 1) as *mut E
}

#[inline]
pub(crate) fn is_nulls<E>(p: *mut E) -> bool {
    p as usize & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        key: u32,
        link: Link<Item>,
    }

    impl Entry for Item {
        type Key = u32;

        fn key(&self) -> &u32 {
            &self.key
        }

        fn link(&self) -> &Link<Self> {
            &self.link
        }
    }

    #[test]
    fn markers_are_tagged() {
        let slots: Vec<AtomicPtr<Item>> = (0..4).map(|_| AtomicPtr::default()).collect();
        for slot in &slots {
            assert!(is_nulls(nulls(slot)));
        }
        assert_ne!(nulls(&slots[0]), nulls(&slots[1]));
    }

    #[test]
    fn entries_are_not_markers() {
        let item = Item {
            key: 7,
            link: Link::new(),
        };
        assert_eq!(*item.key(), 7);
        assert!(!is_nulls(&item as *const Item as *mut Item));
        assert!(item.link().next().is_null());
    }
}
