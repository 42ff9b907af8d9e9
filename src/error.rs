use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};

/// The error type for [`HashTable`](crate::HashTable) operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The [`Params`](crate::Params) given to [`HashTable::new`](crate::HashTable::new) were
    /// rejected. The message names the offending setting.
    InvalidParams(&'static str),
    /// A bucket or lock array could not be allocated. The table that was current when this was
    /// returned is untouched and fully usable.
    OutOfMemory,
    /// An entry with an equal key is already linked, and the table enforces unique keys.
    KeyExists,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Error::InvalidParams(reason) => write!(f, "invalid hash table parameters: {}", reason),
            Error::OutOfMemory => f.write_str("failed to allocate bucket table"),
            Error::KeyExists => f.write_str("an entry with the same key is already present"),
        }
    }
}

impl StdError for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        None
    }
}

/// Returned by a [`Walker`](crate::Walker) whose table was replaced by a resize.
///
/// The walk continues from the start of the current table. Entries already returned may be
/// returned again, but no entry that stays linked throughout the walk is skipped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Restart;

impl Display for Restart {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("table was resized; walk restarted from the beginning")
    }
}

impl StdError for Restart {}
