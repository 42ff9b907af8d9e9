use crate::Error;
use std::fmt;
use std::sync::Arc;

/// The smallest table the policy will ever shrink to.
pub(crate) const MIN_SIZE: usize = 4;

/// The largest possible table size.
pub(crate) const MAX_SIZE: usize = 1 << 30;

/// Table size used when no element hint is given.
pub(crate) const DEFAULT_SIZE: usize = 64;

/// Striped locks per CPU, before clamping to half the table size.
pub(crate) const DEFAULT_LOCKS_MUL: usize = 32;

const DEFAULT_GROW_PERCENT: usize = 75;
const DEFAULT_SHRINK_PERCENT: usize = 30;

pub(crate) type HashFn<K> = dyn Fn(&K, u64) -> u64 + Send + Sync;

pub(crate) enum Hashing<K: ?Sized> {
    /// Caller-supplied function; the second argument is the bucket table's seed.
    Function(Arc<HashFn<K>>),
    /// `len` bytes of the key starting at `offset`, through a seeded `ahash`.
    Bytes {
        project: for<'k> fn(&'k K) -> &'k [u8],
        offset: usize,
        len: usize,
    },
}

impl<K: ?Sized> Clone for Hashing<K> {
    fn clone(&self) -> Self {
        match *self {
            Hashing::Function(ref f) => Hashing::Function(Arc::clone(f)),
            Hashing::Bytes {
                project,
                offset,
                len,
            } => Hashing::Bytes {
                project,
                offset,
                len,
            },
        }
    }
}

/// Configuration for a [`HashTable`](crate::HashTable).
///
/// Either [`hash_fn`](Params::hash_fn) or [`key_len`](Params::key_len) must be set; every other
/// knob has a default.
///
/// # Examples
///
/// ```
/// use rhashtable::Params;
///
/// let params = Params::<str>::new()
///     .min_size(16)
///     .max_size(1 << 16)
///     .key_len(0, 8);
/// ```
pub struct Params<K: ?Sized> {
    pub(crate) nelem_hint: usize,
    pub(crate) min_size: usize,
    pub(crate) max_size: usize,
    pub(crate) locks_mul: usize,
    pub(crate) hashing: Option<Hashing<K>>,
    pub(crate) unique_keys: bool,
    pub(crate) auto_resize: bool,
    pub(crate) grow_percent: usize,
    pub(crate) shrink_percent: usize,
}

impl<K: ?Sized> Default for Params<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ?Sized> Params<K> {
    /// Parameters with every knob at its default and no hashing chosen yet.
    pub fn new() -> Self {
        Self {
            nelem_hint: 0,
            min_size: MIN_SIZE,
            max_size: MAX_SIZE,
            locks_mul: DEFAULT_LOCKS_MUL,
            hashing: None,
            unique_keys: true,
            auto_resize: true,
            grow_percent: DEFAULT_GROW_PERCENT,
            shrink_percent: DEFAULT_SHRINK_PERCENT,
        }
    }

    /// Expected number of entries; the initial table is sized so that this many entries stay
    /// below the grow threshold.
    pub fn nelem_hint(self, nelem_hint: usize) -> Self {
        Self { nelem_hint, ..self }
    }

    /// Smallest table size. Rounded up to a power of two, and never below 4.
    pub fn min_size(self, min_size: usize) -> Self {
        Self { min_size, ..self }
    }

    /// Largest table size. Rounded down to a power of two.
    pub fn max_size(self, max_size: usize) -> Self {
        Self { max_size, ..self }
    }

    /// Number of striped bucket locks per CPU.
    pub fn locks_mul(self, locks_mul: usize) -> Self {
        Self { locks_mul, ..self }
    }

    /// Hash keys with `f`. The second argument is a seed that changes with every bucket table.
    pub fn hash_fn<F>(self, f: F) -> Self
    where
        F: Fn(&K, u64) -> u64 + Send + Sync + 'static,
    {
        Self {
            hashing: Some(Hashing::Function(Arc::new(f))),
            ..self
        }
    }

    /// Whether inserting a key that is already present fails with
    /// [`Error::KeyExists`](crate::Error::KeyExists).
    pub fn unique_keys(self, unique_keys: bool) -> Self {
        Self {
            unique_keys,
            ..self
        }
    }

    /// Whether inserts and removes grow and shrink the table on their own.
    pub fn auto_resize(self, auto_resize: bool) -> Self {
        Self {
            auto_resize,
            ..self
        }
    }

    /// Grow once the table holds more than `percent` entries per hundred buckets.
    pub fn grow_threshold(self, percent: usize) -> Self {
        Self {
            grow_percent: percent,
            ..self
        }
    }

    /// Shrink once the table holds fewer than `percent` entries per hundred buckets.
    ///
    /// Must be less than half the grow threshold.
    pub fn shrink_threshold(self, percent: usize) -> Self {
        Self {
            shrink_percent: percent,
            ..self
        }
    }
}

impl<K> Params<K>
where
    K: ?Sized + AsRef<[u8]>,
{
    /// Hash the `len` key bytes starting at `offset`.
    ///
    /// Only available for keys that expose their bytes through `AsRef<[u8]>` (`str`, `[u8]`,
    /// `String`, `Vec<u8>`, byte arrays). Integer and other structured keys need a
    /// [`hash_fn`](Params::hash_fn). Keys shorter than `offset + len` hash whatever part of the
    /// window they cover.
    pub fn key_len(self, offset: usize, len: usize) -> Self {
        Self {
            hashing: Some(Hashing::Bytes {
                project: <K as AsRef<[u8]>>::as_ref,
                offset,
                len,
            }),
            ..self
        }
    }
}

impl<K: ?Sized> fmt::Debug for Params<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hashing = match self.hashing {
            None => "none",
            Some(Hashing::Function(_)) => "function",
            Some(Hashing::Bytes { .. }) => "key bytes",
        };
        f.debug_struct("Params")
            .field("nelem_hint", &self.nelem_hint)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("locks_mul", &self.locks_mul)
            .field("hashing", &hashing)
            .field("unique_keys", &self.unique_keys)
            .field("auto_resize", &self.auto_resize)
            .field("grow_threshold", &self.grow_percent)
            .field("shrink_threshold", &self.shrink_percent)
            .finish()
    }
}

/// Validated, normalized parameters owned by a table.
pub(crate) struct Config<K: ?Sized> {
    pub(crate) min_size: usize,
    pub(crate) max_size: usize,
    pub(crate) locks_mul: usize,
    pub(crate) hashing: Hashing<K>,
    pub(crate) unique_keys: bool,
    pub(crate) auto_resize: bool,
    pub(crate) grow_percent: usize,
    pub(crate) shrink_percent: usize,
}

impl<K: ?Sized> Config<K> {
    pub(crate) fn from_params(params: Params<K>) -> Result<(Self, usize), Error> {
        let hashing = params
            .hashing
            .ok_or(Error::InvalidParams("neither a hash function nor a key length was given"))?;
        if let Hashing::Bytes { len: 0, .. } = hashing {
            return Err(Error::InvalidParams("key length must not be zero"));
        }
        if params.locks_mul == 0 {
            return Err(Error::InvalidParams("lock multiplier must not be zero"));
        }
        if params.grow_percent == 0 || params.grow_percent > 100 {
            return Err(Error::InvalidParams("grow threshold must be within 1..=100"));
        }
        // a doubled or halved table must land strictly between the two thresholds, or the
        // policy would keep flipping between sizes
        if params.shrink_percent.saturating_mul(2) >= params.grow_percent {
            return Err(Error::InvalidParams(
                "shrink threshold must be less than half the grow threshold",
            ));
        }

        let min_size = params
            .min_size
            .max(MIN_SIZE)
            .checked_next_power_of_two()
            .filter(|&n| n <= MAX_SIZE)
            .ok_or(Error::InvalidParams("minimum size is too large"))?;
        let max_size = prev_power_of_two(params.max_size.min(MAX_SIZE));
        if min_size > max_size {
            return Err(Error::InvalidParams("minimum size exceeds maximum size"));
        }

        let initial = if params.nelem_hint == 0 {
            DEFAULT_SIZE
        } else {
            (params.nelem_hint.saturating_mul(4) / 3)
                .checked_next_power_of_two()
                .unwrap_or(MAX_SIZE)
        };
        let initial = initial.clamp(min_size, max_size);

        let config = Config {
            min_size,
            max_size,
            locks_mul: params.locks_mul,
            hashing,
            unique_keys: params.unique_keys,
            auto_resize: params.auto_resize,
            grow_percent: params.grow_percent,
            shrink_percent: params.shrink_percent,
        };
        Ok((config, initial))
    }

    /// Whether `nelems` entries in `size` buckets call for a larger table.
    #[inline]
    pub(crate) fn grow_above(&self, nelems: usize, size: usize) -> bool {
        nelems.saturating_mul(100) > size.saturating_mul(self.grow_percent) && size < self.max_size
    }

    /// Whether `nelems` entries in `size` buckets call for a smaller table.
    #[inline]
    pub(crate) fn shrink_below(&self, nelems: usize, size: usize) -> bool {
        nelems.saturating_mul(100) < size.saturating_mul(self.shrink_percent)
            && size > self.min_size
    }
}

fn prev_power_of_two(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashed() -> Params<u64> {
        Params::new().hash_fn(|k: &u64, seed| k ^ seed)
    }

    #[test]
    fn requires_hashing() {
        let err = Config::from_params(Params::<u64>::new()).err();
        assert!(matches!(err, Some(Error::InvalidParams(_))));
    }

    #[test]
    fn sizes_are_normalized() {
        let (config, initial) = Config::from_params(hashed().min_size(5).max_size(1000)).unwrap();
        assert_eq!(config.min_size, 8);
        assert_eq!(config.max_size, 512);
        assert_eq!(initial, 64);

        let (config, _) = Config::from_params(hashed().min_size(0)).unwrap();
        assert_eq!(config.min_size, MIN_SIZE);
    }

    #[test]
    fn hint_sets_initial_size() {
        let (_, initial) = Config::from_params(hashed().nelem_hint(1000)).unwrap();
        assert_eq!(initial, 2048);
        let (_, initial) = Config::from_params(hashed().nelem_hint(1000).max_size(1024)).unwrap();
        assert_eq!(initial, 1024);
        let (_, initial) = Config::from_params(hashed().nelem_hint(1).min_size(16)).unwrap();
        assert_eq!(initial, 16);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = Config::from_params(hashed().min_size(64).max_size(32)).err();
        assert!(matches!(err, Some(Error::InvalidParams(_))));
        let err = Config::from_params(hashed().grow_threshold(30).shrink_threshold(30)).err();
        assert!(matches!(err, Some(Error::InvalidParams(_))));
        let err = Config::from_params(hashed().locks_mul(0)).err();
        assert!(matches!(err, Some(Error::InvalidParams(_))));
        let err = Config::from_params(hashed().grow_threshold(50).shrink_threshold(40)).err();
        assert!(matches!(err, Some(Error::InvalidParams(_))));
        let err = Config::from_params(Params::<[u8]>::new().key_len(0, 0)).err();
        assert!(matches!(err, Some(Error::InvalidParams(_))));
    }

    #[test]
    fn thresholds_leave_room_for_a_resize() {
        // a grown table starts above the shrink threshold, a shrunk one below the grow threshold
        assert!(Config::from_params(hashed().grow_threshold(75).shrink_threshold(30)).is_ok());
        assert!(Config::from_params(hashed().grow_threshold(100).shrink_threshold(49)).is_ok());
        for (grow, shrink) in [(50, 40), (50, 25), (60, 30), (100, 50)] {
            let err = Config::from_params(hashed().grow_threshold(grow).shrink_threshold(shrink))
                .err();
            assert!(
                matches!(err, Some(Error::InvalidParams(_))),
                "{}/{} accepted",
                grow,
                shrink
            );
        }
    }

    #[test]
    fn thresholds() {
        let (config, _) = Config::from_params(hashed().min_size(4).max_size(1024)).unwrap();
        assert!(!config.grow_above(96, 128));
        assert!(config.grow_above(97, 128));
        assert!(!config.grow_above(2000, 1024));
        assert!(config.shrink_below(38, 128));
        assert!(!config.shrink_below(39, 128));
        assert!(!config.shrink_below(0, 4));
    }
}
