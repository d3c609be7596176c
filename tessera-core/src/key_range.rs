//! Key ranges over the byte-string keyspace of a table.
//!
//! A range is half-open: `[start, end)`. The end may be unbounded, which
//! sorts after every concrete key so that ranges order by start first and
//! then by end.

use std::fmt;

use bytes::Bytes;

/// Upper bound of a key range.
///
/// `Unbounded` orders after every `Key`, which lets a `BTreeMap<KeyRange, _>`
/// be searched for "the last range starting at or before `key`".
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyBound {
    /// Exclusive upper bound at this key.
    Key(Bytes),
    /// No upper bound: the range extends to the end of the keyspace.
    Unbounded,
}

/// A half-open range of keys `[start, end)`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyRange {
    /// Start of the range (inclusive).
    pub start: Bytes,
    /// End of the range (exclusive).
    pub end: KeyBound,
}

impl KeyRange {
    /// Creates a bounded range `[start, end)`.
    ///
    /// # Panics
    ///
    /// Panics if `start >= end`.
    #[must_use]
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        let start = start.into();
        let end = end.into();
        assert!(start < end, "key range start must be < end");
        Self {
            start,
            end: KeyBound::Key(end),
        }
    }

    /// Creates a range `[start, +inf)`.
    #[must_use]
    pub fn from_start(start: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            end: KeyBound::Unbounded,
        }
    }

    /// Returns the range covering the whole keyspace.
    #[must_use]
    pub const fn universe() -> Self {
        Self {
            start: Bytes::new(),
            end: KeyBound::Unbounded,
        }
    }

    /// Returns true if this range contains the given key.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        if key < self.start.as_ref() {
            return false;
        }
        match &self.end {
            KeyBound::Key(end) => key < end.as_ref(),
            KeyBound::Unbounded => true,
        }
    }

    /// Returns true if the two ranges share at least one key.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let self_before_other = match &self.end {
            KeyBound::Key(end) => end.as_ref() <= other.start.as_ref(),
            KeyBound::Unbounded => false,
        };
        let other_before_self = match &other.end {
            KeyBound::Key(end) => end.as_ref() <= self.start.as_ref(),
            KeyBound::Unbounded => false,
        };
        !self_before_other && !other_before_self
    }
}

impl fmt::Debug for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}, ", self.start)?;
        match &self.end {
            KeyBound::Key(end) => write!(f, "{end:?})"),
            KeyBound::Unbounded => write!(f, "+inf)"),
        }
    }
}

impl fmt::Debug for KeyBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key:?}"),
            Self::Unbounded => write!(f, "+inf"),
        }
    }
}
