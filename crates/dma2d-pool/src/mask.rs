//! Fixed-width id sets used for channel occupancy and peripheral selection.

use core::fmt;

/// A set of channel (or peripheral-selection) ids, one bit per id.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelMask(u32);

impl ChannelMask {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Ids `0..n`.
    pub const fn first(n: usize) -> Self {
        if n >= 32 {
            Self(u32::MAX)
        } else {
            Self((1 << n) - 1)
        }
    }

    /// The set containing only `id`.
    pub const fn single(id: u8) -> Self {
        Self(1 << id)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, id: u8) -> bool {
        id < 32 && self.0 & (1 << id) != 0
    }

    /// Returns `true` if every id of `other` is also in `self`.
    pub const fn contains_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Population count.
    pub const fn count(self) -> u8 {
        self.0.count_ones() as u8
    }

    /// Highest id in the set.
    pub const fn highest(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(31 - self.0.leading_zeros() as u8)
        }
    }

    /// Lowest id in the set.
    pub const fn lowest(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }

    pub fn insert(&mut self, id: u8) {
        self.0 |= 1 << id;
    }

    pub fn clear(&mut self, id: u8) {
        self.0 &= !(1 << id);
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Ids in `self` but not in `other`.
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Iterates ids from lowest to highest.
    pub fn iter(self) -> Iter {
        Iter(self)
    }
}

impl fmt::Debug for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelMask({:#b})", self.0)
    }
}

impl IntoIterator for ChannelMask {
    type Item = u8;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

impl FromIterator<u8> for ChannelMask {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut mask = Self::EMPTY;
        for id in iter {
            mask.insert(id);
        }
        mask
    }
}

/// Iterator over the ids of a [`ChannelMask`], lowest first.
#[derive(Clone, Debug)]
pub struct Iter(ChannelMask);

impl Iterator for Iter {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let id = self.0.lowest()?;
        self.0.clear(id);
        Some(id)
    }
}
