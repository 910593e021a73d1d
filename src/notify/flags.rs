//! Bitmask of symbolic notification flags.
//!
//! Each operation family defines its own vocabulary as single-bit constants
//! (see [`crate::family`]). A `Flags` value is either the fixed set an
//! operation expects or the growing set it has observed so far.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// A set of flags packed into a `u32`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Flags(u32);

impl Flags {
    /// The empty set. An expected mask of `EMPTY` means polling alone decides.
    pub const EMPTY: Self = Self(0);

    /// Wraps raw bits.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if no flag is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every flag of `other` is also set in `self`.
    ///
    /// Vacuously true when `other` is empty.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of both sets.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Flags of `self` that are not in `other`.
    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Flags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Flags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#b})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_contains() {
        let started = Flags::from_bits(1);
        let completed = Flags::from_bits(1 << 1);
        let both = started | completed;

        assert!(both.contains(started));
        assert!(both.contains(Flags::EMPTY));
        assert!(!started.contains(both));
        assert!(Flags::EMPTY.contains(Flags::EMPTY));
        assert_eq!(both.difference(started), completed);
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(format!("{}", Flags::from_bits(0x6)), "0x6");
        assert_eq!(format!("{}", Flags::EMPTY), "0x0");
    }
}
