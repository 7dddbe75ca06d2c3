//! Component B: register allocations — an immutable 16-bit bitset over the
//! value register file, with the allocate/free/union/intersect/diff algebra
//! of `spec.md` §4.B.

use std::fmt;

/// Number of addressable value registers (`r0..=r15`).
pub const REGISTER_COUNT: u8 = 16;

/// An immutable set of allocated value-register indices. Every operation
/// returns a new value; there is no in-place mutation, matching
/// `spec.md` §4.B ("Immutable value; operations return a new value").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RegisterSet(u16);

impl RegisterSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The full set (all 16 registers allocated).
    pub const fn full() -> Self {
        Self(0xFFFF)
    }

    /// Build a set from explicit indices.
    pub fn from_indices(indices: impl IntoIterator<Item = u8>) -> Self {
        let mut set = Self::empty();
        for i in indices {
            set = set.allocate_at(i);
        }
        set
    }

    /// True if register `i` is allocated.
    pub const fn is_allocated(self, i: u8) -> bool {
        debug_assert!(i < REGISTER_COUNT);
        (self.0 >> i) & 1 == 1
    }

    /// Allocate the lowest-indexed free register, returning its index and
    /// the updated set. `None` if the set is already full
    /// (`RegisterExhausted` at the call site, per `spec.md` §4.B/§7).
    pub fn allocate_first_free(self) -> Option<(u8, Self)> {
        for i in 0..REGISTER_COUNT {
            if !self.is_allocated(i) {
                return Some((i, self.allocate_at(i)));
            }
        }
        None
    }

    /// Allocate a specific register index. Idempotent: allocating an
    /// already-set bit returns an unchanged set.
    pub fn allocate_at(self, i: u8) -> Self {
        debug_assert!(i < REGISTER_COUNT);
        Self(self.0 | (1 << i))
    }

    /// Free a specific register index. A no-op if the bit was already
    /// unset.
    pub fn free(self, i: u8) -> Self {
        debug_assert!(i < REGISTER_COUNT);
        Self(self.0 & !(1 << i))
    }

    /// Union of two sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Intersection of two sets.
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Set difference: registers in `self` but not in `other`.
    pub const fn diff(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Bitwise complement, within the 16-register universe.
    pub const fn complement(self) -> Self {
        Self(!self.0 & 0xFFFF)
    }

    /// Number of allocated registers.
    pub const fn num_allocated(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterate allocated register indices, ascending.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..REGISTER_COUNT).filter(move |&i| self.is_allocated(i))
    }

    /// Iterate allocated register indices, descending — used by the
    /// call-stack fallback to pop registers in the reverse order they were
    /// pushed (`spec.md` §4.F's call-site engine).
    pub fn iter_rev(self) -> impl Iterator<Item = u8> {
        (0..REGISTER_COUNT).rev().filter(move |&i| self.is_allocated(i))
    }

    /// The raw bitset, for tests and serialization.
    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl fmt::Display for RegisterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for i in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "r{i}")?;
            first = false;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;

    #[test]
    fn free_after_allocate_is_identity() {
        let empty = RegisterSet::empty();
        for i in 0..REGISTER_COUNT {
            let allocated = empty.allocate_at(i);
            assert_eq!(allocated.free(i), empty);
        }
    }

    #[test]
    fn allocate_picks_lowest_free() {
        let set = RegisterSet::empty().allocate_at(0).allocate_at(1);
        let (i, _) = set.allocate_first_free().unwrap();
        assert_eq!(i, 2);
    }

    #[test]
    fn allocate_fails_when_full() {
        assert_eq!(RegisterSet::full().allocate_first_free(), None);
    }

    #[test]
    fn allocate_is_idempotent() {
        let set = RegisterSet::empty().allocate_at(3);
        assert_eq!(set.allocate_at(3), set);
    }

    #[test]
    fn free_of_unset_bit_is_noop() {
        let set = RegisterSet::empty().allocate_at(1);
        assert_eq!(set.free(5), set);
    }

    #[test]
    fn num_allocated_is_popcount() {
        let set = RegisterSet::from_indices([0, 2, 4, 8]);
        assert_eq!(set.num_allocated(), 4);
    }

    #[quickcheck_macros::quickcheck]
    fn union_commutes(a: u16, b: u16) -> bool {
        RegisterSet(a).union(RegisterSet(b)) == RegisterSet(b).union(RegisterSet(a))
    }

    #[quickcheck_macros::quickcheck]
    fn union_associates(a: u16, b: u16, c: u16) -> bool {
        let (a, b, c) = (RegisterSet(a), RegisterSet(b), RegisterSet(c));
        a.union(b).union(c) == a.union(b.union(c))
    }

    #[quickcheck_macros::quickcheck]
    fn intersect_commutes(a: u16, b: u16) -> bool {
        RegisterSet(a).intersect(RegisterSet(b)) == RegisterSet(b).intersect(RegisterSet(a))
    }

    #[quickcheck_macros::quickcheck]
    fn intersect_associates(a: u16, b: u16, c: u16) -> bool {
        let (a, b, c) = (RegisterSet(a), RegisterSet(b), RegisterSet(c));
        a.intersect(b).intersect(c) == a.intersect(b.intersect(c))
    }

    #[quickcheck_macros::quickcheck]
    fn free_allocate_roundtrip(bits: u16, i: u8) -> TestResult {
        if i >= REGISTER_COUNT {
            return TestResult::discard();
        }
        let set = RegisterSet(bits).allocate_at(i);
        TestResult::from_bool(set.free(i).free(i) == set.free(i))
    }
}
