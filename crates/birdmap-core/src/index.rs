//! Strongly-typed indices and index-tagged vectors.

use std::fmt;
use std::iter::FromIterator;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// A dense, zero-based index into one coordinate domain.
pub trait Idx: Copy + Eq + Ord + fmt::Debug + 'static {
    /// Create an index from a raw position.
    fn new(index: usize) -> Self;

    /// The raw position this index refers to.
    fn index(self) -> usize;
}

macro_rules! define_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl Idx for $name {
            #[inline]
            fn new(index: usize) -> Self {
                debug_assert!(
                    index <= u32::MAX as usize,
                    "{} index {} out of range",
                    stringify!($name),
                    index
                );
                Self(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(v: u32) -> Self {
                Self(v)
            }
        }
    };
}

define_index!(
    /// Canonical position of a grid cell: its rank in lexicographically
    /// sorted cell-key order.
    AdjIdx
);

define_index!(
    /// Row of the prepared table.
    ObsIdx
);

define_index!(
    /// Position of a species label in sorted label order.
    SpeciesIdx
);

define_index!(
    /// Column of the scaled covariate design matrix.
    FeatureIdx
);

/// A vector whose positions are addressed by a typed index `I`.
#[derive(Clone, PartialEq)]
pub struct IdxVec<I: Idx, T> {
    raw: Vec<T>,
    _marker: PhantomData<fn(&I)>,
}

impl<I: Idx, T> IdxVec<I, T> {
    /// Create an empty vector.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Wrap a plain vector. Position `n` becomes index `I::new(n)`.
    pub fn from_vec(raw: Vec<T>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Create a vector of `len` copies of `value`.
    pub fn from_elem(value: T, len: usize) -> Self
    where
        T: Clone,
    {
        Self::from_vec(vec![value; len])
    }

    /// Append a value, returning its index.
    pub fn push(&mut self, value: T) -> I {
        let idx = I::new(self.raw.len());
        self.raw.push(value);
        idx
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the vector is empty.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Get a value by index, if in bounds.
    pub fn get(&self, idx: I) -> Option<&T> {
        self.raw.get(idx.index())
    }

    /// Iterate over values in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.raw.iter()
    }

    /// Iterate over `(index, value)` pairs in index order.
    pub fn iter_enumerated(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.raw.iter().enumerate().map(|(n, v)| (I::new(n), v))
    }

    /// Iterate over all valid indices.
    pub fn indices(&self) -> impl Iterator<Item = I> + 'static {
        (0..self.raw.len()).map(I::new)
    }

    /// Apply `f` to every element, keeping the index domain.
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> IdxVec<I, U> {
        IdxVec::from_vec(self.raw.iter().map(f).collect())
    }

    /// Borrow the underlying storage.
    pub fn as_slice(&self) -> &[T] {
        &self.raw
    }

    /// Consume the vector, returning the underlying storage.
    pub fn into_vec(self) -> Vec<T> {
        self.raw
    }
}

impl<I: Idx, T> Default for IdxVec<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Idx, T: fmt::Debug> fmt::Debug for IdxVec<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.raw.iter()).finish()
    }
}

impl<I: Idx, T> Index<I> for IdxVec<I, T> {
    type Output = T;

    #[inline]
    fn index(&self, idx: I) -> &T {
        &self.raw[idx.index()]
    }
}

impl<I: Idx, T> IndexMut<I> for IdxVec<I, T> {
    #[inline]
    fn index_mut(&mut self, idx: I) -> &mut T {
        &mut self.raw[idx.index()]
    }
}

impl<I: Idx, T> FromIterator<T> for IdxVec<I, T> {
    fn from_iter<It: IntoIterator<Item = T>>(iter: It) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<'a, I: Idx, T> IntoIterator for &'a IdxVec<I, T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.raw.iter()
    }
}

impl<I: Idx, T: Serialize> Serialize for IdxVec<I, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.raw.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_returns_sequential_indices() {
        let mut v: IdxVec<ObsIdx, &str> = IdxVec::new();
        assert_eq!(v.push("a"), ObsIdx(0));
        assert_eq!(v.push("b"), ObsIdx(1));
        assert_eq!(v[ObsIdx(1)], "b");
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn test_iter_enumerated() {
        let v: IdxVec<AdjIdx, f64> = IdxVec::from_vec(vec![0.5, 1.5]);
        let pairs: Vec<_> = v.iter_enumerated().map(|(i, x)| (i, *x)).collect();
        assert_eq!(pairs, vec![(AdjIdx(0), 0.5), (AdjIdx(1), 1.5)]);
    }

    #[test]
    fn test_map_keeps_domain() {
        let v: IdxVec<SpeciesIdx, u32> = IdxVec::from_vec(vec![1, 2, 3]);
        let doubled = v.map(|x| x * 2);
        assert_eq!(doubled[SpeciesIdx(2)], 6);
    }

    #[test]
    fn test_get_out_of_bounds() {
        let v: IdxVec<FeatureIdx, u8> = IdxVec::from_elem(7, 2);
        assert_eq!(v.get(FeatureIdx(1)), Some(&7));
        assert_eq!(v.get(FeatureIdx(2)), None);
    }

    #[test]
    #[cfg(all(debug_assertions, target_pointer_width = "64"))]
    #[should_panic(expected = "out of range")]
    fn test_oversized_index_panics_in_debug() {
        let _ = ObsIdx::new(u32::MAX as usize + 1);
    }

    #[test]
    fn test_largest_index_round_trips() {
        assert_eq!(ObsIdx::new(u32::MAX as usize).index(), u32::MAX as usize);
    }

    #[test]
    fn test_display() {
        assert_eq!(AdjIdx(12).to_string(), "12");
    }
}
