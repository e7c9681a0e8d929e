//! A collection of updates of the form `(T, i64)`.

use serde::{Deserialize, Serialize};

/// A collection of updates of the form `(T, i64)`.
///
/// A `ChangeBatch` accumulates updates of the form `(T, i64)`, where it is capable of consolidating
/// the representation and removing elements whose `i64` field accumulates to zero.
///
/// The implementation is designed to be as lazy as possible, simply appending to a list of updates
/// until they are required. This means that several seemingly simple operations may be expensive, in
/// that they may provoke a compaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch<T> {
    updates: Vec<(T, i64)>,
    /// The length of the prefix of `updates` known to be compact.
    clean: usize,
}

impl<T> Default for ChangeBatch<T> {
    fn default() -> Self { Self::new() }
}

impl<T> ChangeBatch<T> {
    /// Allocates a new empty `ChangeBatch`.
    pub fn new() -> Self {
        ChangeBatch { updates: Vec::new(), clean: 0 }
    }
}

impl<T: Ord> ChangeBatch<T> {

    /// Allocates a new `ChangeBatch` with a single entry.
    pub fn new_from(key: T, val: i64) -> Self {
        let mut result = ChangeBatch::new();
        result.update(key, val);
        result
    }

    /// Adds a new update, for `item` with `value`.
    ///
    /// This could be optimized to perform compaction when the number of "dirty" elements exceeds
    /// half the length of the list, which would keep the total footprint within reasonable bounds
    /// even under an arbitrary number of updates. This has a cost, and it isn't clear whether it
    /// is worth paying without some experimentation.
    #[inline]
    pub fn update(&mut self, item: T, value: i64) {
        self.updates.push((item, value));
        self.maintain_bounds();
    }

    /// Performs a sequence of updates described by `iterator`.
    #[inline]
    pub fn extend<I: Iterator<Item=(T, i64)>>(&mut self, iterator: I) {
        self.updates.extend(iterator);
        self.maintain_bounds();
    }

    /// Extracts the `Vec<(T, i64)>` from the map, consuming it.
    pub fn into_inner(mut self) -> Vec<(T, i64)> {
        self.compact();
        self.updates
    }

    /// Iterates over the contents of the map.
    #[inline]
    pub fn iter(&mut self) -> std::slice::Iter<'_, (T, i64)> {
        self.compact();
        self.updates.iter()
    }

    /// Drains the set of updates.
    #[inline]
    pub fn drain(&mut self) -> std::vec::Drain<'_, (T, i64)> {
        self.compact();
        self.clean = 0;
        self.updates.drain(..)
    }

    /// Clears the map.
    #[inline]
    pub fn clear(&mut self) {
        self.updates.clear();
        self.clean = 0;
    }

    /// True iff all keys have value zero.
    #[inline]
    pub fn is_empty(&mut self) -> bool {
        if self.clean > self.updates.len() / 2 {
            false
        }
        else {
            self.compact();
            self.updates.is_empty()
        }
    }

    /// Drains `self` into `other`.
    pub fn drain_into(&mut self, other: &mut ChangeBatch<T>) where T: Clone {
        if other.updates.is_empty() {
            std::mem::swap(self, other);
        }
        else {
            other.extend(self.updates.drain(..));
            self.clean = 0;
        }
    }

    /// Compact the internal representation.
    ///
    /// This method sort `self.updates` and consolidates elements with equal item, discarding
    /// any whose accumulation is zero. It is optimized to only do this if the number of dirty
    /// elements is non-zero.
    #[inline]
    pub fn compact(&mut self) {
        if self.clean < self.updates.len() && self.updates.len() > 1 {
            self.updates.sort_by(|x, y| x.0.cmp(&y.0));
            for i in 0 .. self.updates.len() - 1 {
                if self.updates[i].0 == self.updates[i+1].0 {
                    self.updates[i+1].1 += self.updates[i].1;
                    self.updates[i].1 = 0;
                }
            }
            self.updates.retain(|x| x.1 != 0);
        }
        else if self.updates.len() == 1 && self.updates[0].1 == 0 {
            self.updates.clear();
        }
        self.clean = self.updates.len();
    }

    /// Expose the internal vector of updates.
    pub fn unstable_internal_updates(&self) -> &Vec<(T, i64)> { &self.updates }

    fn maintain_bounds(&mut self) {
        // if we have more than 32 elements and at least half of them are not clean, compact
        if self.updates.len() > 32 && self.updates.len() >> 1 >= self.clean {
            self.compact()
        }
    }
}

#[cfg(test)]
mod tests {

    use super::ChangeBatch;

    #[test]
    fn consolidates_to_empty() {
        let mut batch = ChangeBatch::new_from(17, 1);
        batch.update(3, 2);
        batch.update(17, -1);
        batch.update(3, -2);
        assert!(batch.is_empty());
    }

    #[test]
    fn drains_sorted() {
        let mut batch = ChangeBatch::new();
        batch.extend(vec![(5, 1), (2, 3), (5, 1)].into_iter());
        assert_eq!(batch.drain().collect::<Vec<_>>(), vec![(2, 3), (5, 2)]);
        assert!(batch.is_empty());
    }
}
