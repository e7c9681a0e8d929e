//! Minimal sets of incomparable elements, fixed or maintained under counted updates.

use crate::progress::ChangeBatch;
use crate::order::PartialOrder;

/// A set of mutually incomparable elements.
///
/// Inserting an element that some present element precedes has no effect; otherwise the element
/// evicts every present element it precedes. The set therefore holds the minimal elements of
/// everything inserted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Antichain<T> {
    elements: Vec<T>,
}

impl<T: PartialOrder> Antichain<T> {
    /// Inserts `element` unless a present element is less or equal to it.
    ///
    /// Returns true if the element was inserted.
    pub fn insert(&mut self, element: T) -> bool {
        if self.elements.iter().any(|present| present.less_equal(&element)) {
            return false;
        }
        self.elements.retain(|present| !element.less_equal(present));
        self.elements.push(element);
        true
    }

    /// True if some element is strictly less than `time`.
    #[inline]
    pub fn less_than(&self, time: &T) -> bool {
        self.elements.iter().any(|element| element.less_than(time))
    }

    /// True if some element is less than or equal to `time`.
    #[inline]
    pub fn less_equal(&self, time: &T) -> bool {
        self.elements.iter().any(|element| element.less_equal(time))
    }
}

impl<T> Antichain<T> {
    /// An empty antichain.
    pub fn new() -> Antichain<T> { Antichain { elements: Vec::new() } }

    /// An antichain holding only `element`.
    pub fn from_elem(element: T) -> Antichain<T> { Antichain { elements: vec![element] } }

    /// The elements, in insertion order.
    pub fn elements(&self) -> &[T] { &self.elements[..] }

    /// True if the antichain has no elements.
    pub fn is_empty(&self) -> bool { self.elements.is_empty() }
}

impl<T> Default for Antichain<T> {
    fn default() -> Self { Self::new() }
}

/// The minimal elements of a multiset whose counts change over time.
///
/// The frontier is formed by the elements with positive count that no other such element
/// precedes. It may move forward or back; `update_iter` reports how it moved.
///
/// Counts may transiently be negative, as updates from different workers arrive in any order.
/// Only positive counts contribute to the frontier.
#[derive(Clone, Debug)]
pub struct MutableAntichain<T> {
    counts: ChangeBatch<T>,
    frontier: Vec<T>,
    changes: ChangeBatch<T>,
}

impl<T> Default for MutableAntichain<T> {
    fn default() -> Self { Self::new() }
}

impl<T> MutableAntichain<T> {
    /// A multiset with no elements.
    #[inline]
    pub fn new() -> MutableAntichain<T> {
        MutableAntichain {
            counts: ChangeBatch::new(),
            frontier: Vec::new(),
            changes: ChangeBatch::new(),
        }
    }

    /// The current frontier.
    #[inline]
    pub fn frontier(&self) -> AntichainRef<'_, T> {
        AntichainRef { frontier: &self.frontier }
    }
}

impl<T: PartialOrder + Ord + Clone> MutableAntichain<T> {

    /// True if no element has positive count.
    #[inline]
    pub fn is_empty(&self) -> bool { self.frontier.is_empty() }

    /// True if every count accumulates to zero.
    #[inline]
    pub fn is_quiescent(&mut self) -> bool { self.counts.is_empty() }

    /// True if some frontier element is strictly less than `time`.
    #[inline]
    pub fn less_than(&self, time: &T) -> bool {
        self.frontier().less_than(time)
    }

    /// True if some frontier element is less than or equal to `time`.
    #[inline]
    pub fn less_equal(&self, time: &T) -> bool {
        self.frontier().less_equal(time)
    }

    /// Applies count changes, and drains the resulting changes to the frontier.
    #[inline]
    pub fn update_iter<I>(&mut self, updates: I) -> std::vec::Drain<'_, (T, i64)>
    where
        I: IntoIterator<Item = (T, i64)>,
    {
        let mut rebuild = false;
        for (time, delta) in updates {
            // An increment moves the frontier only if nothing in it precedes `time`; a decrement
            // only if `time` is in it.
            if !rebuild {
                rebuild = if delta > 0 {
                    !self.frontier.iter().any(|element| element.less_equal(&time))
                }
                else {
                    delta < 0 && self.frontier.contains(&time)
                };
            }
            self.counts.update(time, delta);
        }

        if rebuild {
            self.rebuild()
        }
        self.changes.drain()
    }

    /// The non-zero accumulated counts.
    pub fn updates(&mut self) -> impl Iterator<Item=&(T, i64)> {
        self.counts.iter()
    }

    /// Recomputes the frontier from the counts, recording the difference in `self.changes`.
    ///
    /// Counts iterate in sorted order, which extends the partial order, so a time is visited only
    /// after every time that precedes it.
    fn rebuild(&mut self) {
        for time in self.frontier.drain(..) {
            self.changes.update(time, -1);
        }

        for (time, count) in self.counts.iter() {
            if *count > 0 && !self.frontier.iter().any(|element| element.less_equal(time)) {
                self.frontier.push(time.clone());
            }
        }

        for time in self.frontier.iter() {
            self.changes.update(time.clone(), 1);
        }
    }
}

/// A borrowed frontier.
#[derive(Debug)]
pub struct AntichainRef<'a, T: 'a> {
    frontier: &'a [T],
}

impl<T> Clone for AntichainRef<'_, T> {
    fn clone(&self) -> Self { *self }
}

impl<T> Copy for AntichainRef<'_, T> { }

impl<T: Clone> AntichainRef<'_, T> {
    /// Copies the frontier into an owned antichain.
    pub fn to_owned(&self) -> Antichain<T> {
        Antichain { elements: self.frontier.to_vec() }
    }
}

impl<T: PartialOrder> AntichainRef<'_, T> {
    /// True if some element is strictly less than `time`.
    #[inline]
    pub fn less_than(&self, time: &T) -> bool {
        self.frontier.iter().any(|element| element.less_than(time))
    }

    /// True if some element is less than or equal to `time`.
    #[inline]
    pub fn less_equal(&self, time: &T) -> bool {
        self.frontier.iter().any(|element| element.less_equal(time))
    }
}

impl<T> std::ops::Deref for AntichainRef<'_, T> {
    type Target = [T];
    fn deref(&self) -> &Self::Target { self.frontier }
}

#[cfg(test)]
mod tests {

    use crate::progress::Pointstamp;
    use super::{Antichain, MutableAntichain};

    fn nested(epoch: u64, iteration: u64) -> Pointstamp {
        Pointstamp::with_iterations(epoch, &[iteration])
    }

    #[test]
    fn antichain_keeps_minimal_elements() {
        let mut antichain = Antichain::new();
        assert!(antichain.insert(nested(2, 3)));
        assert!(antichain.insert(nested(3, 2)));
        assert!(!antichain.insert(nested(3, 3)));
        assert!(antichain.insert(nested(1, 1)));
        assert_eq!(antichain.elements(), &[nested(1, 1)]);
    }

    #[test]
    fn mutable_antichain_advances_and_retreats() {
        let mut frontier = MutableAntichain::new();
        frontier.update_iter(vec![(nested(0, 0), 1)]).for_each(drop);
        let changes = frontier.update_iter(vec![(nested(0, 1), 1), (nested(0, 0), -1)]).collect::<Vec<_>>();
        assert_eq!(changes, vec![(nested(0, 0), -1), (nested(0, 1), 1)]);
        frontier.update_iter(vec![(nested(0, 0), 1)]).for_each(drop);
        assert_eq!(&frontier.frontier()[..], &[nested(0, 0)]);
        frontier.update_iter(vec![(nested(0, 0), -1), (nested(0, 1), -1)]).for_each(drop);
        assert!(frontier.is_empty());
        assert!(frontier.is_quiescent());
    }

    #[test]
    fn negative_counts_do_not_appear() {
        let mut frontier = MutableAntichain::new();
        frontier.update_iter(vec![(Pointstamp::new(4), -2)]).for_each(drop);
        assert!(frontier.is_empty());
        assert!(!frontier.is_quiescent());
        frontier.update_iter(vec![(Pointstamp::new(4), 3)]).for_each(drop);
        assert!(frontier.less_equal(&Pointstamp::new(4)));
        frontier.update_iter(vec![(Pointstamp::new(4), -1)]).for_each(drop);
        assert!(frontier.is_quiescent());
        assert!(frontier.is_empty());
    }
}
