//! A partially ordered measure of progress at each dataflow location.

use std::fmt::{Debug, Formatter};
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use smallvec::SmallVec;

use crate::order::PartialOrder;

/// A composite trait for types that serve as timestamps.
///
/// Beyond the partial order, timestamps support the operations loops need: `enter` pushes a
/// fresh iteration counter, `exit` pops the innermost one, and `advance` increments the
/// innermost counter (the epoch, outside of any loop).
///
/// The `Ord` implementation must be consistent with the partial order: `a.less_equal(&b)`
/// implies `a <= b`. Frontier maintenance relies on this when it scans sorted updates.
pub trait Timestamp: Clone+Eq+Ord+Hash+Debug+PartialOrder+Serialize+DeserializeOwned+Send+'static {
    /// A type summarizing action on a timestamp along a dataflow path.
    type Summary: PathSummary<Self>;
    /// A minimum value suitable as a default.
    fn minimum() -> Self;
    /// The number of loops the timestamp is nested within.
    fn depth(&self) -> usize;
    /// The timestamp on entering a loop: a new innermost counter, starting at zero.
    fn enter(&self) -> Self;
    /// The timestamp on leaving a loop: the innermost counter removed.
    ///
    /// Leaving a loop from outside of any loop is a protocol violation, and panics.
    fn exit(&self) -> Self;
    /// Advances the innermost counter by `step`, or returns `None` on overflow.
    fn advance(&self, step: u64) -> Option<Self>;
    /// The innermost counter: the iteration of the innermost loop, or the epoch at depth zero.
    fn innermost(&self) -> u64;
}

/// A summary of how a timestamp advances along a path between stages.
pub trait PathSummary<T> : Clone+Eq+Ord+Debug+Default+PartialOrder+'static {
    /// Advances a timestamp according to the timestamp actions on the path.
    ///
    /// The path may advance the timestamp sufficiently that it is no longer valid, for example
    /// if incrementing fields would result in integer overflow, or if the path would leave more
    /// loops than the timestamp is nested within. In that case, `results_in` returns `None`.
    fn results_in(&self, src: &T) -> Option<T>;
    /// Composes this path summary with another path summary.
    ///
    /// It is possible that the two composed paths result in an invalid summary, for example when
    /// integer additions overflow. If it is correct that all timestamps moved along these paths
    /// would also result in overflow and be invalid, then `followed_by` returns `None`.
    fn followed_by(&self, other: &Self) -> Option<Self>;
    /// The action of a loop entry.
    fn ingress() -> Self;
    /// The action of a loop exit.
    fn egress() -> Self;
    /// The action of a loop's feedback edge, advancing the iteration counter by `step`.
    fn feedback(step: u64) -> Self;
}

/// An epoch, nested within zero or more loop iterations.
///
/// Timestamps compare only at equal depth; there the order is the product order on the epoch
/// and the iteration counters.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Pointstamp {
    /// The input epoch.
    pub epoch: u64,
    /// Iteration counters, outermost loop first.
    pub iterations: SmallVec<[u64; 2]>,
}

impl Pointstamp {
    /// A top-level timestamp for `epoch`.
    pub fn new(epoch: u64) -> Self {
        Pointstamp { epoch, iterations: SmallVec::new() }
    }
    /// A timestamp for `epoch` nested in loops at the indicated iterations.
    pub fn with_iterations(epoch: u64, iterations: &[u64]) -> Self {
        Pointstamp { epoch, iterations: SmallVec::from_slice(iterations) }
    }
    /// The innermost iteration counter, if any.
    pub fn iteration(&self) -> Option<u64> {
        self.iterations.last().copied()
    }
}

impl Debug for Pointstamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.iterations.is_empty() {
            write!(f, "({})", self.epoch)
        }
        else {
            write!(f, "({}, {:?})", self.epoch, &self.iterations[..])
        }
    }
}

impl PartialOrder for Pointstamp {
    #[inline]
    fn less_equal(&self, other: &Self) -> bool {
        self.iterations.len() == other.iterations.len() &&
        self.epoch <= other.epoch &&
        self.iterations.iter().zip(other.iterations.iter()).all(|(a, b)| a <= b)
    }
}

impl Timestamp for Pointstamp {
    type Summary = PointstampSummary;
    fn minimum() -> Self { Pointstamp::new(0) }
    fn depth(&self) -> usize { self.iterations.len() }
    fn enter(&self) -> Self {
        let mut result = self.clone();
        result.iterations.push(0);
        result
    }
    fn exit(&self) -> Self {
        assert!(!self.iterations.is_empty(), "timestamp {:?} cannot exit a loop it is not within", self);
        let mut result = self.clone();
        result.iterations.pop();
        result
    }
    fn advance(&self, step: u64) -> Option<Self> {
        let mut result = self.clone();
        let counter = result.iterations.last_mut().unwrap_or(&mut result.epoch);
        *counter = counter.checked_add(step)?;
        Some(result)
    }
    fn innermost(&self) -> u64 {
        self.iterations.last().copied().unwrap_or(self.epoch)
    }
}

/// Path summary for `Pointstamp`: pop `exit` counters, advance the innermost remaining counter
/// by `advance`, then push the counters in `enter`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Serialize, Deserialize)]
pub struct PointstampSummary {
    /// Number of loops exited.
    pub exit: usize,
    /// Increment applied to the innermost counter remaining after exits.
    pub advance: u64,
    /// Counters pushed, outermost first.
    pub enter: SmallVec<[u64; 2]>,
}

impl PartialOrder for PointstampSummary {
    #[inline]
    fn less_equal(&self, other: &Self) -> bool {
        self.exit == other.exit &&
        self.enter.len() == other.enter.len() &&
        self.advance <= other.advance &&
        self.enter.iter().zip(other.enter.iter()).all(|(a, b)| a <= b)
    }
}

impl PathSummary<Pointstamp> for PointstampSummary {
    fn results_in(&self, src: &Pointstamp) -> Option<Pointstamp> {
        if src.depth() < self.exit {
            return None;
        }
        let mut result = src.clone();
        let keep = result.iterations.len() - self.exit;
        result.iterations.truncate(keep);
        if self.advance > 0 {
            result = result.advance(self.advance)?;
        }
        result.iterations.extend(self.enter.iter().copied());
        Some(result)
    }
    fn followed_by(&self, other: &Self) -> Option<Self> {
        if other.exit <= self.enter.len() {
            let mut enter = self.enter.clone();
            enter.truncate(self.enter.len() - other.exit);
            let mut advance = self.advance;
            if other.advance > 0 {
                match enter.last_mut() {
                    Some(counter) => { *counter = counter.checked_add(other.advance)?; },
                    None => { advance = advance.checked_add(other.advance)?; },
                }
            }
            enter.extend(other.enter.iter().copied());
            Some(PointstampSummary { exit: self.exit, advance, enter })
        }
        else {
            // `other` leaves loops `self` was already within; whatever `self` advanced is popped.
            Some(PointstampSummary {
                exit: self.exit + (other.exit - self.enter.len()),
                advance: other.advance,
                enter: other.enter.clone(),
            })
        }
    }
    fn ingress() -> Self {
        PointstampSummary { exit: 0, advance: 0, enter: SmallVec::from_slice(&[0]) }
    }
    fn egress() -> Self {
        PointstampSummary { exit: 1, advance: 0, enter: SmallVec::new() }
    }
    fn feedback(step: u64) -> Self {
        PointstampSummary { exit: 0, advance: step, enter: SmallVec::new() }
    }
}

#[cfg(test)]
mod tests {

    use crate::order::PartialOrder;
    use super::{PathSummary, Pointstamp, PointstampSummary, Timestamp};

    #[test]
    fn enter_exit_advance() {
        let time = Pointstamp::new(3);
        let inner = time.enter();
        assert_eq!(inner, Pointstamp::with_iterations(3, &[0]));
        assert_eq!(inner.advance(2), Some(Pointstamp::with_iterations(3, &[2])));
        assert_eq!(inner.advance(2).unwrap().exit(), time);
        assert_eq!(time.advance(1), Some(Pointstamp::new(4)));
        assert_eq!(Pointstamp::new(u64::MAX).advance(1), None);
        assert_eq!(inner.advance(2).unwrap().innermost(), 2);
        assert_eq!(time.innermost(), 3);
    }

    #[test]
    #[should_panic]
    fn exit_from_top_level_panics() {
        let _ = Pointstamp::new(0).exit();
    }

    #[test]
    fn order_is_product_at_equal_depth() {
        let a = Pointstamp::with_iterations(1, &[2]);
        let b = Pointstamp::with_iterations(2, &[1]);
        assert!(!a.less_equal(&b));
        assert!(!b.less_equal(&a));
        assert!(a.less_equal(&Pointstamp::with_iterations(1, &[3])));
        assert!(!Pointstamp::new(0).less_equal(&Pointstamp::with_iterations(0, &[0])));
        // sorting respects the partial order
        assert!(a < Pointstamp::with_iterations(1, &[3]));
    }

    #[test]
    fn summaries_compose_like_their_actions() {
        let time = Pointstamp::with_iterations(5, &[1]);
        let summaries = vec![
            PointstampSummary::default(),
            PointstampSummary::ingress(),
            PointstampSummary::egress(),
            PointstampSummary::feedback(1),
            PointstampSummary::ingress().followed_by(&PointstampSummary::feedback(2)).unwrap(),
        ];
        for a in summaries.iter() {
            for b in summaries.iter() {
                let composed = a.followed_by(b).unwrap();
                let stepwise = a.results_in(&time).and_then(|t| b.results_in(&t));
                assert_eq!(composed.results_in(&time), stepwise, "{:?} then {:?}", a, b);
            }
        }
    }

    #[test]
    fn egress_requires_depth() {
        assert_eq!(PointstampSummary::egress().results_in(&Pointstamp::new(0)), None);
        let round_trip = PointstampSummary::ingress().followed_by(&PointstampSummary::egress()).unwrap();
        assert_eq!(round_trip, PointstampSummary::default());
    }
}
