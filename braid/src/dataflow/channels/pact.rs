//! Parallelization contracts, describing how records move from a producing stage to a consuming one.
//!
//! The only requirement of a pact is that it not alter the number of records at each time.
//! Progress tracking counts records at the consuming input, and assumes this number is
//! independent of the pact used.

use std::fmt::{self, Debug};
use std::rc::Rc;

/// A partitioning contract for one connection.
pub enum Pact<D> {
    /// Vertex `i` of the producer sends only to vertex `i` of the consumer.
    ///
    /// Both stages must have the same parallelism.
    Pipeline,
    /// Each record goes to the consumer vertex `hash(record) % parallelism`.
    Exchange(Rc<dyn Fn(&D) -> u64>),
    /// Every batch goes to every consumer vertex.
    Broadcast,
}

impl<D> Pact<D> {
    /// An exchange contract routing records by `route`.
    pub fn exchange<F: Fn(&D) -> u64 + 'static>(route: F) -> Self {
        Pact::Exchange(Rc::new(route))
    }

    /// The consumer vertex that receives `record` from `producer`, if exactly one does.
    ///
    /// Returns `None` for broadcast, which delivers to all of them.
    #[inline]
    pub fn route(&self, producer: usize, record: &D, parallelism: usize) -> Option<usize> {
        match self {
            Pact::Pipeline => Some(producer),
            Pact::Exchange(route) => Some((route(record) % parallelism as u64) as usize),
            Pact::Broadcast => None,
        }
    }

    /// The consumer vertices a producer vertex may send to.
    pub fn destinations(&self, producer: usize, parallelism: usize) -> Vec<usize> {
        match self {
            Pact::Pipeline => vec![producer],
            Pact::Exchange(_) | Pact::Broadcast => (0 .. parallelism).collect(),
        }
    }

    /// A short name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Pact::Pipeline => "Pipeline",
            Pact::Exchange(_) => "Exchange",
            Pact::Broadcast => "Broadcast",
        }
    }
}

impl<D> Clone for Pact<D> {
    fn clone(&self) -> Self {
        match self {
            Pact::Pipeline => Pact::Pipeline,
            Pact::Exchange(route) => Pact::Exchange(Rc::clone(route)),
            Pact::Broadcast => Pact::Broadcast,
        }
    }
}

impl<D> Debug for Pact<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {

    use super::Pact;

    #[test]
    fn exchange_is_deterministic() {
        let pact = Pact::exchange(|x: &u64| *x);
        for record in 0 .. 100u64 {
            let first = pact.route(0, &record, 3);
            assert_eq!(first, Some((record % 3) as usize));
            assert_eq!(pact.route(2, &record, 3), first);
        }
    }

    #[test]
    fn pipeline_and_broadcast_destinations() {
        assert_eq!(Pact::<u64>::Pipeline.destinations(2, 4), vec![2]);
        assert_eq!(Pact::<u64>::Broadcast.destinations(2, 3), vec![0, 1, 2]);
        assert_eq!(Pact::<u64>::Broadcast.route(1, &5, 3), None);
    }
}
