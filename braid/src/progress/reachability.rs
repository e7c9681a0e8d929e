//! Manages pointstamp reachability within a dataflow graph.
//!
//! A dataflow graph is a collection of stages, each with input and output ports. Each stage
//! describes how timestamps advance from each of its inputs to each of its outputs (as an
//! antichain of path summaries), and edges connect output ports to input ports.
//!
//! The [`Builder`] collects this description and [`Builder::build`] computes, for every location,
//! the minimal path summaries to every input port it can reach. The resulting [`Tracker`] keeps
//! counts of outstanding pointstamps at each location, and maintains for every input port the
//! frontier of timestamps that may yet arrive there.
//!
//! # Examples
//!
//! ```rust
//! use braid::progress::{Location, Pointstamp, Timestamp, PathSummary};
//! use braid::progress::frontier::Antichain;
//! use braid::progress::reachability::Builder;
//!
//! type Summary = <Pointstamp as Timestamp>::Summary;
//!
//! // An input stage (0) feeding a stage (1) with a feedback stage (2) around it.
//! let mut builder = Builder::<Pointstamp>::new();
//! builder.add_node(0, 0, 1, vec![]);
//! builder.add_node(1, 2, 1, vec![vec![Antichain::from_elem(Summary::default())]; 2]);
//! builder.add_node(2, 1, 1, vec![vec![Antichain::from_elem(Summary::feedback(1))]]);
//! builder.add_edge(Location::new_source(0, 0), Location::new_target(1, 0));
//! builder.add_edge(Location::new_source(1, 0), Location::new_target(2, 0));
//! builder.add_edge(Location::new_source(2, 0), Location::new_target(1, 1));
//!
//! let mut tracker = builder.build().unwrap();
//!
//! // A record in flight to the feedback stage holds back the second input of stage 1.
//! tracker.update(Location::new_target(2, 0), Pointstamp::new(3), 1);
//! assert!(tracker.frontier(1, 1).less_equal(&Pointstamp::new(4)));
//! assert!(!tracker.frontier(1, 1).less_equal(&Pointstamp::new(3)));
//! assert!(tracker.frontier(1, 0).is_empty());
//! ```

use std::collections::{HashMap, VecDeque};

use crate::error::GraphError;
use crate::order::PartialOrder;
use crate::progress::{Location, Port, Timestamp, PathSummary};
use crate::progress::frontier::{Antichain, AntichainRef, MutableAntichain};

/// A topology builder, which can summarize reachability along paths.
#[derive(Clone, Debug)]
pub struct Builder<T: Timestamp> {
    /// Internal connectivity, indexed by `[node][input][output]`.
    nodes: Vec<Vec<Vec<Antichain<T::Summary>>>>,
    /// Directed edges from a node's output port to a set of input ports.
    edges: Vec<Vec<Vec<Location>>>,
    /// Numbers of inputs and outputs for each node.
    shape: Vec<(usize, usize)>,
}

impl<T: Timestamp> Default for Builder<T> {
    fn default() -> Self { Self::new() }
}

impl<T: Timestamp> Builder<T> {

    /// Create a new empty topology builder.
    pub fn new() -> Self {
        Builder {
            nodes: Vec::new(),
            edges: Vec::new(),
            shape: Vec::new(),
        }
    }

    /// Add links internal to stages.
    ///
    /// This method overwrites any existing summary, instead of anything more sophisticated.
    /// An empty `summary` (as for stages without inputs) connects nothing.
    pub fn add_node(&mut self, index: usize, inputs: usize, outputs: usize, summary: Vec<Vec<Antichain<T::Summary>>>) {

        debug_assert!(summary.is_empty() || inputs == summary.len());
        debug_assert!(summary.iter().all(|x| x.len() == outputs));

        while self.nodes.len() <= index {
            self.nodes.push(Vec::new());
            self.edges.push(Vec::new());
            self.shape.push((0, 0));
        }

        self.nodes[index] = summary;
        if self.edges[index].len() != outputs {
            self.edges[index] = vec![Vec::new(); outputs];
        }
        self.shape[index] = (inputs, outputs);
    }

    /// Add links between stages.
    ///
    /// This method does not check that the associated nodes and ports exist. References to
    /// missing nodes or ports are discovered in `build`.
    pub fn add_edge(&mut self, source: Location, target: Location) {
        debug_assert!(source.is_source());
        debug_assert!(target.is_target());
        // Extend the edges, in case the node was not yet declared.
        while self.edges.len() <= source.node {
            self.nodes.push(Vec::new());
            self.edges.push(Vec::new());
            self.shape.push((0, 0));
        }
        while self.edges[source.node].len() <= source.port.index() {
            self.edges[source.node].push(Vec::new());
        }
        self.edges[source.node][source.port.index()].push(target);
    }

    /// Validates the graph and computes reachability between all locations.
    ///
    /// Fails if an edge names a port that does not exist, or if some cycle in the graph does not
    /// strictly advance timestamps along it; progress could never be made around such a cycle.
    pub fn build(self) -> Result<Tracker<T>, GraphError> {

        for (node, edges) in self.edges.iter().enumerate() {
            if edges.len() > self.shape[node].1 {
                return Err(GraphError::UnknownPort(Location::new_source(node, edges.len() - 1)));
            }
            for target in edges.iter().flatten() {
                if target.node >= self.shape.len() || target.port.index() >= self.shape[target.node].0 {
                    return Err(GraphError::UnknownPort(*target));
                }
            }
        }

        let layout = Layout::new(&self.shape);
        let mut reach = Vec::with_capacity(layout.len());
        for index in 0 .. layout.len() {
            reach.push(self.summarize_from(&layout, layout.location(index))?);
        }

        let implications = (0 .. layout.len()).map(|_| MutableAntichain::new()).collect();
        let pointstamps = (0 .. layout.len()).map(|_| MutableAntichain::new()).collect();

        Ok(Tracker {
            layout,
            reach,
            pointstamps,
            implications,
        })
    }

    /// Minimal summaries from `start` to each reachable input port, keyed by location index.
    fn summarize_from(&self, layout: &Layout, start: Location) -> Result<Vec<(usize, Antichain<T::Summary>)>, GraphError> {

        let mut reached: HashMap<Location, Antichain<T::Summary>> = HashMap::new();
        let mut worklist = VecDeque::new();

        reached.entry(start).or_default().insert(Default::default());
        worklist.push_back((start, T::Summary::default()));

        while let Some((location, summary)) = worklist.pop_front() {
            let mut next = Vec::new();
            match location.port {
                Port::Target(input) => {
                    if let Some(outputs) = self.nodes[location.node].get(input) {
                        for (output, summaries) in outputs.iter().enumerate() {
                            for internal in summaries.elements() {
                                if let Some(composed) = summary.followed_by(internal) {
                                    next.push((Location::new_source(location.node, output), composed));
                                }
                            }
                        }
                    }
                },
                Port::Source(output) => {
                    for target in self.edges[location.node][output].iter() {
                        next.push((*target, summary.clone()));
                    }
                },
            }

            for (location, summary) in next {
                if location == start && summary.less_equal(&Default::default()) {
                    return Err(GraphError::UnadvancingCycle(start));
                }
                if reached.entry(location).or_default().insert(summary.clone()) {
                    worklist.push_back((location, summary));
                }
            }
        }

        let mut result =
        reached
            .into_iter()
            .filter(|(location, _)| location.is_target())
            .map(|(location, summaries)| (layout.index(location), summaries))
            .collect::<Vec<_>>();
        result.sort_by_key(|(index, _)| *index);
        Ok(result)
    }
}

/// Dense numbering of the locations of a graph: each node's inputs, then its outputs.
#[derive(Clone, Debug)]
struct Layout {
    offsets: Vec<usize>,
    shape: Vec<(usize, usize)>,
}

impl Layout {
    fn new(shape: &[(usize, usize)]) -> Self {
        let mut offsets = Vec::with_capacity(shape.len() + 1);
        let mut total = 0;
        for (inputs, outputs) in shape.iter() {
            offsets.push(total);
            total += inputs + outputs;
        }
        offsets.push(total);
        Layout { offsets, shape: shape.to_vec() }
    }
    fn len(&self) -> usize { self.offsets[self.offsets.len() - 1] }
    fn index(&self, location: Location) -> usize {
        match location.port {
            Port::Target(port) => self.offsets[location.node] + port,
            Port::Source(port) => self.offsets[location.node] + self.shape[location.node].0 + port,
        }
    }
    fn location(&self, index: usize) -> Location {
        let node = self.offsets.partition_point(|offset| *offset <= index) - 1;
        let port = index - self.offsets[node];
        if port < self.shape[node].0 {
            Location::new_target(node, port)
        }
        else {
            Location::new_source(node, port - self.shape[node].0)
        }
    }
}

/// Tracks outstanding pointstamps and the frontiers they imply at each input port.
#[derive(Debug)]
pub struct Tracker<T: Timestamp> {
    layout: Layout,
    /// For each location, minimal summaries to each reachable input port.
    reach: Vec<Vec<(usize, Antichain<T::Summary>)>>,
    /// Counts of pointstamps at each location.
    pointstamps: Vec<MutableAntichain<T>>,
    /// Counts of pointstamps projected to each input port (empty for output ports).
    implications: Vec<MutableAntichain<T>>,
}

impl<T: Timestamp> Tracker<T> {

    /// Adds `diff` to the count of pointstamps `(location, time)`.
    ///
    /// The change is projected through the reachability summaries, so that input frontiers
    /// reflect it when this method returns.
    pub fn update(&mut self, location: Location, time: T, diff: i64) {
        let index = self.layout.index(location);
        self.pointstamps[index].update_iter(Some((time.clone(), diff))).for_each(drop);
        for (target, summaries) in self.reach[index].iter() {
            for summary in summaries.elements() {
                if let Some(projected) = summary.results_in(&time) {
                    self.implications[*target].update_iter(Some((projected, diff))).for_each(drop);
                }
            }
        }
    }

    /// Applies a sequence of pointstamp updates.
    pub fn update_iter<I: IntoIterator<Item=((Location, T), i64)>>(&mut self, updates: I) {
        for ((location, time), diff) in updates {
            self.update(location, time, diff);
        }
    }

    /// The frontier of timestamps that may still arrive at input `port` of `node`.
    pub fn frontier(&self, node: usize, port: usize) -> AntichainRef<'_, T> {
        self.implications[self.layout.index(Location::new_target(node, port))].frontier()
    }

    /// The frontier of outstanding pointstamps at `location` itself.
    pub fn pointstamps(&self, location: Location) -> AntichainRef<'_, T> {
        self.pointstamps[self.layout.index(location)].frontier()
    }

    /// True if no pointstamp is outstanding anywhere, and no count is transiently negative.
    pub fn is_quiescent(&mut self) -> bool {
        self.pointstamps.iter_mut().all(|counts| counts.is_quiescent())
    }

    /// True if no location of `nodes` holds work for `epoch` that may still iterate.
    ///
    /// A loop entered at `epoch` is complete when no timestamp nested one level deeper than
    /// `epoch` and derived from it remains outstanding, and nothing at or before `epoch` waits
    /// to enter.
    pub fn loop_complete(&mut self, nodes: &[usize], epoch: &T) -> bool {
        let layout = &self.layout;
        let depth = epoch.depth();
        nodes.iter().all(|node| {
            (layout.offsets[*node] .. layout.offsets[*node + 1]).all(|index| {
                self.pointstamps[index].updates().all(|(time, count)| {
                    *count <= 0 ||
                    !((time.depth() == depth + 1 && time.exit().less_equal(epoch)) ||
                      (time.depth() == depth && time.less_equal(epoch)))
                })
            })
        })
    }

    /// The number of locations tracked.
    pub fn locations(&self) -> usize { self.layout.len() }
}

#[cfg(test)]
mod tests {

    use crate::error::GraphError;
    use crate::progress::{Location, Pointstamp, PathSummary, Timestamp};
    use crate::progress::frontier::Antichain;
    use super::Builder;

    type Summary = <Pointstamp as Timestamp>::Summary;

    fn identity() -> Vec<Vec<Antichain<Summary>>> {
        vec![vec![Antichain::from_elem(Summary::default())]]
    }

    /// input(0) -> ingress(1) -> body(2) -> feedback(3) -> body; body -> egress(4) -> sink(5)
    fn looped() -> Builder<Pointstamp> {
        let mut builder = Builder::new();
        builder.add_node(0, 0, 1, vec![]);
        builder.add_node(1, 1, 1, vec![vec![Antichain::from_elem(Summary::ingress())]]);
        builder.add_node(2, 2, 1, vec![vec![Antichain::from_elem(Summary::default())]; 2]);
        builder.add_node(3, 1, 1, vec![vec![Antichain::from_elem(Summary::feedback(1))]]);
        builder.add_node(4, 1, 1, vec![vec![Antichain::from_elem(Summary::egress())]]);
        builder.add_node(5, 1, 0, vec![vec![]]);
        builder.add_edge(Location::new_source(0, 0), Location::new_target(1, 0));
        builder.add_edge(Location::new_source(1, 0), Location::new_target(2, 0));
        builder.add_edge(Location::new_source(2, 0), Location::new_target(3, 0));
        builder.add_edge(Location::new_source(3, 0), Location::new_target(2, 1));
        builder.add_edge(Location::new_source(2, 0), Location::new_target(4, 0));
        builder.add_edge(Location::new_source(4, 0), Location::new_target(5, 0));
        builder
    }

    #[test]
    fn input_capability_holds_everything() {
        let mut tracker = looped().build().unwrap();
        tracker.update(Location::new_source(0, 0), Pointstamp::new(0), 1);
        assert!(tracker.frontier(2, 0).less_equal(&Pointstamp::with_iterations(0, &[0])));
        assert!(tracker.frontier(5, 0).less_equal(&Pointstamp::new(0)));
        tracker.update(Location::new_source(0, 0), Pointstamp::new(0), -1);
        assert!(tracker.frontier(5, 0).is_empty());
        assert!(tracker.is_quiescent());
    }

    #[test]
    fn loop_work_holds_later_iterations_only() {
        let mut tracker = looped().build().unwrap();
        let inner = Pointstamp::with_iterations(0, &[2]);
        tracker.update(Location::new_target(3, 0), inner.clone(), 1);
        // feedback advances the iteration before the body sees it again.
        assert!(!tracker.frontier(2, 1).less_equal(&inner));
        assert!(tracker.frontier(2, 1).less_equal(&Pointstamp::with_iterations(0, &[3])));
        // beyond the egress the loop counter is gone.
        assert!(tracker.frontier(5, 0).less_equal(&Pointstamp::new(0)));
        assert!(!tracker.loop_complete(&[1, 2, 3, 4], &Pointstamp::new(0)));
        assert!(!tracker.loop_complete(&[1, 2, 3, 4], &Pointstamp::new(1)));
        tracker.update(Location::new_target(3, 0), inner, -1);
        assert!(tracker.loop_complete(&[1, 2, 3, 4], &Pointstamp::new(0)));
    }

    #[test]
    fn cycles_must_advance() {
        let mut builder = Builder::<Pointstamp>::new();
        builder.add_node(0, 1, 1, identity());
        builder.add_node(1, 1, 1, identity());
        builder.add_edge(Location::new_source(0, 0), Location::new_target(1, 0));
        builder.add_edge(Location::new_source(1, 0), Location::new_target(0, 0));
        assert!(matches!(builder.build(), Err(GraphError::UnadvancingCycle(_))));
    }

    #[test]
    fn unknown_ports_are_rejected() {
        let mut builder = Builder::<Pointstamp>::new();
        builder.add_node(0, 0, 1, vec![]);
        builder.add_edge(Location::new_source(0, 0), Location::new_target(3, 0));
        assert!(matches!(builder.build(), Err(GraphError::UnknownPort(_))));
    }
}
