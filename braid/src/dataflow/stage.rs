//! Stages and their per-vertex endpoint registries.
//!
//! A stage is one logical operator, instantiated as `parallelism` vertices spread over the
//! workers: vertex `v` lives on worker `v % peers`. Each stage input and output keeps a dense
//! registry of the endpoints of the vertices this worker hosts, which cables consult when they
//! are wired.

use std::rc::Rc;

use crate::Data;
use crate::dataflow::channels::pushers::Output;
use crate::dataflow::endpoints::Receiver;
use crate::error::GraphError;
use crate::progress::Timestamp;
use crate::progress::frontier::Antichain;

/// The worker hosting vertex `vertex` of a stage.
#[inline]
pub fn worker_of(vertex: usize, peers: usize) -> usize {
    vertex % peers
}

/// A stage of a dataflow graph, as declared on this worker.
pub struct Stage<T: Timestamp> {
    /// Dataflow-unique identifier.
    pub id: usize,
    /// A helpful name.
    pub name: String,
    /// Number of vertices, across all workers.
    pub parallelism: usize,
    /// Number of input ports.
    pub inputs: usize,
    /// Number of output ports.
    pub outputs: usize,
    /// How timestamps advance from each input to each output, indexed `[input][output]`.
    pub summary: Vec<Vec<Antichain<T::Summary>>>,
    /// Set once the stage's vertices exist.
    pub built: bool,
}

impl<T: Timestamp> Stage<T> {
    /// A declared stage, not yet built.
    pub(crate) fn declare(id: usize, name: &str, parallelism: usize) -> Self {
        Stage {
            id,
            name: name.to_owned(),
            parallelism,
            inputs: 0,
            outputs: 0,
            summary: Vec::new(),
            built: false,
        }
    }

    /// The vertices of the stage hosted by `worker`.
    pub fn local_vertices(&self, worker: usize, peers: usize) -> Vec<usize> {
        (0 .. self.parallelism).filter(|vertex| worker_of(*vertex, peers) == worker).collect()
    }
}

/// The input endpoints of one stage input, indexed by vertex.
pub struct StageInput<T: Timestamp, D: Data> {
    stage: usize,
    port: usize,
    endpoints: Vec<Option<Rc<Receiver<T, D>>>>,
}

impl<T: Timestamp, D: Data> StageInput<T, D> {
    /// An empty registry for input `port` of stage `stage`.
    pub fn new(stage: usize, port: usize) -> Self {
        StageInput { stage, port, endpoints: Vec::new() }
    }

    /// The stage the input belongs to.
    pub fn stage(&self) -> usize { self.stage }
    /// The input port.
    pub fn port(&self) -> usize { self.port }

    /// Registers the endpoint for `vertex`.
    pub fn register(&mut self, vertex: usize, endpoint: Rc<Receiver<T, D>>) -> Result<(), GraphError> {
        if self.endpoints.len() <= vertex {
            self.endpoints.resize_with(vertex + 1, || None);
        }
        if self.endpoints[vertex].is_some() {
            return Err(GraphError::DoubleRegistration { stage: self.stage, vertex, kind: "input" });
        }
        self.endpoints[vertex] = Some(endpoint);
        Ok(())
    }

    /// The endpoint registered for `vertex`.
    pub fn get_pin(&self, vertex: usize) -> Result<&Rc<Receiver<T, D>>, GraphError> {
        self.endpoints
            .get(vertex)
            .and_then(|endpoint| endpoint.as_ref())
            .ok_or(GraphError::MissingEndpoint { stage: self.stage, vertex, kind: "input" })
    }
}

/// The output endpoints of one stage output, indexed by vertex.
pub struct StageOutput<T: Timestamp, D: Data> {
    stage: usize,
    port: usize,
    endpoints: Vec<Option<Output<T, D>>>,
}

impl<T: Timestamp, D: Data> StageOutput<T, D> {
    /// An empty registry for output `port` of stage `stage`.
    pub fn new(stage: usize, port: usize) -> Self {
        StageOutput { stage, port, endpoints: Vec::new() }
    }

    /// The stage the output belongs to.
    pub fn stage(&self) -> usize { self.stage }
    /// The output port.
    pub fn port(&self) -> usize { self.port }

    /// Registers the endpoint for `vertex`.
    pub fn register(&mut self, vertex: usize, endpoint: Output<T, D>) -> Result<(), GraphError> {
        if self.endpoints.len() <= vertex {
            self.endpoints.resize_with(vertex + 1, || None);
        }
        if self.endpoints[vertex].is_some() {
            return Err(GraphError::DoubleRegistration { stage: self.stage, vertex, kind: "output" });
        }
        self.endpoints[vertex] = Some(endpoint);
        Ok(())
    }

    /// The endpoint registered for `vertex`.
    pub fn get_pin(&self, vertex: usize) -> Result<&Output<T, D>, GraphError> {
        self.endpoints
            .get(vertex)
            .and_then(|endpoint| endpoint.as_ref())
            .ok_or(GraphError::MissingEndpoint { stage: self.stage, vertex, kind: "output" })
    }
}

#[cfg(test)]
mod tests {

    use crate::dataflow::channels::pushers::Output;
    use crate::error::GraphError;
    use crate::progress::Pointstamp;
    use super::{worker_of, Stage, StageOutput};

    #[test]
    fn registries_reject_double_and_missing_endpoints() {
        let mut registry = StageOutput::<Pointstamp, u64>::new(3, 0);
        registry.register(2, Output::new()).unwrap();
        assert!(registry.get_pin(2).is_ok());
        assert!(matches!(registry.register(2, Output::new()), Err(GraphError::DoubleRegistration { stage: 3, vertex: 2, .. })));
        assert!(matches!(registry.get_pin(0), Err(GraphError::MissingEndpoint { stage: 3, vertex: 0, kind: "output" })));
        assert!(matches!(registry.get_pin(7), Err(GraphError::MissingEndpoint { vertex: 7, .. })));
    }

    #[test]
    fn vertices_are_placed_round_robin() {
        assert_eq!((0 .. 5).map(|v| worker_of(v, 2)).collect::<Vec<_>>(), vec![0, 1, 0, 1, 0]);
        let stage = Stage::<Pointstamp>::declare(0, "Placed", 5);
        assert_eq!(stage.local_vertices(0, 2), vec![0, 2, 4]);
        assert_eq!(stage.local_vertices(1, 2), vec![1, 3]);
    }
}
