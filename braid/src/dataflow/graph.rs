//! Graph construction: stages, their ports, and the streams connecting them.
//!
//! A [`Graph`] collects the stages of one dataflow as a worker declares them. Each stage is
//! described by a [`StageBuilder`], whose `build` method instantiates the vertices this worker
//! hosts and runs per-vertex logic that registers callbacks and requests output handles.
//! Connections between a [`Stream`] and an [`InputPort`] are recorded as cables, and wired when
//! the worker activates the dataflow.
//!
//! Every worker must declare the same stages and connections in the same order; identifiers of
//! stages and channels are assigned in declaration order.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use braid_communication::Allocator;
use braid_communication::logging::CommunicationLogger;

use crate::Data;
use crate::dataflow::cable::{Activation, Cable};
use crate::dataflow::channels::{Message, Pact, Postmark};
use crate::dataflow::channels::pushers::{Output, OutputHandle};
use crate::dataflow::context::Context;
use crate::dataflow::endpoints::{Callback, Receiver};
use crate::dataflow::runtime::Dataflow;
use crate::dataflow::stage::{Stage, StageInput, StageOutput};
use crate::dataflow::vertex::Vertex;
use crate::error::{Error, GraphError};
use crate::logging::StageEvent;
use crate::progress::{Location, Timestamp};
use crate::progress::broadcast::{Progcaster, ProgressMsg};
use crate::progress::frontier::Antichain;
use crate::progress::reachability::Builder;

type Wiring<T> = Box<dyn FnOnce(&mut Activation<'_, T>) -> Result<(), GraphError>>;

struct GraphState<T: Timestamp> {
    context: Rc<Context<T>>,
    identifiers: Rc<Cell<usize>>,
    progress_channel: usize,
    stages: Vec<Stage<T>>,
    edges: Vec<(Location, Location)>,
    cables: Vec<Wiring<T>>,
    vertices: Vec<Vertex<T>>,
    /// Stages whose outputs hold a capability at the minimal time from the start.
    sources: Vec<usize>,
    /// Inputs that must be connected before activation, as `(stage, connected)`.
    required: Vec<(usize, Rc<Cell<bool>>)>,
}

/// A dataflow graph under construction.
///
/// Clones refer to the same graph.
pub struct Graph<T: Timestamp> {
    state: Rc<RefCell<GraphState<T>>>,
}

impl<T: Timestamp> Clone for Graph<T> {
    fn clone(&self) -> Self {
        Graph { state: Rc::clone(&self.state) }
    }
}

impl<T: Timestamp> Graph<T> {

    pub(crate) fn new(context: Rc<Context<T>>, identifiers: Rc<Cell<usize>>) -> Self {
        let progress_channel = identifiers.get();
        identifiers.set(progress_channel + 1);
        Graph {
            state: Rc::new(RefCell::new(GraphState {
                context,
                identifiers,
                progress_channel,
                stages: Vec::new(),
                edges: Vec::new(),
                cables: Vec::new(),
                vertices: Vec::new(),
                sources: Vec::new(),
                required: Vec::new(),
            }))
        }
    }

    /// The worker-unique identifier of the dataflow.
    pub fn index(&self) -> usize { self.state.borrow().context.dataflow }
    /// The index of this worker.
    pub fn worker(&self) -> usize { self.state.borrow().context.worker }
    /// The number of workers.
    pub fn peers(&self) -> usize { self.state.borrow().context.peers }

    pub(crate) fn context(&self) -> Rc<Context<T>> {
        Rc::clone(&self.state.borrow().context)
    }

    fn new_identifier(&self) -> usize {
        let state = self.state.borrow();
        let identifier = state.identifiers.get();
        state.identifiers.set(identifier + 1);
        identifier
    }

    fn same_graph(&self, other: &Graph<T>) -> Result<(), GraphError> {
        if Rc::ptr_eq(&self.state, &other.state) {
            Ok(())
        }
        else {
            Err(GraphError::ForeignStream { expected: self.index(), found: other.index() })
        }
    }

    /// The number of vertices of stage `stage`.
    pub fn parallelism(&self, stage: usize) -> usize {
        self.state.borrow().stages.get(stage).map(|stage| stage.parallelism).unwrap_or(0)
    }

    /// The number of stages declared so far.
    pub fn stages(&self) -> usize { self.state.borrow().stages.len() }

    /// Declares a new stage, with one vertex per worker unless configured otherwise.
    pub fn stage(&self, name: &str) -> StageBuilder<T> {
        let peers = self.peers();
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.stages.len();
            state.stages.push(Stage::declare(id, name, peers));
            id
        };
        StageBuilder {
            graph: self.clone(),
            id,
            name: name.to_owned(),
            inputs: 0,
            outputs: Vec::new(),
            summary: None,
            source: false,
        }
    }

    /// Connects `stream` to the stage input `port`, routing records according to `pact`.
    ///
    /// An input may be connected to several streams; it receives the records of all of them.
    pub fn connect<D: Data>(&self, stream: &Stream<T, D>, port: &InputPort<T, D>, pact: Pact<D>) -> Result<(), GraphError> {
        self.same_graph(&stream.graph)?;
        self.same_graph(&port.graph)?;

        let channel = self.new_identifier();
        let source = Rc::clone(&stream.registry);
        let target = Rc::clone(&port.registry);
        let mut state = self.state.borrow_mut();
        state.edges.push((Location::new_source(stream.stage, stream.port), Location::new_target(port.stage, port.port)));
        state.cables.push(Box::new(move |activation| {
            Cable { channel, source, target, pact }.wire(activation)
        }));
        port.connected.set(true);
        Ok(())
    }

    /// Requires `port` to be connected before the dataflow activates.
    pub(crate) fn require_connected<D: Data>(&self, port: &InputPort<T, D>) {
        self.state.borrow_mut().required.push((port.stage, Rc::clone(&port.connected)));
    }

    /// Validates the graph, builds the progress tracker, and wires every cable.
    ///
    /// The tracker starts with a capability at the minimal time for each vertex of each source
    /// stage, on every worker, so that no worker sees progress before the sources have spoken.
    pub(crate) fn activate(self, allocator: &mut Allocator, logging: Option<CommunicationLogger>) -> Result<Dataflow<T>, Error> {

        let mut borrow = self.state.borrow_mut();
        let state = &mut *borrow;

        for stage in state.stages.iter() {
            if !stage.built {
                return Err(GraphError::EmptyStage(stage.id).into());
            }
        }
        for (stage, connected) in state.required.iter() {
            if !connected.get() {
                return Err(GraphError::UnconnectedFeedback(*stage).into());
            }
        }

        let mut builder = Builder::<T>::new();
        for stage in state.stages.iter() {
            builder.add_node(stage.id, stage.inputs, stage.outputs, stage.summary.clone());
        }
        for (source, target) in state.edges.iter() {
            builder.add_edge(*source, *target);
        }
        let mut tracker = builder.build()?;
        for source in state.sources.iter() {
            let stage = &state.stages[*source];
            for port in 0 .. stage.outputs {
                tracker.update(Location::new_source(stage.id, port), T::minimum(), stage.parallelism as i64);
            }
        }

        let mut activation = Activation {
            allocator,
            logging,
            context: &state.context,
            stages: &state.stages,
            dispatchers: Vec::new(),
        };
        for cable in std::mem::take(&mut state.cables) {
            cable(&mut activation)?;
        }

        let context = Rc::clone(&state.context);
        let (pushers, puller) = activation.allocate::<ProgressMsg<T>>(state.progress_channel);
        let progcaster = Progcaster::new(pushers, puller, context.worker, context.dataflow, state.progress_channel, context.logging.clone());
        let dispatchers = std::mem::take(&mut activation.dispatchers);

        *context.tracker.borrow_mut() = Some(tracker);
        let vertices = std::mem::take(&mut state.vertices);
        Ok(Dataflow::new(context, progcaster, dispatchers, vertices))
    }
}

/// Describes one stage: its ports, parallelism, and how its vertices are built.
pub struct StageBuilder<T: Timestamp> {
    graph: Graph<T>,
    id: usize,
    name: String,
    inputs: usize,
    /// Registers an output endpoint for a vertex, one closure per output port.
    outputs: Vec<Box<dyn Fn(&Vertex<T>) -> Result<(), GraphError>>>,
    summary: Option<T::Summary>,
    source: bool,
}

impl<T: Timestamp> StageBuilder<T> {

    /// The stage identifier.
    pub fn id(&self) -> usize { self.id }

    /// Sets the number of vertices of the stage.
    pub fn parallelism(self, parallelism: usize) -> Self {
        if let Some(stage) = self.graph.state.borrow_mut().stages.get_mut(self.id) {
            stage.parallelism = parallelism;
        }
        self
    }

    /// Sets how timestamps advance from every input to every output; the identity by default.
    pub fn summary(mut self, summary: T::Summary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Marks the stage as a source of records, holding a capability from the start.
    pub(crate) fn source(mut self) -> Self {
        self.source = true;
        self
    }

    /// Declares an input, to be connected with [`Graph::connect`].
    pub fn declare_input<D: Data>(&mut self) -> InputPort<T, D> {
        let port = self.inputs;
        self.inputs += 1;
        InputPort {
            graph: self.graph.clone(),
            stage: self.id,
            port,
            registry: Rc::new(RefCell::new(StageInput::new(self.id, port))),
            connected: Rc::new(Cell::new(false)),
        }
    }

    /// Declares an input connected to `stream`.
    pub fn new_input<D: Data>(&mut self, stream: &Stream<T, D>, pact: Pact<D>) -> Result<InputPort<T, D>, GraphError> {
        let port = self.declare_input();
        self.graph.connect(stream, &port, pact)?;
        Ok(port)
    }

    /// Declares an output, and returns the stream it produces.
    pub fn new_output<D: Data>(&mut self) -> (OutputPort<T, D>, Stream<T, D>) {
        let port = self.outputs.len();
        let registry = Rc::new(RefCell::new(StageOutput::new(self.id, port)));
        let populate = Rc::clone(&registry);
        self.outputs.push(Box::new(move |vertex| populate.borrow_mut().register(vertex.index(), Output::new())));
        let output = OutputPort { stage: self.id, port, registry: Rc::clone(&registry) };
        let stream = Stream { graph: self.graph.clone(), stage: self.id, port, registry };
        (output, stream)
    }

    /// Instantiates the vertices this worker hosts, calling `logic` once for each.
    ///
    /// The logic registers the vertex's callbacks and requests its output handles. Failing logic
    /// aborts graph construction.
    pub fn build<L>(self, mut logic: L) -> Result<(), Error>
    where
        L: FnMut(&mut VertexBuilder<T>) -> Result<(), Error>,
    {
        let outputs = self.outputs.len();
        let summary = self.summary.clone().unwrap_or_default();
        let (context, parallelism, local) = {
            let mut state = self.graph.state.borrow_mut();
            if self.source {
                state.sources.push(self.id);
            }
            let context = Rc::clone(&state.context);
            let stage = &mut state.stages[self.id];
            if stage.parallelism == 0 {
                return Err(GraphError::EmptyStage(self.id).into());
            }
            stage.inputs = self.inputs;
            stage.outputs = outputs;
            stage.summary = vec![vec![Antichain::from_elem(summary); outputs]; self.inputs];
            stage.built = true;
            let local = stage.local_vertices(context.worker, context.peers);
            (context, stage.parallelism, local)
        };

        for index in local.iter() {
            let vertex = Vertex::new(self.id, *index, self.inputs, outputs, Rc::clone(&context));
            for populate in self.outputs.iter() {
                populate(&vertex)?;
            }
            let mut builder = VertexBuilder { vertex: vertex.clone() };
            logic(&mut builder)?;
            self.graph.state.borrow_mut().vertices.push(vertex);
        }

        context.log(StageEvent {
            dataflow: context.dataflow,
            stage: self.id,
            name: self.name,
            parallelism,
            local_vertices: local,
        });
        Ok(())
    }
}

/// Registers the callbacks and output handles of one vertex.
pub struct VertexBuilder<T: Timestamp> {
    vertex: Vertex<T>,
}

impl<T: Timestamp> VertexBuilder<T> {

    /// The vertex's index within its stage.
    pub fn index(&self) -> usize { self.vertex.index() }

    /// A handle to the vertex, for use in its callbacks.
    pub fn handle(&self) -> Vertex<T> { self.vertex.clone() }

    /// A handle to send records on output `port`.
    ///
    /// Records sent through the handle are flushed whenever the vertex returns from a callback.
    pub fn output<D: Data>(&mut self, port: &OutputPort<T, D>) -> Result<OutputHandle<T, D>, GraphError> {
        if port.stage != self.vertex.stage() {
            return Err(GraphError::UnknownPort(Location::new_source(port.stage, port.port)));
        }
        let output = port.registry.borrow().get_pin(self.vertex.index())?.clone();
        let from = Postmark { worker: self.vertex.worker(), vertex: self.vertex.index() };
        let handle = OutputHandle::new(output, from, self.vertex.muted());
        self.vertex.add_output(Rc::new(handle.clone()));
        Ok(handle)
    }

    /// Registers a callback receiving each message on input `port`.
    pub fn on_receive<D, F>(&mut self, port: &InputPort<T, D>, callback: F) -> Result<Rc<Receiver<T, D>>, GraphError>
    where
        D: Data,
        F: FnMut(&mut Message<T, D>) + 'static,
    {
        self.register(port, Callback::Batch(Box::new(callback)))
    }

    /// Registers a callback receiving each record on input `port`, with its time.
    pub fn on_receive_records<D, F>(&mut self, port: &InputPort<T, D>, callback: F) -> Result<Rc<Receiver<T, D>>, GraphError>
    where
        D: Data,
        F: FnMut(D, &T) + 'static,
    {
        self.register(port, Callback::Record(Box::new(callback)))
    }

    /// Registers a callback receiving each message on input `port`, with the identity of its sender.
    pub fn on_receive_from<D, F>(&mut self, port: &InputPort<T, D>, callback: F) -> Result<Rc<Receiver<T, D>>, GraphError>
    where
        D: Data,
        F: FnMut(&mut Message<T, D>, Postmark) + 'static,
    {
        self.register(port, Callback::BatchFrom(Box::new(callback)))
    }

    /// Registers the callback for notifications requested with [`Vertex::notify_at`].
    pub fn on_notify<F: FnMut(&T) + 'static>(&mut self, callback: F) {
        self.vertex.set_on_notify(Box::new(callback));
    }

    fn register<D: Data>(&mut self, port: &InputPort<T, D>, callback: Callback<T, D>) -> Result<Rc<Receiver<T, D>>, GraphError> {
        if port.stage != self.vertex.stage() {
            return Err(GraphError::UnknownPort(Location::new_target(port.stage, port.port)));
        }
        let receiver = Receiver::new(self.vertex.clone(), port.port, callback);
        port.registry.borrow_mut().register(self.vertex.index(), Rc::clone(&receiver))?;
        Ok(receiver)
    }
}

/// An input port of a stage, carrying records of type `D`.
pub struct InputPort<T: Timestamp, D: Data> {
    graph: Graph<T>,
    stage: usize,
    port: usize,
    registry: Rc<RefCell<StageInput<T, D>>>,
    connected: Rc<Cell<bool>>,
}

impl<T: Timestamp, D: Data> InputPort<T, D> {
    /// The stage the port belongs to.
    pub fn stage(&self) -> usize { self.stage }
    /// The index of the port among the stage's inputs.
    pub fn port(&self) -> usize { self.port }
    /// True once some stream is connected to the port.
    pub fn connected(&self) -> bool { self.connected.get() }
}

/// An output port of a stage, carrying records of type `D`.
pub struct OutputPort<T: Timestamp, D: Data> {
    stage: usize,
    port: usize,
    registry: Rc<RefCell<StageOutput<T, D>>>,
}

impl<T: Timestamp, D: Data> OutputPort<T, D> {
    /// The stage the port belongs to.
    pub fn stage(&self) -> usize { self.stage }
    /// The index of the port among the stage's outputs.
    pub fn port(&self) -> usize { self.port }
}

/// The records produced at one stage output.
pub struct Stream<T: Timestamp, D: Data> {
    graph: Graph<T>,
    stage: usize,
    port: usize,
    registry: Rc<RefCell<StageOutput<T, D>>>,
}

impl<T: Timestamp, D: Data> Clone for Stream<T, D> {
    fn clone(&self) -> Self {
        Stream {
            graph: self.graph.clone(),
            stage: self.stage,
            port: self.port,
            registry: Rc::clone(&self.registry),
        }
    }
}

impl<T: Timestamp, D: Data> Stream<T, D> {
    /// The graph the stream belongs to.
    pub fn graph(&self) -> &Graph<T> { &self.graph }
    /// The producing stage.
    pub fn stage(&self) -> usize { self.stage }
    /// The producing output port.
    pub fn port(&self) -> usize { self.port }
    /// The number of vertices producing the stream.
    pub fn parallelism(&self) -> usize { self.graph.parallelism(self.stage) }
}

#[cfg(test)]
mod tests {

    use std::cell::Cell;
    use std::rc::Rc;

    use braid_bytes::pool::BufferPool;
    use braid_communication::Allocator;
    use braid_communication::allocator::Thread;

    use crate::dataflow::channels::Pact;
    use crate::dataflow::context::Context;
    use crate::error::{Error, GraphError};
    use crate::progress::{PathSummary, Pointstamp, PointstampSummary};
    use crate::worker::WorkerConfig;
    use super::Graph;

    fn new_graph(peers: usize) -> Graph<Pointstamp> {
        let context = Context::new(0, 0, peers, None, BufferPool::new(1024, 4), WorkerConfig::default());
        Graph::new(Rc::new(context), Rc::new(Cell::new(0)))
    }

    #[test]
    fn registering_twice_fails() {
        let graph = new_graph(1);
        let mut source = graph.stage("source");
        let (_, stream) = source.new_output::<u64>();
        source.build(|_| Ok(())).unwrap();

        let mut stage = graph.stage("twice");
        let input = stage.new_input(&stream, Pact::Pipeline).unwrap();
        let result = stage.build(|vertex| {
            vertex.on_receive(&input, |_| ())?;
            vertex.on_receive(&input, |_| ())?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::Graph(GraphError::DoubleRegistration { stage: 1, vertex: 0, kind: "input" }))));
    }

    #[test]
    fn missing_endpoint_fails_activation() {
        let graph = new_graph(1);
        let mut source = graph.stage("source");
        let (_, stream) = source.new_output::<u64>();
        source.build(|_| Ok(())).unwrap();

        let mut stage = graph.stage("forgetful");
        let _input = stage.new_input(&stream, Pact::Pipeline).unwrap();
        stage.build(|_| Ok(())).unwrap();

        let mut allocator = Allocator::Thread(Thread);
        let result = graph.activate(&mut allocator, None);
        assert!(matches!(result, Err(Error::Graph(GraphError::MissingEndpoint { stage: 1, vertex: 0, kind: "input" }))));
    }

    #[test]
    fn pipelines_require_equal_parallelism() {
        let graph = new_graph(1);
        let mut source = graph.stage("source").parallelism(2);
        let (_, stream) = source.new_output::<u64>();
        source.build(|_| Ok(())).unwrap();

        let mut stage = graph.stage("narrow");
        let input = stage.new_input(&stream, Pact::Pipeline).unwrap();
        stage.build(|vertex| { vertex.on_receive(&input, |_| ())?; Ok(()) }).unwrap();

        let mut allocator = Allocator::Thread(Thread);
        let result = graph.activate(&mut allocator, None);
        assert!(matches!(result, Err(Error::Graph(GraphError::ParallelismMismatch { source_parallelism: 2, target_parallelism: 1, .. }))));
    }

    #[test]
    fn cycles_must_advance() {
        let graph = new_graph(1);
        let mut stage = graph.stage("cycle");
        let input = stage.declare_input::<u64>();
        let (_, stream) = stage.new_output::<u64>();
        stage.build(|vertex| { vertex.on_receive(&input, |_| ())?; Ok(()) }).unwrap();
        graph.connect(&stream, &input, Pact::Pipeline).unwrap();

        let mut allocator = Allocator::Thread(Thread);
        assert!(matches!(graph.activate(&mut allocator, None), Err(Error::Graph(GraphError::UnadvancingCycle(_)))));

        let advancing = new_graph(1);
        let mut stage = advancing.stage("feedback").summary(PointstampSummary::feedback(1));
        let input = stage.declare_input::<u64>();
        let (_, stream) = stage.new_output::<u64>();
        stage.build(|vertex| { vertex.on_receive(&input, |_| ())?; Ok(()) }).unwrap();
        advancing.connect(&stream, &input, Pact::Pipeline).unwrap();
        assert!(advancing.activate(&mut allocator, None).is_ok());
    }

    #[test]
    fn unbuilt_and_empty_stages_fail() {
        let graph = new_graph(1);
        let stage = graph.stage("empty").parallelism(0);
        assert!(matches!(stage.build(|_| Ok(())), Err(Error::Graph(GraphError::EmptyStage(0)))));

        let unbuilt = new_graph(1);
        let _forgotten = unbuilt.stage("forgotten");
        let mut allocator = Allocator::Thread(Thread);
        assert!(matches!(unbuilt.activate(&mut allocator, None), Err(Error::Graph(GraphError::EmptyStage(0)))));
    }

    #[test]
    fn streams_of_other_graphs_are_rejected() {
        let first = new_graph(1);
        let second = new_graph(1);
        let mut source = first.stage("source");
        let (_, stream) = source.new_output::<u64>();
        source.build(|_| Ok(())).unwrap();

        let mut stage = second.stage("consumer");
        assert!(matches!(stage.new_input(&stream, Pact::Pipeline), Err(GraphError::ForeignStream { .. })));
    }
}
