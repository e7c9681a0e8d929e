//! Loops: stages that enter, leave, and feed back around an iterative subgraph.
//!
//! Records entering a loop gain an iteration counter, starting at zero; records leaving it lose
//! the counter again. A feedback stage advances the counter by one on each trip around, so that
//! every cycle strictly advances timestamps.

use std::cell::Cell;
use std::io::{Read, Write};

use crate::Data;
use crate::checkpoint::Checkpointable;
use crate::dataflow::channels::Pact;
use crate::dataflow::graph::{Graph, InputPort, Stream};
use crate::error::{Error, GraphError};
use crate::progress::{PathSummary, Timestamp};

/// Create loop contexts.
pub trait Loops<T: Timestamp> {
    /// Starts a loop, whose stages are those declared until the loop's last `exit`.
    fn new_loop(&self) -> LoopContext<T>;
}

impl<T: Timestamp> Loops<T> for Graph<T> {
    fn new_loop(&self) -> LoopContext<T> {
        LoopContext {
            graph: self.clone(),
            first: self.stages(),
            last: Cell::new(None),
        }
    }
}

/// The stages of one loop.
pub struct LoopContext<T: Timestamp> {
    graph: Graph<T>,
    first: usize,
    last: Cell<Option<usize>>,
}

impl<T: Timestamp> LoopContext<T> {

    fn extend_to(&self, stage: usize) {
        if self.last.get().is_none_or(|last| last < stage) {
            self.last.set(Some(stage));
        }
    }

    /// Brings `stream` into the loop, at iteration zero.
    pub fn enter<D: Data>(&self, stream: &Stream<T, D>) -> Result<Stream<T, D>, Error> {
        let mut stage = self.graph.stage("Ingress")
            .parallelism(stream.parallelism())
            .summary(<T::Summary as PathSummary<T>>::ingress());
        let input = stage.new_input(stream, Pact::Pipeline)?;
        let (port, entered) = stage.new_output::<D>();
        self.extend_to(stage.id());
        stage.build(|vertex| {
            let output = vertex.output(&port)?;
            vertex.on_receive(&input, move |message| {
                output.session(&message.time.enter()).give_vec(&mut message.data);
            })?;
            Ok(())
        })?;
        Ok(entered)
    }

    /// Takes `stream` out of the loop, dropping its iteration counter.
    pub fn exit<D: Data>(&self, stream: &Stream<T, D>) -> Result<Stream<T, D>, Error> {
        let mut stage = self.graph.stage("Egress")
            .parallelism(stream.parallelism())
            .summary(<T::Summary as PathSummary<T>>::egress());
        let input = stage.new_input(stream, Pact::Pipeline)?;
        let (port, exited) = stage.new_output::<D>();
        self.extend_to(stage.id());
        stage.build(|vertex| {
            let output = vertex.output(&port)?;
            vertex.on_receive(&input, move |message| {
                output.session(&message.time.exit()).give_vec(&mut message.data);
            })?;
            Ok(())
        })?;
        Ok(exited)
    }

    /// Creates a stream fed back around the loop, and the handle to connect its source later.
    ///
    /// Records passing through have their iteration advanced by one; records whose iteration
    /// would reach `max_iterations` are dropped. The handle must be connected before the
    /// dataflow activates.
    pub fn feedback<D: Data>(&self, max_iterations: u64) -> Result<(FeedbackHandle<T, D>, Stream<T, D>), Error> {
        let mut stage = self.graph.stage("Feedback").summary(<T::Summary as PathSummary<T>>::feedback(1));
        let input = stage.declare_input::<D>();
        let (port, stream) = stage.new_output::<D>();
        self.extend_to(stage.id());
        stage.build(|vertex| {
            let output = vertex.output(&port)?;
            vertex.on_receive(&input, move |message| {
                if let Some(next) = message.time.advance(1) {
                    if next.innermost() < max_iterations {
                        output.session(&next).give_vec(&mut message.data);
                    }
                }
            })?;
            Ok(())
        })?;
        self.graph.require_connected(&input);
        Ok((FeedbackHandle { graph: self.graph.clone(), input }, stream))
    }

    /// The stages of the loop declared so far.
    pub fn stages(&self) -> std::ops::Range<usize> {
        self.first .. self.last.get().map(|last| last + 1).unwrap_or(self.first)
    }

    /// True once no record of `epoch` remains outstanding within the loop's stages.
    ///
    /// Records that have yet to reach the loop's ingress are not counted. Before the dataflow
    /// activates, nothing has entered the loop and it is trivially complete.
    pub fn complete(&self, epoch: &T) -> bool {
        let stages = self.stages().collect::<Vec<_>>();
        let context = self.graph.context();
        let mut tracker = context.tracker.borrow_mut();
        tracker.as_mut().map_or(true, |tracker| tracker.loop_complete(&stages, epoch))
    }
}

impl<T: Timestamp> Checkpointable for LoopContext<T> {
    fn checkpoint(&self, _writer: &mut dyn Write) -> Result<(), Error> {
        Err(Error::NotSupported("checkpoint of a loop boundary"))
    }
    fn restore(&self, _reader: &mut dyn Read) -> Result<(), Error> {
        Err(Error::NotSupported("restore of a loop boundary"))
    }
    fn stateful(&self) -> bool { false }
}

/// Connects the source of a feedback stream.
pub struct FeedbackHandle<T: Timestamp, D: Data> {
    graph: Graph<T>,
    input: InputPort<T, D>,
}

impl<T: Timestamp, D: Data> FeedbackHandle<T, D> {
    /// Feeds `stream` back to the start of the loop.
    pub fn connect_loop(self, stream: &Stream<T, D>) -> Result<(), GraphError> {
        self.graph.connect(stream, &self.input, Pact::Pipeline)
    }
}
