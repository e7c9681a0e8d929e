//! Create new `Stream`s connected to external inputs.

use std::io::{Read, Write};

use crate::Data;
use crate::checkpoint::Checkpointable;
use crate::dataflow::channels::pushers::OutputHandle;
use crate::dataflow::graph::{Graph, Stream};
use crate::dataflow::vertex::Vertex;
use crate::error::{Error, GraphError};
use crate::progress::{Location, Timestamp};

/// Create a new `Stream` and `InputHandle` through which to supply input.
pub trait Input<T: Timestamp> {
    /// Create a new `Stream` and `InputHandle` through which to supply input.
    ///
    /// The input stage has one vertex on each worker. The handle introduces records at its
    /// current time, and holds that time back at every downstream input until it advances or
    /// closes.
    fn new_input<D: Data>(&self) -> Result<(InputHandle<T, D>, Stream<T, D>), Error>;
}

impl<T: Timestamp> Input<T> for Graph<T> {
    fn new_input<D: Data>(&self) -> Result<(InputHandle<T, D>, Stream<T, D>), Error> {

        let mut stage = self.stage("Input").parallelism(self.peers()).source();
        let (port, stream) = stage.new_output::<D>();
        let id = stage.id();

        let mut local = None;
        stage.build(|vertex| {
            local = Some((vertex.handle(), vertex.output(&port)?));
            Ok(())
        })?;

        let (vertex, output) = local.ok_or(GraphError::EmptyStage(id))?;
        Ok((InputHandle::new(vertex, output), stream))
    }
}

/// A handle to an input stream, used to introduce records and advance its time.
///
/// Dropping the handle closes the input.
pub struct InputHandle<T: Timestamp, D: Data> {
    vertex: Vertex<T>,
    output: OutputHandle<T, D>,
    time: T,
    closed: bool,
}

impl<T: Timestamp, D: Data> InputHandle<T, D> {

    fn new(vertex: Vertex<T>, output: OutputHandle<T, D>) -> Self {
        InputHandle {
            vertex,
            output,
            time: T::minimum(),
            closed: false,
        }
    }

    fn location(&self) -> Location {
        Location::new_source(self.vertex.stage(), 0)
    }

    /// Sends one record at the current time.
    ///
    /// # Panics
    ///
    /// Panics if the input is closed.
    pub fn send(&mut self, record: D) {
        assert!(!self.closed, "send on a closed input");
        self.output.session(&self.time).give(record);
    }

    /// Sends a batch of records at the current time, leaving `batch` empty.
    ///
    /// # Panics
    ///
    /// Panics if the input is closed.
    pub fn send_batch(&mut self, batch: &mut Vec<D>) {
        assert!(!self.closed, "send on a closed input");
        self.output.session(&self.time).give_vec(batch);
    }

    /// Advances the input to `time`, promising to send nothing earlier.
    ///
    /// Buffered records are sent first, at the old time.
    ///
    /// # Panics
    ///
    /// Panics if the input is closed, or if `time` is not at least the current time.
    pub fn advance_to(&mut self, time: T) {
        assert!(!self.closed, "advance_to on a closed input");
        assert!(self.time.less_equal(&time), "input advanced from {:?} to {:?}", self.time, time);
        if time != self.time {
            self.flush();
            let context = self.vertex.context();
            context.update(self.location(), time.clone(), 1);
            context.update(self.location(), self.time.clone(), -1);
            self.time = time;
        }
    }

    /// Sends buffered records.
    pub fn flush(&mut self) {
        self.vertex.flush();
    }

    /// Closes the input, promising to send nothing further.
    pub fn close(&mut self) {
        if !self.closed {
            self.flush();
            self.vertex.context().update(self.location(), self.time.clone(), -1);
            self.closed = true;
        }
    }

    /// The current time.
    pub fn time(&self) -> &T { &self.time }

    /// True once the input is closed.
    pub fn is_closed(&self) -> bool { self.closed }
}

impl<T: Timestamp, D: Data> Drop for InputHandle<T, D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Timestamp, D: Data> Checkpointable for InputHandle<T, D> {
    fn checkpoint(&self, _writer: &mut dyn Write) -> Result<(), Error> {
        Err(Error::NotSupported("checkpoint of an input source"))
    }
    fn restore(&self, _reader: &mut dyn Read) -> Result<(), Error> {
        Err(Error::NotSupported("restore of an input source"))
    }
    fn stateful(&self) -> bool { false }
}
