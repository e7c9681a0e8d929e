//! Vertices: the units of a stage placed on one worker.
//!
//! A vertex owns the callbacks registered for it, the output buffers it sends through, and an
//! entrancy counter. The counter bounds re-entrant invocation: a delivery may call into the vertex
//! directly only while the counter is non-negative, and each direct invocation lowers it by one
//! for its duration. Deliveries that find the counter negative are queued and run once the
//! invocation in progress has returned.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::checkpoint::LogSink;
use crate::dataflow::channels::SerializedMessage;
use crate::dataflow::context::Context;
use crate::error::{Error, FramingError, GraphError};
use crate::logging::{Invocation, ScheduleEvent};
use crate::progress::{Location, Timestamp};
use crate::progress::reachability::Tracker;

/// Output buffers a vertex flushes after each invocation.
pub(crate) trait FlushOutput {
    /// Sends any buffered records on to their receivers.
    fn flush_output(&self);
    /// Drops all receivers, after a final flush.
    fn shutdown(&self);
}

/// Input endpoints a vertex can replay logged messages into.
pub(crate) trait ReplayInput {
    /// The channel feeding the endpoint, once wired.
    fn channel(&self) -> Option<usize>;
    /// Presents a logged message to the endpoint's callback, without logging or progress updates.
    fn replay(&self, message: SerializedMessage) -> Result<(), FramingError>;
    /// Drops the callback and any queued deliveries.
    fn shutdown(&self);
}

pub(crate) struct VertexCore<T: Timestamp> {
    stage: usize,
    index: usize,
    inputs: usize,
    outputs: usize,
    entrancy: Cell<i32>,
    /// Set while replaying a log; outputs are discarded rather than sent.
    muted: Rc<Cell<bool>>,
    buffers: RefCell<Vec<Rc<dyn FlushOutput>>>,
    endpoints: RefCell<Vec<Weak<dyn ReplayInput>>>,
    /// Requested notifications, each holding a capability at every output.
    notifications: RefCell<Vec<T>>,
    on_notify: RefCell<Option<Box<dyn FnMut(&T)>>>,
    log: RefCell<Option<LogSink>>,
    context: Rc<Context<T>>,
}

/// A handle to a vertex hosted by this worker.
pub struct Vertex<T: Timestamp> {
    core: Rc<VertexCore<T>>,
}

impl<T: Timestamp> Clone for Vertex<T> {
    fn clone(&self) -> Self {
        Vertex { core: Rc::clone(&self.core) }
    }
}

impl<T: Timestamp> Vertex<T> {

    pub(crate) fn new(stage: usize, index: usize, inputs: usize, outputs: usize, context: Rc<Context<T>>) -> Self {
        let entrancy = context.config.default_entrancy;
        assert!(entrancy >= -1, "default entrancy {} is below -1", entrancy);
        Vertex {
            core: Rc::new(VertexCore {
                stage,
                index,
                inputs,
                outputs,
                entrancy: Cell::new(entrancy),
                muted: Rc::new(Cell::new(false)),
                buffers: RefCell::new(Vec::new()),
                endpoints: RefCell::new(Vec::new()),
                notifications: RefCell::new(Vec::new()),
                on_notify: RefCell::new(None),
                log: RefCell::new(None),
                context,
            })
        }
    }

    /// The stage the vertex belongs to.
    #[inline]
    pub fn stage(&self) -> usize { self.core.stage }
    /// The vertex's index within its stage.
    #[inline]
    pub fn index(&self) -> usize { self.core.index }
    /// The worker hosting the vertex.
    #[inline]
    pub fn worker(&self) -> usize { self.core.context.worker }

    /// The entrancy counter: the number of further nested direct invocations the vertex accepts.
    #[inline]
    pub fn available_entrancy(&self) -> i32 { self.core.entrancy.get() }

    /// Sets the entrancy counter.
    ///
    /// A value of `-1` makes every delivery queue until the counter is raised again.
    ///
    /// # Panics
    ///
    /// Panics if `entrancy` is below `-1`.
    pub fn set_available_entrancy(&self, entrancy: i32) {
        assert!(entrancy >= -1, "entrancy of stage {} vertex {} set to {}", self.core.stage, self.core.index, entrancy);
        self.core.entrancy.set(entrancy);
    }

    /// Requests a call to the vertex's `on_notify` callback once no input can receive `time`.
    ///
    /// Until delivered, the request holds back `time` at every output of the stage, so the
    /// vertex may still send records at `time` from its notification. Repeated requests for one
    /// time are delivered once.
    pub fn notify_at(&self, time: T) {
        let mut pending = self.core.notifications.borrow_mut();
        if !pending.contains(&time) {
            for port in 0 .. self.core.outputs {
                self.core.context.update(Location::new_source(self.core.stage, port), time.clone(), 1);
            }
            pending.push(time);
        }
    }

    /// Pushes every buffered output record of the vertex to its receivers.
    ///
    /// Receivers may be invoked directly, and may send back to this vertex; the vertex counts as
    /// entered while its outputs flush.
    pub fn flush(&self) {
        let entrancy = self.available_entrancy();
        if entrancy >= 0 {
            self.set_available_entrancy(entrancy - 1);
        }
        let buffers = self.core.buffers.borrow().clone();
        for buffer in buffers.iter() {
            buffer.flush_output();
        }
        self.set_available_entrancy(entrancy);
    }

    /// Installs the sink logged inputs of this vertex append to.
    pub fn set_log_sink(&self, sink: LogSink) {
        *self.core.log.borrow_mut() = Some(sink);
    }

    /// True if the vertex has a log sink.
    pub fn has_log_sink(&self) -> bool { self.core.log.borrow().is_some() }

    /// Ensures a log sink is installed, opening one under the configured log directory.
    pub(crate) fn ensure_log_sink(&self) -> Result<(), Error> {
        if self.has_log_sink() {
            return Ok(());
        }
        match &self.core.context.config.log_directory {
            Some(directory) => {
                let sink = LogSink::create(LogSink::path_for(directory, self.core.stage, self.core.index))?;
                self.set_log_sink(sink);
                Ok(())
            },
            None => Err(Error::NotSupported("input logging requires a log sink or a log directory")),
        }
    }

    /// Appends frames to the vertex's log, and flushes the log before returning.
    ///
    /// # Panics
    ///
    /// Panics if the log cannot be written; a vertex cannot continue without recording its inputs.
    pub(crate) fn append_log(&self, frames: &[SerializedMessage]) {
        if let Some(sink) = self.core.log.borrow_mut().as_mut() {
            let result = frames.iter().try_for_each(|frame| sink.append(frame)).and_then(|()| sink.flush());
            if let Err(error) = result {
                panic!("stage {} vertex {} failed to append to its log: {}", self.core.stage, self.core.index, error);
            }
        }
    }

    /// Feeds logged messages back to the inputs they were received on.
    ///
    /// Each entry goes to the input whose channel matches the entry's header, through the same
    /// path serialized deliveries take, but without logging it again and without recording
    /// progress. Records the vertex sends while replaying are discarded. Returns the number of
    /// entries replayed.
    pub fn replay<I>(&self, entries: I) -> Result<usize, Error>
    where
        I: IntoIterator<Item=Result<SerializedMessage, FramingError>>,
    {
        self.core.muted.set(true);
        let result = self.replay_inner(entries);
        self.core.muted.set(false);
        result
    }

    fn replay_inner<I>(&self, entries: I) -> Result<usize, Error>
    where
        I: IntoIterator<Item=Result<SerializedMessage, FramingError>>,
    {
        let mut replayed = 0;
        for entry in entries {
            let message = entry?;
            let channel = message.header().channel;
            let endpoint = self.core.endpoints
                .borrow()
                .iter()
                .filter_map(|endpoint| endpoint.upgrade())
                .find(|endpoint| endpoint.channel() == Some(channel))
                .ok_or(GraphError::MissingEndpoint { stage: self.core.stage, vertex: self.core.index, kind: "input" })?;
            endpoint.replay(message)?;
            replayed += 1;
        }
        Ok(replayed)
    }

    /// Shared flag, set while replaying a log.
    pub(crate) fn muted(&self) -> Rc<Cell<bool>> { Rc::clone(&self.core.muted) }

    pub(crate) fn context(&self) -> &Rc<Context<T>> { &self.core.context }

    pub(crate) fn add_output(&self, buffer: Rc<dyn FlushOutput>) {
        self.core.buffers.borrow_mut().push(buffer);
    }

    pub(crate) fn add_endpoint(&self, endpoint: Weak<dyn ReplayInput>) {
        self.core.endpoints.borrow_mut().push(endpoint);
    }

    pub(crate) fn set_on_notify(&self, callback: Box<dyn FnMut(&T)>) {
        *self.core.on_notify.borrow_mut() = Some(callback);
    }

    /// True if notifications remain undelivered.
    pub(crate) fn has_notifications(&self) -> bool {
        !self.core.notifications.borrow().is_empty()
    }

    /// Requested times no input of the stage can still receive, in ascending order.
    pub(crate) fn ready_notifications(&self, tracker: &Tracker<T>) -> Vec<T> {
        let mut ready = self.core.notifications
            .borrow()
            .iter()
            .filter(|time| (0 .. self.core.inputs).all(|port| !tracker.frontier(self.core.stage, port).less_equal(time)))
            .cloned()
            .collect::<Vec<_>>();
        ready.sort();
        ready
    }

    /// Delivers the notification for `time`, and releases the capabilities it held.
    ///
    /// Returns false, leaving the request in place, if the vertex cannot be entered.
    pub(crate) fn deliver_notification(&self, time: &T) -> bool {
        let entrancy = self.available_entrancy();
        if entrancy < 0 || self.core.on_notify.try_borrow_mut().is_err() {
            return false;
        }
        {
            let mut pending = self.core.notifications.borrow_mut();
            match pending.iter().position(|t| t == time) {
                Some(position) => { pending.swap_remove(position); },
                None => return true,
            }
        }

        self.set_available_entrancy(entrancy - 1);
        self.core.context.log(ScheduleEvent::start(self.core.stage, self.core.index, Invocation::Notify));
        if let Some(callback) = self.core.on_notify.borrow_mut().as_mut() {
            callback(time);
        }
        self.core.context.log(ScheduleEvent::stop(self.core.stage, self.core.index, Invocation::Notify));
        self.flush();
        self.set_available_entrancy(entrancy);

        for port in 0 .. self.core.outputs {
            self.core.context.update(Location::new_source(self.core.stage, port), time.clone(), -1);
        }
        true
    }

    /// Flushes outputs and the log, and drops callbacks and receivers.
    ///
    /// Callbacks may hold handles to other vertices' endpoints; dropping them breaks the reference
    /// cycles loops create.
    pub(crate) fn shutdown(&self) {
        self.flush();
        if let Some(sink) = self.core.log.borrow_mut().as_mut() {
            if let Err(error) = sink.flush() {
                panic!("stage {} vertex {} failed to flush its log: {}", self.core.stage, self.core.index, error);
            }
        }
        *self.core.on_notify.borrow_mut() = None;
        for endpoint in self.core.endpoints.borrow_mut().drain(..) {
            if let Some(endpoint) = endpoint.upgrade() {
                endpoint.shutdown();
            }
        }
        for buffer in self.core.buffers.borrow_mut().drain(..) {
            buffer.shutdown();
        }
    }
}
