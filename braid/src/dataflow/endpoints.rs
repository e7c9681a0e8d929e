//! Input and output endpoints of vertices.
//!
//! An input endpoint ([`Receiver`]) holds the callback a vertex registered for one of its stage's
//! inputs. Deliveries reach it either directly, from a send-fiber on the same worker, or from the
//! worker pulling a cable's channel. A delivery that finds the vertex unable to accept it, because
//! its entrancy counter is negative or the callback is already running, waits in the endpoint's
//! mailbox, and the worker runs the mailbox once the vertex can be entered again. Deliveries to
//! one endpoint are presented in the order they arrived.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::rc::{Rc, Weak};

use braid_communication::Push;

use crate::Data;
use crate::checkpoint::{Checkpointable, LogReader};
use crate::dataflow::channels::{decode, Encoder, Message, Postmark, SerializedMessage};
use crate::dataflow::context::Pending;
use crate::dataflow::vertex::{ReplayInput, Vertex};
use crate::error::{Error, FramingError};
use crate::logging::{Invocation, MessagesEvent, ScheduleEvent};
use crate::progress::{Location, Timestamp};

/// The number of emptied record buffers an input keeps for reuse.
const SPARE_BUFFERS: usize = 4;

/// The contract of a vertex input.
pub trait VertexInput<T: Timestamp, D: Data> {
    /// Presents a typed message to the vertex's callback.
    fn on_receive(&self, message: Message<T, D>);
    /// Decodes a serialized message and presents it to the vertex's callback.
    ///
    /// # Panics
    ///
    /// Panics if the message does not decode; a corrupt channel cannot be recovered.
    fn serialized_message_received(&self, message: SerializedMessage);
    /// Flushes the outputs of the vertex.
    fn flush(&self);
    /// The entrancy counter of the vertex.
    fn available_entrancy(&self) -> i32;
    /// Sets the entrancy counter of the vertex.
    fn set_available_entrancy(&self, entrancy: i32);
    /// True if received messages are appended to the vertex's log.
    fn logging_enabled(&self) -> bool;
    /// Enables or disables logging of received messages.
    ///
    /// Enabling fails if the vertex has no log sink and no log directory is configured.
    fn set_logging_enabled(&self, enabled: bool) -> Result<(), Error>;
}

/// The contract of a vertex output.
pub trait VertexOutput<T: Timestamp, D: Data> {
    /// Attaches a receiver, which will see every message sent afterwards.
    fn add_receiver(&self, receiver: Box<dyn Push<Message<T, D>>>);
    /// The number of receivers attached.
    fn receivers(&self) -> usize;
}

/// The callback an input endpoint invokes.
pub enum Callback<T, D> {
    /// Called once per record, with the message's time.
    Record(Box<dyn FnMut(D, &T)>),
    /// Called once per message.
    Batch(Box<dyn FnMut(&mut Message<T, D>)>),
    /// Called once per message, with the identity of the sender.
    BatchFrom(Box<dyn FnMut(&mut Message<T, D>, Postmark)>),
}

/// A message waiting in a mailbox.
enum Delivery<T, D> {
    Typed(Message<T, D>),
    Serialized(SerializedMessage),
}

/// The input endpoint of one vertex for one stage input.
pub struct Receiver<T: Timestamp, D: Data> {
    vertex: Vertex<T>,
    port: usize,
    channel: Cell<Option<usize>>,
    callback: RefCell<Option<Callback<T, D>>>,
    mailbox: RefCell<VecDeque<Delivery<T, D>>>,
    /// True while the endpoint is queued with the worker.
    scheduled: Cell<bool>,
    spare: RefCell<Vec<Vec<D>>>,
    logging: Cell<bool>,
    encoder: RefCell<Option<Encoder>>,
    this: Weak<Receiver<T, D>>,
}

impl<T: Timestamp, D: Data> Receiver<T, D> {

    /// Creates an endpoint for input `port` of `vertex`, and registers it with the vertex.
    pub(crate) fn new(vertex: Vertex<T>, port: usize, callback: Callback<T, D>) -> Rc<Self> {
        let receiver = Rc::new_cyclic(|this| Receiver {
            vertex: vertex.clone(),
            port,
            channel: Cell::new(None),
            callback: RefCell::new(Some(callback)),
            mailbox: RefCell::new(VecDeque::new()),
            scheduled: Cell::new(false),
            spare: RefCell::new(Vec::new()),
            logging: Cell::new(false),
            encoder: RefCell::new(None),
            this: this.clone(),
        });
        let erased: Rc<dyn ReplayInput> = receiver.clone();
        vertex.add_endpoint(Rc::downgrade(&erased));
        receiver
    }

    /// The vertex the endpoint belongs to.
    pub fn vertex(&self) -> &Vertex<T> { &self.vertex }

    /// The stage input the endpoint serves.
    pub fn port(&self) -> usize { self.port }

    /// The number of deliveries waiting in the mailbox.
    pub fn queued(&self) -> usize { self.mailbox.borrow().len() }

    pub(crate) fn set_channel(&self, channel: usize) {
        self.channel.set(Some(channel));
    }

    fn target(&self) -> Location {
        Location::new_target(self.vertex.stage(), self.port)
    }

    /// Delivers a typed message, invoking the vertex now if it can be entered.
    pub(crate) fn deliver_typed(&self, message: Message<T, D>) {
        self.deliver(Delivery::Typed(message));
    }

    /// Delivers a serialized message, invoking the vertex now if it can be entered.
    pub(crate) fn deliver_serialized(&self, message: SerializedMessage) {
        self.deliver(Delivery::Serialized(message));
    }

    fn blocked(&self) -> bool {
        self.vertex.available_entrancy() < 0 || self.callback.try_borrow_mut().is_err()
    }

    fn deliver(&self, delivery: Delivery<T, D>) {
        if self.scheduled.get() || self.blocked() {
            self.mailbox.borrow_mut().push_back(delivery);
            self.schedule();
        }
        else {
            self.invoke(delivery);
        }
    }

    fn schedule(&self) {
        if !self.scheduled.replace(true) {
            if let Some(this) = self.this.upgrade() {
                self.vertex.context().schedule(this);
            }
        }
    }

    /// Presents a delivery to the callback, with the vertex counted as entered.
    fn invoke(&self, delivery: Delivery<T, D>) {
        let entrancy = self.vertex.available_entrancy();
        self.vertex.set_available_entrancy(entrancy - 1);
        match delivery {
            Delivery::Typed(message) => self.on_receive(message),
            Delivery::Serialized(message) => self.serialized_message_received(message),
        }
        self.vertex.flush();
        self.vertex.set_available_entrancy(entrancy);
    }

    /// Runs the callback on `message`, and retires its records if `retire` is set.
    fn consume(&self, mut message: Message<T, D>, retire: bool) {
        let (stage, index) = (self.vertex.stage(), self.vertex.index());
        let context = self.vertex.context();
        let time = message.time.clone();
        let count = message.len();
        let from = message.from;

        context.log(MessagesEvent {
            is_send: false,
            channel: message.channel,
            source: (from.worker, from.vertex),
            target: (context.worker, index),
            seq_no: message.seq,
            length: count,
            serialized: false,
        });
        context.log(ScheduleEvent::start(stage, index, Invocation::Receive));
        match self.callback.borrow_mut().as_mut() {
            Some(Callback::Record(callback)) => {
                for record in message.data.drain(..) {
                    callback(record, &time);
                }
            },
            Some(Callback::Batch(callback)) => callback(&mut message),
            Some(Callback::BatchFrom(callback)) => callback(&mut message, from),
            None => { },
        }
        context.log(ScheduleEvent::stop(stage, index, Invocation::Receive));

        if retire {
            context.update(self.target(), time, -(count as i64));
        }
        let mut spare = self.spare.borrow_mut();
        if spare.len() < SPARE_BUFFERS {
            spare.push(message.release());
        }
    }

    fn decode(&self, message: &SerializedMessage) -> Result<Message<T, D>, FramingError> {
        let buffer = self.spare.borrow_mut().pop().unwrap_or_default();
        decode(message, buffer)
    }

    /// Encodes a typed message into frames, as logs and checkpoints store them.
    fn encode(&self, message: &Message<T, D>, frames: &mut Vec<SerializedMessage>) -> Result<(), FramingError> {
        let mut encoder = self.encoder.borrow_mut();
        let encoder = encoder.get_or_insert_with(|| Encoder::new(self.vertex.context().pool.clone()));
        encoder.encode(self.vertex.stage(), self.vertex.index(), message, frames)
    }

    /// Retires the records of a delivery that will never reach the callback.
    fn discard(&self, delivery: Delivery<T, D>) -> Result<(), FramingError> {
        let (time, count) = match delivery {
            Delivery::Typed(message) => (message.time, message.data.len()),
            Delivery::Serialized(message) => (bincode::deserialize(message.time_bytes())?, message.header().records),
        };
        self.vertex.context().update(self.target(), time, -(count as i64));
        Ok(())
    }
}

impl<T: Timestamp, D: Data> VertexInput<T, D> for Receiver<T, D> {
    fn on_receive(&self, message: Message<T, D>) {
        if self.logging.get() {
            let mut frames = Vec::new();
            if let Err(error) = self.encode(&message, &mut frames) {
                panic!("failed to encode a message for the log of stage {} vertex {}: {}", self.vertex.stage(), self.vertex.index(), error);
            }
            self.vertex.append_log(&frames);
        }
        self.consume(message, true);
    }

    fn serialized_message_received(&self, message: SerializedMessage) {
        if self.logging.get() {
            self.vertex.append_log(std::slice::from_ref(&message));
        }
        match self.decode(&message) {
            Ok(decoded) => self.consume(decoded, true),
            Err(error) => panic!("corrupt message on channel {} for stage {} vertex {}: {}", message.header().channel, self.vertex.stage(), self.vertex.index(), error),
        }
    }

    fn flush(&self) { self.vertex.flush(); }

    fn available_entrancy(&self) -> i32 { self.vertex.available_entrancy() }

    fn set_available_entrancy(&self, entrancy: i32) {
        self.vertex.set_available_entrancy(entrancy);
    }

    fn logging_enabled(&self) -> bool { self.logging.get() }

    fn set_logging_enabled(&self, enabled: bool) -> Result<(), Error> {
        if enabled {
            self.vertex.ensure_log_sink()?;
        }
        self.logging.set(enabled);
        Ok(())
    }
}

impl<T: Timestamp, D: Data> Pending for Receiver<T, D> {
    fn run_pending(&self) {
        loop {
            if self.blocked() {
                if let Some(this) = self.this.upgrade() {
                    self.vertex.context().defer(this);
                }
                return;
            }
            let next = self.mailbox.borrow_mut().pop_front();
            match next {
                Some(delivery) => self.invoke(delivery),
                None => {
                    self.scheduled.set(false);
                    return;
                },
            }
        }
    }
}

impl<T: Timestamp, D: Data> ReplayInput for Receiver<T, D> {
    fn channel(&self) -> Option<usize> { self.channel.get() }

    fn replay(&self, message: SerializedMessage) -> Result<(), FramingError> {
        let decoded = self.decode(&message)?;
        let entrancy = self.vertex.available_entrancy();
        self.vertex.set_available_entrancy(-1);
        self.consume(decoded, false);
        self.vertex.flush();
        self.vertex.set_available_entrancy(entrancy);
        Ok(())
    }

    fn shutdown(&self) {
        *self.callback.borrow_mut() = None;
        self.mailbox.borrow_mut().clear();
    }
}

impl<T: Timestamp, D: Data> Checkpointable for Receiver<T, D> {
    /// Writes the undelivered mailbox, in log format.
    fn checkpoint(&self, writer: &mut dyn Write) -> Result<(), Error> {
        let mut frames = Vec::new();
        for delivery in self.mailbox.borrow().iter() {
            match delivery {
                Delivery::Typed(message) => self.encode(message, &mut frames)?,
                Delivery::Serialized(message) => frames.push(message.clone()),
            }
        }
        for frame in frames.iter() {
            writer.write_all(frame.as_bytes())?;
        }
        Ok(())
    }

    /// Replaces the mailbox with the deliveries a checkpoint holds, in order.
    ///
    /// Restored deliveries count as outstanding at this input until the callback observes them,
    /// and deliveries they replace are retired.
    fn restore(&self, reader: &mut dyn Read) -> Result<(), Error> {
        let mut restored = Vec::new();
        for frame in LogReader::from_reader(reader)? {
            let frame = frame?;
            let time: T = bincode::deserialize(frame.time_bytes()).map_err(FramingError::from)?;
            restored.push((time, frame));
        }

        let replaced = std::mem::take(&mut *self.mailbox.borrow_mut());
        for delivery in replaced {
            self.discard(delivery)?;
        }

        let context = self.vertex.context();
        for (time, frame) in restored {
            context.update(self.target(), time, frame.header().records as i64);
            self.mailbox.borrow_mut().push_back(Delivery::Serialized(frame));
        }
        if !self.mailbox.borrow().is_empty() {
            self.schedule();
        }
        Ok(())
    }

    fn stateful(&self) -> bool { true }
}
