//! Send-fibers: the path from one producer vertex to one consumer vertex.
//!
//! A fiber stamps each message with its channel and a per-destination sequence number, counts
//! the records as outstanding at the consuming input, and then delivers the message in one of
//! three ways. A consumer on this worker is invoked directly (or has the message queued, if it
//! cannot be entered). A consumer on another worker of this process receives the typed message
//! over the cable's channel. A consumer in another process receives serialized frames over the
//! same channel.

use std::cell::RefCell;
use std::rc::Rc;

use braid_communication::Push;

use crate::Data;
use crate::dataflow::channels::{Encoder, Envelope, Message, SerializedMessage};
use crate::dataflow::context::Context;
use crate::dataflow::endpoints::Receiver;
use crate::logging::MessagesEvent;
use crate::progress::{Location, Timestamp};

/// A channel pusher shared by the fibers of one cable that lead to the same worker.
pub type SharedPusher<T, D> = Rc<RefCell<Box<dyn Push<Envelope<T, D>>>>>;

/// How a fiber reaches its consumer.
pub enum Route<T: Timestamp, D: Data> {
    /// The consumer is hosted by this worker.
    Local(Rc<Receiver<T, D>>),
    /// The consumer is hosted by another worker of this process.
    Typed(SharedPusher<T, D>),
    /// The consumer is hosted by another process.
    Serialized(SharedPusher<T, D>, Encoder),
}

impl<T: Timestamp, D: Data> Route<T, D> {
    fn serialized(&self) -> bool {
        matches!(self, Route::Serialized(..))
    }
}

/// Sends the messages of one producer vertex to one consumer vertex.
pub struct SendFiber<T: Timestamp, D: Data> {
    /// The consuming input, where sent records are counted.
    target: Location,
    /// The consuming vertex.
    vertex: usize,
    /// The worker hosting the consuming vertex.
    worker: usize,
    /// The channel the cable allocated.
    channel: usize,
    /// Sequence number of the next message.
    seq: usize,
    route: Route<T, D>,
    frames: Vec<SerializedMessage>,
    context: Rc<Context<T>>,
}

impl<T: Timestamp, D: Data> SendFiber<T, D> {
    /// Creates a fiber to vertex `vertex`, on worker `worker`, of the stage input `target`.
    pub(crate) fn new(target: Location, vertex: usize, worker: usize, channel: usize, route: Route<T, D>, context: Rc<Context<T>>) -> Self {
        SendFiber {
            target,
            vertex,
            worker,
            channel,
            seq: 0,
            route,
            frames: Vec::new(),
            context,
        }
    }
}

impl<T: Timestamp, D: Data> Push<Message<T, D>> for SendFiber<T, D> {
    fn push(&mut self, element: &mut Option<Message<T, D>>) {
        let mut message = match element.take() {
            Some(message) if !message.is_empty() => message,
            _ => return,
        };

        message.channel = self.channel;
        message.seq = self.seq;
        self.seq += 1;

        self.context.update(self.target, message.time.clone(), message.len() as i64);
        self.context.log(MessagesEvent {
            is_send: true,
            channel: self.channel,
            source: (message.from.worker, message.from.vertex),
            target: (self.worker, self.vertex),
            seq_no: message.seq,
            length: message.len(),
            serialized: self.route.serialized(),
        });

        match &mut self.route {
            Route::Local(receiver) => receiver.deliver_typed(message),
            Route::Typed(pusher) => {
                pusher.borrow_mut().send(Envelope::Typed { vertex: self.vertex, message });
            },
            Route::Serialized(pusher, encoder) => {
                if let Err(error) = encoder.encode(self.target.node, self.vertex, &message, &mut self.frames) {
                    panic!("failed to serialize a message on channel {}: {}", self.channel, error);
                }
                let mut pusher = pusher.borrow_mut();
                for frame in self.frames.drain(..) {
                    pusher.send(Envelope::Serialized(frame));
                }
            },
        }
    }
}
