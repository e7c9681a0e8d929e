//! Distributes the messages of one producer vertex among its send-fibers, according to a pact.

use braid_communication::Push;

use crate::Data;
use crate::dataflow::channels::{Message, Pact};
use crate::dataflow::channels::pushers::SendFiber;
use crate::progress::Timestamp;

/// Routes each message of a producer vertex to the fibers its pact selects.
///
/// `fibers` is indexed by consumer vertex, and holds a fiber for each consumer the pact lets
/// this producer reach.
pub struct Exchange<T: Timestamp, D: Data> {
    pact: Pact<D>,
    producer: usize,
    fibers: Vec<Option<SendFiber<T, D>>>,
    buffers: Vec<Vec<D>>,
}

impl<T: Timestamp, D: Data> Exchange<T, D> {
    /// Allocates a new `Exchange` for vertex `producer` from a supplied set of fibers.
    pub fn new(pact: Pact<D>, producer: usize, fibers: Vec<Option<SendFiber<T, D>>>) -> Self {
        let buffers = fibers.iter().map(|_| Vec::new()).collect();
        Exchange { pact, producer, fibers, buffers }
    }

    fn fiber(&mut self, vertex: usize) -> &mut SendFiber<T, D> {
        match self.fibers.get_mut(vertex).and_then(|fiber| fiber.as_mut()) {
            Some(fiber) => fiber,
            None => panic!("no send-fiber from vertex {} to vertex {}", self.producer, vertex),
        }
    }
}

impl<T: Timestamp, D: Data> Push<Message<T, D>> for Exchange<T, D> {
    fn push(&mut self, element: &mut Option<Message<T, D>>) {
        let Some(message) = element.take() else { return };
        let parallelism = self.fibers.len();
        match &self.pact {
            Pact::Pipeline => {
                let producer = self.producer;
                self.fiber(producer).send(message);
            },
            Pact::Exchange(_) => {
                for record in message.data {
                    if let Some(index) = self.pact.route(self.producer, &record, parallelism) {
                        self.buffers[index].push(record);
                    }
                }
                for index in 0 .. parallelism {
                    if !self.buffers[index].is_empty() {
                        let data = std::mem::take(&mut self.buffers[index]);
                        let part = Message::new(message.time.clone(), data, message.from, 0, 0);
                        self.fiber(index).send(part);
                    }
                }
            },
            Pact::Broadcast => {
                for index in 1 .. parallelism {
                    self.fiber(index).send(message.clone());
                }
                if parallelism > 0 {
                    self.fiber(0).send(message);
                }
            },
        }
    }
}
