//! Cables: the wiring of one stage output to one stage input.
//!
//! When a dataflow activates, each cable allocates a channel and, for every producer vertex this
//! worker hosts, builds one send-fiber per consumer vertex the pact lets it reach. The fibers of
//! a producer are grouped behind an `Exchange`, which is attached to the producer's output. Every
//! worker also pulls the channel, dispatching what arrives to the input endpoints it hosts.

use std::cell::RefCell;
use std::rc::Rc;

use braid_communication::{Allocator, Pull, Push};
use braid_communication::logging::{CommunicationEvent, CommunicationLogger};

use crate::Data;
use crate::dataflow::channels::{Encoder, Envelope, Pact};
use crate::dataflow::channels::pushers::{Exchange, SendFiber};
use crate::dataflow::channels::pushers::fiber::{Route, SharedPusher};
use crate::dataflow::context::Context;
use crate::dataflow::endpoints::{Receiver, VertexOutput};
use crate::dataflow::stage::{worker_of, Stage, StageInput, StageOutput};
use crate::error::GraphError;
use crate::logging::ChannelEvent;
use crate::progress::{Location, Timestamp};

/// Moves whatever a channel has received to the endpoints it is addressed to.
pub(crate) trait Dispatch {
    /// Delivers all received messages; returns true if there were any.
    fn dispatch(&mut self) -> bool;
}

/// The resources cables draw on while a dataflow activates.
pub(crate) struct Activation<'a, T: Timestamp> {
    pub(crate) allocator: &'a mut Allocator,
    pub(crate) logging: Option<CommunicationLogger>,
    pub(crate) context: &'a Rc<Context<T>>,
    pub(crate) stages: &'a [Stage<T>],
    pub(crate) dispatchers: Vec<Box<dyn Dispatch>>,
}

impl<T: Timestamp> Activation<'_, T> {
    /// Allocates channel `channel`, logging the allocation.
    pub(crate) fn allocate<X: Send + 'static>(&mut self, channel: usize) -> (Vec<Box<dyn Push<X>>>, Box<dyn Pull<X>>) {
        if let Some(logger) = &self.logging {
            logger.log(CommunicationEvent::Allocated {
                identifier: channel,
                kind: self.allocator.kind(),
                peers: self.allocator.peers(),
            });
        }
        self.allocator.allocate(channel)
    }

    fn parallelism(&self, stage: usize) -> Result<usize, GraphError> {
        match self.stages.get(stage) {
            Some(stage) if stage.built && stage.parallelism > 0 => Ok(stage.parallelism),
            _ => Err(GraphError::EmptyStage(stage)),
        }
    }
}

/// A connection from a stage output to a stage input, wired at activation.
pub(crate) struct Cable<T: Timestamp, D: Data> {
    pub(crate) channel: usize,
    pub(crate) source: Rc<RefCell<StageOutput<T, D>>>,
    pub(crate) target: Rc<RefCell<StageInput<T, D>>>,
    pub(crate) pact: Pact<D>,
}

impl<T: Timestamp, D: Data> Cable<T, D> {

    /// Builds the send-fibers of the producer vertices this worker hosts, and the dispatcher for
    /// the consumer vertices it hosts.
    ///
    /// Fails if a pipeline joins stages of different parallelism, or if some consumer vertex this
    /// worker hosts registered no endpoint for the input.
    pub(crate) fn wire(self, activation: &mut Activation<'_, T>) -> Result<(), GraphError> {

        let source = self.source.borrow();
        let target = self.target.borrow();
        let producers = activation.parallelism(source.stage())?;
        let consumers = activation.parallelism(target.stage())?;

        if matches!(self.pact, Pact::Pipeline) && producers != consumers {
            return Err(GraphError::ParallelismMismatch {
                source_stage: source.stage(),
                source_parallelism: producers,
                target_stage: target.stage(),
                target_parallelism: consumers,
            });
        }

        let context = Rc::clone(activation.context);
        let (worker, peers) = (context.worker, context.peers);

        let receivers = (0 .. consumers)
            .map(|vertex| {
                if worker_of(vertex, peers) == worker {
                    let receiver = Rc::clone(target.get_pin(vertex)?);
                    receiver.set_channel(self.channel);
                    Ok(Some(receiver))
                }
                else {
                    Ok(None)
                }
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        // Every worker allocates the channel, whether or not it hosts vertices of either stage.
        let (pushers, puller) = activation.allocate::<Envelope<T, D>>(self.channel);
        let pushers: Vec<SharedPusher<T, D>> = pushers.into_iter().map(|pusher| Rc::new(RefCell::new(pusher))).collect();

        let location = Location::new_target(target.stage(), target.port());
        let mut fibers = 0;
        for producer in (0 .. producers).filter(|vertex| worker_of(*vertex, peers) == worker) {
            let mut routes = (0 .. consumers).map(|_| None).collect::<Vec<_>>();
            for consumer in self.pact.destinations(producer, consumers) {
                let host = worker_of(consumer, peers);
                let route = match &receivers[consumer] {
                    Some(receiver) => Route::Local(Rc::clone(receiver)),
                    None if activation.allocator.process_of(host) == activation.allocator.process_of(worker) => {
                        Route::Typed(Rc::clone(&pushers[host]))
                    },
                    None => Route::Serialized(Rc::clone(&pushers[host]), Encoder::new(context.pool.clone())),
                };
                routes[consumer] = Some(SendFiber::new(location, consumer, host, self.channel, route, Rc::clone(&context)));
                fibers += 1;
            }
            let exchange = Exchange::new(self.pact.clone(), producer, routes);
            source.get_pin(producer)?.add_receiver(Box::new(exchange));
        }

        context.log(ChannelEvent {
            dataflow: context.dataflow,
            channel: self.channel,
            source: (source.stage(), source.port()),
            target: (target.stage(), target.port()),
            pact: self.pact.name().to_owned(),
            fibers,
        });

        activation.dispatchers.push(Box::new(CableReceiver {
            channel: self.channel,
            worker,
            puller,
            receivers,
        }));

        Ok(())
    }
}

/// Pulls one cable's channel and hands each message to the consumer vertex it names.
struct CableReceiver<T: Timestamp, D: Data> {
    channel: usize,
    worker: usize,
    puller: Box<dyn Pull<Envelope<T, D>>>,
    receivers: Vec<Option<Rc<Receiver<T, D>>>>,
}

impl<T: Timestamp, D: Data> Dispatch for CableReceiver<T, D> {
    fn dispatch(&mut self) -> bool {
        let mut received = false;
        while let Some(envelope) = self.puller.recv() {
            received = true;
            let vertex = envelope.vertex();
            let receiver = match self.receivers.get(vertex).and_then(|receiver| receiver.as_ref()) {
                Some(receiver) => receiver,
                None => panic!("message on channel {} for vertex {}, which worker {} does not host", self.channel, vertex, self.worker),
            };
            match envelope {
                Envelope::Typed { message, .. } => receiver.deliver_typed(message),
                Envelope::Serialized(message) => receiver.deliver_serialized(message),
            }
        }
        received
    }
}
