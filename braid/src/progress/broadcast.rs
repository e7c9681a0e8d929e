//! Broadcasts progress information among workers.

use braid_communication::{Push, Pull};

use crate::logging::{BraidLogger, ProgressEvent};
use crate::progress::{ChangeBatch, Location, Port, Timestamp};

/// A progress update message: source worker, sequence number, and pointstamp changes.
pub type ProgressMsg<T> = (usize, usize, ChangeBatch<(Location, T)>);

/// Manages broadcasting of progress updates to and receiving updates from workers.
///
/// All changes recorded by a worker between two calls to `send` travel as one message, so
/// that a message's production and its consumption are never observed separately.
pub struct Progcaster<T: Timestamp> {
    /// Pushers into which we send progress updates, one for each worker.
    pushers: Vec<Box<dyn Push<ProgressMsg<T>>>>,
    /// Puller from which we recv progress updates.
    puller: Box<dyn Pull<ProgressMsg<T>>>,
    /// Source worker index
    source: usize,
    /// Sequence number counter
    counter: usize,
    /// Identifier of the dataflow that owns this `Progcaster`.
    dataflow: usize,
    /// Communication channel identifier
    channel_identifier: usize,
    /// An optional logger to record progress messages.
    logging: Option<BraidLogger>,
}

impl<T: Timestamp> Progcaster<T> {
    /// Creates a new `Progcaster` from allocated channel endpoints.
    pub fn new(
        pushers: Vec<Box<dyn Push<ProgressMsg<T>>>>,
        puller: Box<dyn Pull<ProgressMsg<T>>>,
        source: usize,
        dataflow: usize,
        channel_identifier: usize,
        logging: Option<BraidLogger>,
    ) -> Progcaster<T> {
        Progcaster {
            pushers,
            puller,
            source,
            counter: 0,
            dataflow,
            channel_identifier,
            logging,
        }
    }

    /// Sends pointstamp changes to all workers, including this one.
    pub fn send(&mut self, changes: &mut ChangeBatch<(Location, T)>) {

        changes.compact();
        if !changes.is_empty() {

            if let Some(logger) = &self.logging {
                logger.log(self.event(true, self.source, self.counter, changes));
            }

            for pusher in self.pushers.iter_mut() {
                pusher.send((self.source, self.counter, changes.clone()));
                pusher.done();
            }

            changes.clear();
            self.counter += 1;
        }
    }

    /// Receives pointstamp changes from all workers.
    pub fn recv(&mut self, changes: &mut ChangeBatch<(Location, T)>) {

        while let Some((source, counter, mut received)) = self.puller.recv() {

            if let Some(logger) = &self.logging {
                logger.log(self.event(false, source, counter, &mut received));
            }

            changes.extend(received.drain());
        }
    }

    fn event(&self, is_send: bool, source: usize, seq_no: usize, changes: &mut ChangeBatch<(Location, T)>) -> ProgressEvent {
        let mut messages = Vec::new();
        let mut internal = Vec::new();
        for ((location, time), diff) in changes.iter() {
            match location.port {
                Port::Target(port) => messages.push((location.node, port, format!("{:?}", time), *diff)),
                Port::Source(port) => internal.push((location.node, port, format!("{:?}", time), *diff)),
            }
        }
        ProgressEvent {
            is_send,
            source,
            seq_no,
            channel: self.channel_identifier,
            dataflow: self.dataflow,
            messages,
            internal,
        }
    }
}

#[cfg(test)]
mod tests {

    use braid_communication::{Allocate, AllocateBuilder};
    use braid_communication::allocator::ProcessBuilder;

    use crate::progress::{ChangeBatch, Location, Pointstamp};
    use super::Progcaster;

    #[test]
    fn every_worker_sees_every_batch() {
        let mut casters =
        ProcessBuilder::new_vector(2, false)
            .into_iter()
            .map(|builder| {
                let mut allocator = builder.build();
                let (pushers, puller) = allocator.allocate(0);
                Progcaster::<Pointstamp>::new(pushers, puller, allocator.index(), 0, 0, None)
            })
            .collect::<Vec<_>>();

        let mut changes = ChangeBatch::new_from((Location::new_source(0, 0), Pointstamp::new(0)), -1);
        casters[0].send(&mut changes);
        assert!(changes.is_empty());

        for caster in casters.iter_mut() {
            let mut received = ChangeBatch::new();
            caster.recv(&mut received);
            assert_eq!(received.into_inner(), vec![((Location::new_source(0, 0), Pointstamp::new(0)), -1)]);
        }
    }
}
