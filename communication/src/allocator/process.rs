//! Typed inter-thread, intra-process channels.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Sender, Receiver};

use crate::allocator::{Allocate, AllocateBuilder};
use crate::{Push, Pull};

/// Channels under construction, keyed by identifier.
///
/// Each value is a `Vec<Option<(Vec<Sender<T>>, Vec<Receiver<T>>)>>`, one entry per worker, which
/// the worker takes when it allocates the channel. The first worker to allocate an identifier
/// creates the endpoints for everyone.
type ChannelMap = Arc<Mutex<HashMap<usize, Box<dyn Any + Send>>>>;

/// An allocator for inter-thread, intra-process communication.
///
/// With `isolated` set, each worker reports itself as its own process. Channels are still typed,
/// but code that asks `process_of` treats every peer as remote and serializes what it sends.
pub struct ProcessBuilder {
    index: usize,
    peers: usize,
    isolated: bool,
    channels: ChannelMap,
}

impl AllocateBuilder for ProcessBuilder {
    type Allocator = Process;
    fn build(self) -> Self::Allocator {
        Process {
            index: self.index,
            peers: self.peers,
            isolated: self.isolated,
            channels: self.channels,
        }
    }
}

impl ProcessBuilder {
    /// Allocates a vector of connected builders, one for each of `peers` workers.
    pub fn new_vector(peers: usize, isolated: bool) -> Vec<ProcessBuilder> {
        let channels: ChannelMap = Arc::new(Mutex::new(HashMap::new()));
        (0 .. peers)
            .map(|index| ProcessBuilder {
                index,
                peers,
                isolated,
                channels: Arc::clone(&channels),
            })
            .collect()
    }
}

/// An allocator for inter-thread, intra-process communication.
pub struct Process {
    index: usize,
    peers: usize,
    isolated: bool,
    channels: ChannelMap,
}

impl Allocate for Process {
    fn index(&self) -> usize { self.index }
    fn peers(&self) -> usize { self.peers }
    fn process_of(&self, worker: usize) -> usize {
        if self.isolated { worker } else { 0 }
    }
    fn allocate<T: Send + 'static>(&mut self, identifier: usize) -> (Vec<Box<dyn Push<T>>>, Box<dyn Pull<T>>) {

        // ensure exclusive access to shared list of channels
        let mut channels = self.channels.lock().expect("mutex error?");

        let peers = self.peers;
        let entry =
        channels
            .entry(identifier)
            .or_insert_with(|| {
                let (senders, recvers) = crate::promise_futures::<T>(peers, peers);
                let endpoints =
                senders
                    .into_iter()
                    .zip(recvers)
                    .map(Some)
                    .collect::<Vec<_>>();
                Box::new(endpoints)
            });

        let vector =
        entry
            .downcast_mut::<Vec<Option<(Vec<Sender<T>>, Vec<Receiver<T>>)>>>()
            .expect("failed to correctly cast channel");

        let (sends, recvs) =
        vector[self.index]
            .take()
            .expect("channel already consumed");

        let exhausted = vector.iter().all(|x| x.is_none());
        if exhausted {
            channels.remove(&identifier);
        }

        let sends =
        sends
            .into_iter()
            .map(|target| Box::new(Pusher { target }) as Box<dyn Push<T>>)
            .collect::<Vec<_>>();

        let recv = Box::new(Puller { current: None, sources: recvs }) as Box<dyn Pull<T>>;

        (sends, recv)
    }
}

/// The push half of an intra-process channel.
struct Pusher<T> {
    target: Sender<T>,
}

impl<T> Push<T> for Pusher<T> {
    #[inline] fn push(&mut self, element: &mut Option<T>) {
        if let Some(element) = element.take() {
            // The remote endpoint may already be shut down, in which case the element is
            // dropped. This happens when workers complete at different times.
            let _ = self.target.send(element);
        }
    }
}

/// The pull half of an intra-process channel, merging one receiver per sending peer.
///
/// Receivers are drained in index order, which keeps each sender's elements in order.
struct Puller<T> {
    current: Option<T>,
    sources: Vec<Receiver<T>>,
}

impl<T> Pull<T> for Puller<T> {
    #[inline]
    fn pull(&mut self) -> &mut Option<T> {
        self.current = self.sources.iter().find_map(|source| source.try_recv().ok());
        &mut self.current
    }
}

#[cfg(test)]
mod tests {

    use crate::allocator::{Allocate, AllocateBuilder};
    use super::ProcessBuilder;

    #[test]
    fn per_sender_fifo() {
        let mut allocators = ProcessBuilder::new_vector(2, false).into_iter().map(|b| b.build()).collect::<Vec<_>>();
        let (mut sends0, _recv0) = allocators[0].allocate::<u64>(7);
        let (_sends1, mut recv1) = allocators[1].allocate::<u64>(7);

        for i in 0 .. 10 { sends0[1].send(i); }

        let mut received = Vec::new();
        while let Some(x) = recv1.recv() { received.push(x); }
        assert_eq!(received, (0 .. 10).collect::<Vec<_>>());
    }

    #[test]
    fn isolated_workers_are_remote() {
        let allocators = ProcessBuilder::new_vector(3, true).into_iter().map(|b| b.build()).collect::<Vec<_>>();
        assert_eq!(allocators[0].process_of(2), 2);
        let allocators = ProcessBuilder::new_vector(3, false).into_iter().map(|b| b.build()).collect::<Vec<_>>();
        assert_eq!(allocators[0].process_of(2), 0);
    }
}
