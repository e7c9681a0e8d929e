//! A simple communication infrastructure providing typed exchange channels.
//!
//! This crate is part of the braid dataflow system, used for its inter-worker communication.
//! Threads are spawned with an [`allocator::Generic`], whose [`allocate`](Allocate::allocate)
//! method returns a list of send endpoints, one for each peer, and one receive endpoint. Messages
//! sent into a send endpoint will eventually be received by the corresponding worker, if it
//! receives often enough. The point-to-point channels are each FIFO, but with no fairness
//! guarantees across senders.
//!
//! Every worker must allocate the same channel identifiers; a channel becomes usable once each
//! peer has allocated it, which holds when all workers build the same sequence of channels.
//!
//! # Examples
//! ```
//! // configure for two threads, just one process.
//! let config = braid_communication::Config::Process(2);
//!
//! // initializes communication, spawns workers
//! let guards = braid_communication::initialize(config, |mut allocator| {
//!
//!     // allocates a pair of senders list and one receiver.
//!     let (mut senders, mut receiver) = allocator.allocate::<String>(0);
//!
//!     // send typed data along each channel
//!     for (index, sender) in senders.iter_mut().enumerate() {
//!         sender.send(format!("hello, {}", index));
//!         sender.done();
//!     }
//!
//!     // no support for termination notification,
//!     // we have to count down ourselves.
//!     let mut expecting = allocator.peers();
//!     while expecting > 0 {
//!         if let Some(message) = receiver.recv() {
//!             assert_eq!(message, format!("hello, {}", allocator.index()));
//!             expecting -= 1;
//!         }
//!     }
//!
//!     allocator.index()
//! });
//!
//! // computation runs until guards are joined or dropped.
//! let results = guards.unwrap().join();
//! assert_eq!(results.len(), 2);
//! ```

#![forbid(missing_docs)]

pub mod allocator;
pub mod initialize;
pub mod logging;

pub use allocator::Generic as Allocator;
pub use allocator::{Allocate, AllocateBuilder};
pub use initialize::{initialize, initialize_from, Config, WorkerGuards};

/// A destination for elements of type `T`.
///
/// Elements move in by `&mut Option<T>`, so that an implementor may hand back a spent element
/// for the caller to reuse. Pushing `None` asks the implementor to flush.
pub trait Push<T> {
    /// Pushes `element` with the opportunity to take ownership.
    fn push(&mut self, element: &mut Option<T>);
    /// Pushes `element` and drops any resulting resources.
    #[inline]
    fn send(&mut self, element: T) { self.push(&mut Some(element)); }
    /// Pushes `None`, conventionally signalling a flush.
    #[inline]
    fn done(&mut self) { self.push(&mut None); }
}

impl<T, P: ?Sized + Push<T>> Push<T> for Box<P> {
    #[inline]
    fn push(&mut self, element: &mut Option<T>) { (**self).push(element) }
}

/// Pulling elements of type `T`.
pub trait Pull<T> {
    /// The next element, if one has arrived.
    ///
    /// The caller may take the element, or replace it with one for the implementor to reuse.
    /// `None` means nothing is available right now.
    fn pull(&mut self) -> &mut Option<T>;
    /// Takes an `Option<T>` and leaves `None` behind.
    #[inline]
    fn recv(&mut self) -> Option<T> { self.pull().take() }
}

impl<T, P: ?Sized + Pull<T>> Pull<T> for Box<P> {
    #[inline]
    fn pull(&mut self) -> &mut Option<T> { (**self).pull() }
}

use crossbeam_channel::{Sender, Receiver};

/// One unbounded channel for every pair of `sends` senders and `recvs` receivers.
fn promise_futures<T>(sends: usize, recvs: usize) -> (Vec<Vec<Sender<T>>>, Vec<Vec<Receiver<T>>>) {

    // each pair of workers has a sender and a receiver.
    let mut senders: Vec<_> = (0 .. sends).map(|_| Vec::with_capacity(recvs)).collect();
    let mut recvers: Vec<_> = (0 .. recvs).map(|_| Vec::with_capacity(sends)).collect();

    for sender in senders.iter_mut() {
        for recver in recvers.iter_mut() {
            let (send, recv) = crossbeam_channel::unbounded();
            sender.push(send);
            recver.push(recv);
        }
    }

    (senders, recvers)
}
