//! Types and traits for the allocation of channels between threads and (simulated) processes.

pub use self::thread::{Thread, ThreadBuilder};
pub use self::process::{Process, ProcessBuilder};
pub use self::generic::{Generic, GenericBuilder};

pub mod thread;
pub mod process;
pub mod generic;

use crate::{Push, Pull};

/// A type capable of allocating an allocator.
///
/// Builders are `Send`, so that they can be moved to the thread that will use the allocator.
pub trait AllocateBuilder : Send {
    /// The type of allocator to be built.
    type Allocator: Allocate;
    /// Builds allocator, consumes self.
    fn build(self) -> Self::Allocator;
}

/// A type capable of allocating channels.
///
/// There is some feature creep, in that this contains several convenience methods about the nature
/// of the allocated channels, and maintenance methods to ensure that they move records around.
pub trait Allocate {
    /// The index of the worker out of `(0..self.peers())`.
    fn index(&self) -> usize;
    /// The number of workers in the communication group.
    fn peers(&self) -> usize;
    /// The index of the process hosting `worker`.
    ///
    /// Workers in different processes cannot share typed data; records headed there must be
    /// serialized.
    fn process_of(&self, _worker: usize) -> usize { 0 }
    /// Constructs several send endpoints and one receive endpoint.
    ///
    /// Each worker must call this with the same `identifier` for the channel to be connected.
    fn allocate<T: Send + 'static>(&mut self, identifier: usize) -> (Vec<Box<dyn Push<T>>>, Box<dyn Pull<T>>);
}
