//! A generic allocator, wrapping known implementors of `Allocate`.
//!
//! This type is useful in settings where it is difficult to write code generic in `A: Allocate`,
//! for example closures whose type arguments must be specified.

use crate::allocator::{Allocate, AllocateBuilder, Thread, Process, ThreadBuilder, ProcessBuilder};
use crate::logging::ChannelKind;
use crate::{Push, Pull};

/// Enumerates known implementors of `Allocate`.
/// Passes trait method calls on to members.
pub enum Generic {
    /// Intra-thread allocator.
    Thread(Thread),
    /// Inter-thread, intra-process allocator.
    Process(Process),
}

impl Generic {
    /// The index of the worker out of `(0..self.peers())`.
    pub fn index(&self) -> usize {
        match self {
            Generic::Thread(t) => t.index(),
            Generic::Process(p) => p.index(),
        }
    }
    /// The number of workers.
    pub fn peers(&self) -> usize {
        match self {
            Generic::Thread(t) => t.peers(),
            Generic::Process(p) => p.peers(),
        }
    }
    /// The process hosting `worker`.
    pub fn process_of(&self, worker: usize) -> usize {
        match self {
            Generic::Thread(t) => t.process_of(worker),
            Generic::Process(p) => p.process_of(worker),
        }
    }
    /// Constructs several send endpoints and one receive endpoint.
    pub fn allocate<T: Send + 'static>(&mut self, identifier: usize) -> (Vec<Box<dyn Push<T>>>, Box<dyn Pull<T>>) {
        match self {
            Generic::Thread(t) => t.allocate(identifier),
            Generic::Process(p) => p.allocate(identifier),
        }
    }
    /// The kind of channels this allocator produces.
    pub fn kind(&self) -> ChannelKind {
        match self {
            Generic::Thread(_) => ChannelKind::Thread,
            Generic::Process(_) => ChannelKind::Process,
        }
    }
}

impl Allocate for Generic {
    fn index(&self) -> usize { self.index() }
    fn peers(&self) -> usize { self.peers() }
    fn process_of(&self, worker: usize) -> usize { self.process_of(worker) }
    fn allocate<T: Send + 'static>(&mut self, identifier: usize) -> (Vec<Box<dyn Push<T>>>, Box<dyn Pull<T>>) {
        self.allocate(identifier)
    }
}

/// Enumerates known implementors of `AllocateBuilder`.
/// Passes trait method calls on to members.
pub enum GenericBuilder {
    /// Builder for `Thread` allocator.
    Thread(ThreadBuilder),
    /// Builder for `Process` allocator.
    Process(ProcessBuilder),
}

impl AllocateBuilder for GenericBuilder {
    type Allocator = Generic;
    fn build(self) -> Generic {
        match self {
            GenericBuilder::Thread(t) => Generic::Thread(t.build()),
            GenericBuilder::Process(p) => Generic::Process(p.build()),
        }
    }
}
