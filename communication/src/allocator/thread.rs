//! Intra-thread communication.

use std::rc::Rc;
use std::cell::RefCell;
use std::collections::VecDeque;

use crate::allocator::{Allocate, AllocateBuilder};
use crate::{Push, Pull};

/// Builder for single-threaded allocator.
pub struct ThreadBuilder;

impl AllocateBuilder for ThreadBuilder {
    type Allocator = Thread;
    fn build(self) -> Self::Allocator { Thread }
}

/// An allocator for inter-thread, intra-process communication
pub struct Thread;

impl Allocate for Thread {
    fn index(&self) -> usize { 0 }
    fn peers(&self) -> usize { 1 }
    fn allocate<T: 'static>(&mut self, _identifier: usize) -> (Vec<Box<dyn Push<T>>>, Box<dyn Pull<T>>) {
        let (pusher, puller) = Thread::new_from();
        (vec![Box::new(pusher)], Box::new(puller))
    }
}

/// Thread-local counting channel push endpoint.
pub type ThreadPusher<T> = Pusher<T>;
/// Thread-local counting channel pull endpoint.
pub type ThreadPuller<T> = Puller<T>;

impl Thread {
    /// Allocates a new pusher and puller pair.
    pub fn new_from<T: 'static>() -> (ThreadPusher<T>, ThreadPuller<T>) {
        let shared = Rc::new(RefCell::new(VecDeque::<T>::new()));
        (Pusher { target: Rc::clone(&shared) }, Puller { source: shared, current: None })
    }
}

/// The push half of an intra-thread channel.
pub struct Pusher<T> {
    target: Rc<RefCell<VecDeque<T>>>,
}

impl<T> Push<T> for Pusher<T> {
    #[inline]
    fn push(&mut self, element: &mut Option<T>) {
        if let Some(element) = element.take() {
            self.target.borrow_mut().push_back(element);
        }
    }
}

/// The pull half of an intra-thread channel.
pub struct Puller<T> {
    current: Option<T>,
    source: Rc<RefCell<VecDeque<T>>>,
}

impl<T> Pull<T> for Puller<T> {
    #[inline]
    fn pull(&mut self) -> &mut Option<T> {
        self.current = self.source.borrow_mut().pop_front();
        &mut self.current
    }
}
