//! An activated dataflow, and the scheduling round a worker performs on it.

use std::rc::Rc;

use crate::dataflow::cable::Dispatch;
use crate::dataflow::context::Context;
use crate::dataflow::vertex::Vertex;
use crate::progress::{ChangeBatch, Location, Timestamp};
use crate::progress::broadcast::Progcaster;

/// A dataflow the worker schedules, with its timestamp type erased.
pub(crate) trait Schedule {
    /// The worker-unique dataflow identifier.
    fn index(&self) -> usize;
    /// Performs one scheduling round; returns false once the dataflow is complete.
    fn step(&mut self) -> bool;
}

/// The runtime state of one dataflow on one worker.
pub(crate) struct Dataflow<T: Timestamp> {
    context: Rc<Context<T>>,
    progcaster: Progcaster<T>,
    dispatchers: Vec<Box<dyn Dispatch>>,
    vertices: Vec<Vertex<T>>,
    /// Scratch space for progress headed to and from peers.
    changes: ChangeBatch<(Location, T)>,
    complete: bool,
}

impl<T: Timestamp> Dataflow<T> {
    pub(crate) fn new(context: Rc<Context<T>>, progcaster: Progcaster<T>, dispatchers: Vec<Box<dyn Dispatch>>, vertices: Vec<Vertex<T>>) -> Self {
        Dataflow {
            context,
            progcaster,
            dispatchers,
            vertices,
            changes: ChangeBatch::new(),
            complete: false,
        }
    }

    /// Delivers every requested notification that no input can still precede.
    ///
    /// Returns true if any notification was delivered.
    fn notify(&mut self) -> bool {
        let ready = {
            let tracker = self.context.tracker.borrow();
            match tracker.as_ref() {
                Some(tracker) => {
                    self.vertices
                        .iter()
                        .filter(|vertex| vertex.has_notifications())
                        .map(|vertex| (vertex.clone(), vertex.ready_notifications(tracker)))
                        .collect::<Vec<_>>()
                },
                None => Vec::new(),
            }
        };

        let mut delivered = false;
        for (vertex, times) in ready {
            for time in times {
                delivered |= vertex.deliver_notification(&time);
            }
        }
        delivered
    }

    fn is_complete(&mut self) -> bool {
        let quiescent = self.context.tracker.borrow_mut().as_mut().map(|tracker| tracker.is_quiescent()).unwrap_or(true);
        quiescent &&
        self.context.progress_is_empty() &&
        !self.context.has_pending() &&
        self.vertices.iter().all(|vertex| !vertex.has_notifications())
    }

    fn shutdown(&mut self) {
        for vertex in self.vertices.drain(..) {
            vertex.shutdown();
        }
        self.dispatchers.clear();
    }
}

impl<T: Timestamp> Schedule for Dataflow<T> {

    fn index(&self) -> usize { self.context.dataflow }

    fn step(&mut self) -> bool {

        if self.complete {
            return false;
        }

        for dispatcher in self.dispatchers.iter_mut() {
            dispatcher.dispatch();
        }
        self.context.drain_pending();
        for vertex in self.vertices.iter() {
            vertex.flush();
        }

        // Changes recorded during this step leave as one batch, so that the receipt of a message
        // and anything produced in response are never observed apart.
        self.context.drain_progress_into(&mut self.changes);
        self.progcaster.send(&mut self.changes);
        self.progcaster.recv(&mut self.changes);
        if let Some(tracker) = self.context.tracker.borrow_mut().as_mut() {
            tracker.update_iter(self.changes.drain());
        }

        // Notifications record progress of their own, broadcast on the next step.
        self.notify();

        if self.is_complete() {
            self.shutdown();
            self.complete = true;
        }
        !self.complete
    }
}
