//! State shared by every vertex of one dataflow on one worker.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use braid_bytes::pool::BufferPool;

use crate::logging::{BraidEvent, BraidLogger};
use crate::progress::{ChangeBatch, Location, Timestamp};
use crate::progress::reachability::Tracker;
use crate::worker::WorkerConfig;

/// Work deferred until the worker next drains its queue.
///
/// Endpoints that could not accept a delivery immediately enqueue themselves, and are run once
/// the delivery that blocked them has returned.
pub(crate) trait Pending {
    /// Runs queued work until none remains or the endpoint blocks again.
    fn run_pending(&self);
}

/// Per-dataflow context, shared by the dataflow's vertices, endpoints and fibers.
pub struct Context<T: Timestamp> {
    /// Worker-unique dataflow identifier.
    pub(crate) dataflow: usize,
    /// Index of this worker.
    pub(crate) worker: usize,
    /// Number of workers.
    pub(crate) peers: usize,
    /// Pointstamp changes recorded since the last progress broadcast.
    progress: RefCell<ChangeBatch<(Location, T)>>,
    /// Endpoints with queued deliveries.
    pending: RefCell<VecDeque<Rc<dyn Pending>>>,
    /// Endpoints that could not run, to be retried on the next drain.
    deferred: RefCell<Vec<Rc<dyn Pending>>>,
    /// The worker's view of outstanding pointstamps, once the dataflow is active.
    pub(crate) tracker: RefCell<Option<Tracker<T>>>,
    /// Destination for `BraidEvent`s.
    pub(crate) logging: Option<BraidLogger>,
    /// Pages for serialized messages.
    pub(crate) pool: BufferPool,
    /// Worker configuration.
    pub(crate) config: WorkerConfig,
}

impl<T: Timestamp> Context<T> {
    /// Allocates a new context for dataflow `dataflow`.
    pub(crate) fn new(dataflow: usize, worker: usize, peers: usize, logging: Option<BraidLogger>, pool: BufferPool, config: WorkerConfig) -> Self {
        Context {
            dataflow,
            worker,
            peers,
            progress: RefCell::new(ChangeBatch::new()),
            pending: RefCell::new(VecDeque::new()),
            deferred: RefCell::new(Vec::new()),
            tracker: RefCell::new(None),
            logging,
            pool,
            config,
        }
    }

    /// Records a change in the count of pointstamps at `location`.
    #[inline]
    pub(crate) fn update(&self, location: Location, time: T, diff: i64) {
        if diff != 0 {
            self.progress.borrow_mut().update((location, time), diff);
        }
    }

    /// Moves all recorded pointstamp changes into `target`.
    pub(crate) fn drain_progress_into(&self, target: &mut ChangeBatch<(Location, T)>) {
        self.progress.borrow_mut().drain_into(target);
    }

    /// True if no pointstamp changes await broadcast.
    pub(crate) fn progress_is_empty(&self) -> bool {
        self.progress.borrow_mut().is_empty()
    }

    /// Queues an endpoint to be run by `drain_pending`.
    pub(crate) fn schedule(&self, pending: Rc<dyn Pending>) {
        self.pending.borrow_mut().push_back(pending);
    }

    /// Sets aside an endpoint that is still blocked, until the next call to `drain_pending`.
    pub(crate) fn defer(&self, pending: Rc<dyn Pending>) {
        self.deferred.borrow_mut().push(pending);
    }

    /// True if some endpoint has deliveries queued.
    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty() || !self.deferred.borrow().is_empty()
    }

    /// Runs queued endpoints until the queue is empty.
    ///
    /// Endpoints run here may queue further work, which is also run. Endpoints deferred since the
    /// last drain are retried first. Returns true if anything ran.
    pub(crate) fn drain_pending(&self) -> bool {
        let deferred = std::mem::take(&mut *self.deferred.borrow_mut());
        self.pending.borrow_mut().extend(deferred);
        let mut ran = false;
        loop {
            let next = self.pending.borrow_mut().pop_front();
            match next {
                Some(pending) => { pending.run_pending(); ran = true; },
                None => break,
            }
        }
        ran
    }

    /// Logs an event, if a logger is installed.
    #[inline]
    pub(crate) fn log<E: Into<BraidEvent>>(&self, event: E) {
        if let Some(logger) = &self.logging {
            logger.log(event);
        }
    }
}
