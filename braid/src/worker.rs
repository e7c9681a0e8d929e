//! The root of each single-threaded worker.

use std::cell::{Cell, RefCell, RefMut};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use braid_bytes::pool::BufferPool;
use braid_communication::Allocator;
use braid_logging::Registry;

use crate::dataflow::context::Context;
use crate::dataflow::graph::Graph;
use crate::dataflow::runtime::Schedule;
use crate::error::Error;
use crate::logging::{BraidEvent, CommunicationEvent, BRAID_LOG, COMMUNICATION_LOG};
use crate::progress::Timestamp;

/// Per-worker configuration.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Bytes per pooled page for serialized messages.
    pub page_size: usize,
    /// Pages each worker's pool keeps for reuse.
    pub pool_limit: usize,
    /// The entrancy counter vertices start with.
    pub default_entrancy: i32,
    /// Directory for per-vertex input logs, if inputs may be logged.
    pub log_directory: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            page_size: 1 << 14,
            pool_limit: 64,
            default_entrancy: 0,
            log_directory: None,
        }
    }
}

impl WorkerConfig {
    /// Sets the bytes per pooled page.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the number of pages a pool keeps for reuse.
    pub fn pool_limit(mut self, pool_limit: usize) -> Self {
        self.pool_limit = pool_limit;
        self
    }

    /// Sets the entrancy counter vertices start with.
    ///
    /// # Panics
    ///
    /// Panics if `entrancy` is below `-1`.
    pub fn default_entrancy(mut self, entrancy: i32) -> Self {
        assert!(entrancy >= -1, "default entrancy {} is below -1", entrancy);
        self.default_entrancy = entrancy;
        self
    }

    /// Sets the directory for per-vertex input logs.
    pub fn log_directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.log_directory = Some(directory.into());
        self
    }

    /// Installs options into a [`getopts::Options`] struct that correspond
    /// to the parameters in the configuration.
    ///
    /// This method is only available if the `getopts` feature is enabled, which
    /// it is by default.
    #[cfg(feature = "getopts")]
    pub fn install_options(opts: &mut getopts::Options) {
        opts.optopt("", "page-size", "bytes per page of serialized messages", "BYTES");
        opts.optopt("", "entrancy", "initial entrancy of every vertex", "NUM");
        opts.optopt("", "log-dir", "directory for per-vertex input logs", "DIR");
    }

    /// Instantiates a configuration based upon the parsed options in `matches`.
    ///
    /// The `matches` object must have been constructed from a
    /// [`getopts::Options`] which contained at least the options installed by
    /// [`Self::install_options`].
    ///
    /// This method is only available if the `getopts` feature is enabled, which
    /// it is by default.
    #[cfg(feature = "getopts")]
    pub fn from_matches(matches: &getopts::Matches) -> Result<WorkerConfig, String> {
        let defaults = WorkerConfig::default();
        let page_size = matches.opt_get_default("page-size", defaults.page_size).map_err(|e| e.to_string())?;
        let entrancy = matches.opt_get_default("entrancy", defaults.default_entrancy).map_err(|e| e.to_string())?;
        if page_size == 0 {
            return Err("page size must be positive".to_owned());
        }
        if entrancy < -1 {
            return Err(format!("entrancy {} is below -1", entrancy));
        }
        let mut config = defaults.page_size(page_size).default_entrancy(entrancy);
        if let Some(directory) = matches.opt_str("log-dir") {
            config = config.log_directory(directory);
        }
        Ok(config)
    }
}

/// A `Worker` is the entry point to a braid computation. It wraps an `Allocator`, and has a list
/// of dataflows that it manages.
pub struct Worker {
    config: WorkerConfig,
    timer: Instant,
    allocator: Rc<RefCell<Allocator>>,
    identifiers: Rc<Cell<usize>>,
    dataflows: Vec<Box<dyn Schedule>>,
    dataflow_counter: usize,
    logging: Rc<RefCell<Registry>>,
    pool: BufferPool,
}

impl Worker {
    /// Allocates a new `Worker` bound to a channel allocator.
    pub fn new(config: WorkerConfig, allocator: Allocator) -> Worker {
        let now = Instant::now();
        let pool = BufferPool::new(config.page_size, config.pool_limit);
        Worker {
            config,
            timer: now,
            allocator: Rc::new(RefCell::new(allocator)),
            identifiers: Rc::new(Cell::new(0)),
            dataflows: Vec::new(),
            dataflow_counter: 0,
            logging: Rc::new(RefCell::new(Registry::new(now))),
            pool,
        }
    }

    /// Performs one step of the computation.
    ///
    /// A step pulls every channel and dispatches what arrived, drains queued deliveries,
    /// broadcasts local progress, applies progress received from peers, and delivers the
    /// notifications that became ready. Returns true while any dataflow remains incomplete.
    pub fn step(&mut self) -> bool {
        self.dataflows.retain_mut(|dataflow| dataflow.step());
        self.logging.borrow_mut().flush();
        !self.dataflows.is_empty()
    }

    /// Calls `self.step()` as long as `func` evaluates to true.
    pub fn step_while<F: FnMut()->bool>(&mut self, mut func: F) {
        while func() { self.step(); }
    }

    /// Steps until every dataflow is complete.
    pub fn join(&mut self) {
        while self.step() { }
    }

    /// The index of the worker out of its peers.
    pub fn index(&self) -> usize { self.allocator.borrow().index() }
    /// The total number of peer workers.
    pub fn peers(&self) -> usize { self.allocator.borrow().peers() }
    /// A timer started at the creation of the worker.
    pub fn timer(&self) -> Instant { self.timer }
    /// The worker's configuration.
    pub fn config(&self) -> &WorkerConfig { &self.config }

    /// Allocates a new worker-unique identifier.
    pub fn new_identifier(&mut self) -> usize {
        let identifier = self.identifiers.get();
        self.identifiers.set(identifier + 1);
        identifier
    }

    /// Access to named loggers.
    ///
    /// Loggers must be installed before the dataflows they observe are constructed.
    pub fn log_register(&self) -> RefMut<'_, Registry> {
        self.logging.borrow_mut()
    }

    /// The identifiers of dataflows not yet complete.
    pub fn installed_dataflows(&self) -> Vec<usize> {
        self.dataflows.iter().map(|dataflow| dataflow.index()).collect()
    }

    /// Constructs a new dataflow, and activates it.
    ///
    /// The closure declares the dataflow's stages and connections, and may return handles to
    /// its inputs and probes. Every worker must construct the same dataflows in the same order.
    /// Errors from the closure, or from validating and wiring the graph, abort construction.
    pub fn dataflow<T, R, F>(&mut self, func: F) -> Result<R, Error>
    where
        T: Timestamp,
        F: FnOnce(&mut Graph<T>) -> Result<R, Error>,
    {
        let index = self.dataflow_counter;
        self.dataflow_counter += 1;

        let (logging, communication) = {
            let registry = self.logging.borrow();
            (registry.get::<BraidEvent>(BRAID_LOG), registry.get::<CommunicationEvent>(COMMUNICATION_LOG))
        };
        let context = Context::new(index, self.index(), self.peers(), logging, self.pool.clone(), self.config.clone());
        let mut graph = Graph::new(Rc::new(context), Rc::clone(&self.identifiers));

        let result = func(&mut graph)?;
        let dataflow = graph.activate(&mut self.allocator.borrow_mut(), communication)?;
        self.dataflows.push(Box::new(dataflow));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {

    use std::cell::RefCell;
    use std::rc::Rc;

    use braid_communication::Allocator;
    use braid_communication::allocator::Thread;

    use crate::dataflow::operators::{Input, Probe};
    use crate::logging::{BraidEvent, BRAID_LOG};
    use crate::progress::Pointstamp;
    use super::{Worker, WorkerConfig};

    #[test]
    fn worker_steps_until_inputs_close() {
        let mut worker = Worker::new(WorkerConfig::default(), Allocator::Thread(Thread));
        let (mut input, probe) = worker.dataflow::<Pointstamp, _, _>(|graph| {
            let (input, stream) = graph.new_input::<u64>()?;
            Ok((input, stream.probe()?))
        }).unwrap();
        assert_eq!(worker.installed_dataflows(), vec![0]);

        input.send(1);
        input.advance_to(Pointstamp::new(1));
        worker.step_while(|| probe.less_than(&Pointstamp::new(1)));
        assert!(!probe.done());

        input.close();
        worker.join();
        assert!(probe.done());
        assert!(worker.installed_dataflows().is_empty());
        assert!(!worker.step());
    }

    #[test]
    fn stage_events_are_logged() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut worker = Worker::new(WorkerConfig::default(), Allocator::Thread(Thread));
        let sink = Rc::clone(&events);
        worker.log_register().insert::<BraidEvent, _>(BRAID_LOG, move |_time, data| {
            sink.borrow_mut().extend(data.iter().map(|(_, event)| event.clone()));
        });

        worker.dataflow::<Pointstamp, _, _>(|graph| {
            let (_input, stream) = graph.new_input::<u64>()?;
            stream.probe()?;
            Ok(())
        }).unwrap();
        worker.join();

        let stages = events.borrow().iter().filter(|event| matches!(event, BraidEvent::Stage(_))).count();
        assert_eq!(stages, 2);
    }

    #[test]
    fn config_setters() {
        let config = WorkerConfig::default().page_size(1024).default_entrancy(-1).log_directory("/tmp/logs");
        assert_eq!(config.page_size, 1024);
        assert_eq!(config.default_entrancy, -1);
        assert_eq!(config.log_directory.as_deref(), Some(std::path::Path::new("/tmp/logs")));
    }

    #[cfg(feature = "getopts")]
    #[test]
    fn config_from_args() {
        let mut opts = getopts::Options::new();
        WorkerConfig::install_options(&mut opts);
        let matches = opts.parse(["--page-size", "4096", "--entrancy", "1"]).unwrap();
        let config = WorkerConfig::from_matches(&matches).unwrap();
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.default_entrancy, 1);
        assert!(config.log_directory.is_none());

        let matches = opts.parse(["--entrancy=-2"]).unwrap();
        assert!(WorkerConfig::from_matches(&matches).is_err());
    }
}
