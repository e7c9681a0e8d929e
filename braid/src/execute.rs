//! Starts a braid execution from configuration information and per-worker logic.

use braid_communication::{initialize, Allocator, Config as CommunicationConfig, WorkerGuards};
use braid_communication::allocator::Thread;

use crate::worker::{Worker, WorkerConfig};

/// Configures the execution of a braid computation.
#[derive(Clone, Debug)]
pub struct Config {
    /// Configuration for the communication infrastructure.
    pub communication: CommunicationConfig,
    /// Configuration for the worker threads.
    pub worker: WorkerConfig,
}

impl Config {
    /// Constructs a `Config` that uses one worker thread and the
    /// defaults for all other parameters.
    pub fn thread() -> Config {
        Config {
            communication: CommunicationConfig::Thread,
            worker: WorkerConfig::default(),
        }
    }

    /// Constructs a `Config` that uses `n` worker threads and the
    /// defaults for all other parameters.
    pub fn process(n: usize) -> Config {
        Config {
            communication: CommunicationConfig::Process(n),
            worker: WorkerConfig::default(),
        }
    }

    /// Constructs a `Config` that uses `n` worker threads, each acting as its own process, so
    /// that every record crossing workers is serialized.
    pub fn process_binary(n: usize) -> Config {
        Config {
            communication: CommunicationConfig::ProcessBinary(n),
            worker: WorkerConfig::default(),
        }
    }

    /// Installs options into a [`getopts::Options`] struct that correspond
    /// to the parameters in the configuration.
    ///
    /// It is the caller's responsibility to ensure that the installed options
    /// do not conflict with any other options that may exist in `opts`, or
    /// that may be installed into `opts` in the future.
    ///
    /// This method is only available if the `getopts` feature is enabled, which
    /// it is by default.
    #[cfg(feature = "getopts")]
    pub fn install_options(opts: &mut getopts::Options) {
        CommunicationConfig::install_options(opts);
        WorkerConfig::install_options(opts);
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
    pub fn from_matches(matches: &getopts::Matches) -> Result<Config, String> {
        Ok(Config {
            communication: CommunicationConfig::from_matches(matches)?,
            worker: WorkerConfig::from_matches(matches)?,
        })
    }

    /// Constructs a new configuration by parsing the supplied text arguments.
    ///
    /// Most commonly, callers supply `std::env::args()` as the iterator.
    ///
    /// This method is only available if the `getopts` feature is enabled, which
    /// it is by default.
    #[cfg(feature = "getopts")]
    pub fn from_args<I: Iterator<Item=String>>(args: I) -> Result<Config, String> {
        let mut opts = getopts::Options::new();
        Config::install_options(&mut opts);
        let matches = opts.parse(args).map_err(|e| e.to_string())?;
        Config::from_matches(&matches)
    }
}

/// Executes a single-threaded braid computation.
///
/// The `execute_directly` constructs a `Worker` and directly executes the supplied closure to
/// construct and run a braid computation. It does not create any worker threads, and simply
/// uses the current thread of control. Once the closure returns, the worker steps until every
/// dataflow is complete.
///
/// The closure may return a result, which will be returned from the computation.
pub fn execute_directly<T, F>(func: F) -> T
where
    F: FnOnce(&mut Worker)->T,
{
    let mut worker = Worker::new(WorkerConfig::default(), Allocator::Thread(Thread));
    let result = func(&mut worker);
    worker.join();
    result
}

/// Executes a braid computation from a configuration and per-worker logic.
///
/// The `execute` method takes a `Config` and spins up some number of worker threads, each of
/// which executes the supplied closure to construct and run a braid computation.
///
/// The closure may return a `T: Send+'static`. The `execute` method returns immediately after
/// initializing the computation with a result containing a `WorkerGuards<T>` (or error
/// information), which can be joined to recover the result `T` values from the local workers.
///
/// *Note*: if the caller drops the result of `execute`, the drop code will block awaiting the
/// completion of the computation.
pub fn execute<T, F>(config: Config, func: F) -> Result<WorkerGuards<T>, String>
where
    T: Send+'static,
    F: Fn(&mut Worker)->T+Send+Sync+'static,
{
    let worker_config = config.worker;
    initialize(config.communication, move |allocator| {
        let mut worker = Worker::new(worker_config.clone(), allocator);
        let result = func(&mut worker);
        worker.join();
        result
    })
}

/// Executes a braid computation from supplied arguments and per-worker logic.
///
/// The arguments `execute_from_args` currently understands are:
///
/// `-w, --workers`: number of per-process worker threads.
///
/// `--serialize`: treat each worker as its own process, serializing records between workers.
///
/// `--page-size`: bytes per page of serialized messages.
///
/// `--entrancy`: the entrancy counter every vertex starts with.
///
/// `--log-dir`: directory for per-vertex input logs.
#[cfg(feature = "getopts")]
pub fn execute_from_args<I, T, F>(iter: I, func: F) -> Result<WorkerGuards<T>, String>
where
    I: Iterator<Item=String>,
    T: Send+'static,
    F: Fn(&mut Worker)->T+Send+Sync+'static,
{
    let config = Config::from_args(iter)?;
    execute(config, func)
}

#[cfg(test)]
mod tests {

    use braid_communication::Config as CommunicationConfig;

    use super::Config;

    #[cfg(feature = "getopts")]
    #[test]
    fn config_from_args() {
        let args = ["-w", "3", "--serialize", "--page-size", "2048"].iter().map(|s| s.to_string());
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.communication, CommunicationConfig::ProcessBinary(3));
        assert_eq!(config.worker.page_size, 2048);

        let config = Config::from_args(std::iter::empty()).unwrap();
        assert_eq!(config.communication, CommunicationConfig::Thread);
        assert_eq!(config.worker.default_entrancy, 0);

        assert!(Config::from_args(["-w", "0"].iter().map(|s| s.to_string())).is_err());
    }

    #[test]
    fn constructors() {
        assert_eq!(Config::thread().communication, CommunicationConfig::Thread);
        assert_eq!(Config::process(4).communication, CommunicationConfig::Process(4));
        assert_eq!(Config::process_binary(2).communication, CommunicationConfig::ProcessBinary(2));
    }
}
