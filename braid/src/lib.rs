//! Braid is a substrate for partitioned, progress-tracking dataflow computations.
//!
//! The code is organized in crates and modules that are meant to depend as little as possible on each other.
//!
//! **Pooled pages**: The [`braid_bytes`] crate provides the page pool serialized messages are
//! written into, and the shareable byte slices they are read from.
//!
//! **Communication**: The [`braid_communication`] crate defines the channels workers exchange
//! typed data over, and the allocators that build them for threads and (simulated) processes.
//!
//! **Progress tracking**: The [`braid::progress`](progress) module defines the timestamps of a
//! dataflow, the path summaries relating them across stages, and the tracker that counts
//! outstanding pointstamps and derives the frontier of every stage input.
//!
//! **Dataflow construction**: The [`braid::dataflow`](dataflow) module defines stages, their
//! vertices and endpoints, the cables wiring them across workers, and the wire codec records
//! cross process boundaries in.
//!
//! # Examples
//!
//! ```
//! use braid::Config;
//! use braid::dataflow::operators::{Input, Subscribe};
//! use braid::progress::Pointstamp;
//!
//! // construct and execute a braid computation on two workers
//! braid::execute(Config::process(2), |worker| {
//!
//!     // add an input and observe each completed round
//!     let mut input = worker.dataflow(|graph| {
//!         let (input, stream) = graph.new_input::<u64>()?;
//!         stream.subscribe(|time: &Pointstamp, records| println!("{:?}: {:?}", time, records))?;
//!         Ok(input)
//!     }).unwrap();
//!
//!     // introduce input, advance computation
//!     for round in 0 .. 10 {
//!         input.send(round);
//!         input.advance_to(Pointstamp::new(round + 1));
//!         worker.step();
//!     }
//! }).unwrap();
//! ```

#![forbid(missing_docs)]

pub use execute::{execute, execute_directly, Config};
#[cfg(feature = "getopts")]
pub use execute::execute_from_args;
pub use order::PartialOrder;
pub use error::{Error, FramingError, GraphError};

pub use braid_communication::Config as CommunicationConfig;
pub use worker::{Worker, WorkerConfig};

/// Re-export of the `braid_communication` crate.
pub mod communication {
    pub use braid_communication::*;
}

/// Re-export of the `braid_bytes` crate.
pub mod bytes {
    pub use braid_bytes::*;
}

/// Re-export of the `braid_logging` crate.
pub mod logging_core {
    pub use braid_logging::*;
}

pub mod worker;
pub mod progress;
pub mod dataflow;
pub mod execute;
pub mod order;
pub mod checkpoint;
pub mod error;

pub mod logging;

/// A composite trait for types usable as data in braid dataflows.
///
/// Records may cross process boundaries, so they must be serializable as well as sendable.
pub trait Data: Clone+Send+serde::Serialize+serde::de::DeserializeOwned+'static { }
impl<T: Clone+Send+serde::Serialize+serde::de::DeserializeOwned+'static> Data for T { }
