//! Communication events, for logging through a `braid_logging::Logger`.

use serde::{Deserialize, Serialize};

/// Logger for communication events.
pub type CommunicationLogger = braid_logging::Logger<CommunicationEvent>;

/// The kind of allocator that produced a channel.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// A worker-local queue.
    Thread,
    /// Typed channels between threads of one process.
    Process,
}

/// Various communication events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum CommunicationEvent {
    /// A channel was allocated.
    Allocated {
        /// The identifier the channel was allocated under.
        identifier: usize,
        /// The allocator responsible.
        kind: ChannelKind,
        /// The number of peers the channel connects.
        peers: usize,
    },
}
