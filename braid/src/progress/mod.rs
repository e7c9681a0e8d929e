//! Progress tracking mechanisms to support notification in dataflow graphs

pub use self::change_batch::ChangeBatch;
pub use self::frontier::{Antichain, AntichainRef, MutableAntichain};
pub use self::timestamp::{Timestamp, PathSummary, Pointstamp, PointstampSummary};

pub mod change_batch;
pub mod frontier;
pub mod timestamp;
pub mod reachability;
pub mod broadcast;

use serde::{Deserialize, Serialize};

/// A place in the dataflow graph where pointstamps are counted.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Location {
    /// A scope-local stage identifier.
    pub node: usize,
    /// An input or output port of the stage.
    pub port: Port,
}

impl Location {
    /// Creates a new target location (stage input or channel destination).
    pub fn new_target(node: usize, port: usize) -> Location {
        Location { node, port: Port::Target(port) }
    }
    /// Creates a new source location (stage output or channel source).
    pub fn new_source(node: usize, port: usize) -> Location {
        Location { node, port: Port::Source(port) }
    }
    /// If the location is a target.
    #[inline]
    pub fn is_target(&self) -> bool { matches!(self.port, Port::Target(_)) }
    /// If the location is a source.
    #[inline]
    pub fn is_source(&self) -> bool { matches!(self.port, Port::Source(_)) }
}

/// An input or output port of a stage.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Port {
    /// An input port.
    ///
    /// Messages in flight to this port are counted here until the receiving vertex has
    /// observed them.
    Target(usize),
    /// An output port.
    ///
    /// Capabilities to send at a time are counted here, as held by inputs and pending
    /// notifications.
    Source(usize),
}

impl Port {
    /// The index of the port, among inputs or outputs.
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Port::Target(index) | Port::Source(index) => *index,
        }
    }
}
