//! Errors surfaced by graph construction, the wire codec, and recovery.
//!
//! Misconfiguration is reported through these types. Violations of runtime invariants, such as
//! an entrancy counter below -1 or a message for a vertex this worker does not host, are defects
//! and panic instead.

use crate::progress::Location;

/// Errors detected while assembling a dataflow graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// No endpoint is registered for a vertex the graph requires one for.
    #[error("stage {stage} has no {kind} endpoint registered for vertex {vertex}")]
    MissingEndpoint {
        /// Stage identifier.
        stage: usize,
        /// Vertex identifier within the stage.
        vertex: usize,
        /// `"input"` or `"output"`.
        kind: &'static str,
    },

    /// An endpoint is registered twice for the same vertex.
    #[error("stage {stage} already has a {kind} endpoint registered for vertex {vertex}")]
    DoubleRegistration {
        /// Stage identifier.
        stage: usize,
        /// Vertex identifier within the stage.
        vertex: usize,
        /// `"input"` or `"output"`.
        kind: &'static str,
    },

    /// A pipeline connection joins stages of different parallelism.
    #[error("pipeline from stage {source_stage} ({source_parallelism} vertices) to stage {target_stage} ({target_parallelism} vertices)")]
    ParallelismMismatch {
        /// Producing stage.
        source_stage: usize,
        /// Vertices of the producing stage.
        source_parallelism: usize,
        /// Consuming stage.
        target_stage: usize,
        /// Vertices of the consuming stage.
        target_parallelism: usize,
    },

    /// A stage was declared with no vertices.
    #[error("stage {0} has no vertices")]
    EmptyStage(usize),

    /// A cycle through the location does not advance timestamps.
    #[error("cycle through {0:?} does not advance timestamps")]
    UnadvancingCycle(Location),

    /// An edge names a stage port that does not exist.
    #[error("no such port: {0:?}")]
    UnknownPort(Location),

    /// A stream or port belongs to a different dataflow than the one being built.
    #[error("stream of dataflow {found} used in dataflow {expected}")]
    ForeignStream {
        /// The dataflow under construction.
        expected: usize,
        /// The dataflow the stream belongs to.
        found: usize,
    },

    /// A loop variable was never connected to the stream it feeds back.
    #[error("feedback stage {0} was never connected")]
    UnconnectedFeedback(usize),
}

/// Errors in the framing of serialized messages.
///
/// A framing error is fatal for the channel it occurs on; no part of a corrupt payload is
/// interpreted.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// Fewer bytes are available than a header requires.
    #[error("incomplete header: {available} of {required} bytes")]
    IncompleteHeader {
        /// Bytes available.
        available: usize,
        /// Bytes the header occupies.
        required: usize,
    },

    /// The header declares more bytes than are available.
    #[error("declared length {declared} exceeds the {available} bytes available")]
    LengthMismatch {
        /// Bytes the header declares.
        declared: usize,
        /// Bytes available.
        available: usize,
    },

    /// The body does not decode to the declared number of records.
    #[error("declared {declared} records, decoded {decoded}")]
    RecordCountMismatch {
        /// Records the header declares.
        declared: usize,
        /// Records decoded before the body was exhausted or corrupt.
        decoded: usize,
    },

    /// The body holds bytes beyond the declared records.
    #[error("{remaining} bytes remain after the {declared} declared records")]
    TrailingBytes {
        /// Records the header declares.
        declared: usize,
        /// Bytes left over.
        remaining: usize,
    },

    /// The timestamp or a record does not decode.
    #[error("corrupt payload: {0}")]
    CorruptPayload(#[from] bincode::Error),
}

/// The error type for fallible braid operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Graph construction failed.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// A serialized message could not be read.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The operation has no implementation for this kind of endpoint.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// IO error writing or reading a log or checkpoint.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
