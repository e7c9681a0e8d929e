//! Structured communication between dataflow vertices.

pub use self::message::{Message, Postmark};
pub use self::codec::{decode, Encoder, FramedReader, MessageHeader, SerializedMessage};
pub use self::pact::Pact;

pub mod message;
pub mod codec;
/// Parallelization contracts, describing how data must be exchanged between stages.
pub mod pact;
/// A collection of types that may be pushed at.
pub mod pushers;

/// What a cable carries between workers.
///
/// Workers sharing a process exchange typed messages; messages crossing a process boundary are
/// serialized. Both travel on the same channel, so that one pull reads either kind in order.
pub enum Envelope<T, D> {
    /// A typed message for the named consumer vertex.
    Typed {
        /// The destination vertex, within the consuming stage.
        vertex: usize,
        /// The message.
        message: Message<T, D>,
    },
    /// A serialized message; its header names the destination vertex.
    Serialized(SerializedMessage),
}

impl<T, D> Envelope<T, D> {
    /// The destination vertex.
    pub fn vertex(&self) -> usize {
        match self {
            Envelope::Typed { vertex, .. } => *vertex,
            Envelope::Serialized(message) => message.header().vertex,
        }
    }
}
