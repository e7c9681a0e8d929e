//! Timestamped batches of records, and the identity of their sender.

use serde::{Deserialize, Serialize};

/// The identity of a sending vertex.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Postmark {
    /// The worker hosting the sender.
    pub worker: usize,
    /// The sending vertex, within its stage.
    pub vertex: usize,
}

/// A batch of records sharing one timestamp, transported on one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<T, D> {
    /// The timestamp associated with the message.
    pub time: T,
    /// The data in the message.
    pub data: Vec<D>,
    /// The sending vertex.
    pub from: Postmark,
    /// The channel the message travels on.
    pub channel: usize,
    /// A sequence number for this sender-to-destination stream.
    pub seq: usize,
}

impl<T, D> Message<T, D> {
    /// Default buffer size, in records, for messages of `D`.
    ///
    /// Aims for about 8KiB of records per message, and at least one record.
    #[inline]
    pub fn default_length() -> usize {
        const MESSAGE_BUFFER_SIZE: usize = 1 << 13;
        let size = std::mem::size_of::<D>();
        if size == 0 {
            MESSAGE_BUFFER_SIZE
        }
        else if size <= MESSAGE_BUFFER_SIZE {
            MESSAGE_BUFFER_SIZE / size
        }
        else {
            1
        }
    }

    /// Creates a new message instance from arguments.
    pub fn new(time: T, data: Vec<D>, from: Postmark, channel: usize, seq: usize) -> Self {
        Message { time, data, from, channel, seq }
    }

    /// The number of records in the message.
    #[inline]
    pub fn len(&self) -> usize { self.data.len() }

    /// True if the message holds no records.
    #[inline]
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Releases the message, returning its emptied record buffer for reuse.
    pub fn release(self) -> Vec<D> {
        let mut data = self.data;
        data.clear();
        data
    }
}
