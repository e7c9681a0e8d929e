//! Append-only message logs, their replay, and endpoint checkpoints.
//!
//! An input with logging enabled appends every batch it receives to its vertex's [`LogSink`]
//! before the batch reaches the vertex's callback. Each entry is a serialized message frame:
//! a [`MessageHeader`](crate::dataflow::channels::MessageHeader), the encoded timestamp, and the
//! encoded records. After a failure, reading the log back with a [`LogReader`] and handing it to
//! [`Vertex::replay`](crate::dataflow::Vertex::replay) reproduces the vertex's state.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::dataflow::channels::{FramedReader, Message, SerializedMessage};
use crate::error::{Error, FramingError};

/// An append-only, single-writer log of message frames for one vertex.
pub struct LogSink {
    writer: Box<dyn Write>,
    entries: usize,
}

impl LogSink {
    /// Logs to an arbitrary writer.
    pub fn new<W: Write + 'static>(writer: W) -> Self {
        LogSink { writer: Box::new(writer), entries: 0 }
    }

    /// Opens the log at `path` for appending, creating it if needed.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(LogSink::new(BufWriter::new(file)))
    }

    /// The location of the log of vertex `vertex` of stage `stage` within `directory`.
    pub fn path_for(directory: &Path, stage: usize, vertex: usize) -> PathBuf {
        directory.join(format!("stage-{}-vertex-{}.log", stage, vertex))
    }

    /// Appends one frame.
    ///
    /// The frame may remain buffered until [`LogSink::flush`].
    pub fn append(&mut self, message: &SerializedMessage) -> io::Result<()> {
        self.writer.write_all(message.as_bytes())?;
        self.entries += 1;
        Ok(())
    }

    /// The number of frames appended through this sink.
    pub fn entries(&self) -> usize { self.entries }

    /// Flushes buffered frames to the underlying writer.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Reads the frames of a log back, in the order they were appended.
///
/// Iteration stops at the first frame that fails validation.
pub struct LogReader {
    frames: FramedReader,
}

impl LogReader {
    /// Reads the log at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        LogReader::from_reader(File::open(path)?)
    }

    /// Reads a log from any reader.
    pub fn from_reader<R: Read>(reader: R) -> io::Result<Self> {
        Ok(LogReader { frames: FramedReader::from_reader(reader)? })
    }

    /// Decodes each frame into a typed message.
    pub fn messages<T: DeserializeOwned, D: DeserializeOwned>(self) -> impl Iterator<Item=Result<Message<T, D>, FramingError>> {
        self.frames.messages()
    }
}

impl Iterator for LogReader {
    type Item = Result<SerializedMessage, FramingError>;
    fn next(&mut self) -> Option<Self::Item> {
        self.frames.next()
    }
}

/// Endpoints whose state can be saved and restored.
///
/// Endpoint kinds without a recovery path return [`Error::NotSupported`].
pub trait Checkpointable {
    /// Writes the endpoint's state to `writer`.
    fn checkpoint(&self, writer: &mut dyn Write) -> Result<(), Error>;
    /// Replaces the endpoint's state with one previously written by `checkpoint`.
    fn restore(&self, reader: &mut dyn Read) -> Result<(), Error>;
    /// True if the endpoint holds state that `checkpoint` would write.
    fn stateful(&self) -> bool;
}

#[cfg(test)]
mod tests {

    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    use braid_bytes::pool::BufferPool;

    use crate::dataflow::channels::{Encoder, Message, Postmark};
    use crate::progress::Pointstamp;
    use super::{LogReader, LogSink};

    /// A writer whose contents remain visible after the sink takes it.
    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(bytes);
            Ok(bytes.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    #[test]
    fn entries_read_back_in_order() {
        let buffer = Shared::default();
        let mut sink = LogSink::new(buffer.clone());
        let mut encoder = Encoder::new(BufferPool::new(256, 4));

        let mut frames = Vec::new();
        for epoch in 0 .. 3u64 {
            let message = Message::new(Pointstamp::new(epoch), vec![epoch; 5], Postmark::default(), 7, epoch as usize);
            encoder.encode(1, 0, &message, &mut frames).unwrap();
        }
        for frame in frames.iter() {
            sink.append(frame).unwrap();
        }
        assert_eq!(sink.entries(), 3);
        sink.flush().unwrap();

        let bytes = buffer.0.borrow().clone();
        let reader = LogReader::from_reader(&bytes[..]).unwrap();
        let messages = reader.messages::<Pointstamp, u64>().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(messages.len(), 3);
        for (epoch, message) in messages.into_iter().enumerate() {
            assert_eq!(message.time, Pointstamp::new(epoch as u64));
            assert_eq!(message.data, vec![epoch as u64; 5]);
            assert_eq!(message.channel, 7);
        }
    }

    #[test]
    fn truncated_log_yields_an_error() {
        let buffer = Shared::default();
        let mut sink = LogSink::new(buffer.clone());
        let mut encoder = Encoder::new(BufferPool::new(256, 4));
        let mut frames = Vec::new();
        encoder.encode(0, 0, &Message::new(Pointstamp::new(0), vec![1u64, 2, 3], Postmark::default(), 0, 0), &mut frames).unwrap();
        sink.append(&frames[0]).unwrap();
        drop(sink);

        let mut bytes = buffer.0.borrow().clone();
        bytes.truncate(bytes.len() - 1);
        let mut reader = LogReader::from_reader(&bytes[..]).unwrap();
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }
}
