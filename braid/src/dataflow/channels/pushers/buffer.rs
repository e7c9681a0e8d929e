//! Buffering and session mechanisms to provide the appearance of record-at-a-time sending,
//! with the performance of batched sends.

use std::cell::{Cell, RefCell};
use std::io::{Read, Write};
use std::rc::Rc;

use braid_communication::Push;

use crate::Data;
use crate::checkpoint::Checkpointable;
use crate::dataflow::channels::{Message, Postmark};
use crate::dataflow::channels::pushers::Output;
use crate::dataflow::vertex::FlushOutput;
use crate::error::Error;
use crate::progress::Timestamp;

/// Buffers data sent at the same time, for efficient communication.
///
/// Records accumulate until the buffer reaches `Message::default_length()`, the time changes, or
/// the owning vertex flushes.
pub struct Buffer<T, D> {
    /// the currently open time, if it is open
    time: Option<T>,
    /// a buffer for records, to send at self.time
    buffer: Vec<D>,
    /// the sending vertex
    from: Postmark,
    /// set while the vertex replays its log; buffered records are then discarded
    muted: Rc<Cell<bool>>,
}

impl<T: Clone + Eq, D> Buffer<T, D> {

    fn new(from: Postmark, muted: Rc<Cell<bool>>) -> Self {
        Buffer {
            time: None,
            buffer: Vec::with_capacity(Message::<T, D>::default_length()),
            from,
            muted,
        }
    }

    /// Takes the buffered records as a message, if there are any to send.
    fn take(&mut self) -> Option<Message<T, D>> {
        if self.buffer.is_empty() {
            return None;
        }
        let data = std::mem::replace(&mut self.buffer, Vec::with_capacity(Message::<T, D>::default_length()));
        self.wrap(data)
    }

    /// Forms a message at the open time, unless the buffer is muted.
    fn wrap(&self, data: Vec<D>) -> Option<Message<T, D>> {
        match &self.time {
            Some(time) if !self.muted.get() => Some(Message::new(time.clone(), data, self.from, 0, 0)),
            _ => None,
        }
    }

    /// Opens `time`, returning the records buffered at any other time.
    fn open(&mut self, time: &T) -> Option<Message<T, D>> {
        if self.time.as_ref() == Some(time) {
            return None;
        }
        let stale = self.take();
        self.time = Some(time.clone());
        stale
    }
}

/// The handle a vertex sends records through.
///
/// Clones share the same buffer. A vertex's output handles are flushed whenever the vertex
/// returns from a callback.
pub struct OutputHandle<T, D> {
    buffer: Rc<RefCell<Buffer<T, D>>>,
    pusher: Output<T, D>,
}

impl<T, D> Clone for OutputHandle<T, D> {
    fn clone(&self) -> Self {
        OutputHandle {
            buffer: Rc::clone(&self.buffer),
            pusher: self.pusher.clone(),
        }
    }
}

impl<T: Timestamp, D: Data> OutputHandle<T, D> {

    pub(crate) fn new(pusher: Output<T, D>, from: Postmark, muted: Rc<Cell<bool>>) -> Self {
        OutputHandle {
            buffer: Rc::new(RefCell::new(Buffer::new(from, muted))),
            pusher,
        }
    }

    /// Returns a `Session`, which accepts data to send at the associated time.
    ///
    /// Records buffered at a different time are sent first. Sessions borrow the buffer only while
    /// records are added, so a vertex re-entered by a delivery may open further sessions on the
    /// same handle.
    pub fn session(&self, time: &T) -> Session<'_, T, D> {
        let stale = self.buffer.borrow_mut().open(time);
        self.send(stale);
        Session { handle: self, time: time.clone() }
    }

    fn send(&self, message: Option<Message<T, D>>) {
        if let Some(message) = message {
            self.pusher.clone().send(message);
        }
    }

    /// Sends all buffered records.
    pub fn flush(&self) {
        let message = self.buffer.borrow_mut().take();
        self.send(message);
    }
}

impl<T: Timestamp, D: Data> FlushOutput for OutputHandle<T, D> {
    fn flush_output(&self) {
        self.flush();
    }
    fn shutdown(&self) {
        self.flush();
        self.pusher.clear();
    }
}

impl<T: Timestamp, D: Data> Checkpointable for OutputHandle<T, D> {
    fn checkpoint(&self, _writer: &mut dyn Write) -> Result<(), Error> {
        Err(Error::NotSupported("checkpoint of an output"))
    }
    fn restore(&self, _reader: &mut dyn Read) -> Result<(), Error> {
        Err(Error::NotSupported("restore of an output"))
    }
    fn stateful(&self) -> bool { false }
}

/// An output session for sending records at a specified time.
///
/// Records given through a session are buffered at its time, even if a nested session on the
/// same handle opened another time in between.
pub struct Session<'a, T, D> {
    handle: &'a OutputHandle<T, D>,
    time: T,
}

impl<T: Timestamp, D: Data> Session<'_, T, D> {
    /// Provides one record at the time specified by the `Session`.
    #[inline]
    pub fn give(&mut self, data: D) {
        let (stale, full) = {
            let mut buffer = self.handle.buffer.borrow_mut();
            let stale = buffer.open(&self.time);
            buffer.buffer.push(data);
            let full = if buffer.buffer.len() >= Message::<T, D>::default_length() { buffer.take() } else { None };
            (stale, full)
        };
        self.handle.send(stale);
        self.handle.send(full);
    }

    /// Provides an iterator of records at the time specified by the `Session`.
    #[inline]
    pub fn give_iterator<I: IntoIterator<Item=D>>(&mut self, iter: I) {
        for item in iter {
            self.give(item);
        }
    }

    /// Provides a fully formed batch, leaving `message` empty.
    ///
    /// Records given earlier in the session are sent first, to preserve their order.
    #[inline]
    pub fn give_vec(&mut self, message: &mut Vec<D>) {
        if message.is_empty() {
            return;
        }
        let (stale, earlier, batch) = {
            let mut buffer = self.handle.buffer.borrow_mut();
            let stale = buffer.open(&self.time);
            let earlier = buffer.take();
            (stale, earlier, buffer.wrap(std::mem::take(message)))
        };
        self.handle.send(stale);
        self.handle.send(earlier);
        self.handle.send(batch);
    }
}

#[cfg(test)]
mod tests {

    use std::cell::Cell;
    use std::rc::Rc;

    use braid_communication::Pull;
    use braid_communication::allocator::Thread;

    use crate::dataflow::channels::{Message, Postmark};
    use crate::dataflow::channels::pushers::Output;
    use crate::dataflow::endpoints::VertexOutput;
    use crate::progress::Pointstamp;
    use super::OutputHandle;

    #[test]
    fn sessions_batch_by_time() {
        let output = Output::<Pointstamp, u64>::new();
        let (pusher, mut puller) = Thread::new_from();
        output.add_receiver(Box::new(pusher));
        let handle = OutputHandle::new(output, Postmark { worker: 0, vertex: 3 }, Rc::new(Cell::new(false)));

        handle.session(&Pointstamp::new(0)).give_iterator(0 .. 5);
        handle.session(&Pointstamp::new(0)).give(5);
        assert!(puller.recv().is_none());
        handle.session(&Pointstamp::new(1)).give(6);
        handle.flush();

        let first = puller.recv().unwrap();
        assert_eq!(first.time, Pointstamp::new(0));
        assert_eq!(first.data, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(first.from.vertex, 3);
        let second = puller.recv().unwrap();
        assert_eq!(second.time, Pointstamp::new(1));
        assert_eq!(second.data, vec![6]);
    }

    #[test]
    fn full_buffers_are_sent() {
        let output = Output::<Pointstamp, u64>::new();
        let (pusher, mut puller) = Thread::new_from();
        output.add_receiver(Box::new(pusher));
        let handle = OutputHandle::new(output, Postmark::default(), Rc::new(Cell::new(false)));

        let length = Message::<Pointstamp, u64>::default_length();
        handle.session(&Pointstamp::new(0)).give_iterator(0 .. length as u64 + 1);
        assert_eq!(puller.recv().map(|m| m.len()), Some(length));
        handle.flush();
        assert_eq!(puller.recv().map(|m| m.len()), Some(1));
    }

    #[test]
    fn muted_handles_discard() {
        let output = Output::<Pointstamp, u64>::new();
        let (pusher, mut puller) = Thread::new_from();
        output.add_receiver(Box::new(pusher));
        let muted = Rc::new(Cell::new(true));
        let handle = OutputHandle::new(output, Postmark::default(), Rc::clone(&muted));
        handle.session(&Pointstamp::new(0)).give(1);
        handle.flush();
        assert!(puller.recv().is_none());
        muted.set(false);
        handle.session(&Pointstamp::new(0)).give(2);
        handle.flush();
        assert_eq!(puller.recv().map(|m| m.data), Some(vec![2]));
    }
}
