//! Common braid logging infrastructure.
//!
//! A [`Registry`] maps stream names to actions. A [`Logger`] obtained from the registry buffers
//! timestamped events and hands them to its action in batches, either when the buffer fills or
//! when it is explicitly flushed. Dropping the last handle to a logger flushes it one final time
//! and then presents the action with an empty batch, signalling that the stream has ended.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// The capacity of a logger's buffer, in events, before it is handed to the action.
const DEFAULT_CAPACITY: usize = 1024;

/// A common registry of named logging streams.
pub struct Registry {
    /// The instant against which all event times are measured.
    time: Instant,
    /// Installed loggers, type-erased, and a way to flush each of them.
    map: HashMap<String, (Box<dyn Any>, Box<dyn Flush>)>,
}

impl Registry {
    /// Creates a new registry measuring time from `time`.
    pub fn new(time: Instant) -> Self {
        Registry {
            time,
            map: HashMap::new(),
        }
    }

    /// Binds a log name to an action on log event batches.
    ///
    /// The action receives the elapsed time of the flush and a batch of events. An empty batch
    /// indicates that the logger has been dropped and no further events will follow. Any
    /// logger previously bound to `name` is returned, type-erased.
    pub fn insert<T: 'static, F: FnMut(&Duration, &[(Duration, T)])+'static>(
        &mut self,
        name: &str,
        action: F,
    ) -> Option<Box<dyn Any>>
    {
        let logger = Logger::<T>::new(self.time, Box::new(action));
        self.insert_logger(name, logger)
    }

    /// Binds a log name to an existing logger.
    pub fn insert_logger<T: 'static>(&mut self, name: &str, logger: Logger<T>) -> Option<Box<dyn Any>> {
        self.map
            .insert(name.to_owned(), (Box::new(logger.clone()), Box::new(logger)))
            .map(|(any, _)| any)
    }

    /// Removes a bound logger, so that future calls to `get` for the name return `None`.
    ///
    /// Handles already obtained keep logging to the removed action.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name).map(|(any, _)| any)
    }

    /// Retrieves a shared logger, if one has been bound to `name` with type `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map
            .get(name)
            .and_then(|(any, _)| any.downcast_ref::<Logger<T>>())
            .cloned()
    }

    /// Flushes all registered loggers.
    pub fn flush(&mut self) {
        for (_, flush) in self.map.values() {
            flush.flush();
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.flush();
    }
}

/// A buffering, shared logger for events of type `T`.
pub struct Logger<T> {
    inner: Rc<RefCell<LoggerInner<T>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger { inner: Rc::clone(&self.inner) }
    }
}

struct LoggerInner<T> {
    /// The instant against which event times are measured.
    time: Instant,
    /// Events not yet presented to the action.
    buffer: Vec<(Duration, T)>,
    /// Capacity of `buffer` before an automatic flush.
    capacity: usize,
    /// Consumer of event batches.
    action: Box<dyn FnMut(&Duration, &[(Duration, T)])>,
}

impl<T> LoggerInner<T> {
    fn flush(&mut self) {
        let elapsed = self.time.elapsed();
        if !self.buffer.is_empty() {
            (self.action)(&elapsed, &self.buffer[..]);
            self.buffer.clear();
        }
    }
}

impl<T> Drop for LoggerInner<T> {
    fn drop(&mut self) {
        self.flush();
        let elapsed = self.time.elapsed();
        (self.action)(&elapsed, &[]);
    }
}

impl<T> Logger<T> {
    /// Allocates a new logger measuring time from `time`.
    pub fn new(time: Instant, action: Box<dyn FnMut(&Duration, &[(Duration, T)])>) -> Self {
        Self::with_capacity(time, action, DEFAULT_CAPACITY)
    }

    /// Allocates a new logger that hands over its buffer every `capacity` events.
    pub fn with_capacity(time: Instant, action: Box<dyn FnMut(&Duration, &[(Duration, T)])>, capacity: usize) -> Self {
        let inner = LoggerInner {
            time,
            buffer: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            action,
        };
        Logger { inner: Rc::new(RefCell::new(inner)) }
    }

    /// Logs an event.
    ///
    /// The event is stamped with the time elapsed since the registry was created. It is
    /// buffered, and only presented to the action when the buffer fills or on `flush`.
    pub fn log<E: Into<T>>(&self, event: E) {
        self.log_many(Some(event));
    }

    /// Logs several events, all stamped with the same time.
    pub fn log_many<E: Into<T>, I: IntoIterator<Item=E>>(&self, events: I) {
        // A logger that is already flushing is being asked to log from within its own action;
        // those events are dropped rather than re-entering the action.
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            let elapsed = inner.time.elapsed();
            for event in events {
                inner.buffer.push((elapsed, event.into()));
                if inner.buffer.len() >= inner.capacity {
                    inner.flush();
                }
            }
        }
    }

    /// Presents all buffered events to the action.
    pub fn flush(&self) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.flush();
        }
    }
}

/// Types that can be flushed.
trait Flush {
    fn flush(&self);
}

impl<T> Flush for Logger<T> {
    fn flush(&self) {
        Logger::flush(self)
    }
}

#[cfg(test)]
mod tests {

    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Instant;

    use super::{Logger, Registry};

    #[test]
    fn registry_round_trip() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);

        let mut registry = Registry::new(Instant::now());
        registry.insert::<u64, _>("numbers", move |_time, batch| {
            seen2.borrow_mut().extend(batch.iter().map(|(_, x)| *x));
        });

        let logger = registry.get::<u64>("numbers").unwrap();
        logger.log(1u64);
        logger.log_many(vec![2u64, 3]);
        assert!(seen.borrow().is_empty());
        registry.flush();
        assert_eq!(&*seen.borrow(), &[1, 2, 3]);

        assert!(registry.get::<String>("numbers").is_none());
        assert!(registry.get::<u64>("letters").is_none());
    }

    #[test]
    fn capacity_triggers_flush() {
        let batches = Rc::new(RefCell::new(0));
        let batches2 = Rc::clone(&batches);
        let logger = Logger::<u64>::with_capacity(Instant::now(), Box::new(move |_, batch| {
            if !batch.is_empty() { *batches2.borrow_mut() += 1; }
        }), 2);
        for i in 0 .. 5u64 { logger.log(i); }
        assert_eq!(*batches.borrow(), 2);
        drop(logger);
        assert_eq!(*batches.borrow(), 3);
    }
}
