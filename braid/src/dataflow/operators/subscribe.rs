//! Observe the completed batches of a stream.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::Data;
use crate::dataflow::channels::Pact;
use crate::dataflow::graph::Stream;
use crate::error::Error;
use crate::progress::Timestamp;

/// Hands each completed batch of a stream to a closure.
pub trait Subscribe<T: Timestamp, D: Data> {
    /// Calls `action` once per time and worker, with every record of that time the worker saw.
    ///
    /// A time is complete once no record at or before it can still arrive. Times complete in
    /// ascending order for totally ordered timestamps; records within a batch are in arrival order.
    fn subscribe<F: FnMut(&T, Vec<D>) + 'static>(&self, action: F) -> Result<(), Error>;
}

impl<T: Timestamp, D: Data> Subscribe<T, D> for Stream<T, D> {
    fn subscribe<F: FnMut(&T, Vec<D>) + 'static>(&self, action: F) -> Result<(), Error> {

        let action = Rc::new(RefCell::new(action));
        let mut stage = self.graph().stage("Subscribe").parallelism(self.parallelism());
        let input = stage.new_input(self, Pact::Pipeline)?;

        stage.build(|vertex| {
            let stash = Rc::new(RefCell::new(HashMap::<T, Vec<D>>::new()));

            let handle = vertex.handle();
            let received = Rc::clone(&stash);
            vertex.on_receive(&input, move |message| {
                received.borrow_mut().entry(message.time.clone()).or_default().append(&mut message.data);
                handle.notify_at(message.time.clone());
            })?;

            let action = Rc::clone(&action);
            vertex.on_notify(move |time| {
                let batch = stash.borrow_mut().remove(time);
                if let Some(records) = batch {
                    (action.borrow_mut())(time, records);
                }
            });
            Ok(())
        })?;
        Ok(())
    }
}
